//! Path lookup against a resolved schema
//!
//! Keys reach the schema in three spellings: schema-qualified
//! (`/ENTRY[entry]/DETECTOR[det1]/mode`), instance (`/entry/det1/mode`) and mixtures
//! of both. [`Schema::resolve`] maps any of them onto the schema-qualified spelling,
//! keeping the instance names the caller chose.

use crate::model::{NodeKind, Schema, SchemaNode, Units};
use nexus_ir::{SchemaPath, Segment};

impl Schema {
    /// Node addressed by a schema-qualified path.
    ///
    /// Synthetic `@units` keys have no node of their own and return `None`.
    pub fn node(&self, path: &SchemaPath) -> Option<&SchemaNode> {
        let mut children = self.root.path_children();
        let mut found = None;
        for segment in path.segments() {
            let node = children
                .iter()
                .find(|child| self.matches(child, segment))?;
            children = node.path_children();
            found = Some(node);
        }
        found
    }

    /// [`Schema::node`] for a raw key; malformed keys resolve to nothing
    pub fn node_for_key(&self, key: &str) -> Option<&SchemaNode> {
        SchemaPath::parse(key).ok().and_then(|path| self.node(&path))
    }

    /// Schema-qualified spelling of a key written in any form.
    ///
    /// Literal segments first match literally named children, then unnamed groups
    /// (and placeholder names) whose lowercase stem prefixes the instance name; the
    /// longest stem wins. Returns `None` when some segment matches nothing.
    pub fn resolve(&self, path: &SchemaPath) -> Option<SchemaPath> {
        let mut children = self.root.path_children();
        let mut parent: Option<&SchemaNode> = None;
        let mut resolved = Vec::with_capacity(path.len());

        for segment in path.segments() {
            if let Segment::Attribute(name) = segment {
                if parent.is_some_and(|p| declares_units(p, name)) {
                    resolved.push(segment.clone());
                    return Some(SchemaPath::from_segments(resolved));
                }
            }
            let (node, segment) = self.resolve_segment(children, segment)?;
            resolved.push(segment);
            children = node.path_children();
            parent = Some(node);
        }
        Some(SchemaPath::from_segments(resolved))
    }

    fn matches(&self, node: &SchemaNode, segment: &Segment) -> bool {
        match segment {
            Segment::Attribute(name) => {
                node.kind == NodeKind::Attribute && node.name.as_deref() == Some(name)
            }
            Segment::Named { concept, .. } => {
                node.kind != NodeKind::Attribute
                    && node.concept_label(&self.type_prefix).as_deref() == Some(concept)
            }
            Segment::Literal(name) => {
                node.kind != NodeKind::Attribute
                    && node.concept_label(&self.type_prefix).is_none()
                    && node.name.as_deref() == Some(name)
            }
        }
    }

    fn resolve_segment<'s>(
        &'s self,
        children: &'s [SchemaNode],
        segment: &Segment,
    ) -> Option<(&'s SchemaNode, Segment)> {
        if let Some(node) = children.iter().find(|c| self.matches(c, segment)) {
            return Some((node, segment.clone()));
        }
        let Segment::Literal(instance) = segment else {
            return None;
        };

        let lowered = instance.to_lowercase();
        let mut best: Option<(&SchemaNode, String)> = None;
        for child in children.iter().filter(|c| c.kind != NodeKind::Attribute) {
            let Some(label) = child.concept_label(&self.type_prefix) else {
                continue;
            };
            let longer = best.as_ref().is_none_or(|(_, current)| label.len() > current.len());
            if longer && lowered.starts_with(&label.to_lowercase()) {
                best = Some((child, label));
            }
        }
        best.map(|(node, concept)| {
            (
                node,
                Segment::Named {
                    concept,
                    name: instance.clone(),
                },
            )
        })
    }
}

fn declares_units(owner: &SchemaNode, attribute: &str) -> bool {
    attribute == "units"
        && owner.kind == NodeKind::Field
        && owner.units.as_ref().is_some_and(Units::wants_units)
        && owner.child_attribute("units").is_none()
}
