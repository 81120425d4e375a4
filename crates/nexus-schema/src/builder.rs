//! Schema tree to template
//!
//! A depth-first walk in document order. Each node contributes one key built from
//! its [`SchemaNode::segment`]; fields with a unit category also contribute a
//! synthetic `@units` key in the same partition.

use crate::Result;
use crate::model::{ENTRY_TYPE, NodeKind, Optionality, Schema, SchemaNode};
use nexus_ir::{Partition, SchemaPath, Template};
use tracing::{debug, trace};

pub struct TemplateBuilder<'a> {
    schema: &'a Schema,
}

impl<'a> TemplateBuilder<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Build an empty template for the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if a schema name cannot be spelled as a path segment.
    pub fn build(&self) -> Result<Template> {
        let mut template = Template::new(&self.schema.name, &self.schema.type_prefix)
            .with_version(self.schema.version.clone());
        self.walk(
            self.schema.root.path_children(),
            &SchemaPath::root(),
            None,
            &mut template,
        )?;
        debug!(
            schema = %self.schema.name,
            keys = template.len(),
            "Built template"
        );
        Ok(template)
    }

    /// `conditional` is the nearest optional or recommended ancestor key
    fn walk(
        &self,
        nodes: &[SchemaNode],
        parent: &SchemaPath,
        conditional: Option<&str>,
        template: &mut Template,
    ) -> Result<()> {
        for node in nodes {
            let Some(segment) = node.segment(&self.schema.type_prefix) else {
                trace!(kind = node.kind.as_str(), "Skipping node without a name or type");
                continue;
            };
            let path = parent.child(segment);
            let key = path.to_string();

            let partition = partition_for(node.optionality, conditional);
            let demoted_under = match node.optionality {
                Optionality::Required => conditional,
                _ => None,
            };
            let below = if node.optionality.is_conditional() {
                Some(key.as_str())
            } else {
                conditional
            };

            match node.kind {
                NodeKind::Field => {
                    seed(template, &key, partition, demoted_under)?;
                    if node.units.as_ref().is_some_and(|u| u.wants_units())
                        && node.child_attribute("units").is_none()
                    {
                        let units = path.units_path().to_string();
                        seed(template, &units, partition, None)?;
                        template.add_units_path(units);
                    }
                    self.walk(&node.children, &path, below, template)?;
                }
                NodeKind::Attribute | NodeKind::Link => {
                    seed(template, &key, partition, demoted_under)?;
                }
                NodeKind::Group | NodeKind::Choice => {
                    let group_type = node.group_type();
                    if let Some(type_token) = group_type {
                        template.set_group_type(&key, type_token);
                    }
                    if node.is_lone_group() && group_type != Some(ENTRY_TYPE) {
                        seed(template, &key, partition, demoted_under)?;
                        template.add_lone_group(&key);
                    }
                    self.walk(node.path_children(), &path, below, template)?;
                }
            }
        }
        Ok(())
    }
}

/// Required nodes under an optional or recommended ancestor become optional
fn partition_for(optionality: Optionality, conditional: Option<&str>) -> Partition {
    match (optionality, conditional) {
        (Optionality::Required, Some(_)) => Partition::Optional,
        (Optionality::Required, None) => Partition::Required,
        (Optionality::Recommended, _) => Partition::Recommended,
        (Optionality::Optional, _) => Partition::Optional,
    }
}

/// Seed one key, recording it under `demoted_under` when it was demoted.
/// The same key can come out of two schema nodes (e.g. sibling choices); first one wins.
fn seed(
    template: &mut Template,
    key: &str,
    partition: Partition,
    demoted_under: Option<&str>,
) -> Result<()> {
    if template.contains(key) {
        debug!(key = %key, "Key already seeded, keeping first partition");
        return Ok(());
    }
    template.seed(key, partition)?;
    if let Some(ancestor) = demoted_under {
        template.add_optional_parent(ancestor, key);
    }
    Ok(())
}
