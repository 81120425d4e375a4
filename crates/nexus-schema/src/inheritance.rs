//! `extends` resolution
//!
//! Inherited children are copied into the extending node at load time. Nothing
//! downstream keeps a pointer to the parent definition.

use crate::model::SchemaNode;
use std::collections::HashSet;

/// Tracks `extends` edges to detect cycles
pub struct InheritanceGraph {
    edges: Vec<(String, String)>, // (child, parent)
}

impl InheritanceGraph {
    pub fn new() -> Self {
        Self { edges: Vec::new() }
    }

    pub fn add_edge(&mut self, child: impl Into<String>, parent: impl Into<String>) {
        self.edges.push((child.into(), parent.into()));
    }

    /// Detect if adding this edge would create a cycle
    pub fn would_create_cycle(&self, child: &str, parent: &str) -> bool {
        if child == parent {
            return true;
        }

        // Check if parent depends on child (directly or transitively)
        let mut to_visit = vec![parent.to_string()];
        let mut visited = HashSet::new();

        while let Some(current) = to_visit.pop() {
            if current == child {
                return true;
            }
            if visited.insert(current.clone()) {
                for (c, p) in &self.edges {
                    if c == &current {
                        to_visit.push(p.clone());
                    }
                }
            }
        }

        false
    }

    /// Chain from `name` up to its most basic ancestor
    pub fn ancestors(&self, name: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = name;
        while let Some((_, parent)) = self.edges.iter().find(|(c, _)| c == current) {
            if chain.contains(parent) {
                break;
            }
            chain.push(parent.clone());
            current = parent;
        }
        chain
    }
}

impl Default for InheritanceGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Splice `parent`'s children into `current`.
///
/// Current children keep their order and their own properties; a child that also
/// exists in the parent is completed from it recursively. Parent-only children are
/// appended in the parent's order.
pub fn merge_inherited(parent: &SchemaNode, current: &mut SchemaNode) {
    fill_missing(parent, current);

    let current_ids: HashSet<String> = current.children.iter().map(SchemaNode::identity).collect();

    for child in &mut current.children {
        let id = child.identity();
        if let Some(inherited) = parent.children.iter().find(|p| p.identity() == id) {
            merge_inherited(inherited, child);
        }
    }

    for inherited in &parent.children {
        if !current_ids.contains(&inherited.identity()) {
            current.children.push(inherited.clone());
        }
    }
}

fn fill_missing(parent: &SchemaNode, current: &mut SchemaNode) {
    if current.type_token.is_none() {
        current.type_token = parent.type_token.clone();
    }
    if current.units.is_none() {
        current.units = parent.units.clone();
    }
    if current.enumeration.is_none() {
        current.enumeration = parent.enumeration.clone();
    }
    if current.dimensions.is_none() {
        current.dimensions = parent.dimensions.clone();
    }
    if current.doc.is_none() {
        current.doc = parent.doc.clone();
    }
    if current.max_occurs.is_none() {
        current.max_occurs = parent.max_occurs.clone();
    }
    if current.target.is_none() {
        current.target = parent.target.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeKind, Optionality, Units};

    fn field(name: &str, optionality: Optionality) -> SchemaNode {
        SchemaNode::new(NodeKind::Field, optionality).with_name(name)
    }

    fn group(type_token: &str, children: Vec<SchemaNode>) -> SchemaNode {
        let mut node =
            SchemaNode::new(NodeKind::Group, Optionality::Required).with_type(type_token);
        node.children = children;
        node
    }

    #[test]
    fn test_circular_dependency_detection() {
        let mut graph = InheritanceGraph::new();

        // A -> B -> C
        graph.add_edge("A", "B");
        graph.add_edge("B", "C");

        assert!(graph.would_create_cycle("C", "A"));
        assert!(!graph.would_create_cycle("A", "D"));
        assert!(graph.would_create_cycle("A", "A"));
        assert_eq!(graph.ancestors("A"), vec!["B", "C"]);
    }

    #[test]
    fn test_current_order_wins_and_parent_only_children_follow() {
        let parent = group(
            "NXentry",
            vec![
                field("title", Optionality::Required),
                field("definition", Optionality::Required),
                field("notes", Optionality::Optional),
            ],
        );
        let mut current = group(
            "NXentry",
            vec![
                field("definition", Optionality::Required),
                field("start_time", Optionality::Required),
                field("title", Optionality::Optional),
            ],
        );

        merge_inherited(&parent, &mut current);

        let names: Vec<&str> = current
            .children
            .iter()
            .filter_map(|c| c.name.as_deref())
            .collect();
        assert_eq!(names, vec!["definition", "start_time", "title", "notes"]);
        assert_eq!(current.children[2].optionality, Optionality::Optional);
    }

    #[test]
    fn test_nested_nodes_are_completed_from_parent() {
        let mut inherited_energy = field("energy", Optionality::Required);
        inherited_energy.units = Some(Units::Category("NX_ENERGY".into()));
        inherited_energy.doc = Some("Beam energy.".into());
        let parent = group("NXentry", vec![group("NXbeam", vec![inherited_energy])]);

        let mut own_energy = field("energy", Optionality::Recommended);
        own_energy.doc = Some("Overridden.".into());
        let mut current = group("NXentry", vec![group("NXbeam", vec![own_energy])]);

        merge_inherited(&parent, &mut current);

        let energy = &current.children[0].children[0];
        assert_eq!(energy.optionality, Optionality::Recommended);
        assert_eq!(energy.doc.as_deref(), Some("Overridden."));
        assert_eq!(energy.units, Some(Units::Category("NX_ENERGY".into())));
    }
}
