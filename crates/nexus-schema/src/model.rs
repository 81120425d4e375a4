//! Semantic schema model
//!
//! The resolved tree every downstream stage reads. Unlike the `nexus-nxdl` syntax
//! tree it has no comments, no attribute order and no inheritance pointers: by the
//! time a [`Schema`] exists, `extends` has been spliced in and optionality has been
//! normalised to one of three values.

use nexus_ir::Segment;
use serde::Serialize;

/// Type prefix of the canonical definition family
pub const TYPE_PREFIX: &str = "NX";

/// Type token of top-level entry groups
pub const ENTRY_TYPE: &str = "NXentry";

/// Sentinel unit category for fields that carry no unit
pub const UNITLESS: &str = "NX_UNITLESS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Group,
    Field,
    Attribute,
    Choice,
    Link,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Field => "field",
            Self::Attribute => "attribute",
            Self::Choice => "choice",
            Self::Link => "link",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Optionality {
    Required,
    Recommended,
    Optional,
}

impl Optionality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Recommended => "recommended",
            Self::Optional => "optional",
        }
    }

    /// Optional or recommended: presence of descendants becomes conditional
    pub fn is_conditional(self) -> bool {
        self != Self::Required
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Base,
    Application,
    Contributed,
}

impl Category {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "base" => Some(Self::Base),
            "application" => Some(Self::Application),
            "contributed" => Some(Self::Contributed),
            _ => None,
        }
    }

    /// Optionality of a child that declares none
    pub fn default_optionality(self) -> Optionality {
        match self {
            Self::Base => Optionality::Optional,
            Self::Application | Self::Contributed => Optionality::Required,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    Unitless,
    Category(String),
}

impl Units {
    pub fn parse(token: &str) -> Self {
        if token == UNITLESS {
            Self::Unitless
        } else {
            Self::Category(token.to_string())
        }
    }

    /// True when the field gets a synthetic `@units` key
    pub fn wants_units(&self) -> bool {
        matches!(self, Self::Category(_))
    }
}

/// Allowed literals of a field or attribute
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnumerationSpec {
    pub items: Vec<String>,
    /// A trailing `other` item admits any value (with a warning)
    pub open: bool,
}

impl EnumerationSpec {
    pub const OPEN_SENTINEL: &'static str = "other";

    pub fn from_items(mut items: Vec<String>, open_attribute: bool) -> Self {
        let trailing_other = items.last().is_some_and(|i| i == Self::OPEN_SENTINEL);
        if trailing_other {
            items.pop();
        }
        Self {
            items,
            open: trailing_other || open_attribute,
        }
    }

    pub fn contains(&self, value: &str) -> bool {
        self.items.iter().any(|item| item == value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DimSpec {
    pub index: Option<String>,
    pub value: Option<String>,
    #[serde(rename = "ref")]
    pub reference: Option<String>,
    pub incr: Option<String>,
    pub refindex: Option<String>,
    pub doc: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DimensionsSpec {
    pub rank: Option<String>,
    pub dims: Vec<DimSpec>,
}

/// One resolved group, field, attribute, choice or link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaNode {
    pub kind: NodeKind,
    /// Literal name; `None` for unnamed typed groups
    pub name: Option<String>,
    pub type_token: Option<String>,
    pub optionality: Optionality,
    pub max_occurs: Option<String>,
    pub units: Option<Units>,
    pub enumeration: Option<EnumerationSpec>,
    pub dimensions: Option<DimensionsSpec>,
    pub doc: Option<String>,
    /// Link target for `link` nodes
    pub target: Option<String>,
    pub children: Vec<SchemaNode>,
}

impl SchemaNode {
    pub fn new(kind: NodeKind, optionality: Optionality) -> Self {
        Self {
            kind,
            name: None,
            type_token: None,
            optionality,
            max_occurs: None,
            units: None,
            enumeration: None,
            dimensions: None,
            doc: None,
            target: None,
            children: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_type(mut self, type_token: impl Into<String>) -> Self {
        self.type_token = Some(type_token.into());
        self
    }

    pub fn is_group_like(&self) -> bool {
        matches!(self.kind, NodeKind::Group | NodeKind::Choice)
    }

    /// Key used to match a node against an inherited counterpart
    pub fn identity(&self) -> String {
        match (&self.name, &self.type_token) {
            (Some(name), _) => format!("{}:{name}", self.kind.as_str()),
            (None, Some(ty)) => format!("{}:({ty})", self.kind.as_str()),
            (None, None) => self.kind.as_str().to_string(),
        }
    }

    /// Type token a group is written with; a choice uses its first option
    pub fn group_type(&self) -> Option<&str> {
        match self.kind {
            NodeKind::Choice => self
                .children
                .first()
                .and_then(|option| option.type_token.as_deref()),
            _ => self.type_token.as_deref(),
        }
    }

    /// Children as seen through the path: a choice exposes its first option's children
    pub fn path_children(&self) -> &[SchemaNode] {
        match self.kind {
            NodeKind::Choice => self
                .children
                .first()
                .map_or(&[][..], |option| option.children.as_slice()),
            _ => &self.children,
        }
    }

    /// True for a group without field or attribute children
    pub fn is_lone_group(&self) -> bool {
        self.is_group_like()
            && !self
                .path_children()
                .iter()
                .any(|c| matches!(c.kind, NodeKind::Field | NodeKind::Attribute))
    }

    /// Uppercase placeholder label for unnamed groups and variable names
    pub fn concept_label(&self, type_prefix: &str) -> Option<String> {
        match &self.name {
            Some(name) if is_placeholder(name) => Some(name.clone()),
            Some(_) => None,
            None => self
                .group_type()
                .map(|ty| ty.strip_prefix(type_prefix).unwrap_or(ty).to_uppercase()),
        }
    }

    /// Template segment for this node
    pub fn segment(&self, type_prefix: &str) -> Option<Segment> {
        if self.kind == NodeKind::Attribute {
            return self.name.clone().map(Segment::Attribute);
        }
        match (self.concept_label(type_prefix), &self.name) {
            (Some(concept), _) => Some(Segment::Named {
                name: concept.to_lowercase(),
                concept,
            }),
            (None, Some(name)) => Some(Segment::Literal(name.clone())),
            (None, None) => None,
        }
    }

    pub fn child_attribute(&self, name: &str) -> Option<&SchemaNode> {
        self.children
            .iter()
            .find(|c| c.kind == NodeKind::Attribute && c.name.as_deref() == Some(name))
    }
}

/// Uppercase names stand for a name chosen by the writer of the data
pub fn is_placeholder(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_uppercase())
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// A loaded, inheritance-resolved definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    pub name: String,
    pub category: Category,
    pub version: Option<String>,
    pub extends: Option<String>,
    pub type_prefix: String,
    pub doc: Option<String>,
    pub symbols: Vec<(String, Option<String>)>,
    /// Children of the `definition` element
    pub root: SchemaNode,
}

impl Schema {
    pub fn new(name: impl Into<String>, category: Category) -> Self {
        Self {
            name: name.into(),
            category,
            version: None,
            extends: None,
            type_prefix: TYPE_PREFIX.to_string(),
            doc: None,
            symbols: Vec::new(),
            root: SchemaNode::new(NodeKind::Group, Optionality::Required).with_type("NXroot"),
        }
    }

    pub fn children(&self) -> &[SchemaNode] {
        &self.root.children
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumeration_trailing_other_opens_the_set() {
        let spec = EnumerationSpec::from_items(
            vec!["laser".into(), "x-ray".into(), "other".into()],
            false,
        );
        assert!(spec.open);
        assert_eq!(spec.items, vec!["laser", "x-ray"]);

        let closed = EnumerationSpec::from_items(vec!["other".into(), "a".into()], false);
        assert!(!closed.open);
        assert!(closed.contains("other"));
    }

    #[test]
    fn test_segments() {
        let group = SchemaNode::new(NodeKind::Group, Optionality::Required).with_type("NXdetector");
        assert_eq!(group.segment(TYPE_PREFIX).unwrap().to_string(), "DETECTOR[detector]");

        let named = group.clone().with_name("instrument");
        assert_eq!(named.segment(TYPE_PREFIX).unwrap().to_string(), "instrument");

        let placeholder =
            SchemaNode::new(NodeKind::Field, Optionality::Required).with_name("DATA");
        assert_eq!(placeholder.segment(TYPE_PREFIX).unwrap().to_string(), "DATA[data]");

        let attribute =
            SchemaNode::new(NodeKind::Attribute, Optionality::Required).with_name("signal");
        assert_eq!(attribute.segment(TYPE_PREFIX).unwrap().to_string(), "@signal");
    }

    #[test]
    fn test_placeholder_names() {
        assert!(is_placeholder("AXISNAME"));
        assert!(is_placeholder("DATA_2"));
        assert!(!is_placeholder("data"));
        assert!(!is_placeholder("Data"));
        assert!(!is_placeholder("_1"));
    }

    #[test]
    fn test_lone_group() {
        let mut group =
            SchemaNode::new(NodeKind::Group, Optionality::Required).with_type("NXsample");
        assert!(group.is_lone_group());
        group
            .children
            .push(SchemaNode::new(NodeKind::Field, Optionality::Required).with_name("name"));
        assert!(!group.is_lone_group());
    }
}
