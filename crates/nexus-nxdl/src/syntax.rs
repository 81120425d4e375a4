//! Lossless syntax tree for NXDL documents
//!
//! The tree keeps every attribute as written (in source order) and every documentation
//! line after normalisation. Node positions double as comment anchors: a node is
//! addressed by an annotation string such as `definition/2/doc`, built with the
//! helpers in [`anchor`].

use crate::comments::CommentStream;
use indexmap::IndexMap;
use std::cmp::Ordering;

pub type Attributes = IndexMap<String, String>;

/// Element kinds that can appear in the element tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Definition,
    Group,
    Field,
    Attribute,
    Choice,
    Link,
}

impl ElementKind {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Definition => "definition",
            Self::Group => "group",
            Self::Field => "field",
            Self::Attribute => "attribute",
            Self::Choice => "choice",
            Self::Link => "link",
        }
    }

    /// Child element kinds only; `definition` is never a child
    pub fn from_child_tag(tag: &str) -> Option<Self> {
        match tag {
            "group" => Some(Self::Group),
            "field" => Some(Self::Field),
            "attribute" => Some(Self::Attribute),
            "choice" => Some(Self::Choice),
            "link" => Some(Self::Link),
            _ => None,
        }
    }
}

/// Normalised documentation text, one entry per line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Doc {
    pub lines: Vec<String>,
}

impl Doc {
    /// Normalise free text: trailing whitespace removed, blank edge lines dropped,
    /// common indentation stripped.
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: normalize_lines(text.split('\n').map(str::to_string).collect()),
        }
    }

    pub fn from_lines(lines: Vec<String>) -> Self {
        Self {
            lines: normalize_lines(lines),
        }
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Symbol {
    pub attributes: Attributes,
    pub doc: Option<Doc>,
}

impl Symbol {
    pub fn name(&self) -> Option<&str> {
        self.attributes.get("name").map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Symbols {
    pub attributes: Attributes,
    pub doc: Option<Doc>,
    pub symbols: Vec<Symbol>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dim {
    pub attributes: Attributes,
    pub doc: Option<Doc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dimensions {
    pub attributes: Attributes,
    pub doc: Option<Doc>,
    pub dims: Vec<Dim>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    pub attributes: Attributes,
    pub doc: Option<Doc>,
}

impl Item {
    pub fn value(&self) -> Option<&str> {
        self.attributes.get("value").map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enumeration {
    pub attributes: Attributes,
    pub items: Vec<Item>,
}

/// One `definition`, `group`, `field`, `attribute`, `choice` or `link` element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NxdlElement {
    pub kind: ElementKind,
    pub attributes: Attributes,
    pub doc: Option<Doc>,
    pub symbols: Option<Symbols>,
    pub dimensions: Option<Dimensions>,
    pub enumeration: Option<Enumeration>,
    pub children: Vec<NxdlElement>,
}

impl NxdlElement {
    pub fn new(kind: ElementKind) -> Self {
        Self {
            kind,
            attributes: Attributes::new(),
            doc: None,
            symbols: None,
            dimensions: None,
            enumeration: None,
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.attr("name")
    }

    pub fn type_token(&self) -> Option<&str> {
        self.attr("type")
    }

    pub fn doc_text(&self) -> Option<String> {
        self.doc.as_ref().map(Doc::text)
    }
}

/// Parsed NXDL file: the element tree plus its comments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NxdlDocument {
    pub root: NxdlElement,
    pub comments: CommentStream,
}

impl NxdlDocument {
    pub fn new(root: NxdlElement) -> Self {
        Self {
            root,
            comments: CommentStream::default(),
        }
    }
}

/// Annotation strings addressing nodes of the tree
pub mod anchor {
    pub const DOCUMENT: &str = "document";
    pub const ROOT: &str = "definition";

    pub fn child(parent: &str, index: usize) -> String {
        format!("{parent}/{index}")
    }

    pub fn doc(parent: &str) -> String {
        format!("{parent}/doc")
    }

    pub fn symbols(parent: &str) -> String {
        format!("{parent}/symbols")
    }

    pub fn dimensions(parent: &str) -> String {
        format!("{parent}/dimensions")
    }

    pub fn enumeration(parent: &str) -> String {
        format!("{parent}/enumeration")
    }

    /// The `dim` list inside a `dimensions` node
    pub fn dim_list(dimensions: &str) -> String {
        format!("{dimensions}/dim")
    }

    pub fn dim_doc(dimensions: &str, index: usize) -> String {
        format!("{dimensions}/dim/{index}/doc")
    }
}

/// Attribute order used by every emitter: identity attributes first, the rest by name
pub fn canonical_attribute_order(a: &str, b: &str) -> Ordering {
    const LEADING: [&str; 4] = ["name", "type", "extends", "category"];
    let rank = |key: &str| LEADING.iter().position(|k| *k == key).unwrap_or(LEADING.len());
    rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
}

pub fn sorted_attributes(attributes: &Attributes) -> Vec<(&str, &str)> {
    let mut pairs: Vec<(&str, &str)> = attributes
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    pairs.sort_by(|a, b| canonical_attribute_order(a.0, b.0));
    pairs
}

/// Trailing whitespace trimmed, blank edge lines dropped, common indentation removed
pub fn normalize_lines(lines: Vec<String>) -> Vec<String> {
    let mut lines: Vec<String> = lines
        .into_iter()
        .map(|line| line.trim_end().to_string())
        .collect();
    while lines.first().is_some_and(String::is_empty) {
        lines.remove(0);
    }
    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    dedent(&mut lines);
    lines
}

pub(crate) fn dedent(lines: &mut [String]) {
    let indent = lines
        .iter()
        .filter(|line| !line.is_empty())
        .map(|line| line.chars().take_while(|c| c.is_whitespace()).count())
        .min()
        .unwrap_or(0);
    if indent == 0 {
        return;
    }
    for line in lines.iter_mut().filter(|line| !line.is_empty()) {
        *line = line.chars().skip(indent).collect();
    }
}
