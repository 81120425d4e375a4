//! Schema-qualified paths and their instance projection
//!
//! A schema-qualified key such as `/ENTRY[entry]/instrument/DETECTOR[det1]/@units`
//! carries the concept (`ENTRY`, `DETECTOR`) next to the concrete instance name.
//! Projecting to the instance path keeps only the concrete names:
//! `/entry/instrument/det1/@units`. The projection is total; going the other way
//! needs the schema and lives in `nexus-schema`.

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// One segment of a [`SchemaPath`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// `TYPE[name]`: a named instance of a typed group
    Named { concept: String, name: String },

    /// A bare literal (field or literally-named group)
    Literal(String),

    /// `@name`: an attribute of the enclosing group or field
    Attribute(String),
}

impl Segment {
    /// Parse a single segment.
    ///
    /// # Errors
    ///
    /// Returns an error for empty segments or malformed `TYPE[name]` brackets.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::invalid_path(raw, "empty segment"));
        }

        if let Some(name) = raw.strip_prefix('@') {
            if name.is_empty() {
                return Err(Error::invalid_path(raw, "attribute segment without a name"));
            }
            return Ok(Self::Attribute(name.to_string()));
        }

        match raw.find('[') {
            Some(open) => {
                let Some(inner) = raw[open + 1..].strip_suffix(']') else {
                    return Err(Error::invalid_path(raw, "unterminated '[' in segment"));
                };
                let concept = &raw[..open];
                if concept.is_empty() || inner.is_empty() || inner.contains(['[', ']']) {
                    return Err(Error::invalid_path(
                        raw,
                        "expected TYPE[name] with non-empty type and name",
                    ));
                }
                Ok(Self::Named {
                    concept: concept.to_string(),
                    name: inner.to_string(),
                })
            }
            None if raw.contains(']') => Err(Error::invalid_path(raw, "stray ']' in segment")),
            None => Ok(Self::Literal(raw.to_string())),
        }
    }

    /// Concrete instance name (`bar` for `FOO[bar]`, `@a` for attributes)
    pub fn instance(&self) -> String {
        match self {
            Self::Named { name, .. } => name.clone(),
            Self::Literal(name) => name.clone(),
            Self::Attribute(name) => format!("@{name}"),
        }
    }

    /// Concept form used to look the segment up in the schema
    pub fn concept(&self) -> String {
        match self {
            Self::Named { concept, .. } => concept.clone(),
            Self::Literal(name) => name.clone(),
            Self::Attribute(name) => format!("@{name}"),
        }
    }

    /// Bare name without the `@` marker or the type token
    pub fn name(&self) -> &str {
        match self {
            Self::Named { name, .. } => name,
            Self::Literal(name) | Self::Attribute(name) => name,
        }
    }

    pub fn is_attribute(&self) -> bool {
        matches!(self, Self::Attribute(_))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named { concept, name } => write!(f, "{concept}[{name}]"),
            Self::Literal(name) => f.write_str(name),
            Self::Attribute(name) => write!(f, "@{name}"),
        }
    }
}

/// An absolute path made of [`Segment`]s
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SchemaPath {
    segments: Vec<Segment>,
}

impl SchemaPath {
    /// The root path `/`
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse an absolute key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not start with `/`, has an empty segment,
    /// or places an attribute anywhere but last.
    pub fn parse(key: &str) -> Result<Self> {
        let Some(rest) = key.strip_prefix('/') else {
            return Err(Error::invalid_path(key, "keys must begin with '/'"));
        };
        if rest.is_empty() {
            return Err(Error::invalid_path(key, "key has no segments"));
        }

        let segments = rest
            .split('/')
            .map(|raw| Segment::parse(raw).map_err(|e| reframe(key, e)))
            .collect::<Result<Vec<_>>>()?;

        if let Some(pos) = segments.iter().position(Segment::is_attribute) {
            if pos + 1 != segments.len() {
                return Err(Error::invalid_path(key, "attribute segment must be last"));
            }
        }

        Ok(Self { segments })
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// Path with the last segment removed; `None` at the root
    pub fn parent(&self) -> Option<SchemaPath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append a segment
    pub fn child(&self, segment: Segment) -> SchemaPath {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    /// First `len` segments
    pub fn prefix(&self, len: usize) -> SchemaPath {
        Self {
            segments: self.segments[..len.min(self.segments.len())].to_vec(),
        }
    }

    /// Instance projection, e.g. `/entry/instrument/det1/mode`
    pub fn instance_path(&self) -> String {
        join(self.segments.iter().map(Segment::instance))
    }

    /// Concept projection, e.g. `/ENTRY/instrument/DETECTOR/mode`
    pub fn concept_path(&self) -> String {
        join(self.segments.iter().map(Segment::concept))
    }

    /// Segment-wise prefix test, including equality
    pub fn starts_with(&self, other: &SchemaPath) -> bool {
        self.segments.len() >= other.segments.len()
            && self.segments[..other.segments.len()] == other.segments[..]
    }

    /// True when `ancestor` is a proper prefix of this path
    pub fn is_child_of(&self, ancestor: &SchemaPath) -> bool {
        self.segments.len() > ancestor.segments.len() && self.starts_with(ancestor)
    }

    /// True for keys ending in `/@units`
    pub fn is_units(&self) -> bool {
        matches!(self.last(), Some(Segment::Attribute(name)) if name == "units")
    }

    /// Sibling `…/@units` key of a field
    pub fn units_path(&self) -> SchemaPath {
        self.child(Segment::Attribute("units".to_string()))
    }

    /// Swap the first `len` segments for `prefix`
    pub fn replace_prefix(&self, len: usize, prefix: &SchemaPath) -> SchemaPath {
        let mut segments = prefix.segments.clone();
        segments.extend_from_slice(&self.segments[len.min(self.segments.len())..]);
        Self { segments }
    }

    /// Number of leading segments shared with `other`
    pub fn common_prefix_len(&self, other: &SchemaPath) -> usize {
        self.segments
            .iter()
            .zip(&other.segments)
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Number of leading segments whose concepts agree with `other`
    pub fn concept_prefix_len(&self, other: &SchemaPath) -> usize {
        self.segments
            .iter()
            .zip(&other.segments)
            .take_while(|(a, b)| a.concept() == b.concept())
            .count()
    }
}

impl fmt::Display for SchemaPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for SchemaPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn join(parts: impl Iterator<Item = String>) -> String {
    let mut out = String::new();
    for part in parts {
        out.push('/');
        out.push_str(&part);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

fn reframe(key: &str, error: Error) -> Error {
    match error {
        Error::InvalidPath { path, reason } => {
            Error::invalid_path(key, format!("segment '{path}': {reason}"))
        }
        other => other,
    }
}
