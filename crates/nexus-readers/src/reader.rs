//! The reader contract

use crate::{Error, Result};
use nexus_ir::Template;
use serde_json::{Map, Value as JsonValue};
use std::fs;
use std::path::{Path, PathBuf};

/// Schema name a reader lists to accept any schema
pub const WILDCARD: &str = "*";

/// Settings passed through to a reader
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOptions {
    /// Instance name used for the entry group
    pub entry: String,
    /// Reader-specific settings, usually the `reader` section of a params file
    pub settings: Map<String, JsonValue>,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    pub fn setting(&self, key: &str) -> Option<&JsonValue> {
        self.settings.get(key)
    }
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            entry: "entry".to_string(),
            settings: Map::new(),
        }
    }
}

/// A component that fills a template from input files.
///
/// Readers may write schema-qualified keys or instance paths; keys the template
/// does not know land in the undocumented partition for the validator to salvage.
/// Readers must not remove or reorder seeded keys.
pub trait Reader: Send + Sync {
    /// Short name the registry addresses the reader by
    fn name(&self) -> &str;

    /// Schema names this reader understands; [`WILDCARD`] accepts any
    fn supported_schemas(&self) -> &[&str];

    fn supports(&self, schema: &str) -> bool {
        self.supported_schemas()
            .iter()
            .any(|s| *s == WILDCARD || *s == schema)
    }

    /// Fill `template` from `paths`.
    ///
    /// # Errors
    ///
    /// Returns an error when an input cannot be read or parsed, or a key is malformed.
    fn read(&self, template: &mut Template, paths: &[PathBuf], options: &ReadOptions)
        -> Result<()>;
}

/// Load a JSON or YAML document into a JSON object, choosing the syntax by extension
pub(crate) fn load_object(path: &Path) -> Result<Map<String, JsonValue>> {
    let text = fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    let document: JsonValue = if is_yaml {
        serde_yaml::from_str(&text).map_err(|e| Error::parse(path, e.to_string()))?
    } else {
        serde_json::from_str(&text).map_err(|e| Error::parse(path, e.to_string()))?
    };

    match document {
        JsonValue::Object(map) => Ok(map),
        JsonValue::Null => Ok(Map::new()),
        other => Err(Error::parse(
            path,
            format!("expected a mapping at top level, found {}", kind_of(&other)),
        )),
    }
}

fn kind_of(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "a mapping",
    }
}
