//! Params file loading
//!
//! A params file is a two-level YAML mapping. The `reader` section is handed to
//! the reader untouched; every other section holds converter options:
//!
//! ```yaml
//! dataconverter:
//!   reader: json_map
//!   nxdl: NXscan
//!   input-file: [values.json]
//!   output: scan.nxs.json
//!   fail: true
//! reader:
//!   entry: scan_1
//! ```
//!
//! Dashes in keys are read as underscores.

use crate::{Error, Result};
use serde_json::{Map, Value as JsonValue};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Section passed through to the reader
pub const READER_SECTION: &str = "reader";

/// Options read from a params file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    pub reader: Option<String>,
    pub schema: Option<String>,
    pub input_files: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub generate_template: Option<bool>,
    pub strict: Option<bool>,
    pub schema_roots: Vec<PathBuf>,
    pub reader_settings: Map<String, JsonValue>,
}

impl Params {
    /// Read and parse a params file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and [`Error::Params`] if it
    /// is not a two-level mapping or a value has the wrong shape.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::io("read params", path.display().to_string(), e.to_string()))?;
        Self::parse(&text, path)
    }

    /// Parse params text; `origin` is only used in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Params`] for malformed documents.
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        let document: JsonValue =
            serde_yaml::from_str(text).map_err(|e| Error::params(origin, e.to_string()))?;

        let sections = match document {
            JsonValue::Object(sections) => sections,
            JsonValue::Null => return Ok(Self::default()),
            _ => return Err(Error::params(origin, "expected a mapping of sections")),
        };

        let mut params = Self::default();
        for (section, body) in sections {
            let section = normalize(&section);
            let entries = match body {
                JsonValue::Object(entries) => entries,
                JsonValue::Null => continue,
                _ => {
                    return Err(Error::params(
                        origin,
                        format!("section '{section}' must be a mapping"),
                    ));
                }
            };

            if section == READER_SECTION {
                for (key, value) in entries {
                    params.reader_settings.insert(normalize(&key), value);
                }
                continue;
            }

            for (key, value) in entries {
                params.apply(&normalize(&key), value, origin)?;
            }
        }

        debug!(path = %origin.display(), ?params, "params loaded");
        Ok(params)
    }

    fn apply(&mut self, key: &str, value: JsonValue, origin: &Path) -> Result<()> {
        match key {
            "reader" => self.reader = Some(string(key, value, origin)?),
            "nxdl" | "schema" => self.schema = Some(string(key, value, origin)?),
            "input_file" | "input_files" => {
                self.input_files
                    .extend(strings(key, value, origin)?.into_iter().map(PathBuf::from));
            }
            "output" => self.output = Some(PathBuf::from(string(key, value, origin)?)),
            "generate_template" => self.generate_template = Some(boolean(key, value, origin)?),
            "strict" | "fail" => self.strict = Some(boolean(key, value, origin)?),
            "schema_root" | "schema_roots" => {
                self.schema_roots
                    .extend(strings(key, value, origin)?.into_iter().map(PathBuf::from));
            }
            other => warn!(key = other, path = %origin.display(), "ignoring unknown params key"),
        }
        Ok(())
    }
}

fn normalize(key: &str) -> String {
    key.replace('-', "_")
}

fn string(key: &str, value: JsonValue, origin: &Path) -> Result<String> {
    match value {
        JsonValue::String(s) => Ok(s),
        _ => Err(Error::params(origin, format!("'{key}' must be a string"))),
    }
}

fn strings(key: &str, value: JsonValue, origin: &Path) -> Result<Vec<String>> {
    match value {
        JsonValue::String(s) => Ok(vec![s]),
        JsonValue::Array(items) => items
            .into_iter()
            .map(|item| string(key, item, origin))
            .collect(),
        _ => Err(Error::params(
            origin,
            format!("'{key}' must be a string or a list of strings"),
        )),
    }
}

fn boolean(key: &str, value: JsonValue, origin: &Path) -> Result<bool> {
    match value {
        JsonValue::Bool(b) => Ok(b),
        _ => Err(Error::params(origin, format!("'{key}' must be true or false"))),
    }
}
