//! Reader registry

use crate::example::ExampleReader;
use crate::json_map::JsonMapReader;
use crate::reader::Reader;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Readers addressed by their short name
#[derive(Clone, Default)]
pub struct ReaderRegistry {
    readers: BTreeMap<String, Arc<dyn Reader>>,
}

impl ReaderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the `json_map` and `example` readers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(JsonMapReader::new());
        registry.register(ExampleReader::new());
        registry
    }

    /// Register a reader under its own name, replacing any previous one
    pub fn register(&mut self, reader: impl Reader + 'static) -> &mut Self {
        let name = reader.name().to_string();
        debug!(reader = %name, "registering reader");
        self.readers.insert(name, Arc::new(reader));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Reader>> {
        self.readers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.readers.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.readers.keys().map(String::as_str).collect()
    }

    /// Pick the reader `name` for `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownReader`] if nothing is registered under `name`, and
    /// [`Error::UnsupportedSchema`] if the reader neither lists `schema` nor accepts any.
    pub fn select(&self, name: &str, schema: &str) -> Result<Arc<dyn Reader>> {
        let reader = self.get(name).ok_or_else(|| Error::UnknownReader {
            name: name.to_string(),
            available: self.names().join(", "),
        })?;
        if !reader.supports(schema) {
            return Err(Error::UnsupportedSchema {
                reader: name.to_string(),
                schema: schema.to_string(),
            });
        }
        Ok(reader)
    }
}

impl std::fmt::Debug for ReaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderRegistry")
            .field("readers", &self.names())
            .finish()
    }
}
