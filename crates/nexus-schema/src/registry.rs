//! Schema cache shared between conversion runs

use crate::model::Schema;
use dashmap::DashMap;
use std::sync::Arc;

/// Thread-safe cache of resolved schemas keyed by definition name.
///
/// Schemas are immutable once loaded, so entries are handed out as `Arc`s and may be
/// read concurrently by any number of runs.
pub struct ConcurrentSchemaRegistry {
    schemas: DashMap<String, Arc<Schema>>,
}

impl ConcurrentSchemaRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            schemas: DashMap::new(),
        }
    }

    /// Register a schema, replacing any previous entry with the same name
    pub fn register(&self, name: impl Into<String>, schema: Arc<Schema>) {
        self.schemas.insert(name.into(), schema);
    }

    /// Get a schema by name
    pub fn get(&self, name: &str) -> Option<Arc<Schema>> {
        self.schemas.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Check if a schema exists
    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Names of all cached schemas, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn clear(&self) {
        self.schemas.clear();
    }
}

impl Default for ConcurrentSchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use std::thread;

    #[test]
    fn test_register_and_get() {
        let registry = ConcurrentSchemaRegistry::new();
        assert!(registry.is_empty());

        registry.register("NXtest", Arc::new(Schema::new("NXtest", Category::Application)));
        assert!(registry.contains("NXtest"));
        assert_eq!(registry.get("NXtest").unwrap().name, "NXtest");
        assert!(registry.get("NXother").is_none());
    }

    #[test]
    fn test_shared_between_threads() {
        let registry = Arc::new(ConcurrentSchemaRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let name = format!("NXdef{i}");
                    registry.register(name.clone(), Arc::new(Schema::new(&name, Category::Base)));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.names()[0], "NXdef0");
    }
}
