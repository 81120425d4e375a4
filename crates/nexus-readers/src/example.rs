//! Reader for the `NXtest` fixture schema
//!
//! Inputs hold keys relative to the entry group (`instrument/detector/mode`).
//! The reader prefixes them with `/ENTRY[<entry>]/` and records the schema
//! name in `definition` unless an input already did.

use crate::json_map::DEFAULT_PLOT_KEY;
use crate::reader::{ReadOptions, Reader, load_object};
use crate::{Error, Result};
use nexus_ir::{Template, Value};
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default)]
pub struct ExampleReader;

impl ExampleReader {
    pub fn new() -> Self {
        Self
    }
}

fn entry_key(entry: &str, relative: &str) -> String {
    if relative.starts_with('/') {
        relative.to_string()
    } else {
        format!("/ENTRY[{entry}]/{}", relative.trim_end_matches('/'))
    }
}

impl Reader for ExampleReader {
    fn name(&self) -> &str {
        "example"
    }

    fn supported_schemas(&self) -> &[&str] {
        &["NXtest"]
    }

    fn read(
        &self,
        template: &mut Template,
        paths: &[PathBuf],
        options: &ReadOptions,
    ) -> Result<()> {
        if paths.is_empty() {
            return Err(Error::MissingInput {
                reader: self.name().to_string(),
            });
        }

        for path in paths {
            let map = load_object(path)?;
            debug!(
                path = %path.display(),
                keys = map.len(),
                entry = %options.entry,
                "reading example input"
            );

            for (key, raw) in &map {
                if key == DEFAULT_PLOT_KEY {
                    let JsonValue::String(group) = raw else {
                        return Err(Error::parse(path, "@default_plot must name a group"));
                    };
                    template.set_default_plot(entry_key(&options.entry, group));
                    continue;
                }
                template.set(&entry_key(&options.entry, key), Value::from_json(raw)?)?;
            }
        }

        let definition = entry_key(&options.entry, "definition");
        if !template.is_set(&definition) {
            let schema = template.schema_name().to_string();
            template.set(&definition, Value::from(schema))?;
        }

        info!(reader = self.name(), files = paths.len(), "reader finished");
        Ok(())
    }
}
