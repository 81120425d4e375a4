//! Flat key/value reader
//!
//! Each input is a JSON or YAML mapping from template keys to values:
//!
//! ```yaml
//! /ENTRY[entry]/start_time: "2023-05-01T10:00:00+02:00"
//! /ENTRY[entry]/count: 5
//! /entry/instrument/detector/mode: count
//! /ENTRY[entry]/DATA[data]/y: {compress: [1.0, 2.0, 3.0], strength: 6}
//! "@default_plot": /ENTRY[entry]/DATA[data]
//! ```
//!
//! Later files override earlier ones key by key.

use crate::reader::{ReadOptions, Reader, WILDCARD, load_object};
use crate::{Error, Result};
use nexus_ir::{Template, Value};
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use tracing::{debug, info};

/// Key naming the group viewers should plot first
pub const DEFAULT_PLOT_KEY: &str = "@default_plot";

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMapReader;

impl JsonMapReader {
    pub fn new() -> Self {
        Self
    }
}

impl Reader for JsonMapReader {
    fn name(&self) -> &str {
        "json_map"
    }

    fn supported_schemas(&self) -> &[&str] {
        &[WILDCARD]
    }

    fn read(
        &self,
        template: &mut Template,
        paths: &[PathBuf],
        _options: &ReadOptions,
    ) -> Result<()> {
        if paths.is_empty() {
            return Err(Error::MissingInput {
                reader: self.name().to_string(),
            });
        }

        let mut written = 0usize;
        for path in paths {
            let map = load_object(path)?;
            debug!(path = %path.display(), keys = map.len(), "reading key map");

            for (key, raw) in &map {
                if key == DEFAULT_PLOT_KEY {
                    let JsonValue::String(group) = raw else {
                        return Err(Error::parse(path, "@default_plot must name a group key"));
                    };
                    template.set_default_plot(group.clone());
                    continue;
                }
                if !key.starts_with('/') {
                    return Err(Error::parse(
                        path,
                        format!("key '{key}' is not an absolute template path"),
                    ));
                }
                let value = Value::from_json(raw)?;
                template.set(key, value)?;
                written += 1;
            }
        }

        info!(
            reader = self.name(),
            files = paths.len(),
            written,
            "reader finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_ir::{Partition, Scalar};
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn input(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn template() -> Template {
        let mut template = Template::new("NXscan", "NX");
        template
            .seed("/ENTRY[entry]/count", Partition::Required)
            .unwrap();
        template
            .seed("/ENTRY[entry]/title", Partition::Optional)
            .unwrap();
        template
    }

    #[test]
    fn test_values_land_on_seeded_keys() {
        let file = input(
            ".json",
            r#"{"/ENTRY[entry]/count": 5, "/ENTRY[entry]/title": "scan 1"}"#,
        );
        let mut template = template();
        JsonMapReader::new()
            .read(&mut template, &[file.path().to_path_buf()], &ReadOptions::new())
            .unwrap();

        assert_eq!(
            template.value("/ENTRY[entry]/count"),
            Some(&Value::Scalar(Scalar::Int(5)))
        );
        assert_eq!(template.value("/ENTRY[entry]/title").and_then(Value::as_str), Some("scan 1"));
        assert_eq!(template.undocumented().count(), 0);
    }

    #[test]
    fn test_unknown_keys_go_undocumented_and_later_files_win() {
        let first = input(
            ".yaml",
            "/entry/instrument/detector/mode: count\n/ENTRY[entry]/count: 1\n",
        );
        let second = input(".yml", "/ENTRY[entry]/count: 2\n");
        let mut template = template();
        JsonMapReader::new()
            .read(
                &mut template,
                &[first.path().to_path_buf(), second.path().to_path_buf()],
                &ReadOptions::new(),
            )
            .unwrap();

        assert_eq!(
            template.undocumented().collect::<Vec<_>>(),
            vec!["/entry/instrument/detector/mode"]
        );
        assert_eq!(template.value("/ENTRY[entry]/count"), Some(&Value::from(2i64)));
    }

    #[test]
    fn test_default_plot_marker_and_compression() {
        let file = input(
            ".json",
            r#"{"@default_plot": "/ENTRY[entry]/DATA[data]",
                "/ENTRY[entry]/DATA[data]/y": {"compress": [1.0, 2.0], "strength": 6}}"#,
        );
        let mut template = template();
        JsonMapReader::new()
            .read(&mut template, &[file.path().to_path_buf()], &ReadOptions::new())
            .unwrap();

        assert_eq!(template.default_plot(), Some("/ENTRY[entry]/DATA[data]"));
        assert!(matches!(
            template.value("/ENTRY[entry]/DATA[data]/y"),
            Some(Value::Compressed { strength: 6, .. })
        ));
    }

    #[test]
    fn test_rejects_relative_keys_and_missing_inputs() {
        let file = input(".json", r#"{"entry/count": 5}"#);
        let mut template = template();
        let error = JsonMapReader::new()
            .read(&mut template, &[file.path().to_path_buf()], &ReadOptions::new())
            .unwrap_err();
        assert!(matches!(error, Error::Parse { .. }));

        let error = JsonMapReader::new()
            .read(&mut template, &[], &ReadOptions::new())
            .unwrap_err();
        assert!(matches!(error, Error::MissingInput { .. }));
    }
}
