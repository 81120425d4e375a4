//! Template emission
//!
//! Keys are visited in template order, which is schema document order. For each
//! set value the writer translates the schema-qualified key to its instance path,
//! creates missing ancestor groups (each annotated with `@type`), then writes the
//! dataset, link or attribute. Entry groups also get `@version`. Finally the root
//! `@default` chain is written towards the default plot, or to the first entry.

use crate::container::ContainerTree;
use crate::sink::HierarchicalSink;
use crate::{Error, Result};
use chrono::{SecondsFormat, Utc};
use nexus_ir::{SchemaPath, Segment, Template, Value};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Counts of what a run emitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub groups: usize,
    pub datasets: usize,
    pub attributes: usize,
    pub links: usize,
    /// Undocumented keys left out of the file
    pub skipped: usize,
}

/// Emits templates into a [`HierarchicalSink`]
#[derive(Debug, Clone)]
pub struct Writer {
    creator: String,
}

impl Writer {
    pub fn new() -> Self {
        Self {
            creator: format!("nexus-dataconverter {}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Value of the root `@creator` attribute
    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = creator.into();
        self
    }

    /// Emit every set, documented key of `template` into `sink`.
    ///
    /// # Errors
    ///
    /// Returns the first sink error, or a template error for malformed keys.
    pub fn write<S: HierarchicalSink>(
        &self,
        template: &Template,
        sink: &mut S,
    ) -> Result<WriteSummary> {
        self.emit(template, sink, None)
    }

    /// Write `template` to a container file at `path`.
    ///
    /// Nothing is left at `path` if writing fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the file cannot be written.
    pub fn write_file(&self, template: &Template, path: &Path) -> Result<WriteSummary> {
        let mut tree = ContainerTree::new();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        let summary = self.emit(template, &mut tree, file_name)?;
        tree.save(path)?;
        info!(
            path = %path.display(),
            groups = summary.groups,
            datasets = summary.datasets,
            "output written"
        );
        Ok(summary)
    }

    fn emit<S: HierarchicalSink>(
        &self,
        template: &Template,
        sink: &mut S,
        file_name: Option<String>,
    ) -> Result<WriteSummary> {
        let mut emission = Emission {
            template,
            sink,
            groups: HashSet::new(),
            datasets: HashSet::new(),
            entries: Vec::new(),
            summary: WriteSummary::default(),
        };

        emission.attribute("/", "creator", &Value::from(self.creator.as_str()))?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        emission.attribute("/", "file_time", &Value::from(now))?;
        if let Some(name) = file_name {
            emission.attribute("/", "file_name", &Value::from(name))?;
        }

        for (key, partition, value) in template.entries() {
            let Some(value) = value else {
                continue;
            };
            if !partition.is_documented() {
                debug!(key = %key, "skipping undocumented key");
                emission.summary.skipped += 1;
                continue;
            }
            emission.entry(key, value)?;
        }

        emission.default_chain()?;
        Ok(emission.summary)
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

struct Emission<'a, S> {
    template: &'a Template,
    sink: &'a mut S,
    groups: HashSet<String>,
    datasets: HashSet<String>,
    entries: Vec<String>,
    summary: WriteSummary,
}

impl<S: HierarchicalSink> Emission<'_, S> {
    fn entry(&mut self, key: &str, value: &Value) -> Result<()> {
        let path = SchemaPath::parse(key)?;

        if self.template.is_lone_group(key) {
            return self.ensure_groups(&path);
        }

        let Some(parent) = path.parent() else {
            return Ok(());
        };

        if let Some(Segment::Attribute(name)) = path.last() {
            let owner = parent.instance_path();
            if !parent.is_empty() && !self.datasets.contains(&owner) {
                let owner_key = parent.to_string();
                let template = self.template;
                if template.contains(&owner_key) && !template.is_lone_group(&owner_key) {
                    return Err(Error::container(
                        owner,
                        format!("attribute '@{name}' set on a field without a value"),
                    ));
                }
                self.ensure_groups(&parent)?;
            }
            return self.attribute(&owner, name, value);
        }

        self.ensure_groups(&parent)?;
        let instance = path.instance_path();
        match value {
            Value::Link(target) => {
                self.sink.link(&instance, target)?;
                self.summary.links += 1;
            }
            _ => {
                self.sink.write_dataset(&instance, value)?;
                self.summary.datasets += 1;
            }
        }
        self.datasets.insert(instance);
        Ok(())
    }

    fn ensure_groups(&mut self, path: &SchemaPath) -> Result<()> {
        let entry_type = format!("{}entry", self.template.type_prefix());
        for depth in 1..=path.len() {
            let prefix = path.prefix(depth);
            let instance = prefix.instance_path();
            if self.groups.contains(&instance) {
                continue;
            }
            if self.datasets.contains(&instance) {
                return Err(Error::container(instance, "expected a group, found a dataset"));
            }

            let type_token = self
                .template
                .group_type(&prefix.to_string())
                .unwrap_or_else(|| format!("{}collection", self.template.type_prefix()));
            debug!(group = %instance, group_type = %type_token, "creating group");
            self.sink.create_group(&instance, &type_token)?;
            self.summary.groups += 1;
            self.groups.insert(instance.clone());

            if type_token == entry_type {
                let template = self.template;
                let version = template.schema_version().unwrap_or("unknown");
                self.attribute(&instance, "version", &Value::from(version))?;
                if let Some(name) = prefix.last() {
                    self.entries.push(name.instance());
                }
            }
        }
        Ok(())
    }

    fn attribute(&mut self, owner: &str, name: &str, value: &Value) -> Result<()> {
        self.sink.write_attribute(owner, name, value)?;
        self.summary.attributes += 1;
        Ok(())
    }

    /// `@default` on every group from the root down to the default plot
    fn default_chain(&mut self) -> Result<()> {
        let template = self.template;
        if let Some(key) = template.default_plot() {
            let path = SchemaPath::parse(key)?;
            if self.groups.contains(&path.instance_path()) {
                for (depth, segment) in path.segments().iter().enumerate() {
                    let owner = path.prefix(depth).instance_path();
                    self.attribute(&owner, "default", &Value::from(segment.instance()))?;
                }
                return Ok(());
            }
            warn!(
                default_plot = %key,
                "default plot group was not written, using the first entry"
            );
        }

        if let Some(first) = self.entries.first().cloned() {
            self.attribute("/", "default", &Value::from(first))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_ir::Partition;

    #[derive(Debug, Default)]
    struct RecordingSink {
        calls: Vec<String>,
    }

    impl HierarchicalSink for RecordingSink {
        fn create_group(&mut self, path: &str, type_token: &str) -> Result<()> {
            self.calls.push(format!("group {path} {type_token}"));
            Ok(())
        }

        fn write_dataset(&mut self, path: &str, value: &Value) -> Result<()> {
            self.calls.push(format!("dataset {path} {}", value.describe()));
            Ok(())
        }

        fn write_attribute(&mut self, owner: &str, name: &str, value: &Value) -> Result<()> {
            if owner != "/" || name == "default" {
                self.calls.push(format!("attr {owner} @{name}={}", value.to_json()));
            }
            Ok(())
        }

        fn link(&mut self, path: &str, target: &str) -> Result<()> {
            self.calls.push(format!("link {path} -> {target}"));
            Ok(())
        }
    }

    fn template() -> Template {
        let mut template = Template::new("NXscan", "NX").with_version(Some("3.1".to_string()));
        for (key, partition) in [
            ("/ENTRY[entry]/start_time", Partition::Required),
            ("/ENTRY[entry]/count", Partition::Required),
            ("/ENTRY[entry]/count/@units", Partition::Required),
            ("/ENTRY[entry]/INSTRUMENT[instrument]/name", Partition::Optional),
            ("/ENTRY[entry]/DATA[data]/@signal", Partition::Recommended),
            ("/ENTRY[entry]/DATA[data]/y", Partition::Recommended),
            ("/ENTRY[entry]/DATA[data]/x", Partition::Optional),
        ] {
            template.seed(key, partition).unwrap();
        }
        template.set_group_type("/ENTRY[entry]", "NXentry");
        template.set_group_type("/ENTRY[entry]/INSTRUMENT[instrument]", "NXinstrument");
        template.set_group_type("/ENTRY[entry]/DATA[data]", "NXdata");
        template
    }

    fn filled() -> Template {
        let mut template = template();
        template
            .set("/ENTRY[entry]/start_time", Value::from("2023-05-01T10:00:00+02:00"))
            .unwrap();
        template.set("/ENTRY[entry]/count", Value::from(5i64)).unwrap();
        template
            .set("/ENTRY[entry]/count/@units", Value::from("counts"))
            .unwrap();
        template
            .set("/ENTRY[entry]/DATA[data]/@signal", Value::from("y"))
            .unwrap();
        template
            .set("/ENTRY[entry]/DATA[data]/y", Value::from(1.5))
            .unwrap();
        template
            .set("/ENTRY[entry]/DATA[data]/x", Value::Link("/entry/count".to_string()))
            .unwrap();
        template
    }

    #[test]
    fn test_emission_follows_template_order() {
        let mut sink = RecordingSink::default();
        let summary = Writer::new().write(&filled(), &mut sink).unwrap();

        assert_eq!(
            sink.calls,
            vec![
                "group /entry NXentry",
                "attr /entry @version=\"3.1\"",
                "dataset /entry/start_time string",
                "dataset /entry/count int",
                "attr /entry/count @units=\"counts\"",
                "group /entry/data NXdata",
                "attr /entry/data @signal=\"y\"",
                "dataset /entry/data/y float",
                "link /entry/data/x -> /entry/count",
                "attr / @default=\"entry\"",
            ]
        );
        assert_eq!(summary.groups, 2);
        assert_eq!(summary.datasets, 3);
        assert_eq!(summary.links, 1);
        assert_eq!(summary.skipped, 0);
    }

    #[test]
    fn test_default_plot_chain() {
        let mut template = filled();
        template.set_default_plot("/ENTRY[entry]/DATA[data]");
        let mut sink = RecordingSink::default();
        Writer::new().write(&template, &mut sink).unwrap();

        let tail: Vec<_> = sink.calls.iter().rev().take(2).rev().cloned().collect();
        assert_eq!(
            tail,
            vec!["attr / @default=\"entry\"", "attr /entry @default=\"data\""]
        );
    }

    #[test]
    fn test_units_without_field_is_rejected() {
        let mut template = template();
        template
            .set("/ENTRY[entry]/count/@units", Value::from("counts"))
            .unwrap();
        let error = Writer::new()
            .write(&template, &mut RecordingSink::default())
            .unwrap_err();
        assert!(error.to_string().contains("/entry/count"), "{error}");
    }

    #[test]
    fn test_undocumented_and_unset_keys_are_not_written() {
        let mut template = template();
        template.set("/ENTRY[entry]/count", Value::from(1i64)).unwrap();
        template.set("/entry/stray", Value::from("x")).unwrap();
        let mut sink = RecordingSink::default();
        let summary = Writer::new().write(&template, &mut sink).unwrap();

        assert_eq!(summary.skipped, 1);
        assert!(!sink.calls.iter().any(|c| c.contains("stray")));
        assert!(!sink.calls.iter().any(|c| c.contains("instrument")));
    }

    #[test]
    fn test_renamed_instance_keeps_group_type() {
        let mut template = template();
        template
            .seed("/ENTRY[entry]/DATA[plot_1]/y", Partition::Recommended)
            .unwrap();
        template
            .set("/ENTRY[entry]/DATA[plot_1]/y", Value::from(2.0))
            .unwrap();
        let mut sink = RecordingSink::default();
        Writer::new().write(&template, &mut sink).unwrap();
        assert!(sink.calls.contains(&"group /entry/plot_1 NXdata".to_string()));
    }
}
