//! The conversion template
//!
//! A flat address space of schema-qualified keys. Every key lives in exactly one
//! [`Partition`]; entries are kept in schema document order so that the writer can
//! emit them in that order. Auxiliary sets record lone groups, optional parents,
//! synthetic `@units` keys and the type token of every group the schema names.

use crate::path::{SchemaPath, Segment};
use crate::value::Value;
use crate::{Error, Result};
use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value as JsonValue};
use tracing::trace;

/// Primary key partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    Required,
    Recommended,
    Optional,
    /// Keys written by a reader that the schema does not name
    Undocumented,
}

impl Partition {
    /// Partitions seeded from the schema
    pub const DOCUMENTED: [Partition; 3] = [
        Partition::Required,
        Partition::Recommended,
        Partition::Optional,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Recommended => "recommended",
            Self::Optional => "optional",
            Self::Undocumented => "undocumented",
        }
    }

    pub fn is_documented(self) -> bool {
        self != Self::Undocumented
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    partition: Partition,
    value: Option<Value>,
}

/// Labelled multi-partition map filled by readers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    schema_name: String,
    schema_version: Option<String>,
    type_prefix: String,
    entries: IndexMap<String, Slot>,
    lone_groups: IndexSet<String>,
    optional_parents: IndexMap<String, Vec<String>>,
    units_paths: IndexSet<String>,
    group_types: IndexMap<String, String>,
    default_plot: Option<String>,
}

impl Template {
    /// Create an empty template for `schema_name`, whose group types carry `type_prefix`
    pub fn new(schema_name: impl Into<String>, type_prefix: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
            type_prefix: type_prefix.into(),
            ..Self::default()
        }
    }

    /// Set the schema version recorded on entry groups
    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.schema_version = version;
        self
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn schema_version(&self) -> Option<&str> {
        self.schema_version.as_deref()
    }

    pub fn type_prefix(&self) -> &str {
        &self.type_prefix
    }

    /// Seed a documented key with no value.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed keys, already-seeded keys, or the
    /// undocumented partition.
    pub fn seed(&mut self, key: &str, partition: Partition) -> Result<()> {
        let key = canonical(key)?;
        if !partition.is_documented() {
            return Err(Error::invalid_value(
                key,
                "only documented partitions can be seeded",
            ));
        }
        if self.entries.contains_key(&key) {
            return Err(Error::DuplicateKey { key });
        }
        self.entries.insert(
            key,
            Slot {
                partition,
                value: None,
            },
        );
        Ok(())
    }

    /// Write a value; unknown keys land in the undocumented partition.
    ///
    /// Keys are canonicalised to their schema-qualified spelling first. Writing
    /// `None` marks the key as seeded but unset.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed keys.
    pub fn set(&mut self, key: &str, value: impl Into<Option<Value>>) -> Result<Partition> {
        let key = canonical(key)?;
        let value = value.into();
        match self.entries.get_mut(&key) {
            Some(slot) => {
                slot.value = value;
                Ok(slot.partition)
            }
            None => {
                trace!(key = %key, "writing undocumented key");
                self.entries.insert(
                    key,
                    Slot {
                        partition: Partition::Undocumented,
                        value,
                    },
                );
                Ok(Partition::Undocumented)
            }
        }
    }

    /// Look a key up across all partitions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] when no partition holds the key.
    pub fn get(&self, key: &str) -> Result<Option<&Value>> {
        let key = canonical(key)?;
        self.entries
            .get(&key)
            .map(|slot| slot.value.as_ref())
            .ok_or_else(|| Error::key_not_found(key))
    }

    /// Value of a key, `None` when absent or unset
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).and_then(|slot| slot.value.as_ref())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.value(key).is_some()
    }

    pub fn partition_of(&self, key: &str) -> Option<Partition> {
        self.entries.get(key).map(|slot| slot.partition)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in template order
    pub fn entries(&self) -> impl Iterator<Item = (&str, Partition, Option<&Value>)> {
        self.entries
            .iter()
            .map(|(k, slot)| (k.as_str(), slot.partition, slot.value.as_ref()))
    }

    /// Keys of one partition in template order
    pub fn keys(&self, partition: Partition) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |(_, slot)| slot.partition == partition)
            .map(|(k, _)| k.as_str())
    }

    /// Keys of every partition except `undocumented`
    pub fn documented(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, slot)| slot.partition.is_documented())
            .map(|(k, _)| k.as_str())
    }

    pub fn undocumented(&self) -> impl Iterator<Item = &str> {
        self.keys(Partition::Undocumented)
    }

    /// Move a key between partitions, keeping its position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] for unknown keys.
    pub fn move_to(&mut self, key: &str, partition: Partition) -> Result<()> {
        let slot = self
            .entries
            .get_mut(key)
            .ok_or_else(|| Error::key_not_found(key))?;
        slot.partition = partition;
        Ok(())
    }

    /// Move an undocumented entry onto its documented spelling.
    ///
    /// If `to` is already seeded the value is written there and the seeded
    /// partition is kept; otherwise `to` is inserted into `partition` right after
    /// the entry it shares the longest path prefix with.
    ///
    /// # Errors
    ///
    /// Returns an error when `from` is missing or not undocumented, or `to` is malformed.
    pub fn relocate(&mut self, from: &str, to: &str, partition: Partition) -> Result<Partition> {
        match self.entries.get(from) {
            None => return Err(Error::key_not_found(from)),
            Some(slot) if slot.partition.is_documented() => {
                return Err(Error::NotUndocumented {
                    key: from.to_string(),
                })
            }
            Some(_) => {}
        }
        let target = SchemaPath::parse(to)?;
        let to = target.to_string();
        let value = self
            .entries
            .shift_remove(from)
            .and_then(|slot| slot.value);

        if let Some(slot) = self.entries.get_mut(&to) {
            if value.is_some() {
                slot.value = value;
            }
            return Ok(slot.partition);
        }

        let index = self.insertion_index(&target);
        self.entries
            .shift_insert(index, to, Slot { partition, value });
        Ok(partition)
    }

    /// Remove an undocumented key, returning its value slot
    pub fn take_undocumented(&mut self, key: &str) -> Option<Option<Value>> {
        match self.entries.get(key) {
            Some(slot) if slot.partition == Partition::Undocumented => {
                self.entries.shift_remove(key).map(|slot| slot.value)
            }
            _ => None,
        }
    }

    pub fn add_lone_group(&mut self, key: impl Into<String>) {
        self.lone_groups.insert(key.into());
    }

    pub fn lone_groups(&self) -> impl Iterator<Item = &str> {
        self.lone_groups.iter().map(String::as_str)
    }

    pub fn is_lone_group(&self, key: &str) -> bool {
        self.lone_groups.contains(key)
    }

    /// Record `descendant` as conditionally required under `parent`
    pub fn add_optional_parent(
        &mut self,
        parent: impl Into<String>,
        descendant: impl Into<String>,
    ) {
        let descendant = descendant.into();
        let entry = self.optional_parents.entry(parent.into()).or_default();
        if !entry.contains(&descendant) {
            entry.push(descendant);
        }
    }

    /// Optional parents with their conditionally required descendants
    pub fn optional_parents(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.optional_parents
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn add_units_path(&mut self, key: impl Into<String>) {
        self.units_paths.insert(key.into());
    }

    pub fn units_paths(&self) -> impl Iterator<Item = &str> {
        self.units_paths.iter().map(String::as_str)
    }

    pub fn set_group_type(&mut self, key: impl Into<String>, type_token: impl Into<String>) {
        self.group_types.insert(key.into(), type_token.into());
    }

    /// Type token of a group key.
    ///
    /// Falls back to `prefix + lowercase(TYPE)` for `TYPE[name]` segments the
    /// schema did not seed (e.g. instance renames written by a reader).
    pub fn group_type(&self, key: &str) -> Option<String> {
        if let Some(known) = self.group_types.get(key) {
            return Some(known.clone());
        }
        let path = SchemaPath::parse(key).ok()?;
        let concept_key = path.concept_path();
        if let Some((_, ty)) = self
            .group_types
            .iter()
            .find(|(k, _)| SchemaPath::parse(k).is_ok_and(|p| p.concept_path() == concept_key))
        {
            return Some(ty.clone());
        }
        match path.last()? {
            Segment::Named { concept, .. } => {
                Some(format!("{}{}", self.type_prefix, concept.to_lowercase()))
            }
            _ => None,
        }
    }

    /// Mark the group viewers should show first
    pub fn set_default_plot(&mut self, key: impl Into<String>) {
        self.default_plot = Some(key.into());
    }

    pub fn default_plot(&self) -> Option<&str> {
        self.default_plot.as_deref()
    }

    /// Project a schema-qualified key onto its instance path.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed keys.
    pub fn instance_path_of(key: &str) -> Result<String> {
        Ok(SchemaPath::parse(key)?.instance_path())
    }

    /// Strip instance labels, leaving the concept form used for schema lookup.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed keys.
    pub fn schema_path_of(key: &str) -> Result<String> {
        Ok(SchemaPath::parse(key)?.concept_path())
    }

    /// Segment-wise prefix test on schema-qualified keys.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed keys.
    pub fn is_child_of(key: &str, ancestor: &str) -> Result<bool> {
        Ok(SchemaPath::parse(key)?.is_child_of(&SchemaPath::parse(ancestor)?))
    }

    /// JSON view of the non-empty partitions and auxiliary sets
    pub fn to_json(&self) -> JsonValue {
        let mut out = Map::new();
        for partition in [
            Partition::Required,
            Partition::Recommended,
            Partition::Optional,
            Partition::Undocumented,
        ] {
            let section: Map<String, JsonValue> = self
                .entries
                .iter()
                .filter(|(_, slot)| slot.partition == partition)
                .map(|(k, slot)| {
                    (
                        k.clone(),
                        slot.value.as_ref().map_or(JsonValue::Null, Value::to_json),
                    )
                })
                .collect();
            if !section.is_empty() {
                out.insert(partition.as_str().to_string(), JsonValue::Object(section));
            }
        }
        if !self.lone_groups.is_empty() {
            out.insert(
                "lone_groups".to_string(),
                self.lone_groups.iter().cloned().collect(),
            );
        }
        if !self.optional_parents.is_empty() {
            out.insert(
                "optional_parents".to_string(),
                self.optional_parents.keys().cloned().collect(),
            );
        }
        JsonValue::Object(out)
    }

    fn insertion_index(&self, target: &SchemaPath) -> usize {
        let mut best: Option<(usize, usize)> = None;
        for (index, key) in self.entries.keys().enumerate() {
            let Ok(path) = SchemaPath::parse(key) else {
                continue;
            };
            let shared = path
                .concept_prefix_len(target)
                .max(path.common_prefix_len(target));
            if shared > 0 && best.is_none_or(|(_, s)| shared >= s) {
                best = Some((index, shared));
            }
        }
        best.map_or(self.entries.len(), |(index, _)| index + 1)
    }
}

fn canonical(key: &str) -> Result<String> {
    Ok(SchemaPath::parse(key)?.to_string())
}
