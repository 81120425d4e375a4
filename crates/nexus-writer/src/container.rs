//! In-memory hierarchical container
//!
//! Groups hold ordered children and attributes; datasets record their element
//! type and shape and store the values either inline as JSON or as a deflated
//! little-endian payload. The whole tree is persisted as one JSON document.

use crate::codec;
use crate::{Error, Result};
use indexmap::IndexMap;
use nexus_ir::{Array, ArrayData, Scalar, ScalarKind, Value};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};

/// A node below a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Node {
    Group(Group),
    Dataset(Dataset),
    Link { target: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub children: IndexMap<String, Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub dtype: String,
    pub shape: Vec<usize>,
    pub storage: Storage,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, JsonValue>,
}

/// How a dataset's values are kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Storage {
    Inline(JsonValue),
    Deflate { level: u8, bytes: Vec<u8> },
}

impl Dataset {
    fn new(value: &Value) -> Result<Self> {
        let (kind, shape) = codec::layout(value)?;
        let storage = match value {
            Value::Compressed { payload, strength } if matches!(**payload, Value::Array(_)) => {
                let raw = codec::encode(payload)?;
                let bytes = codec::deflate(&raw, *strength)?;
                debug!(
                    raw = raw.len(),
                    packed = bytes.len(),
                    level = *strength,
                    "deflated dataset"
                );
                Storage::Deflate {
                    level: *strength,
                    bytes,
                }
            }
            // scalars are never chunked, so a compression request on one is ignored
            other => Storage::Inline(other.payload().to_json()),
        };
        Ok(Self {
            dtype: codec::dtype(kind).to_string(),
            shape,
            storage,
            attributes: IndexMap::new(),
        })
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.storage, Storage::Deflate { .. })
    }

    /// Decoded values, without the compression wrapper
    pub fn value(&self) -> Result<Value> {
        let kind = codec::kind_of(&self.dtype)
            .ok_or_else(|| Error::Codec(format!("unknown dtype '{}'", self.dtype)))?;
        match &self.storage {
            Storage::Deflate { bytes, .. } => {
                codec::decode(kind, &self.shape, &codec::inflate(bytes)?)
            }
            Storage::Inline(json) => {
                let value = Value::from_json(json)?
                    .ok_or_else(|| Error::Codec("inline dataset holds null".to_string()))?;
                Ok(retype(value, kind))
            }
        }
    }
}

/// Undo the JSON widening of unsigned integers and byte strings
fn retype(value: Value, kind: ScalarKind) -> Value {
    match (kind, value) {
        (ScalarKind::UInt, Value::Scalar(Scalar::Int(v))) => match u64::try_from(v) {
            Ok(u) => Value::Scalar(Scalar::UInt(u)),
            Err(_) => Value::Scalar(Scalar::Int(v)),
        },
        (ScalarKind::UInt, Value::Array(a)) => {
            let unsigned: Option<Vec<u64>> = match a.data() {
                ArrayData::Int(v) => v.iter().map(|x| u64::try_from(*x).ok()).collect(),
                _ => None,
            };
            let rebuilt =
                unsigned.and_then(|u| Array::new(ArrayData::UInt(u), a.shape().to_vec()).ok());
            match rebuilt {
                Some(array) => Value::Array(array),
                None => Value::Array(a),
            }
        }
        (ScalarKind::Bytes, Value::Array(a)) => {
            let bytes: Option<Vec<u8>> = match a.data() {
                ArrayData::Int(v) => v.iter().map(|x| u8::try_from(*x).ok()).collect(),
                _ => None,
            };
            match bytes {
                Some(b) => Value::Scalar(Scalar::Bytes(b)),
                None => Value::Array(a),
            }
        }
        (_, other) => other,
    }
}

/// Groups, datasets, links and attributes rooted at `/`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerTree {
    root: Group,
}

fn parts(path: &str) -> Vec<&str> {
    path.split('/').filter(|p| !p.is_empty()).collect()
}

fn split_last(path: &str) -> Result<(Vec<&str>, &str)> {
    let mut parts = parts(path);
    let leaf = parts
        .pop()
        .ok_or_else(|| Error::container(path, "the root cannot be replaced"))?;
    Ok((parts, leaf))
}

impl ContainerTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> &Group {
        &self.root
    }

    pub fn node(&self, path: &str) -> Option<&Node> {
        let (parents, leaf) = split_last(path).ok()?;
        self.walk(&parents)?.children.get(leaf)
    }

    pub fn group(&self, path: &str) -> Option<&Group> {
        self.walk(&parts(path))
    }

    pub fn dataset(&self, path: &str) -> Option<&Dataset> {
        match self.node(path)? {
            Node::Dataset(d) => Some(d),
            _ => None,
        }
    }

    pub fn link_target(&self, path: &str) -> Option<&str> {
        match self.node(path)? {
            Node::Link { target } => Some(target),
            _ => None,
        }
    }

    /// Attribute `name` of the group or dataset at `path`
    pub fn attribute(&self, path: &str, name: &str) -> Option<&JsonValue> {
        if let Some(group) = self.group(path) {
            return group.attributes.get(name);
        }
        self.dataset(path)?.attributes.get(name)
    }

    /// Read a dataset back, decompressing if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no dataset at `path` or its payload is corrupt.
    pub fn dataset_value(&self, path: &str) -> Result<Value> {
        self.dataset(path)
            .ok_or_else(|| Error::container(path, "no dataset at this path"))?
            .value()
    }

    /// Every node path in depth-first document order
    pub fn paths(&self) -> Vec<String> {
        fn visit(group: &Group, prefix: &str, out: &mut Vec<String>) {
            for (name, node) in &group.children {
                let path = format!("{prefix}/{name}");
                out.push(path.clone());
                if let Node::Group(child) = node {
                    visit(child, &path, out);
                }
            }
        }
        let mut out = Vec::new();
        visit(&self.root, "", &mut out);
        out
    }

    pub(crate) fn insert_group(&mut self, path: &str, type_token: &str) -> Result<()> {
        let (parents, leaf) = split_last(path)?;
        let parent = self.walk_mut(path, &parents)?;
        match parent.children.get_mut(leaf) {
            Some(Node::Group(_)) => Ok(()),
            Some(_) => Err(Error::container(path, "a non-group node already exists here")),
            None => {
                let mut group = Group::default();
                group
                    .attributes
                    .insert("type".to_string(), JsonValue::String(type_token.to_string()));
                parent.children.insert(leaf.to_string(), Node::Group(group));
                Ok(())
            }
        }
    }

    pub(crate) fn insert_dataset(&mut self, path: &str, value: &Value) -> Result<()> {
        let (parents, leaf) = split_last(path)?;
        let dataset = Dataset::new(value).map_err(|e| Error::container(path, e.to_string()))?;
        let parent = self.walk_mut(path, &parents)?;
        if parent.children.contains_key(leaf) {
            return Err(Error::container(path, "node already written"));
        }
        parent.children.insert(leaf.to_string(), Node::Dataset(dataset));
        Ok(())
    }

    pub(crate) fn insert_link(&mut self, path: &str, target: &str) -> Result<()> {
        let (parents, leaf) = split_last(path)?;
        let parent = self.walk_mut(path, &parents)?;
        if parent.children.contains_key(leaf) {
            return Err(Error::container(path, "node already written"));
        }
        parent.children.insert(
            leaf.to_string(),
            Node::Link {
                target: target.to_string(),
            },
        );
        Ok(())
    }

    pub(crate) fn insert_attribute(
        &mut self,
        owner: &str,
        name: &str,
        value: &Value,
    ) -> Result<()> {
        let json = value.payload().to_json();
        let parts = parts(owner);
        let attributes = match parts.split_last() {
            None => &mut self.root.attributes,
            Some((leaf, parents)) => {
                let parent = self.walk_mut(owner, parents)?;
                match parent.children.get_mut(*leaf) {
                    Some(Node::Group(g)) => &mut g.attributes,
                    Some(Node::Dataset(d)) => &mut d.attributes,
                    Some(Node::Link { .. }) => {
                        return Err(Error::container(owner, "links cannot carry attributes"));
                    }
                    None => return Err(Error::container(owner, "attribute owner does not exist")),
                }
            }
        };
        attributes.insert(name.to_string(), json);
        Ok(())
    }

    fn walk(&self, parts: &[&str]) -> Option<&Group> {
        let mut group = &self.root;
        for part in parts {
            match group.children.get(*part)? {
                Node::Group(g) => group = g,
                _ => return None,
            }
        }
        Some(group)
    }

    fn walk_mut(&mut self, path: &str, parts: &[&str]) -> Result<&mut Group> {
        let mut group = &mut self.root;
        for part in parts {
            match group.children.get_mut(*part) {
                Some(Node::Group(g)) => group = g,
                Some(_) => return Err(Error::container(path, format!("'{part}' is not a group"))),
                None => {
                    return Err(Error::container(
                        path,
                        format!("missing parent group '{part}'"),
                    ));
                }
            }
        }
        Ok(group)
    }

    /// Persist the tree; a partially written file is removed on failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] or [`Error::Serialization`] after cleaning up.
    pub fn save(&self, path: &Path) -> Result<()> {
        let result = File::create(path)
            .map_err(|e| Error::io(path, e))
            .and_then(|file| {
                let mut out = BufWriter::new(file);
                serde_json::to_writer_pretty(&mut out, self)?;
                out.write_all(b"\n").map_err(|e| Error::io(path, e))?;
                out.flush().map_err(|e| Error::io(path, e))
            });

        if let Err(error) = &result {
            warn!(path = %path.display(), %error, "removing partial output");
            if path.exists() {
                let _ = fs::remove_file(path);
            }
        }
        result
    }

    /// Load a previously saved tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a container document.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> ContainerTree {
        let mut tree = ContainerTree::new();
        tree.insert_group("/entry", "NXentry").unwrap();
        tree.insert_group("/entry/data", "NXdata").unwrap();
        tree.insert_dataset("/entry/count", &Value::from(5i64)).unwrap();
        let y = Value::Array(Array::from_data(ArrayData::Float(vec![1.0; 64])));
        tree.insert_dataset("/entry/data/y", &Value::compressed(y, 6).unwrap())
            .unwrap();
        tree.insert_attribute("/entry/count", "units", &Value::from("counts"))
            .unwrap();
        tree
    }

    #[test]
    fn test_paths_follow_insertion_order() {
        assert_eq!(
            sample().paths(),
            vec!["/entry", "/entry/data", "/entry/data/y", "/entry/count"]
        );
    }

    #[test]
    fn test_compressed_dataset_reads_back() {
        let tree = sample();
        let y = tree.dataset("/entry/data/y").unwrap();
        assert!(y.is_compressed());
        assert_eq!(y.dtype, "float64");
        assert_eq!(y.shape, vec![64]);
        assert!(matches!(y.storage, Storage::Deflate { level: 6, .. }));
        assert_eq!(
            tree.dataset_value("/entry/data/y").unwrap(),
            Value::Array(Array::from_data(ArrayData::Float(vec![1.0; 64])))
        );
    }

    #[test]
    fn test_compressed_scalar_stays_inline() {
        let mut tree = ContainerTree::new();
        let value = Value::compressed(Value::from(2.5), 9).unwrap();
        tree.insert_dataset("/x", &value).unwrap();
        assert!(!tree.dataset("/x").unwrap().is_compressed());
        assert_eq!(tree.dataset_value("/x").unwrap(), Value::from(2.5));
    }

    #[test]
    fn test_inline_unsigned_and_bytes_keep_their_type() {
        let mut tree = ContainerTree::new();
        tree.insert_dataset("/u", &Value::Scalar(Scalar::UInt(7))).unwrap();
        tree.insert_dataset("/b", &Value::Scalar(Scalar::Bytes(vec![1, 2, 255])))
            .unwrap();
        assert_eq!(tree.dataset_value("/u").unwrap(), Value::Scalar(Scalar::UInt(7)));
        assert_eq!(
            tree.dataset_value("/b").unwrap(),
            Value::Scalar(Scalar::Bytes(vec![1, 2, 255]))
        );
    }

    #[test]
    fn test_structural_conflicts() {
        let mut tree = sample();
        assert!(tree.insert_group("/entry/count", "NXdata").is_err());
        assert!(tree.insert_dataset("/entry/count", &Value::from(1i64)).is_err());
        assert!(tree.insert_dataset("/missing/x", &Value::from(1i64)).is_err());
        assert!(tree.insert_attribute("/entry/nothing", "units", &Value::from("m")).is_err());
        // creating an existing group again is a no-op
        tree.insert_group("/entry", "NXentry").unwrap();
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.nxs.json");
        let tree = sample();
        tree.save(&path).unwrap();

        let loaded = ContainerTree::load(&path).unwrap();
        assert_eq!(loaded, tree);
        assert_eq!(
            loaded.attribute("/entry/count", "units"),
            Some(&JsonValue::String("counts".to_string()))
        );
        assert_eq!(
            loaded.attribute("/entry", "type"),
            Some(&JsonValue::String("NXentry".to_string()))
        );
    }

    #[test]
    fn test_failed_save_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing_dir").join("out.nxs.json");
        let error = ContainerTree::new().save(&path).unwrap_err();
        assert!(matches!(error, Error::Io { .. }));
        assert!(!path.exists());
    }
}
