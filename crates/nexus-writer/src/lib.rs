#![warn(clippy::all)]

//! # nexus-writer
//!
//! Emits a validated [`Template`](nexus_ir::Template) as a hierarchical file.
//!
//! The [`Writer`] walks the documented keys in template order, creates every
//! group before its children, annotates groups with their schema type, and hands
//! datasets, attributes and links to a [`HierarchicalSink`]. [`ContainerTree`] is
//! the bundled sink: an in-memory tree of groups, datasets and attributes that is
//! persisted as one JSON document, with deflate-compressed payloads where the
//! template asked for compression.
//!
//! ## Example Usage
//!
//! ```rust
//! use nexus_ir::{Partition, Template, Value};
//! use nexus_writer::{ContainerTree, Writer};
//!
//! let mut template = Template::new("NXscan", "NX");
//! template.seed("/ENTRY[entry]/count", Partition::Required).unwrap();
//! template.set_group_type("/ENTRY[entry]", "NXentry");
//! template.set("/ENTRY[entry]/count", Value::from(5i64)).unwrap();
//!
//! let mut tree = ContainerTree::new();
//! Writer::new().write(&template, &mut tree).unwrap();
//! assert_eq!(tree.dataset_value("/entry/count").unwrap(), Value::from(5i64));
//! ```

pub mod codec;
pub mod container;
pub mod sink;
pub mod writer;

pub use container::{ContainerTree, Dataset, Group, Node, Storage};
pub use sink::HierarchicalSink;
pub use writer::{WriteSummary, Writer};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while emitting a template
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Container error at {path}: {message}")]
    Container { path: String, message: String },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Template error: {0}")]
    Template(#[from] nexus_ir::Error),
}

impl Error {
    /// Create a container error at `path`
    pub fn container(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Container {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for writer operations
pub type Result<T> = std::result::Result<T, Error>;
