#![warn(clippy::all)]

//! # nexus-readers
//!
//! Readers turn vendor input files into template values.
//!
//! A [`Reader`] declares which schemas it understands and writes into a
//! [`Template`](nexus_ir::Template) built for one of them. The [`ReaderRegistry`]
//! addresses readers by a short name and refuses pairings the reader does not claim.
//!
//! ## Example Usage
//!
//! ```rust
//! use nexus_ir::Template;
//! use nexus_readers::ReaderRegistry;
//!
//! let registry = ReaderRegistry::with_builtins();
//! assert!(registry.select("json_map", "NXmpes").is_ok());
//! assert!(registry.select("example", "NXmpes").is_err());
//!
//! let template = Template::new("NXtest", "NX");
//! assert!(template.is_empty());
//! ```

pub mod example;
pub mod json_map;
pub mod reader;
pub mod registry;

pub use example::ExampleReader;
pub use json_map::JsonMapReader;
pub use reader::{ReadOptions, Reader, WILDCARD};
pub use registry::ReaderRegistry;

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while selecting a reader or reading its inputs
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown reader '{name}' (available: {available})")]
    UnknownReader { name: String, available: String },

    #[error("Reader '{reader}' does not support schema '{schema}'")]
    UnsupportedSchema { reader: String, schema: String },

    #[error("Reader '{reader}' needs at least one input file")]
    MissingInput { reader: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed input {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Template error: {0}")]
    Template(#[from] nexus_ir::Error),
}

impl Error {
    /// Create a parse error for an input file
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for reader operations
pub type Result<T> = std::result::Result<T, Error>;
