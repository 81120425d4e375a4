//! # nexus-schema
//!
//! Semantic schema layer.
//!
//! NXDL files are located on a [`SchemaSearchPath`], parsed with `nexus-nxdl`, turned
//! into a resolved [`SchemaNode`] tree (inheritance spliced, optionality normalised,
//! enumerations collected) and cached in a [`ConcurrentSchemaRegistry`]. The
//! [`TemplateBuilder`] walks a resolved schema into an empty [`nexus_ir::Template`].

pub mod builder;
pub mod inheritance;
pub mod loader;
pub mod lookup;
pub mod model;
pub mod registry;

pub use builder::TemplateBuilder;
pub use inheritance::InheritanceGraph;
pub use loader::{SchemaLoader, SchemaSearchPath, schema_from_document};
pub use model::{
    Category, DimSpec, DimensionsSpec, EnumerationSpec, NodeKind, Optionality, Schema,
    SchemaNode, Units,
};
pub use registry::ConcurrentSchemaRegistry;

use thiserror::Error;

/// Errors that can occur when working with schemas
#[derive(Error, Debug)]
pub enum Error {
    #[error("Schema not found: {name} (searched {searched})")]
    NotFound { name: String, searched: String },

    #[error("Schema conflict in {schema} at {location}: {message}")]
    Conflict {
        schema: String,
        location: String,
        message: String,
    },

    #[error("Inheritance error: {0}")]
    Inheritance(String),

    #[error("Invalid schema file {path}: {source}")]
    Syntax {
        path: String,
        #[source]
        source: nexus_nxdl::Error,
    },

    #[error("Template error: {0}")]
    Template(#[from] nexus_ir::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn conflict(
        schema: impl Into<String>,
        location: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            schema: schema.into(),
            location: location.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
