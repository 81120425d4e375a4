#![warn(clippy::all)]

//! # nexus-ir
//!
//! Intermediate representation shared by every stage of the converter.
//!
//! This crate provides the tagged [`Value`] model readers fill in, the two path
//! spellings ([`SchemaPath`] for `/ENTRY[entry]/mode` and its instance projection
//! `/entry/mode`), and the [`Template`]: a flat, ordered address space whose keys are
//! partitioned by optionality.

/// Schema-qualified path parsing and projection.
pub mod path;
/// Multi-partition template container.
pub mod template;
/// Tagged values stored in template slots.
pub mod value;

pub use path::{SchemaPath, Segment};
pub use template::{Partition, Template};
pub use value::{Array, ArrayData, Scalar, ScalarKind, Value};

use thiserror::Error;

/// Errors that can occur when working with the IR
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Key not found in template: {key}")]
    KeyNotFound { key: String },

    #[error("Key already seeded in template: {key}")]
    DuplicateKey { key: String },

    #[error("Key '{key}' is documented and cannot be moved out of the undocumented partition")]
    NotUndocumented { key: String },

    #[error("Invalid value in {context}: {message}")]
    InvalidValue { context: String, message: String },
}

impl Error {
    /// Build an invalid-path error with input path and parsing reason.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Build a key-not-found error.
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    /// Build an invalid-value error with conversion context.
    pub fn invalid_value(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            context: context.into(),
            message: message.into(),
        }
    }
}

/// Crate-local result type for IR operations.
pub type Result<T> = std::result::Result<T, Error>;
