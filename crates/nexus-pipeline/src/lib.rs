#![deny(rust_2018_idioms)]
#![warn(clippy::all)]

//! # nexus-pipeline
//!
//! End-to-end conversion: load the schema, build the template, let a reader
//! fill it, validate, and write the output file.
//!
//! The [`Converter`] refuses to write when the validation report holds an error,
//! and maps every failure onto an [`Error`] variant with a process exit code.

pub mod converter;
pub mod params;

pub use converter::{ConvertOptions, ConvertOutcome, ConvertRequest, Converter};
pub use params::Params;

use nexus_validation::ValidationReport;
use std::path::Path;
use thiserror::Error;

/// Errors that end a conversion
#[derive(Error, Debug)]
pub enum Error {
    #[error("Schema '{name}' not found (searched: {searched})")]
    SchemaNotFound { name: String, searched: String },

    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    #[error("Unknown reader '{name}' (available: {available})")]
    UnknownReader { name: String, available: String },

    #[error("Reader '{reader}' does not support schema '{schema}'")]
    UnsupportedSchema { reader: String, schema: String },

    #[error("Validation failed with {} error(s)", .0.errors().count())]
    Validation(ValidationReport),

    #[error("Invalid input '{path}': {message}")]
    Input { path: String, message: String },

    #[error("Output error: {0}")]
    Output(String),

    #[error("Invalid params file '{path}': {message}")]
    Params { path: String, message: String },

    #[error("Missing option: {0}")]
    MissingOption(String),

    #[error("IO error during {operation} for '{path}': {message}")]
    Io {
        operation: String,
        path: String,
        message: String,
    },
}

impl Error {
    /// Create a structured I/O error with operation/path context.
    pub fn io(
        operation: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn params(path: &Path, message: impl Into<String>) -> Self {
        Self::Params {
            path: path.display().to_string(),
            message: message.into(),
        }
    }

    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 1,
            Self::SchemaNotFound { .. } => 2,
            Self::SchemaConflict(_) => 3,
            Self::UnknownReader { .. } | Self::UnsupportedSchema { .. } => 4,
            Self::Input { .. } | Self::Output(_) | Self::Io { .. } => 5,
            Self::Params { .. } | Self::MissingOption(_) => 64,
        }
    }
}

impl From<nexus_schema::Error> for Error {
    fn from(e: nexus_schema::Error) -> Self {
        match e {
            nexus_schema::Error::NotFound { name, searched } => {
                Self::SchemaNotFound { name, searched }
            }
            nexus_schema::Error::Io(io) => Self::io("load schema", "<search path>", io.to_string()),
            other => Self::SchemaConflict(other.to_string()),
        }
    }
}

impl From<nexus_readers::Error> for Error {
    fn from(e: nexus_readers::Error) -> Self {
        use nexus_readers::Error as ReaderError;
        match e {
            ReaderError::UnknownReader { name, available } => {
                Self::UnknownReader { name, available }
            }
            ReaderError::UnsupportedSchema { reader, schema } => {
                Self::UnsupportedSchema { reader, schema }
            }
            ReaderError::MissingInput { reader } => {
                Self::MissingOption(format!("reader '{reader}' needs at least one input file"))
            }
            ReaderError::Io { path, source } => {
                Self::io("read input", path.display().to_string(), source.to_string())
            }
            ReaderError::Parse { path, message } => Self::Input {
                path: path.display().to_string(),
                message,
            },
            ReaderError::Template(e) => Self::Input {
                path: "<reader>".to_string(),
                message: e.to_string(),
            },
        }
    }
}

impl From<nexus_writer::Error> for Error {
    fn from(e: nexus_writer::Error) -> Self {
        match e {
            nexus_writer::Error::Io { path, source } => {
                Self::io("write output", path.display().to_string(), source.to_string())
            }
            other => Self::Output(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_validation::DiagnosticKind;

    #[test]
    fn test_exit_codes_are_non_zero_and_distinct_per_kind() {
        let mut report = ValidationReport::new();
        report.error(DiagnosticKind::MissingRequired, "/ENTRY[entry]/definition", "missing");

        let cases = [
            (Error::Validation(report), 1),
            (
                Error::SchemaNotFound {
                    name: "NXnone".into(),
                    searched: "/tmp".into(),
                },
                2,
            ),
            (Error::SchemaConflict("bad".into()), 3),
            (
                Error::UnsupportedSchema {
                    reader: "example".into(),
                    schema: "NXmpes".into(),
                },
                4,
            ),
            (Error::io("write output", "/tmp/x", "denied"), 5),
        ];
        for (error, code) in cases {
            assert_eq!(error.exit_code(), code, "{error}");
        }
    }

    #[test]
    fn test_validation_error_message_counts_errors() {
        let mut report = ValidationReport::new();
        report.error(DiagnosticKind::MissingRequired, "/a", "missing");
        report.warn(DiagnosticKind::UndocumentedPath, "/b", "unknown");
        assert_eq!(
            Error::Validation(report).to_string(),
            "Validation failed with 1 error(s)"
        );
    }

    #[test]
    fn test_schema_errors_map_onto_taxonomy() {
        let not_found = nexus_schema::Error::NotFound {
            name: "NXmissing".into(),
            searched: "defs".into(),
        };
        assert!(matches!(Error::from(not_found), Error::SchemaNotFound { .. }));

        let conflict =
            nexus_schema::Error::conflict("NXbad", "/(NXentry)/x", "contradictory flags");
        assert!(matches!(Error::from(conflict), Error::SchemaConflict(_)));
    }
}
