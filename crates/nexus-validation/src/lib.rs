#![deny(rust_2018_idioms)]
#![warn(clippy::all)]

//! # nexus-validation
//!
//! Checks a filled [`nexus_ir::Template`] against its resolved schema.
//!
//! Validation runs a fixed sequence (required closure, undocumented salvage, value
//! rules, optional-parent closure, units consistency) and never stops early: every
//! finding becomes a [`Diagnostic`] in the returned [`ValidationReport`]. The template
//! is normalised in place (salvaged keys move, coercible values are coerced).
//!
//! ## Example Usage
//!
//! ```rust
//! use nexus_ir::Value;
//! use nexus_schema::{TemplateBuilder, schema_from_document};
//! use nexus_validation::{DiagnosticKind, ValidationEngine};
//!
//! let xml = r#"<definition name="NXdoc" type="group" category="application">
//!     <group type="NXentry">
//!         <field name="count" type="NX_POSINT"/>
//!     </group>
//! </definition>"#;
//! let schema = schema_from_document(&nexus_nxdl::parse_xml(xml).unwrap()).unwrap();
//! let mut template = TemplateBuilder::new(&schema).build().unwrap();
//! template.set("/ENTRY[entry]/count", Value::from(0_i64)).unwrap();
//!
//! let report = ValidationEngine::new(&schema).validate(&mut template);
//! assert!(!report.is_valid());
//! assert_eq!(report.count(DiagnosticKind::TypeMismatch), 1);
//! ```

pub mod engine;
pub mod reporter;
pub mod rules;

pub use engine::{ValidationConfig, ValidationEngine};
pub use reporter::{
    Diagnostic, DiagnosticKind, ReportFormat, Severity, ValidationReport, ValidationReporter,
};
pub use rules::{Checked, NxType, check_enumeration, check_value, validate_date_time};

use thiserror::Error;

/// Errors that can occur while rendering validation results
#[derive(Error, Debug)]
pub enum Error {
    #[error("Report serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Convenience function to validate a template with default settings
pub fn validate(
    template: &mut nexus_ir::Template,
    schema: &nexus_schema::Schema,
) -> ValidationReport {
    ValidationEngine::new(schema).validate(template)
}
