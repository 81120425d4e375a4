//! # nexus-nxdl
//!
//! Syntax layer for NXDL schema files.
//!
//! An NXDL file is parsed into an [`NxdlDocument`]: a lossless syntax tree plus a
//! [`CommentStream`] side channel that remembers where every comment sat. The tree
//! can be emitted as canonical XML or projected onto the indented text form used for
//! authoring and diffing, and parsed back from either.
//!
//! ```rust
//! let xml = r#"<definition name="NXdemo" type="group" category="application">
//!     <group type="NXentry"><field name="title"/></group>
//! </definition>"#;
//! let text = nexus_nxdl::xml_to_text(xml).unwrap();
//! assert!(text.starts_with("category: application"));
//! let back = nexus_nxdl::text_to_xml(&text).unwrap();
//! assert_eq!(back, nexus_nxdl::canonicalize(xml).unwrap());
//! ```

pub mod comments;
pub mod syntax;
pub mod text;
pub mod xml;

pub use comments::{Comment, CommentStream, Locator, Slot};
pub use syntax::{
    Attributes, Dim, Dimensions, Doc, ElementKind, Enumeration, Item, NxdlDocument, NxdlElement,
    Symbol, Symbols,
};

use thiserror::Error;

/// Errors raised while reading or projecting NXDL
#[derive(Error, Debug)]
pub enum Error {
    #[error("XML error at line {line}: {message}")]
    Xml { line: usize, message: String },

    #[error("Text form error at line {line}: {message}")]
    Text { line: usize, message: String },

    #[error("Cannot project {context}: {message}")]
    Unsupported { context: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn xml(line: usize, message: impl Into<String>) -> Self {
        Self::Xml {
            line,
            message: message.into(),
        }
    }

    pub fn text(line: usize, message: impl Into<String>) -> Self {
        Self::Text {
            line,
            message: message.into(),
        }
    }

    pub fn unsupported(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unsupported {
            context: context.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Parse NXDL XML into a syntax tree with its comment stream.
///
/// # Errors
///
/// Returns an error for malformed XML or elements outside the NXDL vocabulary.
pub fn parse_xml(input: &str) -> Result<NxdlDocument> {
    xml::parse(input)
}

/// Emit canonical XML.
pub fn to_xml(document: &NxdlDocument) -> String {
    xml::emit(document)
}

/// Parse and re-emit XML in canonical form.
///
/// # Errors
///
/// Returns an error when the input cannot be parsed.
pub fn canonicalize(input: &str) -> Result<String> {
    Ok(xml::emit(&xml::parse(input)?))
}

/// Parse the indented text form.
///
/// # Errors
///
/// Returns an error for malformed text.
pub fn parse_text(input: &str) -> Result<NxdlDocument> {
    text::parse(input)
}

/// Project a syntax tree onto the text form.
///
/// # Errors
///
/// Returns an error for constructs the text form cannot express.
pub fn to_text(document: &NxdlDocument) -> Result<String> {
    text::emit(document)
}

/// XML → text in one step.
///
/// # Errors
///
/// Propagates parse and projection errors.
pub fn xml_to_text(input: &str) -> Result<String> {
    text::emit(&xml::parse(input)?)
}

/// Text → canonical XML in one step.
///
/// # Errors
///
/// Propagates parse errors.
pub fn text_to_xml(input: &str) -> Result<String> {
    Ok(xml::emit(&text::parse(input)?))
}
