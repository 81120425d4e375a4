//! Validation report and its rendering

use crate::Result;
use serde::Serialize;
use std::fmt;

/// Severity of a diagnostic; only errors fail validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warn",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiagnosticKind {
    MissingRequired,
    TypeMismatch,
    EnumViolation,
    DateFormat,
    OptionalParentClosure,
    UndocumentedPath,
    /// A `@units` key is set but the field it belongs to is not
    OrphanUnits,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingRequired => "MissingRequired",
            Self::TypeMismatch => "TypeMismatch",
            Self::EnumViolation => "EnumViolation",
            Self::DateFormat => "DateFormat",
            Self::OptionalParentClosure => "OptionalParentClosure",
            Self::UndocumentedPath => "UndocumentedPath",
            Self::OrphanUnits => "OrphanUnits",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub path: String,
    pub kind: DiagnosticKind,
    pub detail: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<5} {:<21} {}: {}",
            self.severity.to_string(),
            self.kind.as_str(),
            self.path,
            self.detail
        )
    }
}

/// Ordered diagnostics of one validation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn error(
        &mut self,
        kind: DiagnosticKind,
        path: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.push(Diagnostic {
            severity: Severity::Error,
            path: path.into(),
            kind,
            detail: detail.into(),
        });
    }

    pub fn warn(
        &mut self,
        kind: DiagnosticKind,
        path: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.push(Diagnostic {
            severity: Severity::Warning,
            path: path.into(),
            kind,
            detail: detail.into(),
        });
    }

    /// Validation passes iff no diagnostic is an error
    pub fn is_valid(&self) -> bool {
        !self.has_errors()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Number of diagnostics of one kind, any severity
    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.diagnostics.iter().filter(|d| d.kind == kind).count()
    }

    pub fn find(&self, kind: DiagnosticKind, path: &str) -> Option<&Diagnostic> {
        self.diagnostics
            .iter()
            .find(|d| d.kind == kind && d.path == path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// Renders validation reports
pub struct ValidationReporter {
    format: ReportFormat,
}

impl ValidationReporter {
    /// Create a new validation reporter
    pub fn new() -> Self {
        Self {
            format: ReportFormat::Text,
        }
    }

    pub fn with_format(format: ReportFormat) -> Self {
        Self { format }
    }

    /// Render a report in the configured format.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render(&self, report: &ValidationReport) -> Result<String> {
        match self.format {
            ReportFormat::Text => Ok(Self::render_text(report)),
            ReportFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        }
    }

    fn render_text(report: &ValidationReport) -> String {
        let mut out = String::new();
        for diagnostic in report.iter() {
            out.push_str(&diagnostic.to_string());
            out.push('\n');
        }
        let errors = report.errors().count();
        let warnings = report.warnings().count();
        out.push_str(&format!(
            "{errors} error{}, {warnings} warning{}\n",
            if errors == 1 { "" } else { "s" },
            if warnings == 1 { "" } else { "s" },
        ));
        out
    }
}

impl Default for ValidationReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ValidationReport {
        let mut report = ValidationReport::new();
        report.error(
            DiagnosticKind::MissingRequired,
            "/ENTRY[entry]/definition",
            "required value is missing",
        );
        report.warn(
            DiagnosticKind::EnumViolation,
            "/ENTRY[entry]/SOURCE[source]/type",
            "'neutron' is not one of [laser]",
        );
        report
    }

    #[test]
    fn test_validity_follows_errors() {
        let mut report = ValidationReport::new();
        report.warn(DiagnosticKind::UndocumentedPath, "/x", "not in schema");
        assert!(report.is_valid());
        report.error(DiagnosticKind::DateFormat, "/y", "bad date");
        assert!(!report.is_valid());
        assert_eq!(report.errors().count(), 1);
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn test_text_rendering() {
        let text = ValidationReporter::new().render(&sample()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "error MissingRequired       /ENTRY[entry]/definition: required value is missing"
        );
        assert!(lines[1].starts_with("warn  EnumViolation"));
        assert_eq!(lines[2], "1 error, 1 warning");
    }

    #[test]
    fn test_json_rendering() {
        let json = ValidationReporter::with_format(ReportFormat::Json)
            .render(&sample())
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["diagnostics"][0]["severity"], "error");
        assert_eq!(parsed["diagnostics"][0]["kind"], "MissingRequired");
        assert_eq!(parsed["diagnostics"][1]["severity"], "warning");
    }
}
