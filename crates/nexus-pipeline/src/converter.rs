//! The conversion entry point

use crate::params::Params;
use crate::{Error, Result};
use nexus_ir::Template;
use nexus_readers::{ReadOptions, ReaderRegistry};
use nexus_schema::{SchemaLoader, SchemaSearchPath, TemplateBuilder};
use nexus_validation::{ValidationConfig, ValidationEngine, ValidationReport};
use nexus_writer::{WriteSummary, Writer};
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Options that change how a run behaves
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Return the empty template instead of converting
    pub generate_template: bool,
    /// Undocumented keys left after salvage fail the run
    pub strict: bool,
    /// Read missing arguments from this params file
    pub params_file: Option<PathBuf>,
}

/// One conversion: inputs, reader, schema and output
#[derive(Debug, Clone, Default)]
pub struct ConvertRequest {
    pub input_files: Vec<PathBuf>,
    pub reader: Option<String>,
    pub schema: Option<String>,
    pub output: Option<PathBuf>,
    pub options: ConvertOptions,
}

impl ConvertRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_files.push(path.into());
        self
    }

    pub fn with_reader(mut self, reader: impl Into<String>) -> Self {
        self.reader = Some(reader.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_options(mut self, options: ConvertOptions) -> Self {
        self.options = options;
        self
    }

    /// Fill whatever the request leaves open from `params`
    fn merge(mut self, params: &Params) -> Self {
        if self.input_files.is_empty() {
            self.input_files = params.input_files.clone();
        }
        self.reader = self.reader.or_else(|| params.reader.clone());
        self.schema = self.schema.or_else(|| params.schema.clone());
        self.output = self.output.or_else(|| params.output.clone());
        self.options.generate_template |= params.generate_template.unwrap_or(false);
        self.options.strict |= params.strict.unwrap_or(false);
        self
    }
}

/// What a successful run produced
#[derive(Debug)]
pub enum ConvertOutcome {
    /// `generate_template` was set
    Template(Template),
    Written {
        output: PathBuf,
        template: Template,
        report: ValidationReport,
        summary: WriteSummary,
    },
}

/// Runs conversions against one schema search path and reader registry
pub struct Converter {
    loader: SchemaLoader,
    readers: ReaderRegistry,
    writer: Writer,
}

impl Converter {
    /// Converter with the built-in readers
    pub fn new(search_path: SchemaSearchPath) -> Self {
        Self {
            loader: SchemaLoader::new(search_path),
            readers: ReaderRegistry::with_builtins(),
            writer: Writer::new(),
        }
    }

    pub fn with_readers(mut self, readers: ReaderRegistry) -> Self {
        self.readers = readers;
        self
    }

    pub fn with_writer(mut self, writer: Writer) -> Self {
        self.writer = writer;
        self
    }

    pub fn loader(&self) -> &SchemaLoader {
        &self.loader
    }

    pub fn readers(&self) -> &ReaderRegistry {
        &self.readers
    }

    /// Empty template for `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaNotFound`] or [`Error::SchemaConflict`].
    pub fn template(&self, schema: &str) -> Result<Template> {
        let schema = self.loader.load(schema)?;
        Ok(TemplateBuilder::new(&schema).build()?)
    }

    /// Run one conversion.
    ///
    /// The output is only written when validation reports no error; the full
    /// report travels in [`Error::Validation`] otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error for missing options, unknown schemas or readers, unreadable
    /// inputs, validation errors, and output failures.
    pub fn convert(&self, request: ConvertRequest) -> Result<ConvertOutcome> {
        let mut read_options = ReadOptions::new();
        let mut extra_roots = Vec::new();
        let params_file = request.options.params_file.clone();
        let request = match params_file {
            Some(path) => {
                let params = Params::load(&path)?;
                extra_roots.clone_from(&params.schema_roots);
                apply_reader_settings(&mut read_options, &params);
                request.merge(&params)
            }
            None => request,
        };

        let schema_name = request
            .schema
            .clone()
            .ok_or_else(|| Error::MissingOption("schema (nxdl)".to_string()))?;
        let scoped;
        let loader = if extra_roots.is_empty() {
            &self.loader
        } else {
            scoped = self.scoped_loader(extra_roots);
            &scoped
        };
        let schema = loader.load(&schema_name)?;
        let mut template = TemplateBuilder::new(&schema).build()?;
        info!(schema = %schema_name, keys = template.len(), "template built");

        if request.options.generate_template {
            return Ok(ConvertOutcome::Template(template));
        }

        let reader_name = request
            .reader
            .clone()
            .ok_or_else(|| Error::MissingOption("reader".to_string()))?;
        let output = request
            .output
            .clone()
            .ok_or_else(|| Error::MissingOption("output".to_string()))?;

        let reader = self.readers.select(&reader_name, &schema_name)?;
        reader.read(&mut template, &request.input_files, &read_options)?;

        let config = ValidationConfig {
            strict: request.options.strict,
        };
        let report = ValidationEngine::with_config(&schema, config).validate(&mut template);
        for diagnostic in report.warnings() {
            warn!("{diagnostic}");
        }
        if report.has_errors() {
            return Err(Error::Validation(report));
        }

        let summary = self.writer.write_file(&template, &output)?;
        info!(
            output = %output.display(),
            datasets = summary.datasets,
            warnings = report.warnings().count(),
            "conversion finished"
        );
        Ok(ConvertOutcome::Written {
            output,
            template,
            report,
            summary,
        })
    }
}

impl Converter {
    /// Loader for one request whose params add schema roots.
    ///
    /// The extra roots go after the converter's own and have their own cache, so
    /// later requests never see them.
    fn scoped_loader(&self, extra_roots: Vec<PathBuf>) -> SchemaLoader {
        let mut search_path = self.loader.search_path().clone();
        for root in extra_roots {
            search_path.add_root(root);
        }
        debug!(roots = ?search_path.roots(), "request-local schema search path");
        SchemaLoader::new(search_path)
    }
}

fn apply_reader_settings(options: &mut ReadOptions, params: &Params) {
    for (key, value) in &params.reader_settings {
        if key == "entry" {
            if let JsonValue::String(entry) = value {
                options.entry = entry.clone();
                continue;
            }
        }
        options.settings.insert(key.clone(), value.clone());
    }
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("search_path", self.loader.search_path())
            .field("readers", &self.readers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_explicit_arguments_win_over_params() {
        let params = Params::parse(
            "dataconverter:\n  reader: example\n  nxdl: NXtest\n  input-file: from_params.json\n  output: params.nxs.json\n  fail: true\n",
            Path::new("params.yaml"),
        )
        .unwrap();

        let request = ConvertRequest::new()
            .with_reader("json_map")
            .with_input("cli.json")
            .merge(&params);

        assert_eq!(request.reader.as_deref(), Some("json_map"));
        assert_eq!(request.schema.as_deref(), Some("NXtest"));
        assert_eq!(request.input_files, vec![PathBuf::from("cli.json")]);
        assert_eq!(request.output, Some(PathBuf::from("params.nxs.json")));
        assert!(request.options.strict);
        assert!(!request.options.generate_template);
    }

    #[test]
    fn test_reader_section_sets_entry_name() {
        let params = Params::parse(
            "reader:\n  entry: scan_7\n  calibration: cal.json\n",
            Path::new("params.yaml"),
        )
        .unwrap();
        let mut options = ReadOptions::new();
        apply_reader_settings(&mut options, &params);
        assert_eq!(options.entry, "scan_7");
        assert_eq!(options.setting("calibration"), Some(&JsonValue::from("cal.json")));
        assert!(options.setting("entry").is_none());
    }

    #[test]
    fn test_missing_schema_is_a_usage_error() {
        let converter = Converter::new(SchemaSearchPath::default());
        let error = converter.convert(ConvertRequest::new()).unwrap_err();
        assert!(matches!(error, Error::MissingOption(_)));
        assert_eq!(error.exit_code(), 64);
    }
}
