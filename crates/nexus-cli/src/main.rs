//! # nexus-cli
//!
//! The `dataconverter` command: converts reader inputs into a container file
//! against a NeXus application definition, prints empty templates, and moves
//! definitions between their XML and text forms.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use nexus_pipeline::{ConvertOptions, ConvertOutcome, ConvertRequest, Converter};
use nexus_schema::SchemaSearchPath;
use nexus_validation::{ReportFormat, ValidationReport, ValidationReporter};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dataconverter")]
#[command(about = "Convert experimental data into NeXus container files")]
#[command(version)]
struct Cli {
    /// Log at debug level regardless of RUST_LOG
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Definitions root holding base_classes/, applications/ and contributed_definitions/
    #[arg(long = "schema-root", global = true)]
    schema_roots: Vec<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill a template from input files, validate it and write the output
    Convert {
        /// Input files handed to the reader
        inputs: Vec<PathBuf>,

        /// Reader name
        #[arg(short, long)]
        reader: Option<String>,

        /// Application definition name, e.g. NXmpes
        #[arg(short, long)]
        nxdl: Option<String>,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// YAML params file supplying anything not given on the command line
        #[arg(short, long)]
        params_file: Option<PathBuf>,

        /// Fail on keys that match nothing in the definition
        #[arg(long)]
        fail: bool,

        /// How to print the validation report when conversion fails
        #[arg(long, value_enum, default_value_t = Format::Text)]
        report_format: Format,
    },

    /// Print the empty template of a definition as JSON
    GenerateTemplate {
        /// Application definition name
        #[arg(short, long)]
        nxdl: String,

        /// Write the template here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Project an NXDL XML file onto the text form
    Nxdl2nyaml {
        /// Input .nxdl.xml file
        input: PathBuf,

        /// Output path, defaults to the input name with a .yaml suffix
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Turn a text-form definition into canonical NXDL XML
    Nyaml2nxdl {
        /// Input .yaml file
        input: PathBuf,

        /// Output path, defaults to the input name with a .nxdl.xml suffix
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

impl From<Format> for ReportFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Text => ReportFormat::Text,
            Format::Json => ReportFormat::Json,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let report_format = match &cli.command {
        Commands::Convert { report_format, .. } => (*report_format).into(),
        _ => ReportFormat::Text,
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let code = match error.downcast_ref::<nexus_pipeline::Error>() {
                Some(nexus_pipeline::Error::Validation(report)) => {
                    eprint!("{}", render(report, report_format));
                    1
                }
                Some(pipeline_error) => pipeline_error.exit_code(),
                None => 1,
            };
            eprintln!("Error: {error:#}");
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let search_path = SchemaSearchPath::new(cli.schema_roots);

    match cli.command {
        Commands::Convert {
            inputs,
            reader,
            nxdl,
            output,
            params_file,
            fail,
            report_format: _,
        } => {
            let request = ConvertRequest {
                input_files: inputs,
                reader,
                schema: nxdl,
                output,
                options: ConvertOptions {
                    generate_template: false,
                    strict: fail,
                    params_file,
                },
            };
            match Converter::new(search_path).convert(request)? {
                ConvertOutcome::Template(template) => print_json(&template.to_json(), None)?,
                ConvertOutcome::Written {
                    output,
                    report,
                    summary,
                    ..
                } => {
                    tracing::info!(
                        "Wrote {} ({} groups, {} datasets, {} warnings)",
                        output.display(),
                        summary.groups,
                        summary.datasets,
                        report.warnings().count()
                    );
                }
            }
        }
        Commands::GenerateTemplate { nxdl, output } => {
            let template = Converter::new(search_path).template(&nxdl)?;
            print_json(&template.to_json(), output.as_deref())?;
        }
        Commands::Nxdl2nyaml { input, output } => {
            let output = output.unwrap_or_else(|| sibling(&input, ".nxdl.xml", ".yaml"));
            let xml = fs::read_to_string(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let text = nexus_nxdl::xml_to_text(&xml)
                .with_context(|| format!("Failed to project {}", input.display()))?;
            write(&output, &text)?;
            tracing::info!("Wrote {}", output.display());
        }
        Commands::Nyaml2nxdl { input, output } => {
            let output = output.unwrap_or_else(|| sibling(&input, ".yaml", ".nxdl.xml"));
            let text = fs::read_to_string(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let xml = nexus_nxdl::text_to_xml(&text)
                .with_context(|| format!("Failed to convert {}", input.display()))?;
            write(&output, &xml)?;
            tracing::info!("Wrote {}", output.display());
        }
    }
    Ok(())
}

fn render(report: &ValidationReport, format: ReportFormat) -> String {
    ValidationReporter::with_format(format)
        .render(report)
        .unwrap_or_else(|_| {
            report
                .iter()
                .map(|diagnostic| format!("{diagnostic}\n"))
                .collect()
        })
}

fn print_json(value: &serde_json::Value, output: Option<&Path>) -> anyhow::Result<()> {
    let mut rendered = serde_json::to_string_pretty(value)?;
    rendered.push('\n');
    match output {
        Some(path) => write(path, &rendered),
        None => {
            print!("{rendered}");
            Ok(())
        }
    }
}

fn write(path: &Path, content: &str) -> anyhow::Result<()> {
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// `input` with `suffix` swapped for `replacement`, or appended when absent
fn sibling(input: &Path, suffix: &str, replacement: &str) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(suffix).unwrap_or(&name);
    input.with_file_name(format!("{stem}{replacement}"))
}
