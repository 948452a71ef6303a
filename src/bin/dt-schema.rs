//! dt-schema CLI
//!
//! Command-line interface for checking binding schemas and validating
//! devicetrees against them.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use dt_schema::{
    collect_files, compare, lint, CorpusError, CorpusIndex, FileStatus, PropType, Session,
    SessionOptions, Severity,
};

#[derive(Parser)]
#[command(name = "dt-schema")]
#[command(about = "Check devicetree binding schemas and validate devicetrees against them")]
#[command(version)]
struct Cli {
    /// Verbose logging. Repeat for more (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

/// Where the schema corpus comes from.
#[derive(clap::Args)]
struct CorpusArgs {
    /// Schema file or directory (repeatable)
    #[arg(long, short = 's')]
    schema: Vec<PathBuf>,

    /// Processed schema snapshot written by `mk-schema`
    #[arg(long, short = 'p', conflicts_with = "schema")]
    preparsed: Option<PathBuf>,

    /// Compatible value too generic to select a binding (repeatable)
    #[arg(long = "generic-compatible")]
    generic_compatible: Vec<String>,
}

impl CorpusArgs {
    fn options(&self) -> SessionOptions {
        let mut options = SessionOptions::new(&self.schema);
        for compatible in &self.generic_compatible {
            options = options.generic_compatible(compatible.clone());
        }
        options
    }

    fn open(&self) -> Result<CorpusIndex, CorpusError> {
        match &self.preparsed {
            Some(path) => CorpusIndex::from_snapshot(path),
            None => CorpusIndex::load(&self.options()),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Validate devicetree YAML files against the binding schemas
    Validate {
        #[command(flatten)]
        corpus: CorpusArgs,

        /// Only validate against schemas whose $id contains this string
        #[arg(long, short = 'l')]
        limit: Option<String>,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,

        /// Devicetree files or directories to validate
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Process binding schemas into a snapshot
    MkSchema {
        #[command(flatten)]
        corpus: CorpusArgs,

        /// Output file (.json for JSON, YAML otherwise)
        #[arg(long, short = 'o')]
        output: PathBuf,
    },

    /// Check binding schemas (syntax, meta-schema, refs, $id)
    CheckSchema {
        /// File or directory to check
        path: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,

        /// Suppress progress output, only show errors
        #[arg(long, short)]
        quiet: bool,
    },

    /// Compare two schema sets for changes that break existing devicetrees
    Cmp {
        /// Baseline schema directory or snapshot
        baseline: PathBuf,

        /// New schema directory or snapshot
        new: PathBuf,
    },

    /// Print the property types inferred from the schemas
    Props {
        #[command(flatten)]
        corpus: CorpusArgs,

        /// Only this property
        name: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Validate {
            corpus,
            limit,
            format,
            paths,
        } => run_validate(&corpus, limit, format, &paths),
        Commands::MkSchema { corpus, output } => run_mk_schema(&corpus, &output),
        Commands::CheckSchema {
            path,
            format,
            strict,
            quiet,
        } => run_check_schema(&path, format, strict, quiet),
        Commands::Cmp { baseline, new } => run_cmp(&baseline, &new),
        Commands::Props { corpus, name } => run_props(&corpus, name.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn corpus_error(e: CorpusError) -> u8 {
    eprintln!("Error: {e}");
    e.exit_code() as u8
}

fn run_validate(
    corpus_args: &CorpusArgs,
    limit: Option<String>,
    format: Format,
    paths: &[PathBuf],
) -> Result<(), u8> {
    let corpus = corpus_args.open().map_err(corpus_error)?;
    let options = corpus_args.options().filter(limit);
    let session = Session::new(Arc::new(corpus), &options);

    let mut files = Vec::new();
    for path in paths {
        if !path.exists() {
            eprintln!("Error: path not found: {}", path.display());
            return Err(2);
        }
        files.extend(collect_files(path, &["yaml"]));
    }

    let mut failed = false;
    let mut diagnostics = Vec::new();
    for (file, result) in files.iter().zip(session.validate_files(&files)) {
        match result {
            Ok(found) => diagnostics.extend(found),
            Err(e) => {
                eprintln!("{}: {e}", file.display());
                failed = true;
            }
        }
    }
    failed |= diagnostics.iter().any(|d| d.is_error());

    match format {
        Format::Json => {
            let output = serde_json::json!({
                "valid": !failed,
                "diagnostics": diagnostics,
            });
            println!("{output}");
        }
        Format::Text => {
            for diagnostic in &diagnostics {
                match diagnostic.severity {
                    Severity::Error => eprintln!("{diagnostic}"),
                    Severity::Warning => eprintln!("warning: {diagnostic}"),
                }
            }
        }
    }

    if failed {
        Err(1)
    } else {
        Ok(())
    }
}

fn run_mk_schema(corpus_args: &CorpusArgs, output: &Path) -> Result<(), u8> {
    let corpus = corpus_args.open().map_err(corpus_error)?;
    corpus.write_snapshot(output).map_err(corpus_error)
}

fn run_check_schema(path: &Path, format: Format, strict: bool, quiet: bool) -> Result<(), u8> {
    if !path.exists() {
        eprintln!("Error: path not found: {}", path.display());
        return Err(2);
    }

    let result = lint(path, strict).map_err(corpus_error)?;

    match format {
        Format::Json => match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing output: {e}");
                return Err(2);
            }
        },
        Format::Text => {
            if !quiet {
                println!("Checking {} ...\n", path.display());
            }

            for file_result in &result.results {
                let status_icon = match file_result.status {
                    FileStatus::Ok => "\x1b[32m✓\x1b[0m",
                    FileStatus::Warning => "\x1b[33m⚠\x1b[0m",
                    FileStatus::Error => "\x1b[31m✗\x1b[0m",
                };

                if !quiet || file_result.status != FileStatus::Ok {
                    println!("  {} {}", status_icon, file_result.file.display());
                }

                for diag in &file_result.diagnostics {
                    let (color, label) = match diag.severity {
                        Severity::Error => ("\x1b[31m", "error"),
                        Severity::Warning => ("\x1b[33m", "warning"),
                    };
                    if quiet && diag.severity != Severity::Error {
                        continue;
                    }
                    println!(
                        "    {color}{label}[{}]\x1b[0m: {} - {}",
                        diag.code, diag.path, diag.message
                    );
                    if let Some(hint) = &diag.hint {
                        println!("        hint: {hint}");
                    }
                }
            }

            println!();
            if result.is_ok() && (!strict || result.warnings == 0) {
                println!(
                    "\x1b[32m✓ {} files checked, all passed\x1b[0m",
                    result.files_checked
                );
            } else {
                println!(
                    "\x1b[31m✗ {} files checked: {} passed, {} failed ({} errors, {} warnings)\x1b[0m",
                    result.files_checked, result.passed, result.failed, result.errors, result.warnings
                );
            }
        }
    }

    if result.is_ok() && (!strict || result.warnings == 0) {
        Ok(())
    } else {
        Err(1)
    }
}

fn run_cmp(baseline: &Path, new: &Path) -> Result<(), u8> {
    let open = |path: &Path| CorpusIndex::open(&SessionOptions::new([path])).map_err(corpus_error);
    let baseline = open(baseline)?;
    let new = open(new)?;

    let changes = compare(&baseline, &new);
    for change in &changes {
        println!("{change}");
    }
    if changes.is_empty() {
        Ok(())
    } else {
        Err(1)
    }
}

fn run_props(corpus_args: &CorpusArgs, name: Option<&str>) -> Result<(), u8> {
    let corpus = corpus_args.open().map_err(corpus_error)?;
    let types = corpus.property_types();

    let output = match name {
        Some(name) => {
            let inferred: Vec<String> = types
                .property_type(name)
                .iter()
                .map(PropType::to_string)
                .collect();
            serde_json::json!({
                "name": name,
                "types": inferred,
                "dim": types.property_dim(name),
                "fixed-dimensions": types.property_has_fixed_dimensions(name),
            })
        }
        None => serde_json::json!(types.all_properties()),
    };

    match serde_json::to_string_pretty(&output) {
        Ok(json) => {
            println!("{json}");
            Ok(())
        }
        Err(e) => {
            eprintln!("Error serializing output: {e}");
            Err(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_validate_with_schemas_and_limit() {
        let cli = Cli::try_parse_from([
            "dt-schema", "-vv", "validate", "-s", "bindings", "-l", "serial", "board.yaml",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Validate {
            corpus,
            limit,
            paths,
            format,
        } = cli.command
        else {
            panic!("expected validate");
        };
        assert_eq!(corpus.schema, vec![PathBuf::from("bindings")]);
        assert_eq!(limit.as_deref(), Some("serial"));
        assert_eq!(paths, vec![PathBuf::from("board.yaml")]);
        assert_eq!(format, Format::Text);
    }

    #[test]
    fn schemas_and_snapshot_conflict() {
        let parsed = Cli::try_parse_from([
            "dt-schema", "validate", "-s", "bindings", "-p", "processed.json", "board.yaml",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn generic_compatibles_extend_defaults() {
        let cli = Cli::try_parse_from([
            "dt-schema", "props", "--generic-compatible", "simple-bus", "-s", "bindings",
        ])
        .unwrap();
        let Commands::Props { corpus, .. } = cli.command else {
            panic!("expected props");
        };
        let options = corpus.options();
        assert!(options.generic_compatibles.iter().any(|c| c == "syscon"));
        assert!(options.generic_compatibles.iter().any(|c| c == "simple-bus"));
    }
}
