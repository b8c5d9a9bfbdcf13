//! echo-infer: echocardiogram view inference over DICOM files.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use echo_batch::config::RunConfig;
use echo_batch::discovery::{directory_records, manifest_records, SourceFile};
use echo_batch::infer::{run_inference, HttpModelProvider};
use echo_batch::logging::{self, LogFormat};
use echo_batch::runner::cancel_on_ctrl_c;
use echo_batch::{Record, RunSummary};

const DEFAULT_CONFIG: &str = "config/default.yaml";

#[derive(Parser, Debug)]
#[command(name = "echo-infer")]
#[command(about = "EchoPrime view inference over DICOM studies")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run inference on every DICOM file under the input directory
    Run {
        #[command(flatten)]
        common: CommonArgs,

        /// Input directory
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Model device (cpu, cuda, cuda:0, ...)
        #[arg(long)]
        device: Option<String>,

        #[arg(long = "log_file", alias = "log-file")]
        log_file: Option<PathBuf>,
    },

    /// Run inference on the directories listed in a CSV manifest
    Batch {
        /// CSV with an `input` (or `input_dir`) column
        manifest: PathBuf,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Show usage information
    Info,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// YAML config file; defaults apply when it does not exist
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Debug logging in plain text instead of JSON lines
    #[arg(short, long)]
    verbose: bool,

    #[arg(long = "batch_size", alias = "batch-size")]
    batch_size: Option<usize>,

    /// Index of the first record to process (resume point)
    #[arg(long = "start_idx", alias = "start-idx")]
    start_idx: Option<usize>,

    /// Also write one JSON file per input
    #[arg(long = "per_record", alias = "per-record")]
    per_record: bool,
}

impl CommonArgs {
    fn load_config(&self) -> echo_batch::Result<(RunConfig, Option<String>)> {
        let (mut config, warning) = RunConfig::load_or_default(Some(&self.config))?;
        config.apply_env()?;
        if let Some(dir) = &self.output {
            config.output.dir = dir.clone();
        }
        if self.verbose {
            config.logging.level = "DEBUG".to_string();
            config.logging.format = LogFormat::Simple;
        } else {
            config.logging.format = LogFormat::Structured;
        }
        if let Some(size) = self.batch_size {
            config.batch.batch_size = size;
        }
        if let Some(idx) = self.start_idx {
            config.batch.start_idx = idx;
        }
        if self.per_record {
            config.output.per_record = true;
        }
        Ok((config, warning))
    }
}

fn print_info() {
    println!("echo-infer - EchoPrime view inference");
    println!();
    println!("Commands:");
    println!("  run     - Run inference on a directory of DICOM files");
    println!("  batch   - Run batch inference using a CSV manifest");
    println!("  info    - Show this information");
    println!();
    println!("Examples:");
    println!("  echo-infer run --input data/raw --output outputs/");
    println!("  echo-infer run --config config/default.yaml --device cuda:0");
    println!("  echo-infer batch manifest.csv --output results/");
    println!("  echo-infer run --start_idx 200 --batch_size 100");
}

async fn infer(
    config: &RunConfig,
    records: Vec<Record<SourceFile>>,
) -> echo_batch::Result<RunSummary> {
    let provider = HttpModelProvider::from_config(&config.model)?;
    run_inference(&provider, config, &records, Some(cancel_on_ctrl_c())).await
}

fn dir_config(
    common: &CommonArgs,
    input: Option<PathBuf>,
    device: Option<String>,
    log_file: Option<PathBuf>,
) -> echo_batch::Result<(RunConfig, Option<String>)> {
    let (mut config, warning) = common.load_config()?;
    if let Some(dir) = input {
        config.data.input_dir = dir;
    }
    if let Some(device) = device {
        config.model.device = Some(device);
    }
    if let Some(file) = log_file {
        config.logging.file = Some(file);
    }
    Ok((config, warning))
}

async fn run_dir(config: RunConfig) -> echo_batch::Result<RunSummary> {
    config.validate()?;
    config.validate_model()?;

    tracing::info!(input = %config.data.input_dir.display(), "Processing DICOM files");
    let records = directory_records(
        &config.data.input_dir,
        &config.data.extensions,
        config.data.recursive,
    )?;
    if records.is_empty() {
        return Err(echo_batch::RunnerError::EmptyInput(config.data.input_dir.clone()));
    }
    infer(&config, records).await
}

async fn run_manifest(manifest: &Path, config: RunConfig) -> echo_batch::Result<RunSummary> {
    config.validate_settings()?;
    config.validate_model()?;

    tracing::info!(manifest = %manifest.display(), "Starting batch inference with manifest");
    let records = manifest_records(manifest, &config.data.extensions, config.data.recursive)?;
    infer(&config, records).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let (loaded, manifest) = match cli.command {
        Commands::Info => {
            print_info();
            return ExitCode::SUCCESS;
        }
        Commands::Run {
            common,
            input,
            device,
            log_file,
        } => (dir_config(&common, input, device, log_file), None),
        Commands::Batch { manifest, common } => (common.load_config(), Some(manifest)),
    };
    let (config, warning) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    // Keeps the file writer alive until main returns.
    let _log_guard = match logging::init(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(warning) = warning {
        tracing::warn!("{}", warning);
    }

    let result = match manifest {
        Some(manifest) => run_manifest(&manifest, config).await,
        None => run_dir(config).await,
    };

    match result {
        Ok(summary) if summary.is_complete() => {
            println!(
                "Inference complete: {} successful, {} errors",
                summary.state.succeeded, summary.state.failed
            );
            ExitCode::SUCCESS
        }
        Ok(summary) => {
            eprintln!(
                "Run aborted. Resume with --start_idx {}",
                summary.next_start_idx
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common(args: &[&str]) -> CommonArgs {
        let mut argv = vec!["echo-infer", "run"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Run { common, .. } => common,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_config_defaults_to_shipped_file() {
        let args = common(&[]);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG));
    }

    #[test]
    fn test_missing_config_falls_back_with_warning() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("absent.yaml");
        let args = common(&["--config", missing.to_str().unwrap()]);

        let (_, warning) = args.load_config().unwrap();
        let warning = warning.unwrap();
        assert!(warning.starts_with("Config file not found:"));
        assert!(warning.ends_with("Using defaults."));
    }

    #[test]
    fn test_log_format_follows_verbose() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("absent.yaml");
        let path = missing.to_str().unwrap();

        let (quiet, _) = common(&["-c", path]).load_config().unwrap();
        assert_eq!(quiet.logging.format, LogFormat::Structured);

        let (loud, _) = common(&["-c", path, "--verbose"]).load_config().unwrap();
        assert_eq!(loud.logging.format, LogFormat::Simple);
        assert_eq!(loud.logging.level, "DEBUG");
    }
}
