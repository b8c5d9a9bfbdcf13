//! echo-qa: answer fixed questions about image captions in resumable batches.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use echo_batch::config::RunConfig;
use echo_batch::qa::{load_caption_records, CaptionProcessor, ChatClient};
use echo_batch::runner::cancel_on_ctrl_c;
use echo_batch::{logging, BatchRunner, BatchWriter, DatasetSplit, RunSummary};

#[derive(Parser, Debug)]
#[command(name = "echo-qa")]
#[command(about = "Generate question/answer pairs from image captions")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// YAML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dataset split to process
    #[arg(long = "data_str", alias = "data-str", value_enum)]
    data_str: DatasetSplit,

    /// Directory holding the caption manifests
    #[arg(long = "input_dir", alias = "input-dir")]
    input_dir: Option<PathBuf>,

    /// Root directory for batch output
    #[arg(long = "output_dir", alias = "output-dir")]
    output_dir: Option<PathBuf>,

    #[arg(long = "batch_size", alias = "batch-size")]
    batch_size: Option<usize>,

    /// Index of the first record to process (resume point)
    #[arg(long = "start_idx", alias = "start-idx")]
    start_idx: Option<usize>,

    /// Process every entry (true) or only --num_entries_to_process (false)
    #[arg(long = "process_all", alias = "process-all", action = ArgAction::Set)]
    process_all: Option<bool>,

    #[arg(long = "num_entries_to_process", alias = "num-entries-to-process")]
    num_entries_to_process: Option<usize>,

    /// Chat model name
    #[arg(long = "openai_model", alias = "openai-model")]
    openai_model: Option<String>,

    #[arg(long = "max_tokens", alias = "max-tokens")]
    max_tokens: Option<u32>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long = "api_base", alias = "api-base")]
    api_base: Option<String>,

    #[arg(long = "api_key", alias = "api-key", env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Records in flight at once within a batch
    #[arg(long = "max_concurrency", alias = "max-concurrency")]
    max_concurrency: Option<usize>,

    /// Skip merging batch files after a complete run
    #[arg(long = "no_combine", alias = "no-combine")]
    no_combine: bool,

    /// DEBUG, INFO, WARNING, ERROR or CRITICAL
    #[arg(long = "log_level", alias = "log-level")]
    log_level: Option<String>,

    #[arg(long = "log_file", alias = "log-file")]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, config: &mut RunConfig) {
        if let Some(dir) = &self.input_dir {
            config.data.input_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.clone();
        }
        if let Some(size) = self.batch_size {
            config.batch.batch_size = size;
        }
        if let Some(idx) = self.start_idx {
            config.batch.start_idx = idx;
        }
        if let Some(all) = self.process_all {
            config.batch.process_all = all;
        }
        if let Some(n) = self.num_entries_to_process {
            config.batch.num_entries = n;
        }
        if let Some(model) = &self.openai_model {
            config.qa.model = model.clone();
        }
        if let Some(tokens) = self.max_tokens {
            config.qa.max_tokens = tokens;
        }
        if let Some(base) = &self.api_base {
            config.qa.api_base = base.clone();
        }
        if let Some(key) = &self.api_key {
            config.qa.api_key = Some(key.clone());
        }
        if let Some(n) = self.max_concurrency {
            config.batch.max_concurrency = n;
        }
        if self.no_combine {
            config.output.combine = false;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(file) = &self.log_file {
            config.logging.file = Some(file.clone());
        }
    }
}

fn load_config(cli: &Cli) -> echo_batch::Result<(RunConfig, Option<String>)> {
    let (mut config, warning) = RunConfig::load_or_default(cli.config.as_deref())?;
    config.apply_env()?;
    cli.apply(&mut config);
    Ok((config, warning))
}

async fn run(cli: &Cli, config: RunConfig) -> echo_batch::Result<RunSummary> {
    config.validate_qa()?;

    let split = cli.data_str;
    let manifest = config.caption_manifest(split);
    tracing::info!(
        split = %split,
        manifest = %manifest.display(),
        model = %config.qa.model,
        "Starting caption Q&A"
    );

    let records = load_caption_records(&manifest)?;
    let client = ChatClient::from_config(&config.qa)?;
    let writer = BatchWriter::for_dataset(&config.output.dir, split.as_str());

    let runner = BatchRunner::new(CaptionProcessor::new(client), writer, config.runner_config())?
        .with_cancellation(cancel_on_ctrl_c());

    runner
        .run(&records, config.batch.start_idx, config.batch.limit())
        .await
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let (config, warning) = match load_config(&cli) {
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

    match run(&cli, config).await {
        Ok(summary) if summary.is_complete() => {
            if let Some(path) = &summary.combined_file {
                println!("All batches combined into '{}'.", path.display());
            }
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
