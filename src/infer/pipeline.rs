//! Whole-run inference: load the model once, run every batch, release the model.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::config::RunConfig;
use crate::discovery::SourceFile;
use crate::error::Result;
use crate::infer::processor::InferenceProcessor;
use crate::infer::provider::{ModelProvider, ModelSession};
use crate::output::BatchWriter;
use crate::runner::BatchRunner;
use crate::types::{Record, RunSummary};

/// Run view inference over `records` with the batch settings from `config`.
///
/// The session is closed on every path once loaded, including when the
/// run itself fails (for example a start index past the end of the input).
/// A close failure is logged and does not mask the run result.
pub async fn run_inference<P: ModelProvider>(
    provider: &P,
    config: &RunConfig,
    records: &[Record<SourceFile>],
    cancel: Option<Arc<AtomicBool>>,
) -> Result<RunSummary> {
    let runner_config = config.runner_config();
    runner_config.validate()?;

    let session = provider.load().await?;

    let mut processor = InferenceProcessor::new(session, provider.name());
    if config.output.per_record {
        processor = processor.with_per_record_output(&config.output.dir);
    }

    let writer = BatchWriter::new(&config.output.dir);
    let mut runner = BatchRunner::new(processor, writer, runner_config)?;
    if let Some(flag) = cancel {
        runner = runner.with_cancellation(flag);
    }

    let result = runner
        .run(records, config.batch.start_idx, config.batch.limit())
        .await;

    if let Err(e) = runner.into_processor().into_session().close().await {
        tracing::warn!(error = %e, "Failed to release model session");
    }
    result
}
