use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::Instrument;

use crate::error::{Result, RunnerError};
use crate::eta::{format_duration_ms, EtaTracker};
use crate::output::BatchWriter;
use crate::types::*;
use crate::RecordProcessor;

/// Knobs for the batch loop.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Records per persisted batch.
    pub batch_size: usize,
    /// Records in flight at once within a batch (1 = strictly sequential).
    pub max_concurrency: usize,
    /// Merge all batch files into the combined output after a complete run.
    pub combine: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_concurrency: 1,
            combine: true,
        }
    }
}

impl RunnerConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_combine(mut self, combine: bool) -> Self {
        self.combine = combine;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(RunnerError::InvalidConfig(
                "batch_size must be positive".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(RunnerError::InvalidConfig(
                "max_concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// The window processed by a single `run_batch` call.
///
/// `start_idx == total` yields an empty window; anything beyond is an error.
pub fn window_at(total: usize, start_idx: usize, batch_size: usize) -> Result<BatchWindow> {
    if start_idx > total {
        return Err(RunnerError::StartOutOfRange { start_idx, total });
    }
    Ok(BatchWindow::new(
        start_idx,
        start_idx.saturating_add(batch_size).min(total),
    ))
}

/// Consecutive windows covering `[start_idx, total)`.
pub fn plan_windows(total: usize, start_idx: usize, batch_size: usize) -> Result<Vec<BatchWindow>> {
    if batch_size == 0 {
        return Err(RunnerError::InvalidConfig(
            "batch_size must be positive".to_string(),
        ));
    }
    if start_idx > total {
        return Err(RunnerError::StartOutOfRange { start_idx, total });
    }
    Ok((start_idx..total)
        .step_by(batch_size)
        .map(|start| BatchWindow::new(start, start.saturating_add(batch_size).min(total)))
        .collect())
}

/// Flag that flips to `true` on the first Ctrl-C.
///
/// Must be called from within a Tokio runtime.
pub fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let signal = Arc::clone(&flag);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; letting in-flight records finish");
            signal.store(true, Ordering::Relaxed);
        }
    });
    flag
}

/// Drives a [`RecordProcessor`] over an ordered record sequence in
/// fixed-size batches, persisting each batch as it completes.
///
/// Per-record failures are captured and never stop the batch. Only
/// setup problems and failed batch writes abort the run.
pub struct BatchRunner<P> {
    processor: P,
    writer: BatchWriter,
    config: RunnerConfig,
    eta: EtaTracker,
    cancellation: Option<Arc<AtomicBool>>,
}

impl<P> BatchRunner<P> {
    pub fn new(processor: P, writer: BatchWriter, config: RunnerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            processor,
            writer,
            config,
            eta: EtaTracker::new(),
            cancellation: None,
        })
    }

    /// Set a flag that stops the run before the next record starts.
    pub fn with_cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancellation = Some(cancel);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn writer(&self) -> &BatchWriter {
        &self.writer
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn into_processor(self) -> P {
        self.processor
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Process one window without touching the filesystem.
    ///
    /// Returns `None` if cancellation was requested before every record in
    /// the window started; a partial batch is never reported.
    pub async fn process_window<D>(
        &self,
        records: &[Record<D>],
        window: BatchWindow,
    ) -> Option<BatchOutcome<P::Output>>
    where
        D: Send + Sync,
        P: RecordProcessor<D>,
    {
        let started = Instant::now();
        let end = window.end.min(records.len());
        let slice = &records[window.start.min(end)..end];
        let resource = self.processor.resource_key();
        let operation = self.processor.operation();

        let mut results: Vec<(usize, Option<ProcessingResult<P::Output>>)> =
            stream::iter(slice.iter().enumerate())
                .map(|(offset, record)| async move {
                    if self.is_cancelled() {
                        return (offset, None);
                    }

                    let start = Instant::now();
                    let result = self.processor.process(record).await;
                    let duration_ms = start.elapsed().as_millis() as u64;

                    let result = match result {
                        Ok(output) => {
                            self.eta
                                .record(resource, operation, record.size_bucket, duration_ms);
                            tracing::info!(
                                index = record.index,
                                id = %record.id,
                                duration_ms,
                                "Processed record"
                            );
                            ProcessingResult::Success(output)
                        }
                        Err(e) => {
                            let message = format!("{:#}", e);
                            tracing::error!(
                                index = record.index,
                                id = %record.id,
                                error = %message,
                                "Error processing record"
                            );
                            ProcessingResult::Failure(RecordFailure {
                                index: record.index,
                                id: record.id.clone(),
                                error: message,
                            })
                        }
                    };
                    (offset, Some(result))
                })
                .buffer_unordered(self.config.max_concurrency)
                .collect()
                .await;

        // Completion order is arbitrary under concurrency; restore input order.
        results.sort_by_key(|(offset, _)| *offset);

        let mut ordered = Vec::with_capacity(results.len());
        for (_, result) in results {
            ordered.push(result?);
        }

        Some(BatchOutcome::from_results(
            window,
            ordered,
            started.elapsed().as_millis() as u64,
        ))
    }

    /// Process and persist the single window starting at `start_idx`.
    pub async fn run_batch<D>(
        &self,
        records: &[Record<D>],
        start_idx: usize,
    ) -> Result<BatchOutcome<P::Output>>
    where
        D: Send + Sync,
        P: RecordProcessor<D>,
    {
        let window = window_at(records.len(), start_idx, self.config.batch_size)?;
        if window.is_empty() {
            tracing::info!(start_idx, "No records left to process");
            return Ok(BatchOutcome::empty(window));
        }

        let outcome = self
            .process_window(records, window)
            .await
            .ok_or(RunnerError::Cancelled)?;
        self.persist(&outcome)?;
        Ok(outcome)
    }

    /// Process every window from `start_idx` up to `limit` records
    /// (all records when `None`), then merge batch files if configured.
    pub async fn run<D>(
        &self,
        records: &[Record<D>],
        start_idx: usize,
        limit: Option<usize>,
    ) -> Result<RunSummary>
    where
        D: Send + Sync,
        P: RecordProcessor<D>,
    {
        let total = limit.map_or(records.len(), |n| n.min(records.len()));
        let windows = plan_windows(total, start_idx, self.config.batch_size)?;
        let mut state = RunState::new(start_idx, total, self.config.batch_size);

        let span = tracing::info_span!(
            "run",
            run_id = %state.run_id,
            operation = self.processor.operation(),
            dataset = self.writer.dataset().unwrap_or("-"),
        );

        self.writer.ensure_dir()?;
        state.mark_running();
        self.run_windows(&records[..total], windows, state)
            .instrument(span)
            .await
    }

    async fn run_windows<D>(
        &self,
        records: &[Record<D>],
        windows: Vec<BatchWindow>,
        mut state: RunState,
    ) -> Result<RunSummary>
    where
        D: Send + Sync,
        P: RecordProcessor<D>,
    {
        tracing::info!(
            start_idx = state.start_idx,
            end_idx = state.end_idx,
            batch_size = self.config.batch_size,
            batches = windows.len(),
            output_dir = %self.writer.dir().display(),
            "Starting run"
        );

        let mut batches = Vec::with_capacity(windows.len());
        let mut next_start_idx = state.start_idx;
        let mut status = RunStatus::Completed;

        for window in windows {
            if self.is_cancelled() {
                status = RunStatus::Aborted;
                break;
            }

            tracing::info!(
                start = window.start,
                last = window.end - 1,
                "Processing batch"
            );
            let Some(outcome) = self.process_window(records, window).await else {
                tracing::warn!(
                    start = window.start,
                    "Cancelled mid-batch; partial results discarded"
                );
                status = RunStatus::Aborted;
                break;
            };

            let summary = match self.persist(&outcome) {
                Ok(summary) => summary,
                Err(e) => {
                    state.mark_finished(RunStatus::Aborted);
                    tracing::error!(error = %e, resume_from = next_start_idx, "Run aborted");
                    return Err(e);
                }
            };

            state.succeeded += summary.succeeded;
            state.failed += summary.failed;
            next_start_idx = window.end;
            batches.push(summary);

            let remaining: Vec<SizeBucket> = records[window.end..]
                .iter()
                .map(|r| r.size_bucket)
                .collect();
            if let Some(eta_ms) = self.eta.estimate_remaining(
                self.processor.resource_key(),
                self.processor.operation(),
                &remaining,
            ) {
                tracing::info!(
                    remaining = remaining.len(),
                    eta = %format_duration_ms(eta_ms),
                    "Estimated time remaining"
                );
            }
        }

        let mut combined_file = None;
        if status == RunStatus::Completed && self.config.combine {
            let (path, count) = self.writer.combine()?;
            tracing::info!(path = %path.display(), entries = count, "All batches combined");
            combined_file = Some(path);
        }

        state.mark_finished(status);
        if status == RunStatus::Completed {
            tracing::info!(
                succeeded = state.succeeded,
                failed = state.failed,
                "Run complete"
            );
        } else {
            tracing::warn!(
                succeeded = state.succeeded,
                failed = state.failed,
                resume_from = next_start_idx,
                "Run aborted; re-run with this start index to continue"
            );
        }

        Ok(RunSummary {
            state,
            batches,
            next_start_idx,
            combined_file,
        })
    }

    fn persist<T: serde::Serialize>(&self, outcome: &BatchOutcome<T>) -> Result<BatchSummary> {
        let files = self.writer.write_batch(outcome)?;
        let processed = outcome.total() as u64;
        let summary = BatchSummary {
            window: outcome.window,
            succeeded: outcome.success_count(),
            failed: outcome.failure_count(),
            total_duration_ms: outcome.duration_ms,
            avg_duration_ms: if processed > 0 {
                outcome.duration_ms / processed
            } else {
                0
            },
            output_file: Some(files.output.clone()),
            errors_file: files.errors,
        };

        tracing::info!(
            path = %files.output.display(),
            "Processing complete: {} successful, {} errors",
            summary.succeeded,
            summary.failed
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_windows_five_by_two() {
        let windows = plan_windows(5, 0, 2).unwrap();
        assert_eq!(
            windows,
            vec![
                BatchWindow::new(0, 2),
                BatchWindow::new(2, 4),
                BatchWindow::new(4, 5)
            ]
        );
    }

    #[test]
    fn test_plan_windows_from_offset() {
        let windows = plan_windows(10, 7, 100).unwrap();
        assert_eq!(windows, vec![BatchWindow::new(7, 10)]);
    }

    #[test]
    fn test_plan_windows_huge_batch_size() {
        assert_eq!(plan_windows(5, 1, usize::MAX).unwrap(), vec![BatchWindow::new(1, 5)]);
        assert_eq!(plan_windows(3, 0, usize::MAX - 1).unwrap(), vec![BatchWindow::new(0, 3)]);
    }

    #[test]
    fn test_plan_windows_at_end_is_empty() {
        assert!(plan_windows(5, 5, 2).unwrap().is_empty());
    }

    #[test]
    fn test_plan_windows_rejects_bad_input() {
        assert!(matches!(
            plan_windows(5, 6, 2),
            Err(RunnerError::StartOutOfRange {
                start_idx: 6,
                total: 5
            })
        ));
        assert!(matches!(
            plan_windows(5, 0, 0),
            Err(RunnerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_window_at_truncates() {
        assert_eq!(window_at(5, 4, 100).unwrap(), BatchWindow::new(4, 5));
        assert!(window_at(5, 5, 2).unwrap().is_empty());
        assert!(window_at(5, 9, 2).is_err());
    }

    #[test]
    fn test_runner_config_validation() {
        let writer = BatchWriter::new("unused");
        assert!(BatchRunner::new((), writer.clone(), RunnerConfig::default()).is_ok());
        assert!(BatchRunner::new(
            (),
            writer.clone(),
            RunnerConfig::default().with_batch_size(0)
        )
        .is_err());
        assert!(BatchRunner::new(
            (),
            writer,
            RunnerConfig::default().with_max_concurrency(0)
        )
        .is_err());
    }
}
