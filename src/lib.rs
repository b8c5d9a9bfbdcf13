//! # echo-batch
//!
//! Resumable batch runner for echocardiography workloads that delegate the
//! real work to external systems: a vision model served out-of-process and
//! an OpenAI-compatible chat-completions API.
//!
//! ## Key Features
//!
//! - **Windowed batches**: records are processed in `[start_idx, start_idx + batch_size)`
//!   windows, each persisted to its own JSON file, so long jobs survive
//!   preemption and resume from an operator-supplied offset
//! - **Per-record isolation**: a failing record is logged and recorded,
//!   the rest of the batch carries on
//! - **Bounded concurrency** with input order restored in the output
//! - **ETA estimation** from observed per-record durations
//! - **Two front ends**: `echo-qa` (caption Q&A) and `echo-infer`
//!   (DICOM view inference)
//!
//! ## Quick Start
//!
//! 1. Load your records (see [`qa::load_caption_records`] or [`discovery::discover_files`])
//! 2. Implement [`RecordProcessor`] (or use [`FnProcessor`] for simple cases)
//! 3. Build a [`BatchRunner`] with a [`BatchWriter`] and call [`BatchRunner::run`]

pub mod config;
pub mod discovery;
pub mod error;
pub mod eta;
pub mod infer;
pub mod logging;
pub mod output;
pub mod qa;
pub mod runner;
pub mod types;

pub use config::{DatasetSplit, RunConfig};
pub use error::{Result, RunnerError};
pub use output::BatchWriter;
pub use runner::{plan_windows, BatchRunner, RunnerConfig};
pub use types::{
    BatchOutcome, BatchSummary, BatchWindow, ProcessingResult, Record, RecordFailure, RunState,
    RunStatus, RunSummary, SizeBucket,
};

/// Trait for processing individual records in a batch.
///
/// `D` is the record payload (a file path, a caption entry, ...). The
/// output is whatever should be persisted for a successful record,
/// usually the input's pass-through fields plus the external result.
///
/// # Example
///
/// ```ignore
/// use echo_batch::*;
///
/// struct Upper;
///
/// impl RecordProcessor<String> for Upper {
///     type Output = String;
///
///     async fn process(&self, record: &Record<String>) -> anyhow::Result<String> {
///         Ok(record.data.to_uppercase())
///     }
///
///     fn resource_key(&self) -> &str {
///         "none"
///     }
/// }
/// ```
pub trait RecordProcessor<D>: Send + Sync
where
    D: Send + Sync,
{
    type Output: serde::Serialize + Send;

    /// Process a single record. Errors are captured per record and never
    /// stop the batch.
    fn process(
        &self,
        record: &Record<D>,
    ) -> impl std::future::Future<Output = anyhow::Result<Self::Output>> + Send;

    /// The external resource doing the work (e.g. model name).
    fn resource_key(&self) -> &str;

    /// Operation label used in logs and ETA buckets.
    fn operation(&self) -> &str {
        "process"
    }
}

/// Adapts a synchronous closure into a [`RecordProcessor`].
///
/// ```
/// use echo_batch::{FnProcessor, Record, RecordProcessor};
///
/// let double = FnProcessor::new("math", |r: &Record<i64>| Ok(r.data * 2));
/// assert_eq!(double.resource_key(), "math");
/// ```
pub struct FnProcessor<D, O, F> {
    resource_key: String,
    f: F,
    _phantom: std::marker::PhantomData<fn(&D) -> O>,
}

impl<D, O, F> FnProcessor<D, O, F>
where
    F: Fn(&Record<D>) -> anyhow::Result<O>,
{
    pub fn new(resource_key: impl Into<String>, f: F) -> Self {
        Self {
            resource_key: resource_key.into(),
            f,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<D, O, F> RecordProcessor<D> for FnProcessor<D, O, F>
where
    D: Send + Sync,
    O: serde::Serialize + Send,
    F: Fn(&Record<D>) -> anyhow::Result<O> + Send + Sync,
{
    type Output = O;

    fn process(
        &self,
        record: &Record<D>,
    ) -> impl std::future::Future<Output = anyhow::Result<O>> + Send {
        std::future::ready((self.f)(record))
    }

    fn resource_key(&self) -> &str {
        &self.resource_key
    }
}
