use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lifecycle of a whole run. There is no per-record state machine:
/// a record either succeeds or fails once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    NotStarted,
    Running,
    Completed,
    Aborted,
}

/// Size bucket for ETA estimation. Groups records by processing cost.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SizeBucket {
    Small,
    Medium,
    Large,
    Unknown,
}

impl SizeBucket {
    /// Classify a file by byte length. Thresholds: <1MB = Small, <20MB = Medium, else Large.
    pub fn from_byte_len(bytes: u64) -> Self {
        if bytes < 1_000_000 {
            Self::Small
        } else if bytes < 20_000_000 {
            Self::Medium
        } else {
            Self::Large
        }
    }

    /// Classify a caption by character count. Thresholds: <200 = Small, <1000 = Medium, else Large.
    pub fn from_text_len(chars: usize) -> Self {
        if chars < 200 {
            Self::Small
        } else if chars < 1000 {
            Self::Medium
        } else {
            Self::Large
        }
    }
}

/// One unit of input work.
///
/// `index` is the record's position in the global ordered sequence and
/// `id` its intrinsic identifier (relative path, or the `id` field of a
/// caption entry). Records are never mutated after loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record<D> {
    pub index: usize,
    pub id: String,
    pub data: D,
    pub size_bucket: SizeBucket,
}

impl<D> Record<D> {
    pub fn new(index: usize, id: impl Into<String>, data: D) -> Self {
        Self {
            index,
            id: id.into(),
            data,
            size_bucket: SizeBucket::Unknown,
        }
    }

    pub fn with_size_bucket(mut self, bucket: SizeBucket) -> Self {
        self.size_bucket = bucket;
        self
    }
}

/// Half-open window `[start, end)` over the record sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWindow {
    pub start: usize,
    pub end: usize,
}

impl BatchWindow {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Inclusive index of the last record, as used in batch file names.
    pub fn last(&self) -> Option<usize> {
        if self.is_empty() {
            None
        } else {
            Some(self.end - 1)
        }
    }
}

/// A record that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub index: usize,
    pub id: String,
    pub error: String,
}

/// Outcome for a single record: exactly one per input record.
#[derive(Debug, Clone)]
pub enum ProcessingResult<T> {
    Success(T),
    Failure(RecordFailure),
}

impl<T> ProcessingResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessingResult::Success(_))
    }
}

/// Everything produced by one batch window.
#[derive(Debug, Clone)]
pub struct BatchOutcome<T> {
    pub window: BatchWindow,
    /// Successful outputs, in input order.
    pub successes: Vec<T>,
    /// Failures, in input order.
    pub failures: Vec<RecordFailure>,
    pub duration_ms: u64,
}

impl<T> BatchOutcome<T> {
    pub fn empty(window: BatchWindow) -> Self {
        Self {
            window,
            successes: Vec::new(),
            failures: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn success_count(&self) -> usize {
        self.successes.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn total(&self) -> usize {
        self.success_count() + self.failure_count()
    }

    /// Split ordered per-record results into successes and failures.
    pub fn from_results(
        window: BatchWindow,
        results: Vec<ProcessingResult<T>>,
        duration_ms: u64,
    ) -> Self {
        let mut outcome = Self::empty(window);
        outcome.duration_ms = duration_ms;
        for result in results {
            match result {
                ProcessingResult::Success(value) => outcome.successes.push(value),
                ProcessingResult::Failure(failure) => outcome.failures.push(failure),
            }
        }
        outcome
    }
}

/// Summary of a persisted batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub window: BatchWindow,
    pub succeeded: usize,
    pub failed: usize,
    pub total_duration_ms: u64,
    pub avg_duration_ms: u64,
    pub output_file: Option<PathBuf>,
    pub errors_file: Option<PathBuf>,
}

/// Per-invocation run state. Nothing here is persisted across runs;
/// resuming relies on the operator passing `next_start_idx` back in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub run_id: String,
    pub status: RunStatus,
    pub start_idx: usize,
    pub end_idx: usize,
    pub batch_size: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// ISO 8601 timestamp when processing started.
    pub started_at: Option<String>,
    /// ISO 8601 timestamp when the run completed or aborted.
    pub completed_at: Option<String>,
}

impl RunState {
    pub fn new(start_idx: usize, end_idx: usize, batch_size: usize) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            status: RunStatus::NotStarted,
            start_idx,
            end_idx,
            batch_size,
            succeeded: 0,
            failed: 0,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(chrono::Utc::now().to_rfc3339());
    }

    pub fn mark_finished(&mut self, status: RunStatus) {
        self.status = status;
        self.completed_at = Some(chrono::Utc::now().to_rfc3339());
    }
}

/// Final report of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub state: RunState,
    pub batches: Vec<BatchSummary>,
    /// Where the next invocation should start to continue this run.
    pub next_start_idx: usize,
    pub combined_file: Option<PathBuf>,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.state.status == RunStatus::Completed
    }
}
