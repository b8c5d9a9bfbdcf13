use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors that abort a run before (or between) batches.
///
/// Per-record failures never surface here; they are captured in the
/// batch outcome instead.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Input not found: {0}")]
    InputNotFound(PathBuf),

    #[error("Malformed input {path}: {message}")]
    MalformedInput { path: PathBuf, message: String },

    #[error("No records to process in {0}")]
    EmptyInput(PathBuf),

    #[error("Start index {start_idx} is beyond the {total} available records")]
    StartOutOfRange { start_idx: usize, total: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Run was cancelled")]
    Cancelled,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV parsing failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0}")]
    Other(String),
}

impl RunnerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RunnerError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<anyhow::Error> for RunnerError {
    fn from(err: anyhow::Error) -> Self {
        RunnerError::Other(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;
