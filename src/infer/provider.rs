use std::future::Future;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Errors from the model provider. Each one fails a single record.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Cannot connect to model server at {0}: {1}")]
    Connection(String, String),

    #[error("Model server returned HTTP {0}: {1}")]
    Server(u16, String),

    #[error("Invalid response from model server: {0}")]
    InvalidResponse(String),

    #[error("Failed to read input {0}: {1}")]
    Read(String, String),
}

/// View classification for one study file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewPrediction {
    pub views: Vec<String>,
    pub video_shape: Vec<usize>,
}

/// A loaded model, ready for per-file inference.
///
/// Sessions hold external resources and must be released with [`close`](ModelSession::close).
pub trait ModelSession: Send + Sync {
    /// Device the model ended up on (e.g. `cuda:0`, `cpu`).
    fn device(&self) -> &str;

    fn infer(
        &self,
        file: &Path,
        filename: &str,
    ) -> impl Future<Output = Result<ViewPrediction, ModelError>> + Send;

    fn close(self) -> impl Future<Output = Result<(), ModelError>> + Send
    where
        Self: Sized;
}

/// Loads a model and hands out a session.
pub trait ModelProvider: Send + Sync {
    type Session: ModelSession;

    fn name(&self) -> &str;

    /// Load the model. Failure here is fatal for the run.
    fn load(&self) -> impl Future<Output = crate::Result<Self::Session>> + Send;
}
