//! View inference through an out-of-process model.

pub mod http;
pub mod pipeline;
pub mod processor;
pub mod provider;

pub use http::{HttpModelProvider, HttpModelSession};
pub use pipeline::run_inference;
pub use processor::{output_filename, InferenceProcessor, InferenceResult};
pub use provider::{ModelError, ModelProvider, ModelSession, ViewPrediction};
