//! Layered run configuration.
//!
//! Precedence, lowest to highest: built-in defaults, YAML file,
//! environment variables, CLI flags. Every section and field has a
//! default so a config file may be partial or absent.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RunnerError};
use crate::logging::LogFormat;
use crate::runner::RunnerConfig;

/// Environment variable consulted for the chat API credential.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Dataset split selecting the caption manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSplit {
    Train,
    Val,
    Test,
}

impl DatasetSplit {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetSplit::Train => "train",
            DatasetSplit::Val => "val",
            DatasetSplit::Test => "test",
        }
    }
}

impl std::fmt::Display for DatasetSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub input_dir: PathBuf,
    /// Caption manifest file name; `{split}` is replaced by the dataset split.
    pub file_template: String,
    /// File extensions picked up by directory discovery (no leading dot).
    pub extensions: Vec<String>,
    pub recursive: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("data"),
            file_template: "CV_images_tinyllava-6-24-24-{split}.json".to_string(),
            extensions: vec!["dcm".to_string()],
            recursive: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub start_idx: usize,
    pub process_all: bool,
    /// Record limit when `process_all` is false.
    pub num_entries: usize,
    pub max_concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            start_idx: 0,
            process_all: true,
            num_entries: 10,
            max_concurrency: 1,
        }
    }
}

impl BatchConfig {
    /// Record limit implied by `process_all` / `num_entries`.
    pub fn limit(&self) -> Option<usize> {
        if self.process_all {
            None
        } else {
            Some(self.num_entries)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// Merge batch files into one combined file after a complete run.
    pub combine: bool,
    /// Also write one JSON file per record (inference only).
    pub per_record: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output_batches"),
            combine: true,
            per_record: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: None,
            format: LogFormat::Simple,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    /// Base URL of an OpenAI-compatible API.
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub timeout_secs: u64,
    /// Never written back out; usually comes from the environment.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            max_tokens: 300,
            temperature: None,
            timeout_secs: 120,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    /// Model server base URL.
    pub endpoint: String,
    /// Weights file, resolved against `assets_dir` when relative.
    pub weights_path: Option<PathBuf>,
    /// Absolute root of the model's assets.
    pub assets_dir: Option<PathBuf>,
    pub device: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "echoprime".to_string(),
            endpoint: "http://localhost:8000".to_string(),
            weights_path: None,
            assets_dir: None,
            device: None,
            timeout_secs: 300,
        }
    }
}

impl ModelConfig {
    /// Weights path made absolute against `assets_dir`, if one is configured.
    pub fn resolved_weights_path(&self) -> Option<PathBuf> {
        let weights = self.weights_path.as_ref()?;
        match &self.assets_dir {
            Some(root) if weights.is_relative() => Some(root.join(weights)),
            _ => Some(weights.clone()),
        }
    }
}

/// Complete configuration shared by both binaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub data: DataConfig,
    pub batch: BatchConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
    pub qa: QaConfig,
    pub model: ModelConfig,
}

impl RunConfig {
    /// Parse a YAML document. Missing sections and fields take defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| RunnerError::io(path, e))?;
        Self::from_yaml_str(&text)
    }

    /// Load from `path` if it exists; otherwise fall back to defaults.
    ///
    /// The second value is a warning for the caller to log once logging
    /// is up (config is read before the subscriber exists).
    pub fn load_or_default(path: Option<&Path>) -> Result<(Self, Option<String>)> {
        match path {
            Some(p) if p.exists() => Ok((Self::from_file(p)?, None)),
            Some(p) => Ok((
                Self::default(),
                Some(format!("Config file not found: {}. Using defaults.", p.display())),
            )),
            None => Ok((Self::default(), None)),
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (testable without touching
    /// the real environment).
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(device) = lookup("ECHO_DEVICE") {
            self.model.device = Some(device);
        }
        if let Some(size) = lookup("ECHO_BATCH_SIZE") {
            self.batch.batch_size = size.trim().parse().map_err(|e| {
                RunnerError::InvalidConfig(format!("Invalid ECHO_BATCH_SIZE '{}': {}", size, e))
            })?;
        }
        if let Some(dir) = lookup("ECHO_INPUT_DIR") {
            self.data.input_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("ECHO_OUTPUT_DIR") {
            self.output.dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup("ECHO_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(key) = lookup(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.qa.api_key = Some(key);
            }
        }
        Ok(())
    }

    /// Path of the caption manifest for a split.
    pub fn caption_manifest(&self, split: DatasetSplit) -> PathBuf {
        self.data
            .input_dir
            .join(self.data.file_template.replace("{split}", split.as_str()))
    }

    /// Runner knobs derived from the `batch` and `output` sections.
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::default()
            .with_batch_size(self.batch.batch_size)
            .with_max_concurrency(self.batch.max_concurrency)
            .with_combine(self.output.combine)
    }

    /// Checks shared by both tools, including that `data.input_dir` exists.
    pub fn validate(&self) -> Result<()> {
        self.validate_settings()?;
        if !self.data.input_dir.exists() {
            return Err(RunnerError::InputNotFound(self.data.input_dir.clone()));
        }
        Ok(())
    }

    /// Batch settings only, for runs whose inputs come from a manifest.
    pub fn validate_settings(&self) -> Result<()> {
        if self.batch.batch_size == 0 {
            return Err(RunnerError::InvalidConfig(
                "batch_size must be positive".to_string(),
            ));
        }
        if self.batch.max_concurrency == 0 {
            return Err(RunnerError::InvalidConfig(
                "max_concurrency must be positive".to_string(),
            ));
        }
        if !self.batch.process_all && self.batch.num_entries == 0 {
            return Err(RunnerError::InvalidConfig(
                "num_entries_to_process must be positive when not processing all".to_string(),
            ));
        }
        Ok(())
    }

    /// Checks for the caption Q&A tool.
    pub fn validate_qa(&self) -> Result<()> {
        self.validate()?;
        if self.qa.model.trim().is_empty() {
            return Err(RunnerError::InvalidConfig("qa.model is empty".to_string()));
        }
        if self.qa.max_tokens == 0 {
            return Err(RunnerError::InvalidConfig(
                "max_tokens must be positive".to_string(),
            ));
        }
        match &self.qa.api_key {
            Some(key) if !key.trim().is_empty() => Ok(()),
            _ => Err(RunnerError::MissingCredential(format!(
                "OpenAI API key is required. Set {} or pass --api_key.",
                API_KEY_ENV
            ))),
        }
    }

    /// Model checks for the inference tool. Pair with [`validate`](Self::validate)
    /// or [`validate_settings`](Self::validate_settings).
    pub fn validate_model(&self) -> Result<()> {
        if self.model.name.trim().is_empty() {
            return Err(RunnerError::InvalidConfig("model.name is empty".to_string()));
        }
        if let Some(weights) = self.model.resolved_weights_path() {
            if weights.is_relative() {
                return Err(RunnerError::InvalidConfig(format!(
                    "model.weights_path {} is relative; set model.assets_dir or use an absolute path",
                    weights.display()
                )));
            }
            if !weights.exists() {
                return Err(RunnerError::ModelUnavailable(format!(
                    "weights file not found: {}",
                    weights.display()
                )));
            }
        }
        Ok(())
    }
}
