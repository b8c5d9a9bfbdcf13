//! Tracing setup shared by both binaries.
//!
//! `RUST_LOG`, when set, wins over the configured level. HTTP client
//! internals are held at `warn` so per-record progress stays readable.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;
use crate::error::{Result, RunnerError};

const QUIET_TARGETS: &[&str] = &["hyper=warn", "hyper_util=warn", "reqwest=warn", "h2=warn"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event.
    Structured,
    /// Human-readable lines.
    #[default]
    Simple,
}

/// Translate a level name into an `EnvFilter` directive.
///
/// Accepts the usual tracing names plus `WARNING` and `CRITICAL`, in any case.
pub fn normalize_level(level: &str) -> Result<&'static str> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" | "critical" => Ok("error"),
        other => Err(RunnerError::InvalidConfig(format!(
            "Unknown log level '{}'",
            other
        ))),
    }
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let mut directives = vec![normalize_level(level)?.to_string()];
    directives.extend(QUIET_TARGETS.iter().map(|s| s.to_string()));
    EnvFilter::try_new(directives.join(","))
        .map_err(|e| RunnerError::InvalidConfig(format!("Invalid log filter: {}", e)))
}

/// Split a log file path into the directory and file name the appender wants.
fn appender_target(path: &Path) -> Result<(PathBuf, &std::ffi::OsStr)> {
    let file_name = path.file_name().ok_or_else(|| {
        RunnerError::InvalidConfig(format!("Log file path has no file name: {}", path.display()))
    })?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, file_name))
}

/// Install the global subscriber. Safe to call more than once; later
/// calls leave the first subscriber in place.
///
/// When a log file is configured the returned guard owns the background
/// writer. Hold it until the process is done logging; dropping it flushes
/// pending lines.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(&config.level)?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    match config.format {
        LogFormat::Structured => layers.push(fmt::layer().json().with_target(true).boxed()),
        LogFormat::Simple => layers.push(fmt::layer().with_target(false).boxed()),
    }

    let mut guard = None;
    if let Some(path) = &config.file {
        let (dir, file_name) = appender_target(path)?;
        std::fs::create_dir_all(&dir).map_err(|e| RunnerError::io(&dir, e))?;
        let file_appender = tracing_appender::rolling::never(&dir, file_name);
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        layers.push(
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true)
                .boxed(),
        );
        guard = Some(file_guard);
    }

    if tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized");
    }
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_level_aliases() {
        assert_eq!(normalize_level("INFO").unwrap(), "info");
        assert_eq!(normalize_level("WARNING").unwrap(), "warn");
        assert_eq!(normalize_level("critical").unwrap(), "error");
        assert_eq!(normalize_level(" Debug ").unwrap(), "debug");
    }

    #[test]
    fn test_normalize_level_unknown() {
        assert!(matches!(
            normalize_level("verbose"),
            Err(RunnerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_log_format_serde() {
        let format: LogFormat = serde_json::from_str("\"structured\"").unwrap();
        assert_eq!(format, LogFormat::Structured);
        assert_eq!(LogFormat::default(), LogFormat::Simple);
    }

    #[test]
    fn test_appender_target_splits_path() {
        let (dir, name) = appender_target(Path::new("logs/run/echo.log")).unwrap();
        assert_eq!(dir, PathBuf::from("logs/run"));
        assert_eq!(name, "echo.log");

        let (dir, name) = appender_target(Path::new("echo.log")).unwrap();
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(name, "echo.log");

        assert!(matches!(
            appender_target(Path::new("/")),
            Err(RunnerError::InvalidConfig(_))
        ));
    }

    // Only test in this binary that installs the global subscriber.
    #[test]
    fn test_file_logging_goes_through_appender() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("echo.log");
        let config = LoggingConfig {
            level: "INFO".to_string(),
            file: Some(path.clone()),
            format: LogFormat::Simple,
        };

        let guard = init(&config).unwrap();
        assert!(guard.is_some());
        tracing::info!(target: "echo_batch::logging", "appender smoke line");
        drop(guard);

        assert!(path.exists());
        let contents = std::fs::read_to_string(&path).unwrap();
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(contents.contains("appender smoke line"));
        }
    }
}
