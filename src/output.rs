//! JSON persistence for batch outcomes.
//!
//! Each batch window is written to `batch_{start}_{last}.json` (successes)
//! and, when any record failed, `errors_{start}_{last}.json`. Files are
//! written to a temporary sibling first and renamed into place, so an
//! interrupted run never leaves a truncated batch file behind.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, RunnerError};
use crate::types::{BatchOutcome, BatchWindow};

const BATCH_PREFIX: &str = "batch_";
const ERRORS_PREFIX: &str = "errors_";

/// Serialize `value` as 4-space indented JSON and atomically replace `path`.
pub fn save_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| RunnerError::io(parent, e))?;
        }
    }

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    buf.push(b'\n');

    let tmp = tmp_path(path);
    fs::write(&tmp, &buf).map_err(|e| RunnerError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| RunnerError::io(path, e))?;
    tracing::debug!(path = %path.display(), bytes = buf.len(), "JSON saved");
    Ok(())
}

/// Load and deserialize a JSON file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RunnerError::InputNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(RunnerError::io(path, e)),
    };
    serde_json::from_str(&text).map_err(|e| RunnerError::MalformedInput {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Parse `batch_{start}_{last}.json` into `(start, last)`.
pub fn parse_batch_file_name(name: &str) -> Option<(usize, usize)> {
    let stem = name.strip_prefix(BATCH_PREFIX)?.strip_suffix(".json")?;
    let (start, last) = stem.split_once('_')?;
    Some((start.parse().ok()?, last.parse().ok()?))
}

/// Paths written for one batch.
#[derive(Debug, Clone)]
pub struct BatchFiles {
    pub output: PathBuf,
    pub errors: Option<PathBuf>,
}

/// Writes batch outcomes into one output directory and merges them back.
#[derive(Debug, Clone)]
pub struct BatchWriter {
    dir: PathBuf,
    dataset: Option<String>,
}

impl BatchWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            dataset: None,
        }
    }

    /// Writer for a dataset split: batches land in `{root}/output_{tag}`.
    pub fn for_dataset(root: impl AsRef<Path>, tag: &str) -> Self {
        Self {
            dir: root.as_ref().join(format!("output_{}", tag)),
            dataset: Some(tag.to_string()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dataset(&self) -> Option<&str> {
        self.dataset.as_deref()
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| RunnerError::io(&self.dir, e))
    }

    pub fn batch_path(&self, window: BatchWindow) -> PathBuf {
        self.dir.join(format!(
            "{}{}_{}.json",
            BATCH_PREFIX,
            window.start,
            window.last().unwrap_or(window.start)
        ))
    }

    pub fn errors_path(&self, window: BatchWindow) -> PathBuf {
        self.dir.join(format!(
            "{}{}_{}.json",
            ERRORS_PREFIX,
            window.start,
            window.last().unwrap_or(window.start)
        ))
    }

    pub fn combined_path(&self) -> PathBuf {
        match &self.dataset {
            Some(tag) => self.dir.join(format!("combined_output_{}.json", tag)),
            None => self.dir.join("combined_output.json"),
        }
    }

    /// Persist one batch outcome. Successes always get a file (possibly an
    /// empty array); failures only when there are any.
    pub fn write_batch<T: Serialize>(&self, outcome: &BatchOutcome<T>) -> Result<BatchFiles> {
        let output = self.batch_path(outcome.window);
        if output.exists() {
            tracing::warn!(
                path = %output.display(),
                "Batch file already exists and will be overwritten"
            );
        }
        save_json(&outcome.successes, &output)?;

        let errors = if outcome.failures.is_empty() {
            let stale = self.errors_path(outcome.window);
            if stale.exists() {
                fs::remove_file(&stale).map_err(|e| RunnerError::io(&stale, e))?;
            }
            None
        } else {
            let path = self.errors_path(outcome.window);
            save_json(&outcome.failures, &path)?;
            Some(path)
        };

        Ok(BatchFiles { output, errors })
    }

    /// List batch files in start-index order (numeric, not lexicographic).
    pub fn batch_files(&self) -> Result<Vec<(usize, usize, PathBuf)>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| RunnerError::io(&self.dir, e))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RunnerError::io(&self.dir, e))?;
            let name = entry.file_name();
            if let Some((start, last)) = name.to_str().and_then(parse_batch_file_name) {
                files.push((start, last, entry.path()));
            }
        }
        files.sort_by_key(|(start, last, _)| (*start, *last));
        Ok(files)
    }

    /// Concatenate every batch file into the combined output file.
    /// Returns the combined path and the number of entries written.
    pub fn combine(&self) -> Result<(PathBuf, usize)> {
        let mut combined: Vec<Value> = Vec::new();
        let mut covered_until: Option<usize> = None;

        for (start, last, path) in self.batch_files()? {
            if let Some(prev_end) = covered_until {
                if start <= prev_end {
                    tracing::warn!(
                        path = %path.display(),
                        start,
                        previous_last = prev_end,
                        "Batch file overlaps an earlier batch; entries may be duplicated"
                    );
                } else if start > prev_end + 1 {
                    tracing::warn!(
                        missing_from = prev_end + 1,
                        missing_to = start - 1,
                        "Gap between batch files; some records were never written"
                    );
                }
            }
            covered_until = Some(covered_until.map_or(last, |p| p.max(last)));

            let entries: Vec<Value> = load_json(&path)?;
            combined.extend(entries);
        }

        let target = self.combined_path();
        save_json(&combined, &target)?;
        Ok((target, combined.len()))
    }
}
