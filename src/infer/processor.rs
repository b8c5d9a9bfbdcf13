use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::provider::ModelSession;
use crate::discovery::SourceFile;
use crate::output::save_json;
use crate::types::Record;
use crate::RecordProcessor;

/// Persisted result for one input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub views: Vec<String>,
    pub video_shape: Vec<usize>,
    pub device: String,
    pub source_file: String,
}

/// Per-record output file name derived from the input's directory structure.
///
/// `p10/p10002221/s94106955/x.dcm` under `input_dir` becomes
/// `p10_p10002221_s94106955.json`. A file directly under `input_dir` keeps
/// its full name (`x.dcm.json`); files outside `input_dir` fall back to
/// their stem.
pub fn output_filename(path: &Path, input_dir: &Path) -> String {
    let Ok(relative) = path.strip_prefix(input_dir) else {
        return stem_name(path);
    };
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    match parts.len() {
        0 => stem_name(path),
        1 => format!("{}.json", parts[0]),
        n => format!("{}.json", parts[..n - 1].join("_")),
    }
}

fn stem_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "result".to_string());
    format!("{}.json", stem)
}

/// Runs view inference for each discovered file through a model session.
pub struct InferenceProcessor<S> {
    session: S,
    model_name: String,
    per_record_dir: Option<PathBuf>,
}

impl<S: ModelSession> InferenceProcessor<S> {
    pub fn new(session: S, model_name: impl Into<String>) -> Self {
        Self {
            session,
            model_name: model_name.into(),
            per_record_dir: None,
        }
    }

    /// Also write each result to its own file under `dir`.
    pub fn with_per_record_output(mut self, dir: impl Into<PathBuf>) -> Self {
        self.per_record_dir = Some(dir.into());
        self
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Hand the session back so the caller can close it.
    pub fn into_session(self) -> S {
        self.session
    }
}

impl<S: ModelSession> RecordProcessor<SourceFile> for InferenceProcessor<S> {
    type Output = InferenceResult;

    async fn process(&self, record: &Record<SourceFile>) -> anyhow::Result<InferenceResult> {
        let source = &record.data;
        let prediction = self
            .session
            .infer(&source.path, &record.id)
            .await
            .with_context(|| format!("inference failed for {}", source.path.display()))?;

        let result = InferenceResult {
            views: prediction.views,
            video_shape: prediction.video_shape,
            device: self.session.device().to_string(),
            source_file: source.path.display().to_string(),
        };

        if let Some(dir) = &self.per_record_dir {
            let file = dir.join(output_filename(&source.path, &source.root));
            let mut wrapped = BTreeMap::new();
            wrapped.insert(result.source_file.as_str(), &result);
            save_json(&wrapped, &file)
                .with_context(|| format!("writing {}", file.display()))?;
            tracing::debug!(id = %record.id, file = %file.display(), "Per-record result saved");
        }

        Ok(result)
    }

    fn resource_key(&self) -> &str {
        &self.model_name
    }

    fn operation(&self) -> &str {
        "views"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::provider::{ModelError, ViewPrediction};
    use tempfile::tempdir;

    struct FakeSession;

    impl ModelSession for FakeSession {
        fn device(&self) -> &str {
            "cpu"
        }

        async fn infer(&self, file: &Path, _filename: &str) -> Result<ViewPrediction, ModelError> {
            if file.to_string_lossy().contains("corrupt") {
                return Err(ModelError::Server(422, "bad pixel data".to_string()));
            }
            Ok(ViewPrediction {
                views: vec!["A4C".to_string()],
                video_shape: vec![3, 16, 224, 224],
            })
        }

        async fn close(self) -> Result<(), ModelError> {
            Ok(())
        }
    }

    fn record(root: &Path, rel: &str) -> Record<SourceFile> {
        Record::new(
            0,
            rel,
            SourceFile {
                path: root.join(rel),
                root: root.to_path_buf(),
            },
        )
    }

    #[test]
    fn test_output_filename_from_structure() {
        let root = Path::new("/data/raw");
        assert_eq!(
            output_filename(&root.join("p10/p10002221/s94106955/x.dcm"), root),
            "p10_p10002221_s94106955.json"
        );
        assert_eq!(output_filename(&root.join("p10/x.dcm"), root), "p10.json");
        assert_eq!(output_filename(&root.join("x.dcm"), root), "x.dcm.json");
        assert_eq!(
            output_filename(Path::new("/elsewhere/y.dcm"), root),
            "y.json"
        );
    }

    #[tokio::test]
    async fn test_process_builds_result() {
        let processor = InferenceProcessor::new(FakeSession, "echoprime");
        let rec = record(Path::new("/data"), "p10/p1/s1/a.dcm");
        let result = processor.process(&rec).await.unwrap();
        assert_eq!(result.views, vec!["A4C"]);
        assert_eq!(result.device, "cpu");
        assert_eq!(result.source_file, "/data/p10/p1/s1/a.dcm");
        assert_eq!(processor.resource_key(), "echoprime");
    }

    #[tokio::test]
    async fn test_process_writes_per_record_file() {
        let out = tempdir().unwrap();
        let processor =
            InferenceProcessor::new(FakeSession, "echoprime").with_per_record_output(out.path());
        let rec = record(Path::new("/data"), "p10/p1/s1/a.dcm");
        processor.process(&rec).await.unwrap();

        let written: serde_json::Value =
            crate::output::load_json(&out.path().join("p10_p1_s1.json")).unwrap();
        assert_eq!(written["/data/p10/p1/s1/a.dcm"]["views"][0], "A4C");
    }

    #[tokio::test]
    async fn test_process_failure_names_file() {
        let processor = InferenceProcessor::new(FakeSession, "echoprime");
        let rec = record(Path::new("/data"), "corrupt.dcm");
        let err = processor.process(&rec).await.unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("corrupt.dcm"));
        assert!(message.contains("bad pixel data"));
    }
}
