use std::collections::HashSet;
use std::path::Path;

use anyhow::{anyhow, Context};
use serde_json::{Map, Value};

use super::client::CaptionAnswerer;
use crate::error::{Result, RunnerError};
use crate::output::load_json;
use crate::types::{Record, SizeBucket};
use crate::RecordProcessor;

/// One caption manifest entry, kept as raw JSON so unknown fields pass through.
pub type CaptionEntry = Map<String, Value>;

/// The caption of an entry: the last conversation turn's `value`, trimmed.
pub fn extract_caption(entry: &CaptionEntry) -> anyhow::Result<String> {
    let turns = entry
        .get("conversations")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("entry has no 'conversations' array"))?;
    let last = turns
        .last()
        .ok_or_else(|| anyhow!("entry has an empty 'conversations' array"))?;
    let caption = last
        .get("value")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("last conversation turn has no string 'value'"))?
        .trim();
    if caption.is_empty() {
        return Err(anyhow!("caption is empty"));
    }
    Ok(caption.to_string())
}

fn entry_id(entry: &CaptionEntry) -> Option<String> {
    match entry.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Load a caption manifest into records.
///
/// The file must hold a non-empty JSON array of objects. Entries without
/// an `id` get a positional one; duplicate ids are kept so indices stay
/// stable for resuming, but each is warned about.
pub fn load_caption_records(path: &Path) -> Result<Vec<Record<CaptionEntry>>> {
    let value: Value = load_json(path)?;
    let Value::Array(items) = value else {
        return Err(RunnerError::MalformedInput {
            path: path.to_path_buf(),
            message: "expected a JSON array of entries".to_string(),
        });
    };
    if items.is_empty() {
        return Err(RunnerError::EmptyInput(path.to_path_buf()));
    }

    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let Value::Object(entry) = item else {
            return Err(RunnerError::MalformedInput {
                path: path.to_path_buf(),
                message: format!("entry {} is not a JSON object", index),
            });
        };

        let id = match entry_id(&entry) {
            Some(id) => id,
            None => {
                tracing::warn!(index, "Entry has no id; using its position");
                format!("#{}", index)
            }
        };
        if !seen.insert(id.clone()) {
            tracing::warn!(index, id = %id, "Duplicate entry id");
        }

        let bucket = extract_caption(&entry)
            .map(|c| SizeBucket::from_text_len(c.chars().count()))
            .unwrap_or(SizeBucket::Unknown);
        records.push(Record::new(index, id, entry).with_size_bucket(bucket));
    }

    tracing::info!(path = %path.display(), entries = records.len(), "Loaded caption manifest");
    Ok(records)
}

/// Answers the fixed questions for each caption entry.
///
/// Output entries keep every input field except `conversations` and add
/// `caption` and `answers`.
pub struct CaptionProcessor<A> {
    answerer: A,
}

impl<A: CaptionAnswerer> CaptionProcessor<A> {
    pub fn new(answerer: A) -> Self {
        Self { answerer }
    }

    pub fn answerer(&self) -> &A {
        &self.answerer
    }
}

impl<A: CaptionAnswerer> RecordProcessor<CaptionEntry> for CaptionProcessor<A> {
    type Output = CaptionEntry;

    async fn process(&self, record: &Record<CaptionEntry>) -> anyhow::Result<CaptionEntry> {
        let caption = extract_caption(&record.data)?;
        tracing::debug!(id = %record.id, chars = caption.chars().count(), "Requesting answers");

        let answers = self
            .answerer
            .answer(&caption)
            .await
            .with_context(|| format!("answering caption for {}", record.id))?;

        let mut out = record.data.clone();
        out.remove("conversations");
        out.insert("caption".to_string(), Value::String(caption));
        out.insert(
            "answers".to_string(),
            Value::Array(answers.into_iter().map(Value::String).collect()),
        );
        Ok(out)
    }

    fn resource_key(&self) -> &str {
        self.answerer.model()
    }

    fn operation(&self) -> &str {
        "qa"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qa::client::ApiError;
    use serde_json::json;
    use tempfile::tempdir;

    struct Canned;

    impl CaptionAnswerer for Canned {
        async fn answer(&self, caption: &str) -> std::result::Result<Vec<String>, ApiError> {
            if caption.contains("fail") {
                return Err(ApiError::Api(500, "boom".to_string()));
            }
            Ok(vec![format!("A1: {}", caption.len())])
        }

        fn model(&self) -> &str {
            "canned"
        }
    }

    fn entry(value: Value) -> CaptionEntry {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_extract_caption_uses_last_turn() {
        let e = entry(json!({
            "id": "a",
            "conversations": [
                {"from": "human", "value": "<image>\nDescribe"},
                {"from": "gpt", "value": "  Apical view.  "}
            ]
        }));
        assert_eq!(extract_caption(&e).unwrap(), "Apical view.");
    }

    #[test]
    fn test_extract_caption_missing() {
        let e = entry(json!({"id": "a"}));
        assert!(extract_caption(&e).is_err());
        let e = entry(json!({"id": "a", "conversations": []}));
        assert!(extract_caption(&e).is_err());
    }

    #[test]
    fn test_load_rejects_non_array() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.json");
        std::fs::write(&path, r#"{"id": "a"}"#).unwrap();
        assert!(matches!(
            load_caption_records(&path),
            Err(RunnerError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_load_rejects_empty_array() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(matches!(
            load_caption_records(&path),
            Err(RunnerError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_load_assigns_ids_and_keeps_duplicates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.json");
        std::fs::write(
            &path,
            json!([
                {"id": "x", "conversations": [{"value": "short"}]},
                {"conversations": [{"value": "no id"}]},
                {"id": "x", "conversations": [{"value": "again"}]},
                {"id": 7, "conversations": [{"value": "numeric"}]}
            ])
            .to_string(),
        )
        .unwrap();

        let records = load_caption_records(&path).unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "#1", "x", "7"]);
        assert_eq!(records[0].size_bucket, SizeBucket::Small);
    }

    #[tokio::test]
    async fn test_process_shapes_output() {
        let processor = CaptionProcessor::new(Canned);
        let record = Record::new(
            0,
            "img-1",
            entry(json!({
                "id": "img-1",
                "image": "p10/a.png",
                "conversations": [{"value": " four chamber "}]
            })),
        );

        let out = processor.process(&record).await.unwrap();
        assert!(out.get("conversations").is_none());
        assert_eq!(out["image"], "p10/a.png");
        assert_eq!(out["caption"], "four chamber");
        assert_eq!(out["answers"], json!(["A1: 12"]));
        assert_eq!(processor.resource_key(), "canned");
        assert_eq!(processor.operation(), "qa");
    }

    #[tokio::test]
    async fn test_process_propagates_api_error() {
        let processor = CaptionProcessor::new(Canned);
        let record = Record::new(
            0,
            "img-2",
            entry(json!({"id": "img-2", "conversations": [{"value": "please fail"}]})),
        );
        let err = processor.process(&record).await.unwrap_err();
        assert!(format!("{:#}", err).contains("img-2"));
    }
}
