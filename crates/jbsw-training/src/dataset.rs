use crate::error::TrainingResult;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Name of the single column the SFT framework reads prompts from.
pub const DEFAULT_TEXT_FIELD: &str = "text";

/// Default location of the instruction dataset.
pub const DEFAULT_DATA_PATH: &str = "data/training_data.jsonl";

/// Stable identifier for a dataset (content hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

impl std::fmt::Display for DatasetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One instruction-tuning example as stored in the JSONL file.
///
/// Missing keys read as empty text. `input` is optional; `null` and `""` both
/// mean "no input".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingRecord {
    #[serde(default)]
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default)]
    pub output: String,
}

impl TrainingRecord {
    #[must_use]
    pub fn new(instruction: impl Into<String>, output: impl Into<String>) -> Self {
        Self { instruction: instruction.into(), input: None, output: output.into() }
    }

    #[must_use]
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// The input text, if present and non-empty.
    #[must_use]
    pub fn input_text(&self) -> Option<&str> {
        self.input.as_deref().filter(|s| !s.is_empty())
    }
}

/// Where the job reads its records from and which column it trains on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub path: PathBuf,
    #[serde(default = "default_text_field")]
    pub text_field: String,
}

fn default_text_field() -> String {
    DEFAULT_TEXT_FIELD.to_string()
}

impl Default for DatasetSpec {
    fn default() -> Self {
        Self { path: PathBuf::from(DEFAULT_DATA_PATH), text_field: default_text_field() }
    }
}

pub fn compute_dataset_id<T: Serialize>(rows: &[T]) -> TrainingResult<DatasetId> {
    let mut hasher = Sha256::new();

    for row in rows {
        let bytes = serde_json::to_vec(row)?;
        hasher.update(bytes);
        hasher.update(b"\n");
    }

    Ok(DatasetId(hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_keys_default_to_empty() {
        let record: TrainingRecord = serde_json::from_str(r#"{"output":"Hello"}"#).unwrap();
        assert_eq!(record.instruction, "");
        assert_eq!(record.output, "Hello");
        assert!(record.input.is_none());
    }

    #[test]
    fn test_empty_and_null_input_are_absent() {
        let empty: TrainingRecord =
            serde_json::from_str(r#"{"instruction":"a","input":"","output":"b"}"#).unwrap();
        let null: TrainingRecord =
            serde_json::from_str(r#"{"instruction":"a","input":null,"output":"b"}"#).unwrap();
        assert_eq!(empty.input_text(), None);
        assert_eq!(null.input_text(), None);

        let present = TrainingRecord::new("a", "b").with_input("ctx");
        assert_eq!(present.input_text(), Some("ctx"));
    }

    #[test]
    fn test_compute_dataset_id_stable_for_same_content() {
        let rows = vec!["p1".to_string(), "p2".to_string()];

        let id1 = compute_dataset_id(&rows).unwrap();
        let id2 = compute_dataset_id(&rows).unwrap();
        assert_eq!(id1, id2);

        let reordered = vec!["p2".to_string(), "p1".to_string()];
        assert_ne!(id1, compute_dataset_id(&reordered).unwrap());
    }
}
