use crate::dataset::{compute_dataset_id, DatasetId, TrainingRecord, DEFAULT_TEXT_FIELD};
use crate::error::TrainingResult;
use crate::loader::write_jsonl;
use crate::template::PromptTemplate;
use serde_json::{Map, Value};
use std::path::Path;

/// Rendered prompts under a single named column, in input order.
///
/// This is the only shape the SFT framework is handed: one string field per
/// row, no labels, no metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDataset {
    field: String,
    rows: Vec<String>,
}

impl TextDataset {
    #[must_use]
    pub fn new(field: impl Into<String>, rows: Vec<String>) -> Self {
        Self { field: field.into(), rows }
    }

    #[must_use]
    pub fn from_records(records: &[TrainingRecord], template: &PromptTemplate) -> Self {
        Self::from_records_with_field(records, template, DEFAULT_TEXT_FIELD)
    }

    #[must_use]
    pub fn from_records_with_field(
        records: &[TrainingRecord],
        template: &PromptTemplate,
        field: &str,
    ) -> Self {
        let rows = records.iter().map(|r| template.render(r)).collect();
        Self::new(field, rows)
    }

    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(String::as_str)
    }

    #[must_use]
    pub fn rows(&self) -> &[String] {
        &self.rows
    }

    fn to_objects(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|text| {
                let mut obj = Map::with_capacity(1);
                obj.insert(self.field.clone(), Value::String(text.clone()));
                Value::Object(obj)
            })
            .collect()
    }

    /// Stage the dataset as `{"<field>": "<prompt>"}` lines.
    pub fn write_jsonl(&self, path: &Path) -> TrainingResult<()> {
        write_jsonl(path, &self.to_objects())
    }

    pub fn dataset_id(&self) -> TrainingResult<DatasetId> {
        compute_dataset_id(&self.rows)
    }
}
