// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! JSONL loaders for benchmark datasets and per-model predictions.
//!
//! Dataset rows are validated here so the evaluation engine can assume
//! well-formed input.

use crate::eval_dataset::{DatasetRow, Difficulty, PredictionRow};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Fields every dataset row must carry
pub const REQUIRED_FIELDS: [&str; 6] = [
    "id",
    "query",
    "expected_answer",
    "retrieved_contexts",
    "difficulty",
    "category",
];

#[derive(Debug, Error)]
pub enum DataError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: invalid JSON: {source}")]
    Json {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path}:{line}: row failed validation: {reason}")]
    InvalidRow {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Dataset is empty: {0}")]
    EmptyDataset(PathBuf),
}

/// Load and validate a benchmark dataset from a JSONL file
pub fn load_dataset(path: impl AsRef<Path>) -> Result<Vec<DatasetRow>, DataError> {
    let path = path.as_ref();
    let mut rows = Vec::new();

    for (line, record) in read_jsonl_objects(path)? {
        validate_row(&record).map_err(|reason| DataError::InvalidRow {
            path: path.to_path_buf(),
            line,
            reason,
        })?;
        let row: DatasetRow =
            serde_json::from_value(Value::Object(record)).map_err(|source| DataError::Json {
                path: path.to_path_buf(),
                line,
                source,
            })?;
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(DataError::EmptyDataset(path.to_path_buf()));
    }

    debug!(path = %path.display(), rows = rows.len(), "Loaded dataset");
    Ok(rows)
}

/// Load one model's predictions, one JSON object per line
pub fn load_predictions(path: impl AsRef<Path>) -> Result<Vec<PredictionRow>, DataError> {
    let path = path.as_ref();
    let predictions: Vec<PredictionRow> = read_jsonl_objects(path)?
        .into_iter()
        .map(|(_, record)| PredictionRow::from_record(record))
        .collect();

    debug!(path = %path.display(), rows = predictions.len(), "Loaded predictions");
    Ok(predictions)
}

/// Check a raw dataset record against the row schema
pub fn validate_row(record: &Map<String, Value>) -> Result<(), String> {
    let missing: Vec<&str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| !record.contains_key(*field))
        .collect();
    if !missing.is_empty() {
        return Err(format!("Missing required fields: {:?}", missing));
    }

    non_empty_string(record, "id")?;
    non_empty_string(record, "query")?;

    if !record["expected_answer"].is_string() {
        return Err("Field 'expected_answer' must be a string".to_string());
    }

    match &record["retrieved_contexts"] {
        Value::Array(contexts) => {
            if contexts.iter().any(|c| !c.is_string()) {
                return Err("Each retrieved_context must be a string".to_string());
            }
        }
        _ => return Err("Field 'retrieved_contexts' must be a list".to_string()),
    }

    let difficulty = record["difficulty"].as_str().unwrap_or_default();
    if Difficulty::parse(difficulty).is_none() {
        let allowed: Vec<&str> = Difficulty::ALL.iter().map(|d| d.as_str()).collect();
        return Err(format!(
            "Invalid difficulty '{}'. Must be one of {:?}",
            record["difficulty"], allowed
        ));
    }

    non_empty_string(record, "category")?;
    Ok(())
}

fn non_empty_string(record: &Map<String, Value>, field: &str) -> Result<(), String> {
    match record.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(()),
        _ => Err(format!("Field '{}' must be a non-empty string", field)),
    }
}

/// Parse every non-blank line as a JSON object, keeping 1-based line numbers
fn read_jsonl_objects(path: &Path) -> Result<Vec<(usize, Map<String, Value>)>, DataError> {
    let content = fs::read_to_string(path).map_err(|source| DataError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut records = Vec::new();
    for (idx, raw) in content.lines().enumerate() {
        let line = idx + 1;
        if raw.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(raw).map_err(|source| DataError::Json {
            path: path.to_path_buf(),
            line,
            source,
        })?;
        match value {
            Value::Object(record) => records.push((line, record)),
            other => {
                return Err(DataError::InvalidRow {
                    path: path.to_path_buf(),
                    line,
                    reason: format!("expected a JSON object, found {}", json_kind(&other)),
                })
            }
        }
    }
    Ok(records)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_lines(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    fn valid_record() -> Value {
        json!({
            "id": "q1",
            "query": "What is the capital of France?",
            "expected_answer": "Paris",
            "retrieved_contexts": ["Paris is the capital of France."],
            "difficulty": "easy",
            "category": "geography"
        })
    }

    #[test]
    fn test_load_dataset() {
        let record = valid_record().to_string();
        let file = write_lines(&[&record, "", &record]);

        let rows = load_dataset(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "q1");
        assert_eq!(rows[0].difficulty, Difficulty::Easy);
        assert_eq!(rows[0].retrieved_contexts.len(), 1);
    }

    #[test]
    fn test_empty_dataset_rejected() {
        let file = write_lines(&["", "  "]);
        assert!(matches!(
            load_dataset(file.path()),
            Err(DataError::EmptyDataset(_))
        ));
    }

    #[test]
    fn test_invalid_row_reports_line() {
        let mut bad = valid_record();
        bad["difficulty"] = json!("extreme");
        let good = valid_record().to_string();
        let bad = bad.to_string();
        let file = write_lines(&[&good, &bad]);

        match load_dataset(file.path()) {
            Err(DataError::InvalidRow { line, reason, .. }) => {
                assert_eq!(line, 2);
                assert!(reason.contains("extreme"));
            }
            other => panic!("expected InvalidRow, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_row_rules() {
        let mut record = valid_record().as_object().unwrap().clone();
        assert!(validate_row(&record).is_ok());

        record.remove("category");
        assert!(validate_row(&record).unwrap_err().contains("category"));

        let mut record = valid_record().as_object().unwrap().clone();
        record.insert("id".to_string(), json!(""));
        assert!(validate_row(&record).unwrap_err().contains("'id'"));

        let mut record = valid_record().as_object().unwrap().clone();
        record.insert("retrieved_contexts".to_string(), json!(["ok", 3]));
        assert!(validate_row(&record).is_err());

        let mut record = valid_record().as_object().unwrap().clone();
        record.insert("retrieved_contexts".to_string(), json!("not a list"));
        assert!(validate_row(&record).is_err());
    }

    #[test]
    fn test_load_predictions() {
        let file = write_lines(&[
            r#"{"answer": "Paris"}"#,
            r#"{"prediction": "Berlin", "latency_ms": 40}"#,
            r#"{}"#,
        ]);
        let predictions = load_predictions(file.path()).unwrap();
        assert_eq!(predictions.len(), 3);
        assert_eq!(predictions[0].answer, "Paris");
        assert_eq!(predictions[1].answer, "Berlin");
        assert_eq!(predictions[2].answer, "");
    }

    #[test]
    fn test_predictions_must_be_objects() {
        let file = write_lines(&[r#"["Paris"]"#]);
        assert!(matches!(
            load_predictions(file.path()),
            Err(DataError::InvalidRow { line: 1, .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_predictions("/nonexistent/predictions.jsonl"),
            Err(DataError::Io { .. })
        ));
    }
}
