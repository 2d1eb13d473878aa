//! Batch run accounting.
//!
//! Every run ends with a report, even a "successful" one, so dropped sessions
//! and blocks stay visible.

use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::builder::BuildOutcome;
use crate::error::{ParseError, StorageError};
use crate::parser::ParsedDocument;

/// A document that produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub path: String,
    /// Byte offset of the failure; absent when the file could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    pub reason: String,
}

impl From<ParseError> for DocumentFailure {
    fn from(err: ParseError) -> Self {
        Self {
            path: err.path.display().to_string(),
            offset: Some(err.offset),
            reason: err.reason,
        }
    }
}

/// Window and filter counts from example building.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleStats {
    pub windows: usize,
    pub examples: usize,
    pub dropped_empty_input: usize,
    pub dropped_non_therapist: usize,
    pub dropped_length: usize,
    pub dropped_tokens: usize,
}

impl ExampleStats {
    pub fn record(&mut self, outcome: &BuildOutcome) {
        self.windows += outcome.windows;
        self.examples += outcome.examples.len();
        self.dropped_empty_input += outcome.dropped_empty_input;
        self.dropped_non_therapist += outcome.dropped_non_therapist;
        self.dropped_length += outcome.dropped_length;
        self.dropped_tokens += outcome.dropped_tokens;
    }

    pub fn dropped(&self) -> usize {
        self.dropped_empty_input + self.dropped_non_therapist + self.dropped_length + self.dropped_tokens
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunReport {
    pub documents_processed: usize,
    pub documents_failed: usize,
    pub sessions_detected: usize,
    pub sessions_extracted: usize,
    pub sessions_dropped_empty: usize,
    pub exchanges_extracted: usize,
    pub blocks_dropped_unattributed: usize,
    pub failures: Vec<DocumentFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub examples: Option<ExampleStats>,
}

impl RunReport {
    pub fn record_document(&mut self, doc: &ParsedDocument) {
        self.documents_processed += 1;
        self.sessions_detected += doc.detected_boundaries;
        self.sessions_extracted += doc.sessions.len();
        self.sessions_dropped_empty += doc.empty_sessions();
        self.exchanges_extracted += doc.sessions.iter().map(|s| s.len()).sum::<usize>();
        self.blocks_dropped_unattributed += doc.dropped_blocks;
    }

    pub fn record_failure(&mut self, failure: DocumentFailure) {
        self.documents_failed += 1;
        self.failures.push(failure);
    }

    /// Read a report written by an earlier run; `None` when there is none yet.
    pub fn read_json(path: &Path) -> Result<Option<Self>, StorageError> {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(path, e)),
        };
        serde_json::from_str(&json).map(Some).map_err(|e| StorageError::json(path, e))
    }

    pub fn write_json(&self, path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| StorageError::json(path, e))?;
        std::fs::write(path, json).map_err(|e| StorageError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_failure_from_parse_error() {
        let failure = DocumentFailure::from(ParseError::new("a/b.html", 17, "unclosed paragraph"));
        assert_eq!(failure.path, "a/b.html");
        assert_eq!(failure.offset, Some(17));
    }

    #[test]
    fn test_dataset_stats_keep_extraction_counts() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run_report.json");
        assert_eq!(RunReport::read_json(&path).unwrap(), None);

        let mut extracted = RunReport {
            documents_processed: 1,
            exchanges_extracted: 4,
            ..Default::default()
        };
        extracted.record_failure(DocumentFailure {
            path: "x.txt".to_string(),
            offset: None,
            reason: "unreadable".to_string(),
        });
        extracted.write_json(&path).unwrap();

        let mut report = RunReport::read_json(&path).unwrap().unwrap();
        report.examples = Some(ExampleStats {
            windows: 3,
            examples: 2,
            dropped_length: 1,
            ..Default::default()
        });
        report.write_json(&path).unwrap();

        let reloaded = RunReport::read_json(&path).unwrap().unwrap();
        assert_eq!(reloaded.documents_processed, 1);
        assert_eq!(reloaded.exchanges_extracted, 4);
        assert_eq!(reloaded.failures, extracted.failures);
        assert_eq!(reloaded.examples.map(|e| e.dropped()), Some(1));
    }

    #[test]
    fn test_read_json_rejects_garbage() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run_report.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(RunReport::read_json(&path), Err(StorageError::Json { .. })));
    }

    #[test]
    fn test_write_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out/run_report.json");
        let report = RunReport {
            documents_processed: 1,
            ..Default::default()
        };
        report.write_json(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["documents_processed"], 1);
        assert!(value.get("examples").is_none());
    }
}
