//! The grade report file written by graders and read by the host.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{REPORT_DIR_NAME, REPORT_FILE_NAME};

/// Structured result of one grading run.
///
/// Only `score` is interpreted. Everything else a grader writes is kept in
/// `details` and passed through to the logs untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradeReport {
    /// Missing in the file means zero.
    #[serde(default)]
    pub score: i64,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl GradeReport {
    pub fn new(score: i64) -> Self {
        Self {
            score,
            details: serde_json::Map::new(),
        }
    }

    /// Attach a diagnostic field. `score` is reserved and ignored here.
    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if key != "score" {
            self.details.insert(key.to_string(), value.into());
        }
        self
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("grade report not found at {path}")]
    Missing { path: PathBuf },

    #[error("grade report at {path} is not valid: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to access grade report at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Location of the report file for a submission rooted at `submission_root`.
pub fn report_path(submission_root: &Path) -> PathBuf {
    submission_root.join(REPORT_DIR_NAME).join(REPORT_FILE_NAME)
}

/// Read the report for a submission. A missing file is reported separately
/// from an unreadable or malformed one.
pub fn read_report(submission_root: &Path) -> Result<GradeReport, ReportError> {
    let path = report_path(submission_root);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ReportError::Missing { path });
        }
        Err(source) => return Err(ReportError::Io { path, source }),
    };
    serde_json::from_str(&content).map_err(|source| ReportError::Invalid { path, source })
}

/// Write `report` for a submission, creating the report directory if needed.
pub fn write_report(submission_root: &Path, report: &GradeReport) -> Result<PathBuf, ReportError> {
    let path = report_path(submission_root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ReportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let json = serde_json::to_string_pretty(report).map_err(|source| ReportError::Invalid {
        path: path.clone(),
        source,
    })?;
    std::fs::write(&path, json).map_err(|source| ReportError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_raw(root: &Path, content: &str) {
        let dir = root.join(REPORT_DIR_NAME);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(REPORT_FILE_NAME), content).unwrap();
    }

    #[test]
    fn test_read_report_score_only() {
        let dir = tempfile::tempdir().unwrap();
        write_raw(dir.path(), r#"{"score": 87}"#);

        let report = read_report(dir.path()).unwrap();
        assert_eq!(report.score, 87);
        assert!(report.details.is_empty());
    }

    #[test]
    fn test_read_report_missing_score_defaults_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        write_raw(dir.path(), r#"{"passed": 0, "failed": 3}"#);

        let report = read_report(dir.path()).unwrap();
        assert_eq!(report.score, 0);
        assert_eq!(report.details.get("failed"), Some(&serde_json::json!(3)));
    }

    #[test]
    fn test_read_report_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_report(dir.path()).unwrap_err();
        match err {
            ReportError::Missing { path } => assert_eq!(path, report_path(dir.path())),
            other => panic!("Expected Missing, got {:?}", other),
        }
    }

    #[test]
    fn test_read_report_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        write_raw(dir.path(), "score: 10");

        assert!(matches!(
            read_report(dir.path()),
            Err(ReportError::Invalid { .. })
        ));
    }

    #[test]
    fn test_read_report_non_object_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        write_raw(dir.path(), "[1, 2, 3]");

        assert!(matches!(
            read_report(dir.path()),
            Err(ReportError::Invalid { .. })
        ));
    }

    #[test]
    fn test_write_then_read_keeps_details() {
        let dir = tempfile::tempdir().unwrap();
        let report = GradeReport::new(42).with_detail("feedback", "test_add failed");

        let path = write_report(dir.path(), &report).unwrap();
        assert_eq!(path, report_path(dir.path()));
        assert_eq!(read_report(dir.path()).unwrap(), report);
    }

    #[test]
    fn test_with_detail_ignores_score_key() {
        let report = GradeReport::new(5).with_detail("score", 100);
        assert_eq!(report.score, 5);
        assert!(report.details.is_empty());
    }
}
