//! Error types for history operations

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the history store and its persistence layer
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),

    #[error("invalid {field}: {value}")]
    Validation { field: String, value: String },

    #[error("suite not found: {0}")]
    SuiteNotFound(String),

    #[error("invalid benchmark report: {0}")]
    InvalidReport(String),

    #[error("invalid run document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot is locked by another writer: {}", .0.display())]
    Locked(PathBuf),

    #[error("snapshot already exists: {}", .0.display())]
    SnapshotExists(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl HistoryError {
    pub(crate) fn validation(field: impl Into<String>, value: impl fmt::Display) -> Self {
        Self::Validation {
            field: field.into(),
            value: value.to_string(),
        }
    }

    /// Re-home a validation failure found while loading under `path`.
    pub(crate) fn located(self, path: &str) -> Self {
        match self {
            Self::Validation { field, value } => {
                Self::MalformedSnapshot(format!("{path}.{field}: invalid value {value}"))
            }
            other => other,
        }
    }
}
