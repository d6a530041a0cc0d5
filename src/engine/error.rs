//! Store Error Types

use serde_json::Value;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Update condition failed on {id}: expected {field} = {expected}")]
    UpdateConditionFailed {
        id: String,
        field: String,
        expected: Value,
    },

    #[error("Query compilation error: {0}")]
    QueryCompilation(String),

    #[error("Invalid continuation token: {0}")]
    InvalidContinuationToken(String),

    #[error("Attribute cannot be addressed by this backend: {0}")]
    InvalidAttribute(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn condition_failed(id: &str, field: &str, expected: &Value) -> Self {
        StoreError::UpdateConditionFailed {
            id: id.to_string(),
            field: field.to_string(),
            expected: expected.clone(),
        }
    }

    /// True for infrastructure failures, false for the typed outcomes a caller
    /// is expected to handle (absence, condition mismatch, bad input).
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            StoreError::Sqlite(_)
                | StoreError::Pool(_)
                | StoreError::Json(_)
                | StoreError::Io(_)
                | StoreError::Backend(_)
        )
    }

    pub fn is_condition_failed(&self) -> bool {
        matches!(self, StoreError::UpdateConditionFailed { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::RecordNotFound(_))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Backend(format!("blocking task failed: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
