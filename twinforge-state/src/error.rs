//! State and persistence error types.

use thiserror::Error;

/// Errors from the twin state store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("twin already registered: {twin_id}")]
    TwinExists { twin_id: String },

    #[error("twin not found: {twin_id}")]
    TwinNotFound { twin_id: String },

    #[error("schema violation for twin '{twin_id}': {reason}")]
    Schema { twin_id: String, reason: String },

    #[error("stale version for twin '{twin_id}': delta based on {based_on}, current {current}")]
    StaleVersion {
        twin_id: String,
        based_on: u64,
        current: u64,
    },

    #[error("property not found: '{key}' on twin '{twin_id}'")]
    PropertyNotFound { twin_id: String, key: String },

    #[error("empty delta for twin '{twin_id}'")]
    EmptyDelta { twin_id: String },
}

impl StateError {
    /// Returns whether the caller may retry against a fresh snapshot.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StateError::StaleVersion { .. })
    }

    /// Returns a stable error code for diagnostics.
    pub fn error_code(&self) -> &'static str {
        match self {
            StateError::TwinExists { .. } => "TWIN_EXISTS",
            StateError::TwinNotFound { .. } => "TWIN_NOT_FOUND",
            StateError::Schema { .. } => "SCHEMA_VIOLATION",
            StateError::StaleVersion { .. } => "STALE_VERSION",
            StateError::PropertyNotFound { .. } => "PROPERTY_NOT_FOUND",
            StateError::EmptyDelta { .. } => "EMPTY_DELTA",
        }
    }
}

/// Errors from snapshot persistence.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("data corruption: {0}")]
    Corruption(String),
}
