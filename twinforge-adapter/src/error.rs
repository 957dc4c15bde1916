//! Adapter error types.

use crate::registry::AdapterLifecycle;
use thiserror::Error;

/// Errors from adapters and the adapter registry.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter already registered: {adapter_id}")]
    AlreadyRegistered { adapter_id: String },

    #[error("adapter not found: {adapter_id}")]
    NotFound { adapter_id: String },

    #[error("adapter '{adapter_id}' did not bind within {timeout_ms}ms")]
    Timeout { adapter_id: String, timeout_ms: u64 },

    #[error("adapter '{adapter_id}' failed to bind: {reason}")]
    BindFailed { adapter_id: String, reason: String },

    #[error("adapter '{adapter_id}' cannot {operation} from state '{state}'")]
    InvalidLifecycle {
        adapter_id: String,
        operation: &'static str,
        state: AdapterLifecycle,
    },

    #[error("adapter '{adapter_id}' permanently failed after {attempts} attempts")]
    PermanentlyFailed { adapter_id: String, attempts: u32 },

    /// Adapter-origin runtime failure, used by implementations to report
    /// errors from their own I/O.
    #[error("adapter failure: {reason}")]
    Failed { reason: String },
}

impl AdapterError {
    /// Returns a stable error code for diagnostics.
    pub fn error_code(&self) -> &'static str {
        match self {
            AdapterError::AlreadyRegistered { .. } => "ADAPTER_EXISTS",
            AdapterError::NotFound { .. } => "ADAPTER_NOT_FOUND",
            AdapterError::Timeout { .. } => "ADAPTER_TIMEOUT",
            AdapterError::BindFailed { .. } => "ADAPTER_BIND_FAILED",
            AdapterError::InvalidLifecycle { .. } => "ADAPTER_INVALID_LIFECYCLE",
            AdapterError::PermanentlyFailed { .. } => "ADAPTER_PERMANENT_FAILURE",
            AdapterError::Failed { .. } => "ADAPTER_FAILURE",
        }
    }
}
