//! Engine error types.

use thiserror::Error;
use twinforge_adapter::AdapterError;
use twinforge_bus::EngineLifecycle;
use twinforge_state::{PersistenceError, StateError};

/// Errors from the engine orchestrator.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("twin '{twin_id}' cannot {operation} from lifecycle state '{from}'")]
    InvalidLifecycleTransition {
        twin_id: String,
        operation: &'static str,
        from: EngineLifecycle,
    },

    #[error("twin '{twin_id}' did not satisfy binding policy '{policy}': {bound}/{total} physical adapters bound")]
    BindingPolicyUnsatisfied {
        twin_id: String,
        policy: &'static str,
        bound: usize,
        total: usize,
    },

    #[error("twin already managed: {twin_id}")]
    TwinAlreadyManaged { twin_id: String },

    #[error("twin not managed: {twin_id}")]
    TwinNotManaged { twin_id: String },

    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl EngineError {
    /// Returns a stable error code for diagnostics.
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::InvalidLifecycleTransition { .. } => "INVALID_LIFECYCLE_TRANSITION",
            EngineError::BindingPolicyUnsatisfied { .. } => "BINDING_POLICY_UNSATISFIED",
            EngineError::TwinAlreadyManaged { .. } => "TWIN_ALREADY_MANAGED",
            EngineError::TwinNotManaged { .. } => "TWIN_NOT_MANAGED",
            EngineError::Adapter(e) => e.error_code(),
            EngineError::State(e) => e.error_code(),
            EngineError::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }
}
