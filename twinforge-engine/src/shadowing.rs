//! The shadowing function contract.

use thiserror::Error;
use twinforge_bus::PhysicalEvent;
use twinforge_state::{StateDelta, TwinState};

/// What a shadowing invocation decided.
#[derive(Debug, Clone, PartialEq)]
pub enum ShadowOutcome {
    /// Apply this mutation to the twin state.
    Mutate(StateDelta),
    /// The event does not affect twin state; nothing is published.
    Noop,
}

/// Errors from a shadowing invocation.
#[derive(Debug, Error)]
pub enum ShadowError {
    #[error("shadowing failed: {reason}")]
    Failed { reason: String },

    #[error("shadowing conflict: {retries} retries exhausted")]
    Conflict { retries: u32 },
}

impl ShadowError {
    /// Convenience constructor for model-author failures.
    pub fn failed(reason: impl Into<String>) -> Self {
        ShadowError::Failed {
            reason: reason.into(),
        }
    }
}

/// The user-supplied state-update policy.
///
/// `shadow` must be deterministic given its inputs: the runner re-invokes
/// it against a fresh snapshot after a stale-version conflict, and relies
/// on re-computation producing an equivalent decision. Mutations returned
/// from `shadow` must be based on the snapshot it was handed.
///
/// The lifecycle hooks default to no-ops; implement them to observe the
/// twin the function shadows.
pub trait ShadowingFunction: Send + Sync {
    /// Maps one physical event onto a state mutation, or `Noop`.
    fn shadow(
        &self,
        snapshot: &TwinState,
        event: &PhysicalEvent,
    ) -> Result<ShadowOutcome, ShadowError>;

    /// Called once when the twin is created, with its initial state.
    fn on_create(&self, _initial: &TwinState) {}

    /// Called when the engine enters RUNNING.
    fn on_start(&self) {}

    /// Called when the engine begins stopping.
    fn on_stop(&self) {}
}

/// Plain closures work as shadowing functions.
impl<F> ShadowingFunction for F
where
    F: Fn(&TwinState, &PhysicalEvent) -> Result<ShadowOutcome, ShadowError> + Send + Sync,
{
    fn shadow(
        &self,
        snapshot: &TwinState,
        event: &PhysicalEvent,
    ) -> Result<ShadowOutcome, ShadowError> {
        self(snapshot, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use twinforge_state::TwinModel;

    #[test]
    fn test_closure_as_shadowing_function() {
        let shadow = |snapshot: &TwinState, event: &PhysicalEvent| {
            Ok(ShadowOutcome::Mutate(
                StateDelta::new(snapshot.version)
                    .set_property("last_event", json!(event.event_type)),
            ))
        };

        let state = TwinState::from_model(&TwinModel::new("twin-1"));
        let event = PhysicalEvent::new("temp", "pa-1", "twin-1", json!(21.5));

        let outcome = ShadowingFunction::shadow(&shadow, &state, &event).unwrap();
        match outcome {
            ShadowOutcome::Mutate(delta) => assert_eq!(delta.based_on_version, 0),
            ShadowOutcome::Noop => panic!("expected mutation"),
        }
    }
}
