//! Shadowing function runner.
//!
//! One runner per twin. It consumes that twin's physical events strictly
//! one at a time, which is the core correctness guarantee: no two events
//! are shadowed concurrently against inconsistent base snapshots. Distinct
//! twins run their own runners concurrently.

use crate::shadowing::{ShadowOutcome, ShadowingFunction};
use std::sync::Arc;
use tokio::sync::mpsc;
use twinforge_bus::{
    BusEvent, Diagnostic, DiagnosticKind, DiagnosticSink, EventBus, PhysicalEvent,
};
use twinforge_state::{StateError, TwinStateStore};

/// Serialized shadowing worker for one twin.
pub struct ShadowingRunner {
    twin_id: String,
    store: Arc<TwinStateStore>,
    bus: Arc<EventBus>,
    diagnostics: DiagnosticSink,
    shadow: Arc<dyn ShadowingFunction>,
    max_conflict_retries: u32,
}

impl ShadowingRunner {
    pub fn new(
        twin_id: impl Into<String>,
        store: Arc<TwinStateStore>,
        bus: Arc<EventBus>,
        diagnostics: DiagnosticSink,
        shadow: Arc<dyn ShadowingFunction>,
        max_conflict_retries: u32,
    ) -> Self {
        Self {
            twin_id: twin_id.into(),
            store,
            bus,
            diagnostics,
            shadow,
            max_conflict_retries,
        }
    }

    /// Consumes the intake queue until it is closed, then drains what is
    /// left and returns. Closing the queue is how the orchestrator stops
    /// intake while letting in-flight work finish.
    pub async fn run(self, mut intake: mpsc::Receiver<PhysicalEvent>) {
        while let Some(event) = intake.recv().await {
            self.process(event).await;
        }
        tracing::debug!(twin_id = %self.twin_id, "shadowing runner drained");
    }

    /// Shadows one event and applies its mutation.
    ///
    /// A stale-version conflict re-reads the snapshot and re-runs the
    /// shadowing function, up to the configured retry bound; exhaustion
    /// drops the event with a diagnostic.
    async fn process(&self, event: PhysicalEvent) {
        let attempts = self.max_conflict_retries + 1;

        for _ in 0..attempts {
            let snapshot = match self.store.snapshot(&self.twin_id) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    self.raise(
                        DiagnosticKind::ShadowingFailure,
                        format!("snapshot unavailable: {}", e),
                    );
                    return;
                }
            };

            let outcome = match self.shadow.shadow(&snapshot, &event) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.raise(
                        DiagnosticKind::ShadowingFailure,
                        format!("event '{}' dropped: {}", event.event_type, e),
                    );
                    return;
                }
            };

            let delta = match outcome {
                ShadowOutcome::Mutate(delta) => delta,
                ShadowOutcome::Noop => {
                    tracing::trace!(
                        twin_id = %self.twin_id,
                        event_type = %event.event_type,
                        "shadowing noop"
                    );
                    return;
                }
            };

            match self.store.apply(&self.twin_id, &delta) {
                Ok(receipt) => {
                    tracing::debug!(
                        twin_id = %self.twin_id,
                        version = receipt.version,
                        event_type = %event.event_type,
                        "event shadowed"
                    );
                    for change in receipt.changes {
                        self.bus.publish(BusEvent::StateChange(change));
                    }
                    return;
                }
                Err(StateError::StaleVersion { .. }) => {
                    // Another writer moved the twin; recompute from fresh.
                    continue;
                }
                Err(e) => {
                    self.raise(
                        DiagnosticKind::ShadowingFailure,
                        format!("mutation rejected ({}): {}", e.error_code(), e),
                    );
                    return;
                }
            }
        }

        let conflict = crate::shadowing::ShadowError::Conflict {
            retries: self.max_conflict_retries,
        };
        self.raise(
            DiagnosticKind::ShadowingConflict,
            format!(
                "event '{}' from adapter '{}' dropped: {}",
                event.event_type, event.adapter_id, conflict
            ),
        );
    }

    fn raise(&self, kind: DiagnosticKind, detail: String) {
        self.diagnostics.raise(Diagnostic::new(
            Some(self.twin_id.clone()),
            "runner",
            kind,
            detail,
        ));
    }
}
