//! Non-fatal diagnostic reporting.
//!
//! Failures local to one adapter, one subscriber, or one shadowing attempt
//! are contained: they are raised here, mirrored to the log, and never
//! abort the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A subscriber queue overflowed and dropped its oldest events.
    SubscriberOverflow,
    /// An adapter callback returned an error.
    HandlerFailure,
    /// A shadowing attempt exhausted its conflict retries; the event was
    /// dropped.
    ShadowingConflict,
    /// The shadowing function itself failed for an event.
    ShadowingFailure,
    /// An adapter failed and a rebind attempt is scheduled.
    AdapterRetry,
    /// An adapter exhausted its retry budget.
    AdapterPermanentFailure,
    /// In-flight work was abandoned at the stop grace timeout.
    DrainTimeout,
    /// A digital action referenced an undeclared action key.
    UndeclaredAction,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::SubscriberOverflow => "subscriber_overflow",
            DiagnosticKind::HandlerFailure => "handler_failure",
            DiagnosticKind::ShadowingConflict => "shadowing_conflict",
            DiagnosticKind::ShadowingFailure => "shadowing_failure",
            DiagnosticKind::AdapterRetry => "adapter_retry",
            DiagnosticKind::AdapterPermanentFailure => "adapter_permanent_failure",
            DiagnosticKind::DrainTimeout => "drain_timeout",
            DiagnosticKind::UndeclaredAction => "undeclared_action",
        }
    }
}

/// A contained, reported failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Twin the diagnostic concerns, if any.
    pub twin_id: Option<String>,

    /// Component that raised it (adapter id, "runner", "bus", ...).
    pub source: String,

    /// Failure category.
    pub kind: DiagnosticKind,

    /// Human-readable detail.
    pub detail: String,

    /// When it was raised.
    pub raised_at: DateTime<Utc>,
}

impl Diagnostic {
    pub fn new(
        twin_id: Option<String>,
        source: impl Into<String>,
        kind: DiagnosticKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            twin_id,
            source: source.into(),
            kind,
            detail: detail.into(),
            raised_at: Utc::now(),
        }
    }
}

/// Shared sink for diagnostics.
///
/// Raising never blocks; observers subscribe like any bus consumer. Every
/// diagnostic is also mirrored to the log at warn level, so nothing is
/// silent even with no observers attached.
#[derive(Clone)]
pub struct DiagnosticSink {
    sender: broadcast::Sender<Diagnostic>,
}

impl DiagnosticSink {
    /// Creates a sink with the given observer queue capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Raises a diagnostic.
    pub fn raise(&self, diagnostic: Diagnostic) {
        tracing::warn!(
            twin_id = diagnostic.twin_id.as_deref().unwrap_or("-"),
            source = %diagnostic.source,
            kind = diagnostic.kind.as_str(),
            "{}",
            diagnostic.detail
        );
        // Ignore send errors (no observers).
        let _ = self.sender.send(diagnostic);
    }

    /// Subscribes an observer.
    pub fn subscribe(&self) -> broadcast::Receiver<Diagnostic> {
        self.sender.subscribe()
    }
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_raise_and_observe() {
        let sink = DiagnosticSink::new(16);
        let mut rx = sink.subscribe();

        sink.raise(Diagnostic::new(
            Some("twin-1".to_string()),
            "runner",
            DiagnosticKind::ShadowingConflict,
            "retries exhausted",
        ));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, DiagnosticKind::ShadowingConflict);
        assert_eq!(received.twin_id.as_deref(), Some("twin-1"));
    }

    #[test]
    fn test_raise_without_observers_is_fine() {
        let sink = DiagnosticSink::new(16);
        sink.raise(Diagnostic::new(
            None,
            "bus",
            DiagnosticKind::SubscriberOverflow,
            "dropped 3 events",
        ));
    }
}
