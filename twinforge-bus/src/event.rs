//! Event records carried by the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use twinforge_state::StateChangeEvent;

/// Telemetry ingested from the physical world.
///
/// Created by a physical adapter, queued on the bus, consumed once by the
/// shadowing runner, then discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalEvent {
    /// Event type label (e.g. "temp", "door-open").
    pub event_type: String,

    /// Id of the physical adapter that produced the event.
    pub adapter_id: String,

    /// Twin the event belongs to.
    pub twin_id: String,

    /// Event payload.
    pub payload: Value,

    /// Receipt timestamp.
    pub received_at: DateTime<Utc>,
}

impl PhysicalEvent {
    pub fn new(
        event_type: impl Into<String>,
        adapter_id: impl Into<String>,
        twin_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            adapter_id: adapter_id.into(),
            twin_id: twin_id.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}

/// An action request flowing from a digital adapter towards the physical
/// world. Never mutates twin state directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitalActionEvent {
    /// Key of the declared action being requested.
    pub action_key: String,

    /// Action input payload.
    pub payload: Value,

    /// Id of the requesting digital adapter.
    pub adapter_id: String,

    /// Twin the action targets.
    pub twin_id: String,

    /// Request timestamp.
    pub requested_at: DateTime<Utc>,
}

impl DigitalActionEvent {
    pub fn new(
        action_key: impl Into<String>,
        payload: Value,
        adapter_id: impl Into<String>,
        twin_id: impl Into<String>,
    ) -> Self {
        Self {
            action_key: action_key.into(),
            payload,
            adapter_id: adapter_id.into(),
            twin_id: twin_id.into(),
            requested_at: Utc::now(),
        }
    }
}

/// Engine lifecycle state.
///
/// Owned and advanced exclusively by the lifecycle orchestrator; carried
/// here because lifecycle transitions are published as bus events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineLifecycle {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl EngineLifecycle {
    /// Returns true if `start()` is legal from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, EngineLifecycle::Created | EngineLifecycle::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineLifecycle::Created => "created",
            EngineLifecycle::Starting => "starting",
            EngineLifecycle::Running => "running",
            EngineLifecycle::Stopping => "stopping",
            EngineLifecycle::Stopped => "stopped",
            EngineLifecycle::Error => "error",
        }
    }
}

impl std::fmt::Display for EngineLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle transition, published for observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleVariation {
    /// Twin whose engine transitioned.
    pub twin_id: String,

    /// State left behind.
    pub from: EngineLifecycle,

    /// State entered.
    pub to: EngineLifecycle,

    /// Transition timestamp.
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleVariation {
    pub fn new(twin_id: impl Into<String>, from: EngineLifecycle, to: EngineLifecycle) -> Self {
        Self {
            twin_id: twin_id.into(),
            from,
            to,
            occurred_at: Utc::now(),
        }
    }
}

/// Any event the bus can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusEvent {
    Physical(PhysicalEvent),
    DigitalAction(DigitalActionEvent),
    StateChange(StateChangeEvent),
    Lifecycle(LifecycleVariation),
}

impl BusEvent {
    /// Returns the twin id the event belongs to.
    pub fn twin_id(&self) -> &str {
        match self {
            BusEvent::Physical(e) => &e.twin_id,
            BusEvent::DigitalAction(e) => &e.twin_id,
            BusEvent::StateChange(e) => &e.twin_id,
            BusEvent::Lifecycle(e) => &e.twin_id,
        }
    }
}
