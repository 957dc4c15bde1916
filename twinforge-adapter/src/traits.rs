//! Adapter contracts.
//!
//! Adapters are the engine's boundary to the outside world. A physical
//! adapter ingests telemetry and executes action requests; a digital
//! adapter publishes state changes to external consumers and relays their
//! action requests back. Both follow the same bind/unbind lifecycle and
//! talk to the engine only through the handle passed at bind time.

use crate::error::AdapterError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use twinforge_bus::{BusEvent, DigitalActionEvent, EventBus, PhysicalEvent};
use twinforge_state::StateChangeEvent;

/// Engine-side handle given to a physical adapter at bind time.
///
/// Cloneable and cheap; the adapter keeps it for the duration of the bind
/// and uses it to push physical events into the engine.
#[derive(Clone)]
pub struct PhysicalAdapterHandle {
    adapter_id: String,
    twin_id: String,
    bus: Arc<EventBus>,
}

impl PhysicalAdapterHandle {
    pub fn new(adapter_id: impl Into<String>, twin_id: impl Into<String>, bus: Arc<EventBus>) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            twin_id: twin_id.into(),
            bus,
        }
    }

    /// Id of the adapter this handle was issued to.
    pub fn adapter_id(&self) -> &str {
        &self.adapter_id
    }

    /// Twin the adapter is bound to.
    pub fn twin_id(&self) -> &str {
        &self.twin_id
    }

    /// Pushes a physical event into the engine. Never blocks.
    pub fn publish_event(&self, event_type: impl Into<String>, payload: Value) {
        let event = PhysicalEvent::new(event_type, &self.adapter_id, &self.twin_id, payload);
        self.bus.publish(BusEvent::Physical(event));
    }
}

/// Engine-side handle given to a digital adapter at bind time.
#[derive(Clone)]
pub struct DigitalAdapterHandle {
    adapter_id: String,
    twin_id: String,
    bus: Arc<EventBus>,
}

impl DigitalAdapterHandle {
    pub fn new(adapter_id: impl Into<String>, twin_id: impl Into<String>, bus: Arc<EventBus>) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            twin_id: twin_id.into(),
            bus,
        }
    }

    /// Id of the adapter this handle was issued to.
    pub fn adapter_id(&self) -> &str {
        &self.adapter_id
    }

    /// Twin the adapter is bound to.
    pub fn twin_id(&self) -> &str {
        &self.twin_id
    }

    /// Submits an action request towards the physical side. Never blocks.
    pub fn submit_action(&self, action_key: impl Into<String>, payload: Value) {
        let event = DigitalActionEvent::new(action_key, payload, &self.adapter_id, &self.twin_id);
        self.bus.publish(BusEvent::DigitalAction(event));
    }
}

/// A component ingesting physical-world telemetry into the engine.
///
/// `bind` returning `Ok` signals the adapter reached BOUND; the registry
/// enforces the configured timeout around it. After `unbind` the adapter
/// must stop publishing through its handle.
#[async_trait]
pub trait PhysicalAdapter: Send + Sync {
    /// Stable adapter identifier, unique within one twin.
    fn id(&self) -> &str;

    /// Connects to the physical counterpart. The handle stays valid until
    /// `unbind`.
    async fn bind(&self, handle: PhysicalAdapterHandle) -> Result<(), AdapterError>;

    /// Disconnects from the physical counterpart.
    async fn unbind(&self) -> Result<(), AdapterError>;

    /// Delivers an action request originating from a digital adapter.
    ///
    /// Adapters receive every action for their twin and ignore keys they
    /// do not own.
    async fn on_digital_action(&self, action: DigitalActionEvent) -> Result<(), AdapterError>;
}

/// A component publishing twin state to external digital consumers.
#[async_trait]
pub trait DigitalAdapter: Send + Sync {
    /// Stable adapter identifier, unique within one twin.
    fn id(&self) -> &str;

    /// Connects to the external consumer. The handle stays valid until
    /// `unbind`.
    async fn bind(&self, handle: DigitalAdapterHandle) -> Result<(), AdapterError>;

    /// Disconnects from the external consumer.
    async fn unbind(&self) -> Result<(), AdapterError>;

    /// Delivers one accepted state change.
    async fn on_state_change(&self, change: StateChangeEvent) -> Result<(), AdapterError>;
}
