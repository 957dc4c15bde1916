//! # twinforge
//!
//! Core library to build white-label digital twins.
//!
//! A digital twin keeps a software-side state representation synchronized
//! with a physical counterpart. twinforge provides the engine for that:
//! pluggable physical/digital adapters, a versioned twin state store, an
//! internal event bus, and a user-supplied shadowing function that decides
//! how physical events mutate twin state.
//!
//! ```
//! use std::sync::Arc;
//! use twinforge::{
//!     Config, DigitalTwin, PhysicalEvent, ShadowError, ShadowOutcome, StateDelta, TwinModel,
//!     TwinState,
//! };
//!
//! // The shadowing function maps physical events onto state mutations.
//! let shadow = Arc::new(
//!     |snapshot: &TwinState, event: &PhysicalEvent| -> Result<ShadowOutcome, ShadowError> {
//!         Ok(ShadowOutcome::Mutate(
//!             StateDelta::new(snapshot.version)
//!                 .set_property("temperature", event.payload["value"].clone()),
//!         ))
//!     },
//! );
//!
//! let twin = DigitalTwin::new(TwinModel::new("room-1"), shadow, Config::default())?;
//! // Register physical/digital adapters, then `twin.start().await`.
//! # Ok::<(), twinforge::EngineError>(())
//! ```

pub use twinforge_adapter::{
    AdapterDescriptor, AdapterError, AdapterKind, AdapterLifecycle, AdapterRegistry,
    DigitalAdapter, DigitalAdapterHandle, PhysicalAdapter, PhysicalAdapterHandle, RetryPolicy,
};
pub use twinforge_bus::{
    BusEvent, Diagnostic, DiagnosticKind, DiagnosticSink, DigitalActionEvent, EngineLifecycle,
    EventBus, LifecycleVariation, PhysicalEvent, Subscription, Topic,
};
pub use twinforge_engine::{
    AdapterConfig, BindingPolicy, BusConfig, Config, ConfigError, DigitalTwin, EngineError,
    LifecycleConfig, ShadowError, ShadowOutcome, ShadowingConfig, ShadowingFunction,
    ShadowingRunner, TwinEngine,
};
pub use twinforge_state::{
    ActionDescriptor, ChangeOperation, CommitReceipt, DeltaOp, EventDescriptor,
    FileSnapshotStore, MemorySnapshotStore, PersistenceError, PropertyRevision, ResourceKind,
    SnapshotMeta, SnapshotStore, StateChangeEvent, StateDelta, StateError, TwinModel,
    TwinProperty, TwinRelationship, TwinState, TwinStateStore,
};

/// Initializes a `tracing` subscriber honoring `RUST_LOG`, defaulting to
/// `info`. Optional; embedders with their own subscriber skip this.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
