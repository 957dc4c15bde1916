//! # twinforge-state
//!
//! Twin state model and store for twinforge.
//!
//! This crate provides:
//! - The canonical twin state model (properties, relationships, actions, events)
//! - Versioned, optimistically-checked state mutation via deltas
//! - State change records emitted once per accepted mutation
//! - Snapshot persistence interfaces and in-tree implementations

pub mod change;
pub mod delta;
pub mod error;
pub mod model;
pub mod persist;
pub mod store;

pub use change::{ChangeOperation, ResourceKind, StateChangeEvent};
pub use delta::{DeltaOp, StateDelta};
pub use error::{PersistenceError, StateError};
pub use model::{
    ActionDescriptor, EventDescriptor, PropertyRevision, TwinModel, TwinProperty,
    TwinRelationship, TwinState,
};
pub use persist::{FileSnapshotStore, MemorySnapshotStore, SnapshotMeta, SnapshotStore};
pub use store::{CommitReceipt, TwinStateStore};
