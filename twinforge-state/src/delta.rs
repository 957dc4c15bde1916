//! State mutation deltas.
//!
//! A [`StateDelta`] groups one or more operations against the snapshot
//! version it was computed from. The store applies a delta atomically:
//! either every op commits under a single new version, or none do.

use crate::model::{ActionDescriptor, EventDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single operation inside a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DeltaOp {
    /// Sets a property value, creating the property if absent.
    SetProperty { key: String, value: Value },

    /// Removes a property and its history.
    RemoveProperty { key: String },

    /// Declares a relationship key.
    DeclareRelationship { key: String },

    /// Removes a relationship and all its targets.
    RemoveRelationship { key: String },

    /// Adds a target twin to a declared relationship.
    AddRelationshipTarget { key: String, target: String },

    /// Removes a target twin from a declared relationship.
    RemoveRelationshipTarget { key: String, target: String },

    /// Declares an action the twin can be commanded to perform.
    DeclareAction { descriptor: ActionDescriptor },

    /// Removes a declared action.
    RemoveAction { key: String },

    /// Declares an event the twin can emit.
    DeclareEvent { descriptor: EventDescriptor },

    /// Removes a declared event.
    RemoveEvent { key: String },
}

/// A mutation computed against a specific snapshot version.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateDelta {
    /// Version of the snapshot this delta was computed from. The store
    /// rejects the delta as stale if the twin has moved past it.
    pub based_on_version: u64,

    /// Operations, applied in order.
    pub ops: Vec<DeltaOp>,
}

impl StateDelta {
    /// Creates an empty delta based on the given snapshot version.
    pub fn new(based_on_version: u64) -> Self {
        Self {
            based_on_version,
            ops: Vec::new(),
        }
    }

    /// Returns true if the delta carries no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn set_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.ops.push(DeltaOp::SetProperty {
            key: key.into(),
            value,
        });
        self
    }

    pub fn remove_property(mut self, key: impl Into<String>) -> Self {
        self.ops.push(DeltaOp::RemoveProperty { key: key.into() });
        self
    }

    pub fn declare_relationship(mut self, key: impl Into<String>) -> Self {
        self.ops.push(DeltaOp::DeclareRelationship { key: key.into() });
        self
    }

    pub fn remove_relationship(mut self, key: impl Into<String>) -> Self {
        self.ops.push(DeltaOp::RemoveRelationship { key: key.into() });
        self
    }

    pub fn add_relationship_target(
        mut self,
        key: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.ops.push(DeltaOp::AddRelationshipTarget {
            key: key.into(),
            target: target.into(),
        });
        self
    }

    pub fn remove_relationship_target(
        mut self,
        key: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.ops.push(DeltaOp::RemoveRelationshipTarget {
            key: key.into(),
            target: target.into(),
        });
        self
    }

    pub fn declare_action(mut self, descriptor: ActionDescriptor) -> Self {
        self.ops.push(DeltaOp::DeclareAction { descriptor });
        self
    }

    pub fn remove_action(mut self, key: impl Into<String>) -> Self {
        self.ops.push(DeltaOp::RemoveAction { key: key.into() });
        self
    }

    pub fn declare_event(mut self, descriptor: EventDescriptor) -> Self {
        self.ops.push(DeltaOp::DeclareEvent { descriptor });
        self
    }

    pub fn remove_event(mut self, key: impl Into<String>) -> Self {
        self.ops.push(DeltaOp::RemoveEvent { key: key.into() });
        self
    }
}
