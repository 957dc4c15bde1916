//! Twin state store - serialized, versioned mutation of twin state.

use crate::change::{ChangeOperation, ResourceKind, StateChangeEvent};
use crate::delta::{DeltaOp, StateDelta};
use crate::error::StateError;
use crate::model::{TwinModel, TwinProperty, TwinRelationship, TwinState};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

/// Result of an accepted mutation.
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    /// Twin the mutation was applied to.
    pub twin_id: String,

    /// Resulting state version.
    pub version: u64,

    /// One change record per touched resource, in op order. The caller
    /// publishes these exactly once.
    pub changes: Vec<StateChangeEvent>,
}

/// Canonical store for twin state.
///
/// Mutations to one twin are serialized through a per-twin write lock;
/// distinct twins mutate independently. Reads clone a consistent snapshot
/// and never observe a partially applied delta: a delta is applied to a
/// working copy that replaces the stored state only on full success.
pub struct TwinStateStore {
    twins: DashMap<String, RwLock<TwinState>>,
}

impl TwinStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            twins: DashMap::new(),
        }
    }

    /// Registers a twin from its model, at version 0.
    pub fn register_twin(&self, model: &TwinModel) -> Result<TwinState, StateError> {
        if self.twins.contains_key(&model.twin_id) {
            return Err(StateError::TwinExists {
                twin_id: model.twin_id.clone(),
            });
        }

        let state = TwinState::from_model(model);
        self.twins
            .insert(model.twin_id.clone(), RwLock::new(state.clone()));

        tracing::debug!(twin_id = %model.twin_id, "twin registered");
        Ok(state)
    }

    /// Inserts or replaces a twin state wholesale (snapshot restore).
    pub fn restore(&self, state: TwinState) {
        tracing::debug!(twin_id = %state.twin_id, version = state.version, "twin state restored");
        self.twins
            .insert(state.twin_id.clone(), RwLock::new(state));
    }

    /// Removes a twin from the store.
    pub fn remove_twin(&self, twin_id: &str) -> Result<TwinState, StateError> {
        self.twins
            .remove(twin_id)
            .map(|(_, lock)| lock.into_inner())
            .ok_or_else(|| StateError::TwinNotFound {
                twin_id: twin_id.to_string(),
            })
    }

    /// Returns an immutable snapshot of a twin's state.
    pub fn snapshot(&self, twin_id: &str) -> Result<TwinState, StateError> {
        self.twins
            .get(twin_id)
            .map(|r| r.read().clone())
            .ok_or_else(|| StateError::TwinNotFound {
                twin_id: twin_id.to_string(),
            })
    }

    /// Returns true if the twin is registered.
    pub fn contains(&self, twin_id: &str) -> bool {
        self.twins.contains_key(twin_id)
    }

    /// Returns all registered twin ids.
    pub fn twin_ids(&self) -> Vec<String> {
        self.twins.iter().map(|r| r.key().clone()).collect()
    }

    /// Returns the number of registered twins.
    pub fn twin_count(&self) -> usize {
        self.twins.len()
    }

    /// Applies a delta to a twin.
    ///
    /// The delta must be based on the twin's current version; otherwise it
    /// is rejected with [`StateError::StaleVersion`] before any op runs.
    /// Each accepted delta increments the twin version by exactly 1 and
    /// yields one change record per touched resource.
    pub fn apply(&self, twin_id: &str, delta: &StateDelta) -> Result<CommitReceipt, StateError> {
        let entry = self
            .twins
            .get(twin_id)
            .ok_or_else(|| StateError::TwinNotFound {
                twin_id: twin_id.to_string(),
            })?;

        let mut state = entry.write();

        if delta.based_on_version != state.version {
            return Err(StateError::StaleVersion {
                twin_id: twin_id.to_string(),
                based_on: delta.based_on_version,
                current: state.version,
            });
        }

        if delta.is_empty() {
            return Err(StateError::EmptyDelta {
                twin_id: twin_id.to_string(),
            });
        }

        // Apply to a working copy so a failing op leaves the stored state
        // untouched and readers never see a partial delta.
        let mut working = state.clone();
        let mut changes = Vec::with_capacity(delta.ops.len());
        for op in &delta.ops {
            changes.push(apply_op(&mut working, op)?);
        }

        let version = state.version + 1;
        let now = Utc::now();
        working.version = version;
        working.updated_at = now;
        for change in &mut changes {
            change.version = version;
            change.occurred_at = now;
        }

        *state = working;

        tracing::debug!(
            twin_id,
            version,
            changes = changes.len(),
            "delta committed"
        );

        Ok(CommitReceipt {
            twin_id: twin_id.to_string(),
            version,
            changes,
        })
    }
}

impl Default for TwinStateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies one op to the working state, returning its change record.
fn apply_op(state: &mut TwinState, op: &DeltaOp) -> Result<StateChangeEvent, StateError> {
    let twin_id = state.twin_id.clone();
    match op {
        DeltaOp::SetProperty { key, value } => {
            if let Some(prop) = state.properties.get_mut(key) {
                let old = prop.update(value.clone());
                Ok(StateChangeEvent::new(
                    twin_id,
                    ChangeOperation::Update,
                    ResourceKind::Property,
                    key.clone(),
                    Some(old),
                    Some(value.clone()),
                ))
            } else {
                state
                    .properties
                    .insert(key.clone(), TwinProperty::new(key.clone(), value.clone()));
                Ok(StateChangeEvent::new(
                    twin_id,
                    ChangeOperation::Add,
                    ResourceKind::Property,
                    key.clone(),
                    None,
                    Some(value.clone()),
                ))
            }
        }

        DeltaOp::RemoveProperty { key } => {
            let prop = state
                .properties
                .remove(key)
                .ok_or_else(|| StateError::PropertyNotFound {
                    twin_id: twin_id.clone(),
                    key: key.clone(),
                })?;
            Ok(StateChangeEvent::new(
                twin_id,
                ChangeOperation::Remove,
                ResourceKind::Property,
                key.clone(),
                Some(prop.value),
                None,
            ))
        }

        DeltaOp::DeclareRelationship { key } => {
            if state.relationships.contains_key(key) {
                return Err(schema(&twin_id, format!("relationship '{}' already declared", key)));
            }
            state
                .relationships
                .insert(key.clone(), TwinRelationship::new(key.clone()));
            Ok(StateChangeEvent::new(
                twin_id,
                ChangeOperation::Add,
                ResourceKind::Relationship,
                key.clone(),
                None,
                Some(Value::Array(Vec::new())),
            ))
        }

        DeltaOp::RemoveRelationship { key } => {
            let rel = state.relationships.remove(key).ok_or_else(|| {
                schema(&twin_id, format!("relationship '{}' not declared", key))
            })?;
            Ok(StateChangeEvent::new(
                twin_id,
                ChangeOperation::Remove,
                ResourceKind::Relationship,
                key.clone(),
                Some(targets_value(&rel)),
                None,
            ))
        }

        DeltaOp::AddRelationshipTarget { key, target } => {
            let rel = state.relationships.get_mut(key).ok_or_else(|| {
                schema(&twin_id, format!("relationship '{}' not declared", key))
            })?;
            if !rel.targets.insert(target.clone()) {
                return Err(schema(
                    &twin_id,
                    format!("relationship '{}' already targets '{}'", key, target),
                ));
            }
            Ok(StateChangeEvent::new(
                twin_id,
                ChangeOperation::Add,
                ResourceKind::RelationshipTarget,
                key.clone(),
                None,
                Some(Value::String(target.clone())),
            ))
        }

        DeltaOp::RemoveRelationshipTarget { key, target } => {
            let rel = state.relationships.get_mut(key).ok_or_else(|| {
                schema(&twin_id, format!("relationship '{}' not declared", key))
            })?;
            if !rel.targets.remove(target) {
                return Err(schema(
                    &twin_id,
                    format!("relationship '{}' has no target '{}'", key, target),
                ));
            }
            Ok(StateChangeEvent::new(
                twin_id,
                ChangeOperation::Remove,
                ResourceKind::RelationshipTarget,
                key.clone(),
                Some(Value::String(target.clone())),
                None,
            ))
        }

        DeltaOp::DeclareAction { descriptor } => {
            if state.actions.contains_key(&descriptor.key) {
                return Err(schema(
                    &twin_id,
                    format!("action '{}' already declared", descriptor.key),
                ));
            }
            let encoded = descriptor_value(descriptor)?;
            state
                .actions
                .insert(descriptor.key.clone(), descriptor.clone());
            Ok(StateChangeEvent::new(
                twin_id,
                ChangeOperation::Add,
                ResourceKind::Action,
                descriptor.key.clone(),
                None,
                Some(encoded),
            ))
        }

        DeltaOp::RemoveAction { key } => {
            let action = state
                .actions
                .remove(key)
                .ok_or_else(|| schema(&twin_id, format!("action '{}' not declared", key)))?;
            Ok(StateChangeEvent::new(
                twin_id,
                ChangeOperation::Remove,
                ResourceKind::Action,
                key.clone(),
                Some(descriptor_value(&action)?),
                None,
            ))
        }

        DeltaOp::DeclareEvent { descriptor } => {
            if state.events.contains_key(&descriptor.key) {
                return Err(schema(
                    &twin_id,
                    format!("event '{}' already declared", descriptor.key),
                ));
            }
            let encoded = descriptor_value(descriptor)?;
            state
                .events
                .insert(descriptor.key.clone(), descriptor.clone());
            Ok(StateChangeEvent::new(
                twin_id,
                ChangeOperation::Add,
                ResourceKind::Event,
                descriptor.key.clone(),
                None,
                Some(encoded),
            ))
        }

        DeltaOp::RemoveEvent { key } => {
            let event = state
                .events
                .remove(key)
                .ok_or_else(|| schema(&twin_id, format!("event '{}' not declared", key)))?;
            Ok(StateChangeEvent::new(
                twin_id,
                ChangeOperation::Remove,
                ResourceKind::Event,
                key.clone(),
                Some(descriptor_value(&event)?),
                None,
            ))
        }
    }
}

fn schema(twin_id: &str, reason: String) -> StateError {
    StateError::Schema {
        twin_id: twin_id.to_string(),
        reason,
    }
}

fn targets_value(rel: &TwinRelationship) -> Value {
    Value::Array(
        rel.targets
            .iter()
            .map(|t| Value::String(t.clone()))
            .collect(),
    )
}

fn descriptor_value<T: serde::Serialize>(descriptor: &T) -> Result<Value, StateError> {
    // Descriptors are plain data; serialization cannot fail in practice.
    Ok(serde_json::to_value(descriptor).unwrap_or(Value::Null))
}
