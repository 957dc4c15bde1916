//! Twin state model types.
//!
//! A twin declares its shape through a [`TwinModel`]: initial property
//! values, relationship keys, and action/event descriptors. The live
//! [`TwinState`] evolves from that model one versioned mutation at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A retained past value of a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRevision {
    /// Property version this value was current at.
    pub version: u64,

    /// The value itself.
    pub value: Value,

    /// When the value was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// A typed, versioned property of a twin.
///
/// Updates are append-only: the previous value is pushed onto `history`
/// before the current value is replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwinProperty {
    /// Property key, unique within a twin.
    pub key: String,

    /// Current value.
    pub value: Value,

    /// Per-property version counter, starts at 1.
    pub version: u64,

    /// Superseded values, oldest first.
    #[serde(default)]
    pub history: Vec<PropertyRevision>,

    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl TwinProperty {
    /// Creates a property at version 1.
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            version: 1,
            history: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Replaces the current value, retaining the old one in history.
    ///
    /// Returns the superseded value.
    pub fn update(&mut self, value: Value) -> Value {
        let old = std::mem::replace(&mut self.value, value);
        self.history.push(PropertyRevision {
            version: self.version,
            value: old.clone(),
            recorded_at: self.updated_at,
        });
        self.version += 1;
        self.updated_at = Utc::now();
        old
    }
}

/// A directed, multi-valued relationship from this twin to other twins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwinRelationship {
    /// Relationship key, unique within a twin.
    pub key: String,

    /// Target twin identifiers.
    #[serde(default)]
    pub targets: BTreeSet<String>,
}

impl TwinRelationship {
    /// Creates an empty relationship.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            targets: BTreeSet::new(),
        }
    }

    /// Returns true if the relationship has no targets.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Declares an action the twin can be commanded to perform.
///
/// Holds no value; actions are physical-side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    /// Action key, unique within a twin.
    pub key: String,

    /// Human-readable action name.
    pub name: String,

    /// Expected input schema (free-form JSON schema fragment).
    pub input_schema: Value,
}

impl ActionDescriptor {
    pub fn new(key: impl Into<String>, name: impl Into<String>, input_schema: Value) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            input_schema,
        }
    }
}

/// Declares an event the twin can emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescriptor {
    /// Event key, unique within a twin.
    pub key: String,

    /// Event type label.
    pub event_type: String,

    /// Expected payload schema (free-form JSON schema fragment).
    pub payload_schema: Value,
}

impl EventDescriptor {
    pub fn new(key: impl Into<String>, event_type: impl Into<String>, payload_schema: Value) -> Self {
        Self {
            key: key.into(),
            event_type: event_type.into(),
            payload_schema,
        }
    }
}

/// Initial declaration of a twin: the model it is registered with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwinModel {
    /// Twin identifier.
    pub twin_id: String,

    /// Initial property values.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,

    /// Declared relationship keys.
    #[serde(default)]
    pub relationships: Vec<String>,

    /// Declared actions.
    #[serde(default)]
    pub actions: Vec<ActionDescriptor>,

    /// Declared events.
    #[serde(default)]
    pub events: Vec<EventDescriptor>,
}

impl TwinModel {
    /// Creates an empty model for the given twin id.
    pub fn new(twin_id: impl Into<String>) -> Self {
        Self {
            twin_id: twin_id.into(),
            ..Default::default()
        }
    }

    /// Adds an initial property value.
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Declares a relationship key.
    pub fn with_relationship(mut self, key: impl Into<String>) -> Self {
        self.relationships.push(key.into());
        self
    }

    /// Declares an action.
    pub fn with_action(mut self, action: ActionDescriptor) -> Self {
        self.actions.push(action);
        self
    }

    /// Declares an event.
    pub fn with_event(mut self, event: EventDescriptor) -> Self {
        self.events.push(event);
        self
    }
}

/// Canonical state of one digital twin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwinState {
    /// Twin identifier.
    pub twin_id: String,

    /// Monotonic state version, starts at 0 on registration.
    pub version: u64,

    /// Properties by key.
    pub properties: BTreeMap<String, TwinProperty>,

    /// Relationships by key.
    pub relationships: BTreeMap<String, TwinRelationship>,

    /// Declared actions by key.
    pub actions: BTreeMap<String, ActionDescriptor>,

    /// Declared events by key.
    pub events: BTreeMap<String, EventDescriptor>,

    /// Registration timestamp.
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl TwinState {
    /// Builds the initial state from a model, at version 0.
    pub fn from_model(model: &TwinModel) -> Self {
        let now = Utc::now();
        Self {
            twin_id: model.twin_id.clone(),
            version: 0,
            properties: model
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), TwinProperty::new(k.clone(), v.clone())))
                .collect(),
            relationships: model
                .relationships
                .iter()
                .map(|k| (k.clone(), TwinRelationship::new(k.clone())))
                .collect(),
            actions: model
                .actions
                .iter()
                .map(|a| (a.key.clone(), a.clone()))
                .collect(),
            events: model
                .events
                .iter()
                .map(|e| (e.key.clone(), e.clone()))
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Looks up a property by key.
    pub fn property(&self, key: &str) -> Option<&TwinProperty> {
        self.properties.get(key)
    }

    /// Returns the current value of a property, if present.
    pub fn property_value(&self, key: &str) -> Option<&Value> {
        self.properties.get(key).map(|p| &p.value)
    }

    /// Looks up a relationship by key.
    pub fn relationship(&self, key: &str) -> Option<&TwinRelationship> {
        self.relationships.get(key)
    }

    /// Returns true if the twin declares the given action.
    pub fn has_action(&self, key: &str) -> bool {
        self.actions.contains_key(key)
    }

    /// Returns true if the twin declares the given event.
    pub fn has_event(&self, key: &str) -> bool {
        self.events.contains_key(key)
    }
}
