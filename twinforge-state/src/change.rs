//! State change records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operation performed on a twin state resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    /// Resource was created.
    Add,
    /// Resource value was replaced.
    Update,
    /// Resource was removed.
    Remove,
}

/// Kind of resource a state change touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Property,
    Relationship,
    RelationshipTarget,
    Action,
    Event,
}

/// Describes one accepted before/after delta to a single twin state entry.
///
/// Produced exactly once per touched resource in an accepted mutation and
/// fanned out to digital adapters and internal observers. All changes from
/// one mutation carry the same resulting `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    /// Twin the change belongs to.
    pub twin_id: String,

    /// What happened to the resource.
    pub operation: ChangeOperation,

    /// Which kind of resource was touched.
    pub resource: ResourceKind,

    /// Resource key. For relationship targets this is the relationship key.
    pub key: String,

    /// Value before the change, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,

    /// Value after the change, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,

    /// Twin state version this change produced.
    pub version: u64,

    /// When the mutation was committed.
    pub occurred_at: DateTime<Utc>,
}

impl StateChangeEvent {
    /// Creates a change record; `version` is stamped by the store at commit.
    pub fn new(
        twin_id: impl Into<String>,
        operation: ChangeOperation,
        resource: ResourceKind,
        key: impl Into<String>,
        old: Option<Value>,
        new: Option<Value>,
    ) -> Self {
        Self {
            twin_id: twin_id.into(),
            operation,
            resource,
            key: key.into(),
            old,
            new,
            version: 0,
            occurred_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_serde() {
        let change = StateChangeEvent::new(
            "twin-1",
            ChangeOperation::Update,
            ResourceKind::Property,
            "temperature",
            Some(json!(20.0)),
            Some(json!(21.5)),
        );

        let encoded = serde_json::to_value(&change).unwrap();
        assert_eq!(encoded["operation"], "update");
        assert_eq!(encoded["resource"], "property");
        assert_eq!(encoded["old"], json!(20.0));

        let decoded: StateChangeEvent = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, change);
    }

    #[test]
    fn test_absent_old_value_is_omitted() {
        let change = StateChangeEvent::new(
            "twin-1",
            ChangeOperation::Add,
            ResourceKind::Property,
            "temperature",
            None,
            Some(json!(21.5)),
        );

        let encoded = serde_json::to_value(&change).unwrap();
        assert!(encoded.get("old").is_none());
    }
}
