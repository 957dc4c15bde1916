//! Typed bus topics.
//!
//! Each event kind has a per-twin topic and a global variant. Publishing
//! delivers to both, so a subscriber can watch one twin or the whole
//! engine.

use crate::event::BusEvent;

/// A routing key on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Physical events for one twin.
    Physical(String),
    /// Physical events for all twins.
    AllPhysical,
    /// Digital action requests for one twin.
    DigitalAction(String),
    /// Digital action requests for all twins.
    AllDigitalActions,
    /// State changes for one twin.
    StateChange(String),
    /// State changes for all twins.
    AllStateChanges,
    /// Lifecycle transitions for one twin.
    Lifecycle(String),
    /// Lifecycle transitions for all twins.
    AllLifecycle,
}

impl Topic {
    pub fn physical(twin_id: impl Into<String>) -> Self {
        Topic::Physical(twin_id.into())
    }

    pub fn digital_action(twin_id: impl Into<String>) -> Self {
        Topic::DigitalAction(twin_id.into())
    }

    pub fn state_change(twin_id: impl Into<String>) -> Self {
        Topic::StateChange(twin_id.into())
    }

    pub fn lifecycle(twin_id: impl Into<String>) -> Self {
        Topic::Lifecycle(twin_id.into())
    }

    /// Returns the per-twin topic an event routes to.
    pub fn for_event(event: &BusEvent) -> Topic {
        match event {
            BusEvent::Physical(e) => Topic::Physical(e.twin_id.clone()),
            BusEvent::DigitalAction(e) => Topic::DigitalAction(e.twin_id.clone()),
            BusEvent::StateChange(e) => Topic::StateChange(e.twin_id.clone()),
            BusEvent::Lifecycle(e) => Topic::Lifecycle(e.twin_id.clone()),
        }
    }

    /// Returns the global variant of a per-twin topic, or `None` if the
    /// topic is already global.
    pub fn widened(&self) -> Option<Topic> {
        match self {
            Topic::Physical(_) => Some(Topic::AllPhysical),
            Topic::DigitalAction(_) => Some(Topic::AllDigitalActions),
            Topic::StateChange(_) => Some(Topic::AllStateChanges),
            Topic::Lifecycle(_) => Some(Topic::AllLifecycle),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PhysicalEvent;
    use serde_json::json;

    #[test]
    fn test_topic_for_event() {
        let event = BusEvent::Physical(PhysicalEvent::new("temp", "pa-1", "twin-1", json!(null)));
        assert_eq!(Topic::for_event(&event), Topic::physical("twin-1"));
    }

    #[test]
    fn test_widened() {
        assert_eq!(
            Topic::state_change("twin-1").widened(),
            Some(Topic::AllStateChanges)
        );
        assert_eq!(Topic::AllStateChanges.widened(), None);
    }
}
