//! Broadcast-based event routing.

use crate::event::BusEvent;
use crate::topic::Topic;
use dashmap::DashMap;
use tokio::sync::broadcast;

/// Subscription info.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub subscription_id: String,
    pub topic: Topic,
}

/// Internal pub/sub router between adapters, the shadowing runner, and
/// observers.
///
/// Channels are bounded per subscriber: a subscriber that falls behind by
/// more than the channel capacity loses the oldest unconsumed events and
/// observes an explicit `Lagged` error on its receiver, which dispatch
/// loops surface as an overflow diagnostic. `publish` never blocks.
pub struct EventBus {
    /// Per-topic broadcast channels, created on first subscription.
    channels: DashMap<Topic, broadcast::Sender<BusEvent>>,

    /// Subscription metadata.
    subscriptions: DashMap<String, Subscription>,

    /// Channel capacity (per-subscriber queue bound).
    channel_capacity: usize,
}

impl EventBus {
    /// Creates a bus with the given per-subscriber queue capacity.
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            subscriptions: DashMap::new(),
            channel_capacity,
        }
    }

    /// Publishes an event to its per-twin topic and the matching global
    /// topic. Fire-and-forget: events published to a topic nobody
    /// subscribes to are dropped.
    pub fn publish(&self, event: BusEvent) {
        let topic = Topic::for_event(&event);

        if let Some(global) = topic.widened() {
            if let Some(sender) = self.channels.get(&global) {
                // Ignore send errors (no live receivers).
                let _ = sender.send(event.clone());
            }
        }

        if let Some(sender) = self.channels.get(&topic) {
            let _ = sender.send(event);
        }
    }

    /// Subscribes to a topic.
    ///
    /// Returns (subscription_id, receiver). Events published after this
    /// call are delivered in publish order.
    pub fn subscribe(&self, topic: Topic) -> (String, broadcast::Receiver<BusEvent>) {
        let subscription_id = format!("sub-{}", uuid::Uuid::new_v4());

        let sender = self
            .channels
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .clone();

        let receiver = sender.subscribe();

        self.subscriptions.insert(
            subscription_id.clone(),
            Subscription {
                subscription_id: subscription_id.clone(),
                topic,
            },
        );

        (subscription_id, receiver)
    }

    /// Unsubscribes. Returns true if the subscription was found.
    ///
    /// The caller drops its receiver; this only retires the metadata.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.subscriptions.remove(subscription_id).is_some()
    }

    /// Gets subscription info.
    pub fn get_subscription(&self, subscription_id: &str) -> Option<Subscription> {
        self.subscriptions.get(subscription_id).map(|r| r.clone())
    }

    /// Returns the number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns the per-subscriber queue capacity.
    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
