//! Subscription registry owned by a [`BusConnection`](super::BusConnection)
//!
//! The registry is the source of truth for what the connection should be
//! subscribed to. It survives reconnects; every `Connected` transition replays
//! [`SubscriptionRegistry::filters`] to the broker.

use std::sync::Arc;

use super::message::InboundMessage;
use crate::codec::TopicFilter;

/// Callback invoked on the delivery path for each matching message
pub type Handler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Entry {
    id: SubscriptionId,
    filter: TopicFilter,
    handler: Handler,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    next_id: u64,
    entries: Vec<Entry>,
}

impl SubscriptionRegistry {
    pub fn insert(&mut self, filter: TopicFilter, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            filter,
            handler,
        });
        id
    }

    /// Removes a subscription
    ///
    /// Returns the filter if no remaining subscription uses it, meaning the
    /// broker-side subscription can be dropped as well.
    pub fn remove(&mut self, id: SubscriptionId) -> Option<TopicFilter> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        let removed = self.entries.remove(index);
        let still_used = self
            .entries
            .iter()
            .any(|entry| entry.filter == removed.filter);
        (!still_used).then_some(removed.filter)
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    /// Handlers whose filter selects `topic`, in subscription order
    pub fn matching(&self, topic: &str) -> Vec<(SubscriptionId, Handler)> {
        self.entries
            .iter()
            .filter(|entry| entry.filter.matches(topic))
            .map(|entry| (entry.id, entry.handler.clone()))
            .collect()
    }

    /// Distinct filters to (re)issue to the broker
    pub fn filters(&self) -> Vec<TopicFilter> {
        let mut filters: Vec<TopicFilter> = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            if !filters.contains(&entry.filter) {
                filters.push(entry.filter.clone());
            }
        }
        filters
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: &Arc<AtomicUsize>) -> Handler {
        let counter = counter.clone();
        Arc::new(move |_message: &InboundMessage| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn matching_follows_filters() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = SubscriptionRegistry::default();
        registry.insert(TopicFilter::all_control(), counting_handler(&hits));
        registry.insert(TopicFilter::all_telemetry(), counting_handler(&hits));

        let message = InboundMessage::from_topic("energysync/control/fan", "{}");
        for (_, handler) in registry.matching(&message.topic) {
            handler(&message);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.matching("other/topic").is_empty());
    }

    #[test]
    fn shared_filter_is_released_with_last_subscription() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = SubscriptionRegistry::default();
        let first = registry.insert(TopicFilter::all_control(), counting_handler(&hits));
        let second = registry.insert(TopicFilter::all_control(), counting_handler(&hits));
        assert_eq!(registry.filters(), vec![TopicFilter::all_control()]);

        assert_eq!(registry.remove(first), None);
        assert!(!registry.contains(first));
        assert_eq!(registry.remove(second), Some(TopicFilter::all_control()));
        assert!(registry.is_empty());
        assert_eq!(registry.remove(second), None);
    }
}
