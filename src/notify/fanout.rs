//! Subscription tables and fan-out
//!
//! Maps each event kind to the clients interested in it and each client to
//! its subscriptions. The fan-out is plain data; the broker keeps it behind
//! its state lock so subscription changes are atomic with session teardown.

use std::collections::{BTreeSet, HashMap};

use super::event::{EventKind, Notification};
use super::queue::{Delivery, DeliveryTarget};
use crate::session::ClientHandle;

/// Subscription registry with non-blocking fan-out
#[derive(Debug, Default)]
pub struct NotificationFanout {
    /// Event kind -> subscribers
    subscribers: HashMap<EventKind, HashMap<ClientHandle, DeliveryTarget>>,
    /// Client -> subscribed kinds (reverse index for teardown)
    by_client: HashMap<ClientHandle, BTreeSet<EventKind>>,
    published: u64,
    delivered: u64,
    dropped: u64,
}

impl NotificationFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in an event kind
    ///
    /// A (client, kind) pair has at most one target; re-subscribing replaces
    /// the previous target, which is returned.
    pub fn subscribe(
        &mut self,
        client: ClientHandle,
        kind: EventKind,
        target: DeliveryTarget,
    ) -> Option<DeliveryTarget> {
        let previous = self
            .subscribers
            .entry(kind)
            .or_default()
            .insert(client, target);
        self.by_client.entry(client).or_default().insert(kind);

        tracing::debug!(
            client = %client,
            kind = %kind,
            replaced = previous.is_some(),
            "Subscription added"
        );

        previous
    }

    /// Remove one subscription
    pub fn unsubscribe(&mut self, client: ClientHandle, kind: EventKind) -> bool {
        let removed = self.remove_target(client, kind);

        if let Some(kinds) = self.by_client.get_mut(&client) {
            kinds.remove(&kind);
            if kinds.is_empty() {
                self.by_client.remove(&client);
            }
        }

        removed
    }

    /// Remove every subscription held by a client
    ///
    /// Returns the number of subscriptions removed.
    pub fn unsubscribe_all(&mut self, client: ClientHandle) -> usize {
        let Some(kinds) = self.by_client.remove(&client) else {
            return 0;
        };

        let count = kinds.len();
        for kind in kinds {
            self.remove_target(client, kind);
        }

        tracing::debug!(client = %client, removed = count, "Subscriptions cleared");
        count
    }

    /// Drop every subscription to an event kind
    ///
    /// Used when the device an event kind refers to is removed.
    pub fn remove_kind(&mut self, kind: EventKind) -> usize {
        let Some(targets) = self.subscribers.remove(&kind) else {
            return 0;
        };

        for client in targets.keys() {
            if let Some(kinds) = self.by_client.get_mut(client) {
                kinds.remove(&kind);
                if kinds.is_empty() {
                    self.by_client.remove(client);
                }
            }
        }
        targets.len()
    }

    /// Deliver a notification to every subscriber of its kind
    ///
    /// Never blocks: each subscriber's queue absorbs the notification or
    /// evicts its oldest entry. Subscribers whose receiver is gone are pruned.
    /// Returns the number of subscribers the notification was queued for.
    pub fn publish(&mut self, notification: Notification) -> usize {
        let kind = notification.kind();
        self.published += 1;

        let Some(targets) = self.subscribers.get(&kind) else {
            return 0;
        };

        let mut queued = 0;
        let mut closed = Vec::new();
        for (client, target) in targets {
            match target.deliver(notification.clone()) {
                Delivery::Delivered => queued += 1,
                Delivery::DroppedOldest => {
                    queued += 1;
                    self.dropped += 1;
                    tracing::warn!(client = %client, kind = %kind, "Subscriber queue full, oldest notification dropped");
                }
                Delivery::Closed => closed.push(*client),
            }
        }
        self.delivered += queued as u64;

        for client in closed {
            tracing::debug!(client = %client, kind = %kind, "Pruning closed subscriber");
            self.unsubscribe(client, kind);
        }

        queued
    }

    /// Event kinds a client is subscribed to
    pub fn subscriptions(&self, client: ClientHandle) -> Vec<EventKind> {
        self.by_client
            .get(&client)
            .map(|kinds| kinds.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Check for a specific subscription
    pub fn is_subscribed(&self, client: ClientHandle, kind: EventKind) -> bool {
        self.subscribers
            .get(&kind)
            .is_some_and(|targets| targets.contains_key(&client))
    }

    /// Number of subscribers for an event kind
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers.get(&kind).map_or(0, HashMap::len)
    }

    /// Total number of subscriptions
    pub fn subscription_count(&self) -> usize {
        self.by_client.values().map(BTreeSet::len).sum()
    }

    /// Notifications published so far
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Individual deliveries queued so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Notifications evicted from full subscriber queues so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn remove_target(&mut self, client: ClientHandle, kind: EventKind) -> bool {
        let Some(targets) = self.subscribers.get_mut(&kind) else {
            return false;
        };
        let removed = targets.remove(&client).is_some();
        if targets.is_empty() {
            self.subscribers.remove(&kind);
        }
        removed
    }
}
