//! Bounded per-subscriber delivery queue
//!
//! A [`DeliveryTarget`] never blocks: when the queue is full the oldest
//! pending notification is dropped to make room for the newest. The matching
//! [`NotificationReceiver`] drains the queue in FIFO order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::event::Notification;

/// Outcome of a delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued
    Delivered,
    /// Queued after evicting the oldest pending notification
    DroppedOldest,
    /// The receiver is gone
    Closed,
}

struct Shared {
    queue: Mutex<VecDeque<Notification>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    senders: AtomicUsize,
    receiver_alive: AtomicBool,
}

/// Create a delivery queue holding at most `capacity` pending notifications
pub fn delivery_channel(capacity: usize) -> (DeliveryTarget, NotificationReceiver) {
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        capacity: capacity.max(1),
        notify: Notify::new(),
        dropped: AtomicU64::new(0),
        senders: AtomicUsize::new(1),
        receiver_alive: AtomicBool::new(true),
    });

    (
        DeliveryTarget {
            shared: Arc::clone(&shared),
        },
        NotificationReceiver { shared },
    )
}

/// Sending side of a delivery queue
pub struct DeliveryTarget {
    shared: Arc<Shared>,
}

impl DeliveryTarget {
    /// Enqueue a notification without blocking
    pub fn deliver(&self, notification: Notification) -> Delivery {
        if !self.shared.receiver_alive.load(Ordering::Acquire) {
            return Delivery::Closed;
        }

        let outcome = {
            let mut queue = self.shared.queue.lock();
            let outcome = if queue.len() >= self.shared.capacity {
                queue.pop_front();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                Delivery::DroppedOldest
            } else {
                Delivery::Delivered
            };
            queue.push_back(notification);
            outcome
        };

        self.shared.notify.notify_one();
        outcome
    }

    /// Check if the receiver has been dropped
    pub fn is_closed(&self) -> bool {
        !self.shared.receiver_alive.load(Ordering::Acquire)
    }

    /// Check if two targets feed the same receiver
    pub fn same_channel(&self, other: &DeliveryTarget) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Notifications evicted so far by drop-oldest backpressure
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Clone for DeliveryTarget {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for DeliveryTarget {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last sender: wake the receiver so it can observe the close
            self.shared.notify.notify_one();
        }
    }
}

impl std::fmt::Debug for DeliveryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryTarget")
            .field("pending", &self.shared.queue.lock().len())
            .field("capacity", &self.shared.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Receiving side of a delivery queue
pub struct NotificationReceiver {
    shared: Arc<Shared>,
}

impl NotificationReceiver {
    /// Wait for the next notification
    ///
    /// Returns `None` once every [`DeliveryTarget`] is dropped and the queue
    /// is drained. Cancel safe.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            if let Some(notification) = self.try_recv() {
                return Some(notification);
            }
            if self.shared.senders.load(Ordering::Acquire) == 0 {
                return self.try_recv();
            }
            self.shared.notify.notified().await;
        }
    }

    /// Take the next notification if one is pending
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.shared.queue.lock().pop_front()
    }

    /// Number of pending notifications
    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notifications evicted so far by drop-oldest backpressure
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for NotificationReceiver {
    fn drop(&mut self) {
        self.shared.receiver_alive.store(false, Ordering::Release);
        self.shared.queue.lock().clear();
    }
}

impl std::fmt::Debug for NotificationReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationReceiver")
            .field("pending", &self.len())
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_pending, assert_ready_eq, task};

    use super::*;
    use crate::device::{DeviceStatus, Guid};

    fn arrival(guid: u64) -> Notification {
        Notification::DeviceStatesChanged {
            guid: Guid(guid),
            status: DeviceStatus::Present,
        }
    }

    #[test]
    fn test_drop_oldest() {
        let (target, mut rx) = delivery_channel(2);

        assert_eq!(target.deliver(arrival(1)), Delivery::Delivered);
        assert_eq!(target.deliver(arrival(2)), Delivery::Delivered);
        assert_eq!(target.deliver(arrival(3)), Delivery::DroppedOldest);

        assert_eq!(rx.try_recv(), Some(arrival(2)));
        assert_eq!(rx.try_recv(), Some(arrival(3)));
        assert_eq!(rx.try_recv(), None);
        assert_eq!(rx.dropped(), 1);
    }

    #[test]
    fn test_recv_wakes_on_delivery() {
        let (target, mut rx) = delivery_channel(4);

        let mut recv = task::spawn(async move { rx.recv().await });
        assert_pending!(recv.poll());

        target.deliver(arrival(9));
        assert!(recv.is_woken());
        assert_ready_eq!(recv.poll(), Some(arrival(9)));
    }

    #[test]
    fn test_recv_ends_when_senders_dropped() {
        let (target, mut rx) = delivery_channel(4);
        let second = target.clone();

        target.deliver(arrival(1));
        drop(target);
        drop(second);

        let mut recv = task::spawn(async move {
            let first = rx.recv().await;
            let second = rx.recv().await;
            (first, second)
        });
        assert_ready_eq!(recv.poll(), (Some(arrival(1)), None));
    }

    #[test]
    fn test_closed_after_receiver_drop() {
        let (target, rx) = delivery_channel(4);
        let other = target.clone();
        assert!(target.same_channel(&other));

        drop(rx);
        assert!(target.is_closed());
        assert_eq!(target.deliver(arrival(1)), Delivery::Closed);
    }
}
