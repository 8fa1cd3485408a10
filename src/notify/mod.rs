//! Asynchronous change notifications
//!
//! Publishing never waits on subscribers. Each subscriber owns a bounded
//! queue; the publisher pushes into every interested queue and returns.
//!
//! ```text
//!   Broker (state lock held)
//!        │ publish(notification)
//!        ▼
//!   NotificationFanout ── kind ──► { client → DeliveryTarget }
//!        │                                  │ deliver() (never blocks)
//!        ▼                                  ▼
//!   drop-oldest queue per subscriber ──► NotificationReceiver::recv()
//! ```
//!
//! # Backpressure
//!
//! When a subscriber's queue is full, its oldest pending notification is
//! evicted in favor of the newest. A stalled subscriber loses history, never
//! stalls the publisher or other subscribers.

pub mod event;
pub mod fanout;
pub mod queue;

pub use event::{EventKind, Notification};
pub use fanout::NotificationFanout;
pub use queue::{delivery_channel, Delivery, DeliveryTarget, NotificationReceiver};
