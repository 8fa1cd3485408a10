//! Client sessions
//!
//! A session is the broker's record of one connected client: its handle,
//! process id, and the stream endpoints it owns. Notification subscriptions
//! are indexed by handle in the [`NotificationFanout`](crate::notify::NotificationFanout).

pub mod state;
pub mod stream;

pub use state::{ClientHandle, Session};
pub use stream::{StreamOwners, StreamSpecifier};
