//! Broker client
//!
//! Async client for processes that use devices through a broker server.

pub mod connector;
pub mod error;

pub use connector::{BrokerClient, NOTIFICATION_BUFFER};
pub use error::ClientError;
