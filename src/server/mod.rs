//! Broker server
//!
//! Exposes a [`Broker`](crate::broker::Broker) over TCP. Each accepted
//! connection gets its own worker task and, after `Connect`, its own session.

pub mod config;
pub mod connection;
pub mod listener;

pub use config::ServerConfig;
pub use connection::Connection;
pub use listener::BrokerServer;
