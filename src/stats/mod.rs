//! Broker and session statistics

pub mod metrics;

pub use metrics::{BrokerStats, SessionStats};
