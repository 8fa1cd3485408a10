//! Broker configuration

use std::time::Duration;

/// Broker configuration options
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Maximum concurrent sessions (0 = unlimited)
    pub max_sessions: usize,

    /// Pending notifications each subscriber queue holds before dropping the oldest
    pub delivery_queue_capacity: usize,

    /// Upper bound on a single backend call
    pub backend_timeout: Duration,

    /// Capacity of the queue carrying backend-originated signals
    pub signal_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 256,
            delivery_queue_capacity: 64,
            backend_timeout: Duration::from_secs(5),
            signal_capacity: 256,
        }
    }
}

impl BrokerConfig {
    /// Set maximum sessions
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Set the per-subscriber queue capacity (at least 1)
    pub fn delivery_queue_capacity(mut self, capacity: usize) -> Self {
        self.delivery_queue_capacity = capacity.max(1);
        self
    }

    /// Set the backend call timeout
    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    /// Set the backend signal queue capacity (at least 1)
    pub fn signal_capacity(mut self, capacity: usize) -> Self {
        self.signal_capacity = capacity.max(1);
        self
    }
}
