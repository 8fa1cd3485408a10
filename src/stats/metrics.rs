//! Statistics snapshots for the broker and its sessions

use std::time::Duration;

use crate::notify::EventKind;
use crate::session::{ClientHandle, StreamSpecifier};

/// Broker-wide statistics
#[derive(Debug, Clone, Default)]
pub struct BrokerStats {
    /// Live sessions
    pub sessions: usize,
    /// Registered devices
    pub devices: usize,
    /// GUIDs retired by device removal
    pub retired_devices: usize,
    /// Stream endpoints currently owned
    pub owned_streams: usize,
    /// Subscriptions across all sessions
    pub subscriptions: usize,
    /// Notifications published
    pub notifications_published: u64,
    /// Notifications queued for subscribers
    pub notifications_delivered: u64,
    /// Notifications evicted from full subscriber queues
    pub notifications_dropped: u64,
    /// Time since the broker was created
    pub uptime: Duration,
}

impl BrokerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Average number of subscribers reached per published notification
    pub fn fanout_ratio(&self) -> f64 {
        if self.notifications_published > 0 {
            self.notifications_delivered as f64 / self.notifications_published as f64
        } else {
            0.0
        }
    }

    /// Fraction of queued deliveries that were later evicted
    pub fn drop_rate(&self) -> f64 {
        if self.notifications_delivered > 0 {
            self.notifications_dropped as f64 / self.notifications_delivered as f64
        } else {
            0.0
        }
    }
}

/// Session-level statistics
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Session handle
    pub handle: ClientHandle,
    /// Client process id
    pub pid: u32,
    /// Connection duration
    pub duration: Duration,
    /// Calls made on the session
    pub calls: u64,
    /// Streams the session owns
    pub owned_streams: Vec<StreamSpecifier>,
    /// Event kinds the session is subscribed to
    pub subscriptions: Vec<EventKind>,
}

impl SessionStats {
    /// Calls per second over the session's lifetime
    pub fn call_rate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.calls as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_stats_new() {
        let stats = BrokerStats::new();
        assert_eq!(stats.sessions, 0);
        assert_eq!(stats.devices, 0);
        assert_eq!(stats.owned_streams, 0);
        assert_eq!(stats.notifications_published, 0);
        assert_eq!(stats.fanout_ratio(), 0.0);
        assert_eq!(stats.drop_rate(), 0.0);
    }

    #[test]
    fn test_broker_stats_ratios() {
        let stats = BrokerStats {
            notifications_published: 10,
            notifications_delivered: 40,
            notifications_dropped: 4,
            ..BrokerStats::default()
        };

        assert_eq!(stats.fanout_ratio(), 4.0);
        assert_eq!(stats.drop_rate(), 0.1);
    }

    #[test]
    fn test_session_stats_call_rate() {
        let mut stats = SessionStats {
            handle: ClientHandle::new(1),
            pid: 42,
            duration: Duration::from_secs(10),
            calls: 50,
            owned_streams: Vec::new(),
            subscriptions: Vec::new(),
        };
        assert_eq!(stats.call_rate(), 5.0);

        // With zero duration, rate should be 0
        stats.duration = Duration::ZERO;
        assert_eq!(stats.call_rate(), 0.0);
    }
}
