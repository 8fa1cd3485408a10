//! Session broker
//!
//! The broker owns the device registry and the live sessions, routes each
//! call to the right device, tracks stream ownership, and fans out change
//! notifications.
//!
//! # Locking
//!
//! ```text
//!                         Arc<Broker>
//!               ┌──────────────────────────────┐
//!               │ state: Mutex<BrokerState> {  │
//!               │   sessions: {handle→Session} │
//!               │   owners:   StreamOwners     │
//!               │   fanout:   subscriptions    │
//!               │ }                            │
//!               │ registry: RwLock<devices>    │
//!               └──────────────┬───────────────┘
//!                              │ resolve / claim (lock held)
//!                              ▼
//!                 DeviceBackend call (lock released,
//!                 blocking pool, bounded by timeout)
//!                              │
//!                              ▼
//!                 re-lock: roll back or publish
//! ```
//!
//! One exclusive lock protects sessions, stream ownership and subscriptions.
//! Backend calls run without it, so a slow device only delays its own caller.
//! The lock is always taken before the registry lock, never the reverse.
//!
//! Session teardown follows the same pattern: the session's endpoints are
//! reserved under the lock, stopped at their backends without it, and only
//! become claimable again once every stop has returned or timed out.

pub mod config;
mod devices;
mod properties;
mod streams;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};

pub use config::BrokerConfig;

use crate::device::{BackendError, DeviceBackend, DeviceSignal, DeviceState, Guid};
use crate::error::{BrokerError, Result};
use crate::notify::{DeliveryTarget, EventKind, Notification, NotificationFanout};
use crate::registry::DeviceRegistry;
use crate::session::{ClientHandle, Session, StreamOwners, StreamSpecifier};
use crate::stats::{BrokerStats, SessionStats};

/// State guarded by the broker's lock
#[derive(Debug, Default)]
struct BrokerState {
    sessions: HashMap<ClientHandle, Session>,
    owners: StreamOwners,
    fanout: NotificationFanout,
    shut_down: bool,
}

impl BrokerState {
    /// Look up a live session and count the call against it
    fn session_for_call(&mut self, handle: ClientHandle) -> Result<&mut Session> {
        let session = self
            .sessions
            .get_mut(&handle)
            .ok_or(BrokerError::UnknownClient(handle))?;
        session.record_call();
        Ok(session)
    }
}

/// Broker arbitrating access to a set of devices among many clients
pub struct Broker {
    config: BrokerConfig,
    registry: DeviceRegistry,
    state: Mutex<BrokerState>,
    next_handle: AtomicU64,
    signal_tx: mpsc::Sender<DeviceSignal>,
    signal_rx: parking_lot::Mutex<Option<mpsc::Receiver<DeviceSignal>>>,
    started_at: Instant,
}

impl Broker {
    /// Create a broker with default configuration
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    /// Create a broker with custom configuration
    pub fn with_config(config: BrokerConfig) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(config.signal_capacity);

        Self {
            config,
            registry: DeviceRegistry::new(),
            state: Mutex::new(BrokerState::default()),
            next_handle: AtomicU64::new(1),
            signal_tx,
            signal_rx: parking_lot::Mutex::new(Some(signal_rx)),
            started_at: Instant::now(),
        }
    }

    /// Get the broker configuration
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Get the device registry
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    // ==================== Connection Lifecycle ====================

    /// Open a session for a client process
    pub async fn connect(&self, pid: u32) -> Result<ClientHandle> {
        let mut state = self.state.lock().await;

        if state.shut_down {
            return Err(BrokerError::ShutDown);
        }

        let limit = self.config.max_sessions;
        if limit > 0 && state.sessions.len() >= limit {
            tracing::warn!(pid = pid, limit = limit, "Connection rejected: session limit reached");
            return Err(BrokerError::ResourceExhausted { limit });
        }

        let handle = ClientHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        state.sessions.insert(handle, Session::new(handle, pid));

        tracing::info!(
            client = %handle,
            pid = pid,
            sessions = state.sessions.len(),
            "Client connected"
        );

        Ok(handle)
    }

    /// Close a session at the client's request
    ///
    /// Idempotent: an unknown handle is a no-op. Returns whether a live
    /// session was torn down.
    pub async fn disconnect(&self, handle: ClientHandle) -> bool {
        self.teardown(handle, "disconnect").await
    }

    /// Tear down a session whose connection is gone
    ///
    /// Same teardown as [`disconnect`](Self::disconnect); safe to race with it.
    pub async fn client_died(&self, handle: ClientHandle) -> bool {
        self.teardown(handle, "client died").await
    }

    /// Check if a handle refers to a live session
    pub async fn is_connected(&self, handle: ClientHandle) -> bool {
        self.state.lock().await.sessions.contains_key(&handle)
    }

    /// Stop accepting sessions and force-disconnect every live one
    ///
    /// Returns the number of sessions torn down.
    pub async fn shutdown(&self) -> usize {
        let handles: Vec<ClientHandle> = {
            let mut state = self.state.lock().await;
            state.shut_down = true;
            state.sessions.keys().copied().collect()
        };

        tracing::info!(sessions = handles.len(), "Broker shutting down");

        let mut closed = 0;
        for handle in handles {
            if self.teardown(handle, "shutdown").await {
                closed += 1;
            }
        }
        closed
    }

    async fn teardown(&self, handle: ClientHandle, reason: &'static str) -> bool {
        let (session, streams, subscriptions) = {
            let mut state = self.state.lock().await;

            let Some(mut session) = state.sessions.remove(&handle) else {
                tracing::debug!(client = %handle, reason = reason, "Teardown of unknown session ignored");
                return false;
            };

            let streams: Vec<StreamSpecifier> = session
                .take_streams()
                .into_iter()
                .filter(|stream| state.owners.reserve_stop(*stream, handle).is_ok())
                .collect();
            let subscriptions = state.fanout.unsubscribe_all(handle);
            (session, streams, subscriptions)
        };

        for stream in &streams {
            let Ok(backend) = self.registry.lookup(stream.guid).await else {
                tracing::debug!(stream = %stream, "Device already removed, nothing to stop");
                continue;
            };
            let (scope, element) = (stream.scope, stream.element);
            if let Err(e) = self
                .run_backend(stream.guid, backend, move |b| b.stop_stream(scope, element))
                .await
            {
                tracing::warn!(
                    client = %handle,
                    stream = %stream,
                    error = %e,
                    "Failed to stop stream during teardown"
                );
            }
        }

        if !streams.is_empty() {
            let mut state = self.state.lock().await;
            for stream in &streams {
                state.owners.finish_stop(stream, handle);
            }
        }

        tracing::info!(
            client = %handle,
            pid = session.pid,
            reason = reason,
            streams = streams.len(),
            subscriptions = subscriptions,
            calls = session.calls(),
            duration_secs = session.duration().as_secs(),
            "Session torn down"
        );

        true
    }

    // ==================== Notifications ====================

    /// Subscribe a client to an event kind
    ///
    /// Replaces any previous target for the same (client, kind).
    pub async fn subscribe(
        &self,
        handle: ClientHandle,
        kind: EventKind,
        target: DeliveryTarget,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.session_for_call(handle)?;

        match kind {
            EventKind::DeviceStates => {}
            EventKind::Properties(guid) | EventKind::Controls(guid) | EventKind::Streams(guid) => {
                if !self.registry.contains(guid).await {
                    return Err(BrokerError::UnknownDevice(guid));
                }
            }
        }

        state.fanout.subscribe(handle, kind, target);
        Ok(())
    }

    /// Remove one subscription; returns whether it existed
    pub async fn unsubscribe(&self, handle: ClientHandle, kind: EventKind) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.session_for_call(handle)?;
        Ok(state.fanout.unsubscribe(handle, kind))
    }

    /// Publish a notification to its subscribers
    pub(crate) async fn publish(&self, notification: Notification) -> usize {
        self.state.lock().await.fanout.publish(notification)
    }

    // ==================== Devices ====================

    /// Snapshot of every device's arrival/removal state
    ///
    /// With a target, the caller is also subscribed to device arrival and
    /// removal, atomically with the snapshot.
    pub async fn get_device_states(
        &self,
        handle: ClientHandle,
        notify: Option<DeliveryTarget>,
    ) -> Result<Vec<DeviceState>> {
        let mut state = self.state.lock().await;
        state.session_for_call(handle)?;

        if let Some(target) = notify {
            state.fanout.subscribe(handle, EventKind::DeviceStates, target);
        }

        Ok(self.registry.states().await)
    }

    // ==================== Stats ====================

    /// Broker-wide statistics
    pub async fn stats(&self) -> BrokerStats {
        let state = self.state.lock().await;

        BrokerStats {
            sessions: state.sessions.len(),
            devices: self.registry.device_count().await,
            retired_devices: self.registry.retired_count().await,
            owned_streams: state.owners.len(),
            subscriptions: state.fanout.subscription_count(),
            notifications_published: state.fanout.published(),
            notifications_delivered: state.fanout.delivered(),
            notifications_dropped: state.fanout.dropped(),
            uptime: self.started_at.elapsed(),
        }
    }

    /// Statistics for one session
    pub async fn session_stats(&self, handle: ClientHandle) -> Result<SessionStats> {
        let state = self.state.lock().await;
        let session = state
            .sessions
            .get(&handle)
            .ok_or(BrokerError::UnknownClient(handle))?;

        Ok(SessionStats {
            handle,
            pid: session.pid,
            duration: session.duration(),
            calls: session.calls(),
            owned_streams: session.owned_streams().copied().collect(),
            subscriptions: state.fanout.subscriptions(handle),
        })
    }

    // ==================== Helpers ====================

    /// Check the caller and resolve a device
    async fn resolve(&self, handle: ClientHandle, guid: Guid) -> Result<Arc<dyn DeviceBackend>> {
        self.state.lock().await.session_for_call(handle)?;
        Ok(self.registry.lookup(guid).await?)
    }

    /// Run a backend call on the blocking pool, bounded by the backend timeout
    async fn run_backend<T, F>(&self, guid: Guid, backend: Arc<dyn DeviceBackend>, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn DeviceBackend) -> std::result::Result<T, BackendError> + Send + 'static,
    {
        let timeout = self.config.backend_timeout;
        let task = tokio::task::spawn_blocking(move || op(backend.as_ref()));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(source))) => Err(BrokerError::backend(guid, source)),
            Ok(Err(join_error)) => Err(BrokerError::internal(format!(
                "backend call on {} aborted: {}",
                guid, join_error
            ))),
            Err(_) => {
                tracing::warn!(guid = %guid, timeout_ms = timeout.as_millis() as u64, "Backend call timed out");
                Err(BrokerError::backend(guid, BackendError::Timeout(timeout)))
            }
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}
