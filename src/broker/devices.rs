//! Device arrival, removal and backend-originated signals

use std::sync::Arc;

use tokio::task::JoinHandle;

use super::Broker;
use crate::device::{DeviceBackend, DeviceNotifier, DeviceSignal, DeviceStatus, Guid, StopReason};
use crate::error::Result;
use crate::notify::{EventKind, Notification};
use crate::session::StreamSpecifier;

impl Broker {
    /// Register a device and announce its arrival
    ///
    /// Fails if the GUID is live or was retired by an earlier removal.
    pub async fn add_device(&self, backend: Arc<dyn DeviceBackend>) -> Result<Guid> {
        let mut state = self.state.lock().await;

        let guid = self.registry.insert(Arc::clone(&backend)).await?;
        backend.attach(DeviceNotifier::new(guid, self.signal_tx.clone()));

        let subscribers = state.fanout.publish(Notification::DeviceStatesChanged {
            guid,
            status: DeviceStatus::Present,
        });
        tracing::info!(guid = %guid, subscribers = subscribers, "Device arrived");

        Ok(guid)
    }

    /// Remove a device, release its streams and announce the removal
    ///
    /// The GUID is retired: later calls naming it fail with `UnknownDevice`.
    pub async fn remove_device(&self, guid: Guid) -> Result<()> {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        self.registry.remove(guid).await?;

        let released = state.owners.release_device(guid);
        for (stream, owner) in &released {
            if let Some(session) = state.sessions.get_mut(owner) {
                session.disown(stream);
            }
            state.fanout.publish(Notification::StreamStopped {
                guid,
                scope: stream.scope,
                element: stream.element,
                reason: StopReason::DeviceRemoved,
            });
        }

        for kind in [
            EventKind::Properties(guid),
            EventKind::Controls(guid),
            EventKind::Streams(guid),
        ] {
            state.fanout.remove_kind(kind);
        }

        let subscribers = state.fanout.publish(Notification::DeviceStatesChanged {
            guid,
            status: DeviceStatus::Removed,
        });
        tracing::info!(
            guid = %guid,
            released_streams = released.len(),
            subscribers = subscribers,
            "Device removed"
        );

        Ok(())
    }

    /// Spawn the task that turns backend signals into notifications
    ///
    /// Returns `None` if the task was already spawned. The task holds only a
    /// weak reference and ends once the broker is dropped.
    pub fn spawn_signal_pump(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut rx = self.signal_rx.lock().take()?;
        let broker = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                let Some(broker) = broker.upgrade() else {
                    break;
                };
                broker.handle_signal(signal).await;
            }
            tracing::debug!("Device signal pump finished");
        }))
    }

    /// Apply one backend signal; returns the number of deliveries queued
    pub(crate) async fn handle_signal(&self, signal: DeviceSignal) -> usize {
        let guid = signal.guid();
        let mut state = self.state.lock().await;
        let state = &mut *state;

        if !self.registry.contains(guid).await {
            tracing::debug!(guid = %guid, "Signal from removed device ignored");
            return 0;
        }

        match signal {
            DeviceSignal::PropertiesChanged { guid, addresses } => {
                state
                    .fanout
                    .publish(Notification::PropertiesChanged { guid, addresses })
            }
            DeviceSignal::ControlsChanged { guid, changes } => {
                state
                    .fanout
                    .publish(Notification::ControlsChanged { guid, changes })
            }
            DeviceSignal::StreamStopped {
                guid,
                scope,
                element,
                reason,
            } => {
                let stream = StreamSpecifier::new(guid, scope, element);
                if let Some(owner) = state.owners.release_any(&stream) {
                    if let Some(session) = state.sessions.get_mut(&owner) {
                        session.disown(&stream);
                    }
                    tracing::info!(
                        stream = %stream,
                        client = %owner,
                        reason = ?reason,
                        "Device stopped stream, ownership released"
                    );
                }

                state.fanout.publish(Notification::StreamStopped {
                    guid,
                    scope,
                    element,
                    reason,
                })
            }
        }
    }
}
