//! Device backend interface
//!
//! A backend executes property, control, stream and deck operations for one
//! device. The broker is written against [`DeviceBackend`] only; each device
//! family provides its own implementation.
//!
//! Backend methods are synchronous and may block (a deck seek, a bus
//! transaction). The broker runs them on the blocking thread pool and never
//! calls them while holding its state lock, except during forced teardown
//! where each call is bounded by a timeout.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::types::{ControlChange, ControlInfo, DeckCommand, Element, Guid, PropertyAddress, Scope, StopReason};

/// Error reported by a device backend
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("Unknown property: {0}")]
    UnknownProperty(PropertyAddress),

    #[error("Property is read-only: {0}")]
    ReadOnlyProperty(PropertyAddress),

    #[error("Unknown control: {0}")]
    UnknownControl(u32),

    #[error("No stream endpoint at {scope}/{element}")]
    NoSuchStream { scope: Scope, element: Element },

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Device busy: {0}")]
    Busy(String),

    #[error("Backend did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Device failure: {0}")]
    Failed(String),
}

impl BackendError {
    /// Create a generic device failure
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Result type for backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Operations the broker needs from a device
pub trait DeviceBackend: Send + Sync + 'static {
    /// Stable identifier of this device
    fn guid(&self) -> Guid;

    /// Called once when the device is registered with a broker
    ///
    /// The notifier is the only way a backend reaches back into the broker.
    fn attach(&self, notifier: DeviceNotifier) {
        let _ = notifier;
    }

    /// List property addresses matching a (possibly wildcarded) address
    fn properties(&self, match_address: &PropertyAddress) -> BackendResult<Vec<PropertyAddress>>;

    /// Read a property value
    fn property_state(&self, address: &PropertyAddress, qualifier: &[u8]) -> BackendResult<Bytes>;

    /// Write a property value
    fn set_property_state(
        &self,
        address: &PropertyAddress,
        qualifier: &[u8],
        data: &[u8],
    ) -> BackendResult<()>;

    /// Describe the device's controls
    fn control_list(&self) -> BackendResult<Vec<ControlInfo>>;

    /// Current value of every control
    fn controls(&self) -> BackendResult<Vec<ControlChange>>;

    /// Set a control, returning the value actually applied
    fn set_control(&self, id: u32, value: u32) -> BackendResult<u32>;

    fn start_stream(&self, scope: Scope, element: Element) -> BackendResult<()>;

    fn stop_stream(&self, scope: Scope, element: Element) -> BackendResult<()>;

    /// Execute a deck transport command on a stream endpoint
    fn deck(&self, scope: Scope, element: Element, command: DeckCommand) -> BackendResult<()>;

    /// Send an RS-422 command and return the device's response
    ///
    /// `response_len` is the size of the response buffer the client offered.
    fn rs422_command(&self, command: &[u8], response_len: usize) -> BackendResult<Bytes>;
}

/// Event raised by a backend on its own initiative
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceSignal {
    PropertiesChanged {
        guid: Guid,
        addresses: Vec<PropertyAddress>,
    },
    ControlsChanged {
        guid: Guid,
        changes: Vec<ControlChange>,
    },
    /// The device stopped a running stream (end of data, no-data timeout)
    StreamStopped {
        guid: Guid,
        scope: Scope,
        element: Element,
        reason: StopReason,
    },
}

impl DeviceSignal {
    /// Device the signal originates from
    pub fn guid(&self) -> Guid {
        match self {
            DeviceSignal::PropertiesChanged { guid, .. }
            | DeviceSignal::ControlsChanged { guid, .. }
            | DeviceSignal::StreamStopped { guid, .. } => *guid,
        }
    }
}

/// Handle a backend uses to request notification delivery
///
/// Sending never blocks; if the broker's signal queue is full the signal is
/// discarded and a warning is logged.
#[derive(Debug, Clone)]
pub struct DeviceNotifier {
    guid: Guid,
    tx: mpsc::Sender<DeviceSignal>,
}

impl DeviceNotifier {
    pub(crate) fn new(guid: Guid, tx: mpsc::Sender<DeviceSignal>) -> Self {
        Self { guid, tx }
    }

    /// Report that property values changed
    pub fn properties_changed(&self, addresses: Vec<PropertyAddress>) -> bool {
        self.send(DeviceSignal::PropertiesChanged {
            guid: self.guid,
            addresses,
        })
    }

    /// Report that control values changed
    pub fn controls_changed(&self, changes: Vec<ControlChange>) -> bool {
        self.send(DeviceSignal::ControlsChanged {
            guid: self.guid,
            changes,
        })
    }

    /// Report that the device stopped a stream by itself
    pub fn stream_stopped(&self, scope: Scope, element: Element, reason: StopReason) -> bool {
        self.send(DeviceSignal::StreamStopped {
            guid: self.guid,
            scope,
            element,
            reason,
        })
    }

    fn send(&self, signal: DeviceSignal) -> bool {
        match self.tx.try_send(signal) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(signal)) => {
                tracing::warn!(guid = %self.guid, ?signal, "Device signal queue full, signal dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(guid = %self.guid, "Broker gone, device signal ignored");
                false
            }
        }
    }
}
