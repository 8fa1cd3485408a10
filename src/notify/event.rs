//! Notification event kinds and payloads

use serde::{Deserialize, Serialize};

use crate::device::{ControlChange, DeviceStatus, Element, Guid, PropertyAddress, Scope, StopReason};

/// What a subscription is interested in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Device arrival and removal, for every device
    DeviceStates,
    /// Property changes on one device
    Properties(Guid),
    /// Control changes on one device
    Controls(Guid),
    /// Streams stopped by one device
    Streams(Guid),
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::DeviceStates => f.write_str("device-states"),
            EventKind::Properties(guid) => write!(f, "properties({})", guid),
            EventKind::Controls(guid) => write!(f, "controls({})", guid),
            EventKind::Streams(guid) => write!(f, "streams({})", guid),
        }
    }
}

/// A change event delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    /// A device arrived or was removed
    DeviceStatesChanged { guid: Guid, status: DeviceStatus },
    PropertiesChanged {
        guid: Guid,
        addresses: Vec<PropertyAddress>,
    },
    ControlsChanged {
        guid: Guid,
        changes: Vec<ControlChange>,
    },
    /// The device stopped a stream and its ownership was released
    StreamStopped {
        guid: Guid,
        scope: Scope,
        element: Element,
        reason: StopReason,
    },
}

impl Notification {
    /// Event kind this notification is published under
    pub fn kind(&self) -> EventKind {
        match self {
            Notification::DeviceStatesChanged { .. } => EventKind::DeviceStates,
            Notification::PropertiesChanged { guid, .. } => EventKind::Properties(*guid),
            Notification::ControlsChanged { guid, .. } => EventKind::Controls(*guid),
            Notification::StreamStopped { guid, .. } => EventKind::Streams(*guid),
        }
    }

    /// Device the notification refers to
    pub fn guid(&self) -> Guid {
        match self {
            Notification::DeviceStatesChanged { guid, .. }
            | Notification::PropertiesChanged { guid, .. }
            | Notification::ControlsChanged { guid, .. }
            | Notification::StreamStopped { guid, .. } => *guid,
        }
    }
}
