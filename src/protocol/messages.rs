//! Client-server message types

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::device::{
    ControlChange, ControlInfo, DeckCommand, DeviceState, Element, Guid, PropertyAddress, Scope,
};
use crate::error::{BrokerError, ErrorKind};
use crate::notify::{EventKind, Notification};
use crate::session::ClientHandle;

/// Calls a client can make
///
/// `subscribe` flags register the connection's notification channel for the
/// related event kind, the wire form of passing a delivery target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Open a session; must precede every other call
    Connect { pid: u32 },

    /// Close the session
    Disconnect,

    GetDeviceStates { subscribe: bool },

    GetProperties {
        guid: Guid,
        match_address: PropertyAddress,
        subscribe: bool,
    },

    GetPropertyState {
        guid: Guid,
        address: PropertyAddress,
        qualifier: Bytes,
    },

    SetPropertyState {
        guid: Guid,
        address: PropertyAddress,
        qualifier: Bytes,
        data: Bytes,
        send_changed_notifications: bool,
    },

    GetControlList { guid: Guid },

    GetControls { guid: Guid, subscribe: bool },

    SetControl { guid: Guid, id: u32, value: u32 },

    ProcessRs422Command {
        guid: Guid,
        command: Bytes,
        response_len: u32,
    },

    StartStream {
        guid: Guid,
        scope: Scope,
        element: Element,
        subscribe: bool,
    },

    StopStream {
        guid: Guid,
        scope: Scope,
        element: Element,
    },

    /// Deck transport command on a stream endpoint
    Deck {
        guid: Guid,
        scope: Scope,
        element: Element,
        command: DeckCommand,
    },

    Subscribe { kind: EventKind },

    Unsubscribe { kind: EventKind },
}

impl Request {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Request::Connect { .. } => "Connect",
            Request::Disconnect => "Disconnect",
            Request::GetDeviceStates { .. } => "GetDeviceStates",
            Request::GetProperties { .. } => "GetProperties",
            Request::GetPropertyState { .. } => "GetPropertyState",
            Request::SetPropertyState { .. } => "SetPropertyState",
            Request::GetControlList { .. } => "GetControlList",
            Request::GetControls { .. } => "GetControls",
            Request::SetControl { .. } => "SetControl",
            Request::ProcessRs422Command { .. } => "ProcessRs422Command",
            Request::StartStream { .. } => "StartStream",
            Request::StopStream { .. } => "StopStream",
            Request::Deck { .. } => "Deck",
            Request::Subscribe { .. } => "Subscribe",
            Request::Unsubscribe { .. } => "Unsubscribe",
        }
    }
}

/// Successful call results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Session opened
    Connected { handle: ClientHandle },

    /// Call completed without a payload
    Done,

    DeviceStates { states: Vec<DeviceState> },

    Properties { addresses: Vec<PropertyAddress> },

    PropertyState { data: Bytes },

    ControlList { controls: Vec<ControlInfo> },

    Controls { controls: Vec<ControlChange> },

    /// Value the device applied for a `SetControl`
    ControlApplied { value: u32 },

    Rs422Response { data: Bytes },

    /// Whether the subscription existed
    Unsubscribed { removed: bool },
}

/// Error reported for a failed call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WireError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<BrokerError> for WireError {
    fn from(err: BrokerError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for WireError {}

/// Frames sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    /// Correlation id echoed in the reply
    pub id: u64,
    pub request: Request,
}

/// Frames sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// Reply to the request with the same id
    Reply {
        id: u64,
        result: Result<Response, WireError>,
    },

    /// Asynchronous notification for the connection's subscriptions
    Notification(Notification),
}
