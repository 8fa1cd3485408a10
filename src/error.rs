//! Broker error types
//!
//! Client-facing failures are reported synchronously without side effects;
//! backend failures carry the device they came from.

use serde::{Deserialize, Serialize};

use crate::device::{BackendError, Guid};
use crate::registry::RegistryError;
use crate::session::{ClientHandle, StreamSpecifier};

/// Error type for broker calls
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Unknown device: {0}")]
    UnknownDevice(Guid),

    #[error("Unknown client: {0}")]
    UnknownClient(ClientHandle),

    #[error("Stream {stream} already owned by {owner}")]
    StreamAlreadyOwned {
        stream: StreamSpecifier,
        owner: ClientHandle,
    },

    #[error("{client} does not own stream {stream}")]
    NotOwner {
        client: ClientHandle,
        stream: StreamSpecifier,
    },

    #[error("Session limit reached ({limit})")]
    ResourceExhausted { limit: usize },

    #[error("RS-422 response of {len} bytes exceeds {max} bytes")]
    ResponseTooLarge { len: usize, max: usize },

    #[error("RS-422 command of {len} bytes exceeds {max} bytes")]
    CommandTooLarge { len: usize, max: usize },

    #[error("Device already registered: {0}")]
    DuplicateDevice(Guid),

    #[error("Device GUID retired: {0}")]
    RetiredDevice(Guid),

    #[error("Backend failure on device {guid}: {source}")]
    BackendFailure {
        guid: Guid,
        #[source]
        source: BackendError,
    },

    #[error("Broker is shut down")]
    ShutDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Wrap a backend error with its device
    pub fn backend(guid: Guid, source: BackendError) -> Self {
        Self::BackendFailure { guid, source }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wire-level classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownDevice(_) => ErrorKind::UnknownDevice,
            Self::UnknownClient(_) => ErrorKind::UnknownClient,
            Self::StreamAlreadyOwned { .. } => ErrorKind::StreamAlreadyOwned,
            Self::NotOwner { .. } => ErrorKind::NotOwner,
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::ResponseTooLarge { .. } => ErrorKind::ResponseTooLarge,
            Self::CommandTooLarge { .. } => ErrorKind::CommandTooLarge,
            Self::DuplicateDevice(_) => ErrorKind::DuplicateDevice,
            Self::RetiredDevice(_) => ErrorKind::RetiredDevice,
            Self::BackendFailure { .. } => ErrorKind::BackendFailure,
            Self::ShutDown => ErrorKind::ShutDown,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<RegistryError> for BrokerError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DeviceNotFound(guid) => Self::UnknownDevice(guid),
            RegistryError::DeviceAlreadyRegistered(guid) => Self::DuplicateDevice(guid),
            RegistryError::GuidRetired(guid) => Self::RetiredDevice(guid),
        }
    }
}

/// Error classification carried over the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownDevice,
    UnknownClient,
    StreamAlreadyOwned,
    NotOwner,
    ResourceExhausted,
    ResponseTooLarge,
    CommandTooLarge,
    DuplicateDevice,
    RetiredDevice,
    BackendFailure,
    ShutDown,
    Internal,
}

/// Result type alias using BrokerError
pub type Result<T> = std::result::Result<T, BrokerError>;
