//! Client error types

use crate::protocol::{CodecError, WireError};

/// Error returned by [`BrokerClient`](super::BrokerClient) calls
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The broker processed the call and rejected it
    #[error("Broker error: {0}")]
    Broker(#[from] WireError),

    #[error("Unexpected response to {request}")]
    UnexpectedResponse { request: &'static str },

    #[error("Connection closed")]
    ConnectionClosed,
}

impl ClientError {
    /// The broker's error classification, if the broker rejected the call
    pub fn broker_kind(&self) -> Option<crate::error::ErrorKind> {
        match self {
            ClientError::Broker(e) => Some(e.kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
