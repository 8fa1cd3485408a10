//! Per-client session record
//!
//! Tracks one connected client from `connect` until disconnect or death.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::stream::StreamSpecifier;

/// Opaque identifier for one client connection
///
/// Handles are allocated from a monotonic counter and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientHandle(u64);

impl ClientHandle {
    /// Placeholder for calls made before a session exists; never allocated
    pub const UNASSIGNED: ClientHandle = ClientHandle(0);

    /// Create a handle from a raw value
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Client({})", self.0)
    }
}

/// Server-side record of one connected client
#[derive(Debug)]
pub struct Session {
    /// Connection handle
    pub handle: ClientHandle,

    /// Process id of the client
    pub pid: u32,

    /// When the client connected
    pub connected_at: Instant,

    /// Streams this client currently owns
    streams: BTreeSet<StreamSpecifier>,

    /// Calls made on this session
    calls: u64,
}

impl Session {
    /// Create an empty session
    pub fn new(handle: ClientHandle, pid: u32) -> Self {
        Self {
            handle,
            pid,
            connected_at: Instant::now(),
            streams: BTreeSet::new(),
            calls: 0,
        }
    }

    /// Record ownership of a stream
    pub fn own(&mut self, stream: StreamSpecifier) -> bool {
        self.streams.insert(stream)
    }

    /// Drop ownership of a stream
    pub fn disown(&mut self, stream: &StreamSpecifier) -> bool {
        self.streams.remove(stream)
    }

    pub fn owns(&self, stream: &StreamSpecifier) -> bool {
        self.streams.contains(stream)
    }

    /// Streams owned by this client, in specifier order
    pub fn owned_streams(&self) -> impl Iterator<Item = &StreamSpecifier> {
        self.streams.iter()
    }

    /// Take every owned stream, leaving the set empty
    pub fn take_streams(&mut self) -> BTreeSet<StreamSpecifier> {
        std::mem::take(&mut self.streams)
    }

    /// Count a call against this session
    pub fn record_call(&mut self) {
        self.calls += 1;
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    /// Get session duration
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
