//! Stream endpoints and their ownership
//!
//! A [`StreamSpecifier`] names one streaming endpoint of a device. The
//! [`StreamOwners`] table records which client currently owns each endpoint;
//! an endpoint has at most one owner. An endpoint whose owner is gone but
//! whose stop is still running at the device stays reserved and cannot be
//! claimed until the stop finishes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::state::ClientHandle;
use crate::device::{Element, Guid, Scope};

/// Identifies one stream endpoint: (device, scope, element)
///
/// Ordered by device GUID, then scope, then element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamSpecifier {
    pub guid: Guid,
    pub scope: Scope,
    pub element: Element,
}

impl StreamSpecifier {
    /// Create a stream specifier
    pub fn new(guid: Guid, scope: Scope, element: Element) -> Self {
        Self {
            guid,
            scope,
            element,
        }
    }
}

impl std::fmt::Display for StreamSpecifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.guid, self.scope, self.element)
    }
}

/// Ownership table for stream endpoints across all devices
#[derive(Debug, Default)]
pub struct StreamOwners {
    owners: BTreeMap<StreamSpecifier, ClientHandle>,
    stopping: BTreeMap<StreamSpecifier, (ClientHandle, usize)>,
}

impl StreamOwners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current owner of an endpoint
    pub fn owner(&self, stream: &StreamSpecifier) -> Option<ClientHandle> {
        self.owners.get(stream).copied()
    }

    /// Former owner of an endpoint that is still being stopped
    pub fn stopping(&self, stream: &StreamSpecifier) -> Option<ClientHandle> {
        self.stopping.get(stream).map(|(client, _)| *client)
    }

    /// Claim an endpoint for `client`
    ///
    /// Claiming an endpoint the client already owns succeeds. Returns the
    /// current owner if someone else holds it, or the former owner if the
    /// endpoint is reserved for a stop.
    pub fn claim(&mut self, stream: StreamSpecifier, client: ClientHandle) -> Result<(), ClientHandle> {
        if let Some(&(former, _)) = self.stopping.get(&stream) {
            return Err(former);
        }
        match self.owners.get(&stream) {
            Some(&owner) if owner != client => Err(owner),
            _ => {
                self.owners.insert(stream, client);
                Ok(())
            }
        }
    }

    /// Release an endpoint if `client` owns it
    pub fn release(&mut self, stream: &StreamSpecifier, client: ClientHandle) -> bool {
        if self.owners.get(stream) == Some(&client) {
            self.owners.remove(stream);
            true
        } else {
            false
        }
    }

    /// Reserve an endpoint for a stop issued by `client`
    ///
    /// Releases the endpoint if `client` owns it. Reservations by the same
    /// client nest; each one needs its own [`finish_stop`](Self::finish_stop).
    /// Returns the client holding the endpoint if it is someone else.
    pub fn reserve_stop(&mut self, stream: StreamSpecifier, client: ClientHandle) -> Result<(), ClientHandle> {
        match self.owners.get(&stream) {
            Some(&owner) if owner != client => return Err(owner),
            _ => {}
        }
        match self.stopping.get_mut(&stream) {
            Some((former, _)) if *former != client => Err(*former),
            Some((_, count)) => {
                *count += 1;
                self.owners.remove(&stream);
                Ok(())
            }
            None => {
                self.stopping.insert(stream, (client, 1));
                self.owners.remove(&stream);
                Ok(())
            }
        }
    }

    /// Drop one reservation `client` holds on an endpoint
    pub fn finish_stop(&mut self, stream: &StreamSpecifier, client: ClientHandle) -> bool {
        match self.stopping.get_mut(stream) {
            Some((former, count)) if *former == client => {
                *count -= 1;
                if *count == 0 {
                    self.stopping.remove(stream);
                }
                true
            }
            _ => false,
        }
    }

    /// Release an endpoint regardless of owner, returning the previous owner
    pub fn release_any(&mut self, stream: &StreamSpecifier) -> Option<ClientHandle> {
        self.owners.remove(stream)
    }

    /// Release every endpoint of a device
    pub fn release_device(&mut self, guid: Guid) -> Vec<(StreamSpecifier, ClientHandle)> {
        let released: Vec<(StreamSpecifier, ClientHandle)> = self
            .owners
            .iter()
            .filter(|(stream, _)| stream.guid == guid)
            .map(|(stream, owner)| (*stream, *owner))
            .collect();

        for (stream, _) in &released {
            self.owners.remove(stream);
        }
        released
    }

    /// Number of endpoints reserved for a stop
    pub fn stopping_len(&self) -> usize {
        self.stopping.len()
    }

    /// Number of owned endpoints
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
