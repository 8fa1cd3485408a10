//! Device registry implementation
//!
//! The set of all known devices, keyed by GUID, plus the set of GUIDs that
//! belonged to removed devices.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::entry::DeviceEntry;
use super::error::RegistryError;
use crate::device::{DeviceBackend, DeviceState, DeviceStatus, Guid};

#[derive(Default)]
struct Devices {
    live: BTreeMap<Guid, DeviceEntry>,
    retired: BTreeSet<Guid>,
}

/// Registry of all known devices
///
/// Thread-safe via `RwLock`. Lookups vastly outnumber arrivals and removals,
/// so concurrent calls resolving devices only ever take the read side.
pub struct DeviceRegistry {
    devices: RwLock<Devices>,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(Devices::default()),
        }
    }

    /// Register a device
    ///
    /// Fails if the GUID is already live or was used by a removed device.
    pub async fn insert(&self, backend: Arc<dyn DeviceBackend>) -> Result<Guid, RegistryError> {
        let guid = backend.guid();
        let mut devices = self.devices.write().await;

        if devices.retired.contains(&guid) {
            return Err(RegistryError::GuidRetired(guid));
        }
        if devices.live.contains_key(&guid) {
            return Err(RegistryError::DeviceAlreadyRegistered(guid));
        }

        devices.live.insert(guid, DeviceEntry::new(backend));
        tracing::info!(guid = %guid, devices = devices.live.len(), "Device registered");

        Ok(guid)
    }

    /// Remove a device and retire its GUID
    pub async fn remove(&self, guid: Guid) -> Result<Arc<dyn DeviceBackend>, RegistryError> {
        let mut devices = self.devices.write().await;

        let entry = devices
            .live
            .remove(&guid)
            .ok_or(RegistryError::DeviceNotFound(guid))?;
        devices.retired.insert(guid);

        tracing::info!(
            guid = %guid,
            registered_for_secs = entry.age().as_secs(),
            "Device removed, GUID retired"
        );

        Ok(entry.backend())
    }

    /// Resolve a live device by GUID
    ///
    /// Removed devices never resolve.
    pub async fn lookup(&self, guid: Guid) -> Result<Arc<dyn DeviceBackend>, RegistryError> {
        let devices = self.devices.read().await;

        devices
            .live
            .get(&guid)
            .map(DeviceEntry::backend)
            .ok_or(RegistryError::DeviceNotFound(guid))
    }

    /// Check if a live device has this GUID
    pub async fn contains(&self, guid: Guid) -> bool {
        self.devices.read().await.live.contains_key(&guid)
    }

    /// Snapshot of every device's arrival/removal state, ordered by GUID
    pub async fn states(&self) -> Vec<DeviceState> {
        let devices = self.devices.read().await;

        let mut states: Vec<DeviceState> = devices
            .live
            .keys()
            .map(|&guid| DeviceState {
                guid,
                status: DeviceStatus::Present,
            })
            .chain(devices.retired.iter().map(|&guid| DeviceState {
                guid,
                status: DeviceStatus::Removed,
            }))
            .collect();
        states.sort_by_key(|state| state.guid);
        states
    }

    /// GUIDs of all live devices
    pub async fn guids(&self) -> Vec<Guid> {
        self.devices.read().await.live.keys().copied().collect()
    }

    /// Number of live devices
    pub async fn device_count(&self) -> usize {
        self.devices.read().await.live.len()
    }

    /// Number of retired GUIDs
    pub async fn retired_count(&self) -> usize {
        self.devices.read().await.retired.len()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
