//! Device entry type
//!
//! This module defines the per-device record stored in the registry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::device::DeviceBackend;

/// Entry for a single device in the registry
pub struct DeviceEntry {
    /// Backend executing operations for this device
    pub(super) backend: Arc<dyn DeviceBackend>,

    /// When the device was registered
    pub arrived_at: Instant,
}

impl DeviceEntry {
    pub(super) fn new(backend: Arc<dyn DeviceBackend>) -> Self {
        Self {
            backend,
            arrived_at: Instant::now(),
        }
    }

    /// Shared handle to the backend
    pub fn backend(&self) -> Arc<dyn DeviceBackend> {
        Arc::clone(&self.backend)
    }

    /// How long the device has been registered
    pub fn age(&self) -> Duration {
        self.arrived_at.elapsed()
    }
}

impl std::fmt::Debug for DeviceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceEntry")
            .field("guid", &self.backend.guid())
            .field("arrived_at", &self.arrived_at)
            .finish()
    }
}
