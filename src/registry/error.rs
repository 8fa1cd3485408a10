//! Registry error types
//!
//! Error types for device registry operations.

use crate::device::Guid;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No live device with this GUID (never registered, or removed)
    #[error("Device not found: {0}")]
    DeviceNotFound(Guid),
    /// A live device already uses this GUID
    #[error("Device already registered: {0}")]
    DeviceAlreadyRegistered(Guid),
    /// The GUID belonged to a removed device and cannot be reused
    #[error("Device GUID retired: {0}")]
    GuidRetired(Guid),
}
