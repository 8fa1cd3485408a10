//! Device registry
//!
//! The registry owns every known [`DeviceBackend`](crate::device::DeviceBackend),
//! keyed by GUID. Cross-references from sessions and stream ownership tables
//! hold GUIDs, never backend references, so a removed device simply stops
//! resolving.
//!
//! # GUID retirement
//!
//! A removed device's GUID is retired for the registry's lifetime. A stale
//! call naming that GUID fails with `DeviceNotFound` instead of reaching a
//! different device that happened to reuse the identifier.

pub mod entry;
pub mod error;
pub mod store;

pub use entry::DeviceEntry;
pub use error::RegistryError;
pub use store::DeviceRegistry;
