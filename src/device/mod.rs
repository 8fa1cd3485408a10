//! Devices and the backend boundary
//!
//! - [`types`]: identifiers and values (GUIDs, property addresses, controls, deck commands)
//! - [`backend`]: the [`DeviceBackend`] trait implemented once per device family
//! - [`sample`]: an in-memory device family

pub mod backend;
pub mod sample;
pub mod types;

pub use backend::{BackendError, BackendResult, DeviceBackend, DeviceNotifier, DeviceSignal};
pub use sample::{DeckState, FailurePoint, SampleDevice};
pub use types::{
    ControlChange, ControlInfo, DeckCommand, DeviceState, DeviceStatus, Element, Guid,
    PropertyAddress, Scope, Selector, StopReason, ELEMENT_MASTER, ELEMENT_WILDCARD, RS422_MAX_LEN,
};
