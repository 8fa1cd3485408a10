//! Device data model
//!
//! Identifiers and value types shared by the broker, the device backends and
//! the wire protocol.

use serde::{Deserialize, Serialize};

/// Maximum length in bytes of an RS-422 command or response
pub const RS422_MAX_LEN: usize = 512;

/// Stable 64-bit identifier for a device
///
/// GUIDs are never recycled: once a device is removed, its GUID stays retired
/// for the lifetime of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Guid(pub u64);

impl Guid {
    /// Get the raw value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Guid {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Property scope of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Device-wide properties
    Global,
    /// Input (capture) side
    Input,
    /// Output (playback) side
    Output,
    /// Matches any scope in a property match address
    Wildcard,
}

impl Scope {
    /// Four-character code used by the device layer for this scope
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            Scope::Global => *b"glob",
            Scope::Input => *b"inpt",
            Scope::Output => *b"outp",
            Scope::Wildcard => *b"****",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Scope::Global => "global",
            Scope::Input => "input",
            Scope::Output => "output",
            Scope::Wildcard => "*",
        };
        f.write_str(name)
    }
}

/// Element index within a scope
pub type Element = u32;

/// The master element of a scope
pub const ELEMENT_MASTER: Element = 0;

/// Matches any element in a property match address
pub const ELEMENT_WILDCARD: Element = u32::MAX;

/// Property selector (a four-character code)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Selector(pub u32);

impl Selector {
    /// Matches any selector in a property match address
    pub const WILDCARD: Selector = Selector::from_fourcc(*b"****");

    /// Build a selector from a four-character code
    pub const fn from_fourcc(code: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(code))
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.0.to_be_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            for b in bytes {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            write!(f, "{:#010x}", self.0)
        }
    }
}

/// Scope-qualified address of a device property
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropertyAddress {
    /// Property selector
    pub selector: Selector,
    /// Scope the property lives in
    pub scope: Scope,
    /// Element within the scope
    pub element: Element,
}

impl PropertyAddress {
    /// Create a property address
    pub fn new(selector: Selector, scope: Scope, element: Element) -> Self {
        Self {
            selector,
            scope,
            element,
        }
    }

    /// Address in the global scope, master element
    pub fn global(selector: Selector) -> Self {
        Self::new(selector, Scope::Global, ELEMENT_MASTER)
    }

    /// A match address that matches every property
    pub fn wildcard() -> Self {
        Self::new(Selector::WILDCARD, Scope::Wildcard, ELEMENT_WILDCARD)
    }

    /// Check whether `address` is matched by this (possibly wildcarded) address
    pub fn matches(&self, address: &PropertyAddress) -> bool {
        (self.selector == Selector::WILDCARD || self.selector == address.selector)
            && (self.scope == Scope::Wildcard || self.scope == address.scope)
            && (self.element == ELEMENT_WILDCARD || self.element == address.element)
    }
}

impl std::fmt::Display for PropertyAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.selector, self.scope, self.element)
    }
}

/// Descriptor of a device control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlInfo {
    /// Control identifier
    pub id: u32,
    /// Human-readable name
    pub name: String,
    /// Current value
    pub value: u32,
    /// Minimum accepted value
    pub min: u32,
    /// Maximum accepted value
    pub max: u32,
}

/// Current value of a control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlChange {
    pub id: u32,
    pub value: u32,
}

/// Deck transport command
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DeckCommand {
    /// Start the deck's transport threads
    StartThreads,
    /// Stop the deck's transport threads
    StopThreads,
    Play,
    Stop,
    /// Shuttle at a signed speed
    Jog { speed: i32 },
    /// Seek to a timecode, optionally starting playback when cued
    CueTo { timecode: f64, play_on_cue: bool },
}

impl std::fmt::Display for DeckCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeckCommand::StartThreads => f.write_str("start-threads"),
            DeckCommand::StopThreads => f.write_str("stop-threads"),
            DeckCommand::Play => f.write_str("play"),
            DeckCommand::Stop => f.write_str("stop"),
            DeckCommand::Jog { speed } => write!(f, "jog({})", speed),
            DeckCommand::CueTo {
                timecode,
                play_on_cue,
            } => write!(f, "cue-to({}, play={})", timecode, play_on_cue),
        }
    }
}

/// Arrival/removal state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceStatus {
    /// Device is registered and usable
    Present,
    /// Device was removed; its GUID is retired
    Removed,
}

/// One entry of a device state snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceState {
    pub guid: Guid,
    pub status: DeviceStatus,
}

/// Why a device stopped a stream on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Output stream ran out of data
    EndOfData,
    /// Input stream received no data within its timeout
    NoDataTimeout,
    /// The device was removed from the registry
    DeviceRemoved,
    /// Any other device-side condition
    Device,
}
