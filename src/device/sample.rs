//! In-memory sample device
//!
//! A virtual device family with a property table, clamped controls, stream
//! endpoints with an attached deck, and an RS-422 responder. Used by the
//! demos and the test suite; failure points can be armed to make individual
//! operations fail or stall.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use super::backend::{BackendError, BackendResult, DeviceBackend, DeviceNotifier};
use super::types::{
    ControlChange, ControlInfo, DeckCommand, Element, Guid, PropertyAddress, Scope, Selector,
    StopReason, RS422_MAX_LEN,
};

/// Device name property
pub const SELECTOR_NAME: Selector = Selector::from_fourcc(*b"lnam");
/// Manufacturer property
pub const SELECTOR_MANUFACTURER: Selector = Selector::from_fourcc(*b"lmak");
/// Per-stream no-data timeout (milliseconds, little-endian u32)
pub const SELECTOR_NO_DATA_TIMEOUT: Selector = Selector::from_fourcc(*b"pndt");
/// Per-stream end-of-data flag
pub const SELECTOR_END_OF_DATA: Selector = Selector::from_fourcc(*b"pend");

/// Operations that can be armed to fail or to stall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    SetProperty,
    SetControl,
    StartStream,
    StopStream,
    Deck,
    Rs422,
}

/// Deck transport state of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeckState {
    pub threads_running: bool,
    pub playing: bool,
    pub speed: i32,
    pub timecode: f64,
}

#[derive(Debug, Default)]
struct Endpoint {
    running: bool,
    deck: DeckState,
}

#[derive(Debug, Default)]
struct SampleState {
    properties: BTreeMap<PropertyAddress, (Bytes, bool)>,
    controls: Vec<ControlInfo>,
    endpoints: BTreeMap<(Scope, Element), Endpoint>,
    failures: HashSet<FailurePoint>,
    delays: HashMap<FailurePoint, Duration>,
    start_count: u64,
    stop_count: u64,
}

/// Virtual device backed by in-memory state
pub struct SampleDevice {
    guid: Guid,
    state: Mutex<SampleState>,
    notifier: Mutex<Option<DeviceNotifier>>,
}

impl SampleDevice {
    /// Create a device with a name property and no endpoints
    pub fn new(guid: Guid, name: &str) -> Self {
        let mut state = SampleState::default();
        state.properties.insert(
            PropertyAddress::global(SELECTOR_NAME),
            (Bytes::copy_from_slice(name.as_bytes()), false),
        );
        state.properties.insert(
            PropertyAddress::global(SELECTOR_MANUFACTURER),
            (Bytes::from_static(b"Sample"), false),
        );

        Self {
            guid,
            state: Mutex::new(state),
            notifier: Mutex::new(None),
        }
    }

    /// Add a stream endpoint with its per-stream properties
    pub fn with_stream(self, scope: Scope, element: Element) -> Self {
        {
            let mut state = self.state.lock();
            state.endpoints.insert((scope, element), Endpoint::default());
            let (selector, initial) = match scope {
                Scope::Output => (SELECTOR_END_OF_DATA, 0u32),
                _ => (SELECTOR_NO_DATA_TIMEOUT, 1000u32),
            };
            state.properties.insert(
                PropertyAddress::new(selector, scope, element),
                (Bytes::copy_from_slice(&initial.to_le_bytes()), true),
            );
        }
        self
    }

    /// Add a control
    pub fn with_control(self, id: u32, name: &str, value: u32, min: u32, max: u32) -> Self {
        self.state.lock().controls.push(ControlInfo {
            id,
            name: name.to_string(),
            value: value.clamp(min, max),
            min,
            max,
        });
        self
    }

    /// Add a writable property
    pub fn with_property(self, address: PropertyAddress, value: Bytes) -> Self {
        self.state.lock().properties.insert(address, (value, true));
        self
    }

    /// Make the next calls to an operation fail until [`recover`](Self::recover)
    pub fn fail(&self, point: FailurePoint) {
        self.state.lock().failures.insert(point);
    }

    /// Clear an armed failure
    pub fn recover(&self, point: FailurePoint) {
        self.state.lock().failures.remove(&point);
    }

    /// Make every call to an operation sleep before running
    pub fn set_delay(&self, point: FailurePoint, delay: Duration) {
        self.state.lock().delays.insert(point, delay);
    }

    /// Clear an armed delay; calls already sleeping are not woken
    pub fn clear_delay(&self, point: FailurePoint) {
        self.state.lock().delays.remove(&point);
    }

    /// Check whether an endpoint is currently streaming
    pub fn is_running(&self, scope: Scope, element: Element) -> bool {
        self.state
            .lock()
            .endpoints
            .get(&(scope, element))
            .map(|e| e.running)
            .unwrap_or(false)
    }

    /// Deck state of an endpoint
    pub fn deck_state(&self, scope: Scope, element: Element) -> Option<DeckState> {
        self.state.lock().endpoints.get(&(scope, element)).map(|e| e.deck)
    }

    /// Number of successful (start, stop) calls
    pub fn stream_calls(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.start_count, state.stop_count)
    }

    /// Simulate an output endpoint running out of data
    ///
    /// Stops the endpoint and signals the broker.
    pub fn end_of_data(&self, scope: Scope, element: Element) -> bool {
        self.stop_on_device(scope, element, StopReason::EndOfData)
    }

    /// Simulate an input endpoint receiving nothing within its timeout
    pub fn no_data_timeout(&self, scope: Scope, element: Element) -> bool {
        self.stop_on_device(scope, element, StopReason::NoDataTimeout)
    }

    fn stop_on_device(&self, scope: Scope, element: Element, reason: StopReason) -> bool {
        {
            let mut state = self.state.lock();
            match state.endpoints.get_mut(&(scope, element)) {
                Some(endpoint) if endpoint.running => endpoint.running = false,
                _ => return false,
            }
        }

        match self.notifier.lock().as_ref() {
            Some(notifier) => notifier.stream_stopped(scope, element, reason),
            None => false,
        }
    }

    fn pause(&self, point: FailurePoint) {
        let delay = self.state.lock().delays.get(&point).copied();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
    }

    fn check(state: &SampleState, point: FailurePoint) -> BackendResult<()> {
        if state.failures.contains(&point) {
            Err(BackendError::failed(format!("injected {:?} failure", point)))
        } else {
            Ok(())
        }
    }
}

impl DeviceBackend for SampleDevice {
    fn guid(&self) -> Guid {
        self.guid
    }

    fn attach(&self, notifier: DeviceNotifier) {
        *self.notifier.lock() = Some(notifier);
    }

    fn properties(&self, match_address: &PropertyAddress) -> BackendResult<Vec<PropertyAddress>> {
        let state = self.state.lock();
        Ok(state
            .properties
            .keys()
            .filter(|address| match_address.matches(address))
            .copied()
            .collect())
    }

    fn property_state(&self, address: &PropertyAddress, _qualifier: &[u8]) -> BackendResult<Bytes> {
        self.state
            .lock()
            .properties
            .get(address)
            .map(|(value, _)| value.clone())
            .ok_or(BackendError::UnknownProperty(*address))
    }

    fn set_property_state(
        &self,
        address: &PropertyAddress,
        _qualifier: &[u8],
        data: &[u8],
    ) -> BackendResult<()> {
        self.pause(FailurePoint::SetProperty);
        let mut state = self.state.lock();
        Self::check(&state, FailurePoint::SetProperty)?;

        match state.properties.get_mut(address) {
            Some((_, false)) => Err(BackendError::ReadOnlyProperty(*address)),
            Some((value, true)) => {
                *value = Bytes::copy_from_slice(data);
                Ok(())
            }
            None => Err(BackendError::UnknownProperty(*address)),
        }
    }

    fn control_list(&self) -> BackendResult<Vec<ControlInfo>> {
        Ok(self.state.lock().controls.clone())
    }

    fn controls(&self) -> BackendResult<Vec<ControlChange>> {
        Ok(self
            .state
            .lock()
            .controls
            .iter()
            .map(|c| ControlChange {
                id: c.id,
                value: c.value,
            })
            .collect())
    }

    fn set_control(&self, id: u32, value: u32) -> BackendResult<u32> {
        self.pause(FailurePoint::SetControl);
        let mut state = self.state.lock();
        Self::check(&state, FailurePoint::SetControl)?;

        let control = state
            .controls
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(BackendError::UnknownControl(id))?;
        control.value = value.clamp(control.min, control.max);
        Ok(control.value)
    }

    fn start_stream(&self, scope: Scope, element: Element) -> BackendResult<()> {
        self.pause(FailurePoint::StartStream);
        let mut state = self.state.lock();
        Self::check(&state, FailurePoint::StartStream)?;

        let endpoint = state
            .endpoints
            .get_mut(&(scope, element))
            .ok_or(BackendError::NoSuchStream { scope, element })?;
        endpoint.running = true;
        state.start_count += 1;
        Ok(())
    }

    fn stop_stream(&self, scope: Scope, element: Element) -> BackendResult<()> {
        self.pause(FailurePoint::StopStream);
        let mut state = self.state.lock();
        Self::check(&state, FailurePoint::StopStream)?;

        let endpoint = state
            .endpoints
            .get_mut(&(scope, element))
            .ok_or(BackendError::NoSuchStream { scope, element })?;
        endpoint.running = false;
        endpoint.deck.playing = false;
        state.stop_count += 1;
        Ok(())
    }

    fn deck(&self, scope: Scope, element: Element, command: DeckCommand) -> BackendResult<()> {
        self.pause(FailurePoint::Deck);
        let mut state = self.state.lock();
        Self::check(&state, FailurePoint::Deck)?;

        let endpoint = state
            .endpoints
            .get_mut(&(scope, element))
            .ok_or(BackendError::NoSuchStream { scope, element })?;
        let deck = &mut endpoint.deck;

        match command {
            DeckCommand::StartThreads => deck.threads_running = true,
            DeckCommand::StopThreads => *deck = DeckState::default(),
            _ if !deck.threads_running => {
                return Err(BackendError::Busy("deck threads not running".into()));
            }
            DeckCommand::Play => {
                deck.playing = true;
                deck.speed = 1;
            }
            DeckCommand::Stop => {
                deck.playing = false;
                deck.speed = 0;
            }
            DeckCommand::Jog { speed } => {
                deck.speed = speed;
                deck.playing = speed != 0;
            }
            DeckCommand::CueTo {
                timecode,
                play_on_cue,
            } => {
                deck.timecode = timecode;
                deck.playing = play_on_cue;
                deck.speed = i32::from(play_on_cue);
            }
        }
        Ok(())
    }

    fn rs422_command(&self, command: &[u8], response_len: usize) -> BackendResult<Bytes> {
        self.pause(FailurePoint::Rs422);
        let state = self.state.lock();
        Self::check(&state, FailurePoint::Rs422)?;

        // Echo the command back, padded with zeros to the offered buffer size
        let mut response = command.to_vec();
        response.resize(response_len.min(RS422_MAX_LEN).max(command.len()), 0);
        Ok(Bytes::from(response))
    }
}
