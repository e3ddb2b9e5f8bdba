//! Per-peer device record.

use core::time::Duration;

use heapless::Vec;

use crate::ble::radio::AdvertData;
use crate::ble::{DeviceState, OperatingSystem};
use crate::config::{MAX_DEVICE_SERVICES, RSSI_HISTORY_CAPACITY};
use crate::datatype::{PayloadData, PseudoAddress, TargetIdentifier, Timestamp, Uuid128};
use crate::sampling::SampleList;

/// Everything known about one nearby peer.
///
/// Keyed by [`TargetIdentifier`] (the peer's current MAC) and, once a
/// payload has been read, by the payload-derived [`PseudoAddress`] that
/// survives MAC rotation. Records are created and mutated only through
/// the [`DeviceDatabase`](crate::ble::database::DeviceDatabase) so that
/// every change fans out to the registered delegates.
pub struct Device {
    target: TargetIdentifier,
    pseudo_address: Option<PseudoAddress>,
    state: DeviceState,
    operating_system: OperatingSystem,
    /// `None` until service discovery has run; `Some` with an empty list
    /// records a discovery that found nothing.
    services: Option<Vec<Uuid128, MAX_DEVICE_SERVICES>>,
    payload_characteristic: Option<Uuid128>,
    signal_characteristic: Option<Uuid128>,
    rssi_history: SampleList<i8, RSSI_HISTORY_CAPACITY>,
    last_advert: Option<AdvertData>,
    payload: Option<PayloadData>,
    ignore: bool,
    connect_failures: u16,
    created_at: Timestamp,
    last_connected_at: Option<Timestamp>,
    last_disconnected_at: Option<Timestamp>,
    last_payload_at: Option<Timestamp>,
}

impl Device {
    pub(crate) fn new(target: TargetIdentifier, created_at: Timestamp) -> Self {
        Device {
            target,
            pseudo_address: None,
            state: DeviceState::Disconnected,
            operating_system: OperatingSystem::Unknown,
            services: None,
            payload_characteristic: None,
            signal_characteristic: None,
            rssi_history: SampleList::new(),
            last_advert: None,
            payload: None,
            ignore: false,
            connect_failures: 0,
            created_at,
            last_connected_at: None,
            last_disconnected_at: None,
            last_payload_at: None,
        }
    }

    pub fn target(&self) -> TargetIdentifier {
        self.target
    }

    pub fn pseudo_address(&self) -> Option<PseudoAddress> {
        self.pseudo_address
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn operating_system(&self) -> OperatingSystem {
        self.operating_system
    }

    /// Discovered service UUIDs; `None` while discovery has not run yet.
    pub fn services(&self) -> Option<&[Uuid128]> {
        self.services.as_deref()
    }

    /// Whether service discovery has completed for this device (with or
    /// without finding anything).
    pub fn has_services_set(&self) -> bool {
        self.services.is_some()
    }

    pub fn payload_characteristic(&self) -> Option<Uuid128> {
        self.payload_characteristic
    }

    pub fn signal_characteristic(&self) -> Option<Uuid128> {
        self.signal_characteristic
    }

    pub fn rssi_history(&self) -> &SampleList<i8, RSSI_HISTORY_CAPACITY> {
        &self.rssi_history
    }

    /// Most recent RSSI reading, if any has been recorded.
    pub fn latest_rssi(&self) -> Option<i8> {
        self.rssi_history.latest().map(|s| s.value)
    }

    pub fn last_advert(&self) -> Option<&[u8]> {
        self.last_advert.as_deref()
    }

    pub fn payload(&self) -> Option<&PayloadData> {
        self.payload.as_ref()
    }

    /// Suppressed device: retained so we keep recognizing it, but never
    /// scheduled for a connection.
    pub fn ignored(&self) -> bool {
        self.ignore
    }

    pub fn connect_failures(&self) -> u16 {
        self.connect_failures
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn last_connected_at(&self) -> Option<Timestamp> {
        self.last_connected_at
    }

    pub fn last_disconnected_at(&self) -> Option<Timestamp> {
        self.last_disconnected_at
    }

    pub fn last_payload_at(&self) -> Option<Timestamp> {
        self.last_payload_at
    }

    pub fn time_since_connected(&self, now: Timestamp) -> Option<Duration> {
        self.last_connected_at
            .map(|at| now.saturating_duration_since(at))
    }

    pub fn time_since_disconnected(&self, now: Timestamp) -> Option<Duration> {
        self.last_disconnected_at
            .map(|at| now.saturating_duration_since(at))
    }

    // Mutators are crate-private: all writes go through the database so
    // delegates observe them.

    pub(crate) fn set_state(&mut self, state: DeviceState, now: Timestamp) {
        match state {
            DeviceState::Connected => self.last_connected_at = Some(now),
            DeviceState::Disconnected => self.last_disconnected_at = Some(now),
            DeviceState::Connecting => {}
        }
        self.state = state;
    }

    pub(crate) fn set_pseudo_address(&mut self, pseudo: PseudoAddress) {
        self.pseudo_address = Some(pseudo);
    }

    pub(crate) fn set_operating_system(&mut self, os: OperatingSystem) {
        self.operating_system = os;
    }

    pub(crate) fn set_services(&mut self, services: Vec<Uuid128, MAX_DEVICE_SERVICES>) {
        self.services = Some(services);
    }

    pub(crate) fn set_payload_characteristic(&mut self, uuid: Uuid128) {
        self.payload_characteristic = Some(uuid);
    }

    pub(crate) fn set_signal_characteristic(&mut self, uuid: Uuid128) {
        self.signal_characteristic = Some(uuid);
    }

    pub(crate) fn push_rssi(&mut self, taken: Timestamp, rssi: i8) {
        self.rssi_history.push(taken, rssi);
    }

    pub(crate) fn set_advert(&mut self, advert: AdvertData) {
        self.last_advert = Some(advert);
    }

    pub(crate) fn set_payload(&mut self, payload: PayloadData, now: Timestamp) {
        self.payload = Some(payload);
        self.last_payload_at = Some(now);
        self.connect_failures = 0;
    }

    pub(crate) fn set_ignore(&mut self, ignore: bool) {
        self.ignore = ignore;
    }

    pub(crate) fn record_connect_failure(&mut self) {
        self.connect_failures = self.connect_failures.saturating_add(1);
    }

    /// Merge identity state from a retired record for the same peer
    /// (found via matching pseudo-address after a MAC rotation).
    pub(crate) fn absorb(&mut self, retired: &Device) {
        if self.operating_system == OperatingSystem::Unknown {
            self.operating_system = retired.operating_system;
        }
        if self.payload.is_none() {
            self.payload = retired.payload.clone();
            self.last_payload_at = retired.last_payload_at;
        }
        self.ignore |= retired.ignore;
    }
}
