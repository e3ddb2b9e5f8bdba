//! Contract between the engine and the platform's BLE host stack.
//!
//! The engine never talks to hardware directly; a platform adapter
//! implements [`Radio`] over its host stack and feeds callbacks back as
//! [`RadioEvent`]s from [`Radio::poll_event`]. The engine drains events
//! between its cooperative sleeps, so an adapter only needs a small
//! event queue, not a thread.

use core::time::Duration;

use heapless::Vec;

use crate::config::{
    CONN_INTERVAL_MAX, CONN_INTERVAL_MIN, CONN_LATENCY, CONN_SUPERVISION_TIMEOUT,
    GATT_CHUNK_CAPACITY, MAX_ADVERT_SIZE, MAX_DISCOVERED_CHARACTERISTICS,
};
use crate::datatype::{MacAddress, Timestamp, Uuid128};
use crate::error::RadioError;

/// Opaque token for a live (or in-flight) connection. The radio owns the
/// underlying object; the engine only holds the token weakly and
/// revalidates it during reconciliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnHandle(u16);

impl ConnHandle {
    pub const fn new(raw: u16) -> Self {
        ConnHandle(raw)
    }

    pub const fn raw(&self) -> u16 {
        self.0
    }
}

/// Connection timing parameters handed to [`Radio::connect`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionParams {
    /// Minimum connection interval (1.25 ms units).
    pub interval_min: u16,
    /// Maximum connection interval (1.25 ms units).
    pub interval_max: u16,
    /// Connection events the peripheral may skip.
    pub latency: u16,
    /// Supervision timeout (10 ms units).
    pub supervision_timeout: u16,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        ConnectionParams {
            interval_min: CONN_INTERVAL_MIN,
            interval_max: CONN_INTERVAL_MAX,
            latency: CONN_LATENCY,
            supervision_timeout: CONN_SUPERVISION_TIMEOUT,
        }
    }
}

/// One characteristic reported by service discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GattCharacteristic {
    pub uuid: Uuid128,
    /// ATT handle used for reads on this characteristic.
    pub value_handle: u16,
}

/// Raw advertisement (and scan response) bytes.
pub type AdvertData = Vec<u8, MAX_ADVERT_SIZE>;

/// One GATT read callback's worth of payload bytes.
pub type GattChunk = Vec<u8, GATT_CHUNK_CAPACITY>;

/// Callbacks from the host stack, delivered in the order the stack
/// produced them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RadioEvent {
    /// An advertisement was heard while scanning.
    Advertisement {
        addr: MacAddress,
        rssi: i8,
        adv_type: u8,
        data: AdvertData,
    },

    /// A connection attempt finished (`err == 0`), or a peer connected
    /// to us. A non-zero `err` means the link never came up.
    Connected {
        handle: ConnHandle,
        addr: MacAddress,
        err: u8,
    },

    /// A link dropped, with the HCI reason code. Not guaranteed to be
    /// delivered by every host stack; the reconciliation sweep covers
    /// the gap.
    Disconnected { handle: ConnHandle, reason: u8 },

    /// Service discovery finished and found the requested service.
    DiscoveryCompleted {
        handle: ConnHandle,
        characteristics: Vec<GattCharacteristic, MAX_DISCOVERED_CHARACTERISTICS>,
    },

    /// Service discovery finished without finding the service.
    ServiceNotFound { handle: ConnHandle },

    /// Service discovery failed.
    DiscoveryError { handle: ConnHandle, err: i32 },

    /// One chunk of a characteristic read; `chunk == None` terminates
    /// the read.
    GattRead {
        handle: ConnHandle,
        err: u8,
        chunk: Option<GattChunk>,
    },
}

/// Everything the engine needs from a BLE host stack.
///
/// All calls are non-blocking except [`sleep`](Radio::sleep); results
/// arrive later as [`RadioEvent`]s. A single engine instance drives a
/// single radio, so implementations need no interior locking.
pub trait Radio {
    fn start_scan(&mut self, passive: bool, filter_duplicates: bool) -> Result<(), RadioError>;

    fn stop_scan(&mut self);

    /// Begin advertising the given service UUID.
    fn start_advertise(&mut self, service: &Uuid128) -> Result<(), RadioError>;

    fn stop_advertise(&mut self);

    /// Start a connection attempt; completion arrives as
    /// [`RadioEvent::Connected`].
    fn connect(
        &mut self,
        addr: &MacAddress,
        params: &ConnectionParams,
    ) -> Result<ConnHandle, RadioError>;

    fn disconnect(&mut self, handle: ConnHandle, reason: u8);

    /// Start GATT discovery for `service` on a live link.
    fn discover_service(&mut self, handle: ConnHandle, service: &Uuid128)
        -> Result<(), RadioError>;

    /// Start a chunked read of the characteristic at `value_handle`.
    fn read_characteristic(
        &mut self,
        handle: ConnHandle,
        value_handle: u16,
        offset: u16,
    ) -> Result<(), RadioError>;

    /// Ground truth: the live handle for `addr`, if the radio still has
    /// one.
    fn connection_for_addr(&mut self, addr: &MacAddress) -> Option<ConnHandle>;

    /// The radio's monotonic clock.
    fn now(&self) -> Timestamp;

    /// Yield the executor for `period`. The only blocking call in the
    /// contract.
    fn sleep(&mut self, period: Duration);

    /// Next pending callback, if any.
    fn poll_event(&mut self) -> Option<RadioEvent>;
}
