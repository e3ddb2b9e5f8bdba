//! Protocol constants and compile-time configuration.
//!
//! All timing parameters, table capacities, and GATT protocol constants
//! live here so they can be tuned in one place.

use core::time::Duration;

use crate::datatype::Uuid128;

// GATT protocol
//
// UUIDs are stored in wire (little-endian) byte order; the doc comment
// on each gives the canonical string form.

/// Proximity service: `428132AF-4746-42D3-801E-4572D65BFD9B`.
pub const HERALD_SERVICE_UUID: Uuid128 = Uuid128::from_le_bytes([
    0x9b, 0xfd, 0x5b, 0xd6, 0x72, 0x45, 0x1e, 0x80, 0xd3, 0x42, 0x46, 0x47, 0xaf, 0x32, 0x81, 0x42,
]);

/// Android signal characteristic: `F617B813-092E-437A-8324-E09A8082A1A1`.
pub const ANDROID_SIGNAL_CHARACTERISTIC_UUID: Uuid128 = Uuid128::from_le_bytes([
    0xa1, 0xa1, 0x82, 0x80, 0x9a, 0xe0, 0x24, 0x83, 0x7a, 0x43, 0x2e, 0x09, 0x13, 0xb8, 0x17, 0xf6,
]);

/// iOS signal characteristic: `0EB0D5F2-EAE4-4A9A-8AF3-A4ADB02D4363`.
pub const IOS_SIGNAL_CHARACTERISTIC_UUID: Uuid128 = Uuid128::from_le_bytes([
    0x63, 0x43, 0x2d, 0xb0, 0xad, 0xa4, 0xf3, 0x8a, 0x9a, 0x4a, 0xe4, 0xea, 0xf2, 0xd5, 0xb0, 0x0e,
]);

/// Payload characteristic: `3E98C0F8-8F05-4829-A121-43E38F8933E7`.
pub const PAYLOAD_CHARACTERISTIC_UUID: Uuid128 = Uuid128::from_le_bytes([
    0xe7, 0x33, 0x89, 0x8f, 0xe3, 0x43, 0x21, 0xa1, 0x29, 0x48, 0x05, 0x8f, 0xf8, 0xc0, 0x98, 0x3e,
]);

// Scanning

/// Whether the central role is enabled at all. With scanning disabled the
/// engine neither scans nor initiates connections.
pub const SCANNING_ENABLED: bool = true;

/// Passive scan: no scan requests, advertisements only.
pub const SCAN_PASSIVE: bool = true;

/// Let the controller suppress duplicate advertisements per scan window.
pub const SCAN_FILTER_DUPLICATES: bool = true;

// Connections

/// Connection interval range (1.25 ms units). 0x50 = 100 ms.
pub const CONN_INTERVAL_MIN: u16 = 0x50;
pub const CONN_INTERVAL_MAX: u16 = 0x50;

/// Number of connection events the peripheral may skip.
pub const CONN_LATENCY: u16 = 0;

/// Supervision timeout (10 ms units). 400 = 4 s.
pub const CONN_SUPERVISION_TIMEOUT: u16 = 400;

/// HCI reason code used for every disconnect we initiate.
pub const HCI_REMOTE_USER_TERMINATED: u8 = 0x13;

// Timeouts

/// Budget for a connection attempt to complete.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Budget for GATT service discovery to complete.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Budget for the chunked payload read to finish after discovery.
pub const PAYLOAD_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval for cooperative waits.
pub const POLL_PERIOD: Duration = Duration::from_millis(25);

/// A peer-initiated connection that shows no progress for this long is
/// forcibly disconnected by the reconciliation sweep.
pub const REMOTE_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

// Retry backoff

/// First retry delay after a failed payload exchange; doubles per
/// consecutive failure up to `CONNECT_BACKOFF_MAX_SHIFT` doublings.
pub const CONNECT_BACKOFF_BASE: Duration = Duration::from_secs(8);
pub const CONNECT_BACKOFF_MAX_SHIFT: u16 = 5;

// Capacities

/// Maximum number of peers tracked at once.
pub const MAX_DEVICES: usize = 32;

/// Maximum simultaneous connection states (in-flight or live links).
pub const MAX_CONNECTION_STATES: usize = 8;

/// Maximum registered database delegates.
pub const MAX_DELEGATES: usize = 4;

/// RSSI samples retained per device.
pub const RSSI_HISTORY_CAPACITY: usize = 32;

/// Advertisement plus scan-response data.
pub const MAX_ADVERT_SIZE: usize = 62;

/// Service UUIDs recorded per device after discovery.
pub const MAX_DEVICE_SERVICES: usize = 4;

/// Characteristics reported by one service discovery.
pub const MAX_DISCOVERED_CHARACTERISTICS: usize = 8;

/// One GATT read callback's worth of payload data.
pub const GATT_CHUNK_CAPACITY: usize = 32;

/// Frames recoverable from one aggregated payload read.
pub const MAX_AGGREGATED_PAYLOADS: usize = 8;
