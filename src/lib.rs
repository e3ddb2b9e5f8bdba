//! BLE proximity detection stack.
//!
//! Discovers nearby peers over Bluetooth Low Energy, exchanges a short
//! opaque identity payload with each, and records received-signal-strength
//! (RSSI) time series for later analysis. A device runs both roles at
//! once: it scans and connects as a central to read peer payloads, and
//! advertises a GATT service as a peripheral so peers can read ours.
//!
//! The crate is `no_std` and allocation-free; every container is bounded
//! (`heapless`). The platform's BLE host stack stays outside, behind the
//! [`Radio`](ble::radio::Radio) trait: an adapter implements the trait's
//! scan/advertise/connect/GATT primitives and feeds callbacks back as
//! events, which makes the whole engine testable on the host against a
//! scripted mock.
//!
//! Typical wiring:
//!
//! ```ignore
//! let database = DeviceDatabase::new();
//! let mut engine = ConnectionEngine::new(radio, database);
//! let mut coordinator = Coordinator::new();
//!
//! engine.start();
//! loop {
//!     coordinator.tick(&mut engine);
//!     // platform idle/sleep between ticks
//! }
//! ```

#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod ble;
pub mod config;
pub mod datatype;
pub mod error;
pub mod payload;
pub mod sampling;

pub use ble::coordinator::Coordinator;
pub use ble::database::{DatabaseDelegate, DeviceDatabase};
pub use ble::device::Device;
pub use ble::engine::{ConnectionEngine, ConnectionState};
pub use ble::radio::{ConnHandle, ConnectionParams, GattCharacteristic, Radio, RadioEvent};
pub use ble::{BluetoothState, DeviceAttribute, DeviceState, LinkState, OperatingSystem};
pub use datatype::{
    MacAddress, PayloadData, PseudoAddress, TargetIdentifier, Timestamp, Uuid128,
};
pub use error::{Error, RadioError};
pub use payload::{FixedPayloadSupplier, PayloadSupplier};
pub use sampling::{Sample, SampleList};
