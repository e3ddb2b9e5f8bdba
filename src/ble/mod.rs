//! Bluetooth Low Energy proximity subsystem.
//!
//! The device acts in both BLE roles at once:
//!
//! 1. **Central** - scans for peers advertising the proximity service,
//!    connects, discovers the service, and reads the peer's identity
//!    payload.
//! 2. **Peripheral** - advertises the same service so that remote peers
//!    can do the exchange in the other direction.
//!
//! The pieces:
//!
//! - [`radio`] - the contract the platform's BLE host stack implements.
//! - [`device`] / [`database`] - per-peer records and the indexed table
//!   with delegate fan-out.
//! - [`engine`] - the per-target connection state machine.
//! - [`coordinator`] - picks which peers still need a payload exchange
//!   and drives the engine one activity at a time.

pub mod coordinator;
pub mod database;
pub mod device;
pub mod engine;
pub mod radio;

use crate::config;
use crate::datatype::Uuid128;

/// Connection lifecycle of a peer as recorded on its device entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Fine-grained state of one tracked link inside the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// GATT service discovery in progress.
    Discovering,
    /// Chunked payload read in progress.
    Reading,
}

/// Best guess at the peer's operating system, from the signal
/// characteristic it exposes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatingSystem {
    #[default]
    Unknown,
    Ios,
    Android,
}

/// Device field named in a `did_update` notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceAttribute {
    State,
    OperatingSystem,
    Payload,
    Rssi,
    Advert,
    PayloadCharacteristic,
    SignalCharacteristic,
    Services,
    PseudoAddress,
    Ignore,
}

/// Power state of the local Bluetooth controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BluetoothState {
    PoweredOn,
    PoweredOff,
    Resetting,
}

/// Role of a characteristic inside the proximity service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeraldCharacteristic {
    /// Carries the peer's identity payload; read immediately on
    /// discovery.
    Payload,
    /// Marks the peer as an Android device.
    SignalAndroid,
    /// Marks the peer as an iOS device.
    SignalIos,
}

impl HeraldCharacteristic {
    /// Recognize a discovered characteristic by UUID.
    pub fn classify(uuid: &Uuid128) -> Option<Self> {
        if *uuid == config::PAYLOAD_CHARACTERISTIC_UUID {
            Some(HeraldCharacteristic::Payload)
        } else if *uuid == config::ANDROID_SIGNAL_CHARACTERISTIC_UUID {
            Some(HeraldCharacteristic::SignalAndroid)
        } else if *uuid == config::IOS_SIGNAL_CHARACTERISTIC_UUID {
            Some(HeraldCharacteristic::SignalIos)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_recognizes_service_characteristics() {
        assert_eq!(
            HeraldCharacteristic::classify(&config::PAYLOAD_CHARACTERISTIC_UUID),
            Some(HeraldCharacteristic::Payload)
        );
        assert_eq!(
            HeraldCharacteristic::classify(&config::ANDROID_SIGNAL_CHARACTERISTIC_UUID),
            Some(HeraldCharacteristic::SignalAndroid)
        );
        assert_eq!(
            HeraldCharacteristic::classify(&config::IOS_SIGNAL_CHARACTERISTIC_UUID),
            Some(HeraldCharacteristic::SignalIos)
        );
        assert_eq!(
            HeraldCharacteristic::classify(&config::HERALD_SERVICE_UUID),
            None
        );
    }
}
