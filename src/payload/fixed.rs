//! Fixed identity payload, version 1.
//!
//! Wire layout, 13 bytes total:
//!
//! ```text
//! [0]      version tag (0x08)
//! [1..3]   country code, big-endian u16
//! [3..5]   state code, big-endian u16
//! [5..13]  client identifier, big-endian u64
//! ```
//!
//! The payload does not depend on the timestamp, so it is computed once
//! at construction and served from cache thereafter.

use heapless::Vec;

use crate::ble::device::Device;
use crate::config::MAX_AGGREGATED_PAYLOADS;
use crate::datatype::{PayloadData, Timestamp};
use crate::payload::PayloadSupplier;

/// Serialized size of one version-1 fixed payload.
pub const FIXED_PAYLOAD_LEN: usize = 13;

const VERSION_TAG: u8 = 0x08;

/// Supplier serving a constant country/state/client-id payload.
pub struct FixedPayloadSupplier {
    country: u16,
    state: u16,
    client_id: u64,
    cached: PayloadData,
}

impl FixedPayloadSupplier {
    pub fn new(country: u16, state: u16, client_id: u64) -> Self {
        let mut bytes = [0u8; FIXED_PAYLOAD_LEN];
        bytes[0] = VERSION_TAG;
        bytes[1..3].copy_from_slice(&country.to_be_bytes());
        bytes[3..5].copy_from_slice(&state.to_be_bytes());
        bytes[5..13].copy_from_slice(&client_id.to_be_bytes());
        let cached = PayloadData::from_bytes(&bytes)
            .unwrap_or_default();
        FixedPayloadSupplier {
            country,
            state,
            client_id,
            cached,
        }
    }

    pub fn country(&self) -> u16 {
        self.country
    }

    pub fn state(&self) -> u16 {
        self.state
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }
}

impl PayloadSupplier for FixedPayloadSupplier {
    fn payload(&mut self, _now: Timestamp, _device: Option<&Device>) -> Option<PayloadData> {
        Some(self.cached.clone())
    }

    fn parse_payloads(&self, aggregated: &[u8]) -> Vec<PayloadData, MAX_AGGREGATED_PAYLOADS> {
        let mut frames = Vec::new();
        for chunk in aggregated.chunks_exact(FIXED_PAYLOAD_LEN) {
            let Ok(frame) = PayloadData::from_bytes(chunk) else {
                break;
            };
            if frames.push(frame).is_err() {
                warn!("aggregated payload holds more than {} frames", frames.len());
                break;
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_layout() {
        let mut supplier = FixedPayloadSupplier::new(826, 3, 0x0102_0304_0506_0708);
        let payload = supplier.payload(Timestamp::ZERO, None).unwrap();
        assert_eq!(
            payload.as_bytes(),
            &[0x08, 0x03, 0x3a, 0x00, 0x03, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]
        );
    }

    #[test]
    fn payload_is_stable_across_timestamps() {
        let mut supplier = FixedPayloadSupplier::new(826, 3, 42);
        let early = supplier.payload(Timestamp::from_secs(0), None).unwrap();
        let late = supplier.payload(Timestamp::from_secs(86_400), None).unwrap();
        assert_eq!(early, late);
    }

    #[test]
    fn parse_splits_aggregated_reads() {
        let mut a = FixedPayloadSupplier::new(826, 1, 1);
        let mut b = FixedPayloadSupplier::new(826, 1, 2);
        let pa = a.payload(Timestamp::ZERO, None).unwrap();
        let pb = b.payload(Timestamp::ZERO, None).unwrap();

        let mut aggregated = std::vec::Vec::new();
        aggregated.extend_from_slice(pa.as_bytes());
        aggregated.extend_from_slice(pb.as_bytes());

        let frames = a.parse_payloads(&aggregated);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], pa);
        assert_eq!(frames[1], pb);
    }

    #[test]
    fn parse_drops_trailing_partial_frame() {
        let mut supplier = FixedPayloadSupplier::new(826, 1, 1);
        let payload = supplier.payload(Timestamp::ZERO, None).unwrap();

        let mut aggregated = std::vec::Vec::new();
        aggregated.extend_from_slice(payload.as_bytes());
        aggregated.extend_from_slice(&[0xff, 0xee]);

        let frames = supplier.parse_payloads(&aggregated);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], payload);
    }
}
