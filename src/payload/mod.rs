//! Identity payload supply.
//!
//! The stack treats payload bytes as opaque; a [`PayloadSupplier`] is
//! the pluggable source of the payload we present to peers, and knows
//! how to split an aggregated read back into individual frames.

pub mod fixed;

use heapless::Vec;

use crate::ble::device::Device;
use crate::config::MAX_AGGREGATED_PAYLOADS;
use crate::datatype::{PayloadData, Timestamp};

pub use fixed::FixedPayloadSupplier;

/// Source of the identity payload served to peers.
pub trait PayloadSupplier {
    /// The payload to present at `now`, optionally specialised for the
    /// peer reading it. Implementations may recompute per timestamp or
    /// serve a cached value; callers must not assume either.
    fn payload(&mut self, now: Timestamp, device: Option<&Device>) -> Option<PayloadData>;

    /// Split a concatenation of payloads (as read from a peer that
    /// aggregates several) into individual frames.
    fn parse_payloads(&self, aggregated: &[u8]) -> Vec<PayloadData, MAX_AGGREGATED_PAYLOADS>;
}
