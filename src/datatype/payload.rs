use core::fmt;

use heapless::Vec;

use crate::error::Error;

/// Upper bound on a peer identity payload, in bytes. Concrete payload
/// schemes are far smaller; the headroom covers aggregated reads.
pub const MAX_PAYLOAD_SIZE: usize = 256;

/// Opaque identity payload exchanged over the payload characteristic.
///
/// The stack never interprets the contents; it only moves the bytes
/// between the radio and the device database.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PayloadData {
    bytes: Vec<u8, MAX_PAYLOAD_SIZE>,
}

impl PayloadData {
    pub fn new() -> Self {
        PayloadData { bytes: Vec::new() }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut payload = PayloadData::new();
        payload.append(bytes)?;
        Ok(payload)
    }

    /// Append a chunk, e.g. one GATT read callback's worth of data.
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), Error> {
        self.bytes
            .extend_from_slice(chunk)
            .map_err(|_| Error::BufferOverflow)
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for PayloadData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.bytes.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for PayloadData {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=[u8]:02x}", self.bytes.as_slice());
    }
}

/// Stable peer identifier derived from payload bytes.
///
/// Peers rotate their MAC address periodically; the pseudo-address
/// survives the rotation and lets the database merge the old and new
/// records for the same peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PseudoAddress([u8; 6]);

impl PseudoAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        PseudoAddress(bytes)
    }

    /// Derive from a payload: the trailing six bytes (the low bytes of
    /// the client identifier), zero-padded for shorter payloads.
    pub fn from_payload(payload: &PayloadData) -> Option<Self> {
        let bytes = payload.as_bytes();
        if bytes.is_empty() {
            return None;
        }
        let mut out = [0u8; 6];
        if bytes.len() >= 6 {
            out.copy_from_slice(&bytes[bytes.len() - 6..]);
        } else {
            out[..bytes.len()].copy_from_slice(bytes);
        }
        Some(PseudoAddress(out))
    }

    pub const fn bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Debug for PseudoAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for PseudoAddress {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=[u8]:02x}", self.0.as_slice());
    }
}
