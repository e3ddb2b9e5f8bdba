use core::fmt;

use crate::datatype::{MacAddress, PseudoAddress};

/// Ephemeral per-peer key: the MAC address the peer is currently using.
///
/// Valid only until the peer rotates its address; long-lived identity is
/// the [`PseudoAddress`] recorded on the device once its payload is read.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetIdentifier(MacAddress);

impl TargetIdentifier {
    pub const fn new(mac: MacAddress) -> Self {
        TargetIdentifier(mac)
    }

    pub const fn mac_address(&self) -> MacAddress {
        self.0
    }
}

impl From<MacAddress> for TargetIdentifier {
    fn from(mac: MacAddress) -> Self {
        TargetIdentifier(mac)
    }
}

impl From<PseudoAddress> for TargetIdentifier {
    fn from(pseudo: PseudoAddress) -> Self {
        TargetIdentifier(MacAddress::new(*pseudo.bytes()))
    }
}

impl fmt::Debug for TargetIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TargetIdentifier {
    fn format(&self, f: defmt::Formatter) {
        defmt::Format::format(&self.0, f);
    }
}
