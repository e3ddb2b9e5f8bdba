use core::fmt;

/// 128-bit GATT UUID, stored as the 16 bytes that travel on the wire
/// (reverse of the canonical string form).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid128([u8; 16]);

impl Uuid128 {
    pub const fn from_le_bytes(bytes: [u8; 16]) -> Self {
        Uuid128(bytes)
    }

    pub const fn as_le_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for Uuid128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[15], b[14], b[13], b[12], b[11], b[10], b[9], b[8],
            b[7], b[6], b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Uuid128 {
    fn format(&self, f: defmt::Formatter) {
        let b = &self.0;
        defmt::write!(
            f,
            "{=u8:02x}{=u8:02x}{=u8:02x}{=u8:02x}-{=u8:02x}{=u8:02x}-{=u8:02x}{=u8:02x}-{=u8:02x}{=u8:02x}-{=u8:02x}{=u8:02x}{=u8:02x}{=u8:02x}{=u8:02x}{=u8:02x}",
            b[15], b[14], b[13], b[12], b[11], b[10], b[9], b[8],
            b[7], b[6], b[5], b[4], b[3], b[2], b[1], b[0]
        );
    }
}

/// Size bucket of a variable-length UUID value: the smallest standard
/// encoding the value fits in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UuidSize {
    Empty,
    Short16,
    Medium32,
    Long64,
    Full128,
}

impl UuidSize {
    /// Classify a raw value length in bytes.
    pub const fn for_len(len: usize) -> Self {
        if len < 2 {
            UuidSize::Empty
        } else if len < 4 {
            UuidSize::Short16
        } else if len < 8 {
            UuidSize::Medium32
        } else if len < 16 {
            UuidSize::Long64
        } else {
            UuidSize::Full128
        }
    }

    /// Encoded width in bytes.
    pub const fn byte_len(self) -> usize {
        match self {
            UuidSize::Empty => 0,
            UuidSize::Short16 => 2,
            UuidSize::Medium32 => 4,
            UuidSize::Long64 => 8,
            UuidSize::Full128 => 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_matches_canonical_string() {
        let uuid = Uuid128::from_le_bytes([
            0x9b, 0xfd, 0x5b, 0xd6, 0x72, 0x45, 0x1e, 0x80, 0xd3, 0x42, 0x46, 0x47, 0xaf, 0x32,
            0x81, 0x42,
        ]);
        assert_eq!(
            std::format!("{uuid:?}"),
            "428132af-4746-42d3-801e-4572d65bfd9b"
        );
    }

    #[test]
    fn size_picks_smallest_bucket_that_fits() {
        assert_eq!(UuidSize::for_len(0), UuidSize::Empty);
        assert_eq!(UuidSize::for_len(1), UuidSize::Empty);
        assert_eq!(UuidSize::for_len(2), UuidSize::Short16);
        assert_eq!(UuidSize::for_len(3), UuidSize::Short16);
        assert_eq!(UuidSize::for_len(4), UuidSize::Medium32);
        assert_eq!(UuidSize::for_len(7), UuidSize::Medium32);
        assert_eq!(UuidSize::for_len(8), UuidSize::Long64);
        assert_eq!(UuidSize::for_len(15), UuidSize::Long64);
        assert_eq!(UuidSize::for_len(16), UuidSize::Full128);
        assert_eq!(UuidSize::for_len(64), UuidSize::Full128);
    }

    #[test]
    fn byte_len_round_trips_exact_sizes() {
        for size in [
            UuidSize::Empty,
            UuidSize::Short16,
            UuidSize::Medium32,
            UuidSize::Long64,
            UuidSize::Full128,
        ] {
            if size == UuidSize::Empty {
                continue;
            }
            assert_eq!(UuidSize::for_len(size.byte_len()), size);
        }
    }
}
