//! Core value types shared across the stack.

pub mod mac_address;
pub mod payload;
pub mod target;
pub mod timestamp;
pub mod uuid;

pub use mac_address::MacAddress;
pub use payload::{PayloadData, PseudoAddress};
pub use target::TargetIdentifier;
pub use timestamp::Timestamp;
pub use uuid::{Uuid128, UuidSize};
