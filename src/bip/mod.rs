//! BIP related utilities
//!
//! * [`bip44`] sequential addressing and the zone-filtered index search
//! * [`bip47`] payment codes and stealth address derivation

pub mod bip44;
pub mod bip47;
