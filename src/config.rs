//! Network specific configuration
//!
//! The Quai network runs two ledgers side by side and distinguishes them
//! by BIP-44 coin type: 994 for the account-based Quai ledger and 969 for
//! the UTXO-based Qi ledger. Wallets are instantiated for one coin type
//! and validate every derived address against it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// the registered BIP-44 coin type of the Qi (UTXO) ledger
pub const QI_COIN_TYPE: u32 = 969;
/// the registered BIP-44 coin type of the Quai (account) ledger
pub const QUAI_COIN_TYPE: u32 = 994;

/// BIP-44 coin type of one of the two Quai network ledgers.
///
/// # Default
///
/// The default value is the Qi ledger's coin type:
///
/// ```
/// use quai::config::{CoinType, QI_COIN_TYPE};
///
/// assert_eq!(CoinType::default().value(), QI_COIN_TYPE);
/// ```
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum CoinType {
    Qi,
    Quai,
}
impl CoinType {
    pub fn value(self) -> u32 {
        match self {
            CoinType::Qi => QI_COIN_TYPE,
            CoinType::Quai => QUAI_COIN_TYPE,
        }
    }

    pub fn from_value(v: u32) -> Option<Self> {
        match v {
            QI_COIN_TYPE => Some(CoinType::Qi),
            QUAI_COIN_TYPE => Some(CoinType::Quai),
            _ => None,
        }
    }
}
impl Default for CoinType {
    fn default() -> Self {
        CoinType::Qi
    }
}
impl fmt::Display for CoinType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}
impl From<CoinType> for u32 {
    fn from(ct: CoinType) -> u32 {
        ct.value()
    }
}
impl std::convert::TryFrom<u32> for CoinType {
    type Error = String;
    fn try_from(v: u32) -> Result<Self, Self::Error> {
        CoinType::from_value(v).ok_or_else(|| format!("unknown coin type {}", v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coin_type_round_trip() {
        assert_eq!(CoinType::from_value(969), Some(CoinType::Qi));
        assert_eq!(CoinType::from_value(994), Some(CoinType::Quai));
        assert_eq!(CoinType::from_value(0), None);
    }
}
