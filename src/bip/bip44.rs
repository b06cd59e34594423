//! BIP44 addressing
//!
//! provides all the logic to create safe sequential addresses
//! using the BIP44 specification, constrained to a target zone and
//! ledger of the Quai network.
//!
//! Because zone and ledger membership are properties of the derived
//! address bytes, finding the next address for a `(zone, ledger)` pair is
//! a forward search over child indices: indices whose address lands in
//! the wrong shard or on the wrong ledger are skipped.

use std::{error, fmt, result};

use log::debug;

use crate::address::{is_valid_address_for_zone, Addr, Zone};
use crate::config::CoinType;
use crate::hdwallet::{self, XPrv, XPub, HARDENED_INDEX_START};

/// the BIP44 derivation path has a specific purpose
pub const BIP44_PURPOSE: u32 = 0x8000_002C;

/// the soft derivation is upper bounded
pub const BIP44_SOFT_UPPER_BOUND: u32 = HARDENED_INDEX_START;

/// hard safety bound on the zone-filtered index search
///
/// The expected search distance is a small multiple of the zone count;
/// hitting this bound means the key material cannot produce an address
/// for the requested zone and ledger.
pub const MAX_DERIVATION_ATTEMPTS: u32 = 10_000_000;

/// Error relating to `bip44` operations
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Error {
    /// the given account is out of bound. The account derivation is
    /// expected to stay below the hardened mark.
    AccountOutOfBound(u32),

    /// the given index is out of bound. The index derivation is
    /// expected to be a soft derivation.
    IndexOutOfBound(u32),

    /// the zone-filtered search exceeded `MAX_DERIVATION_ATTEMPTS`
    /// without deriving a valid address
    DerivationExhausted,

    /// the underlying key derivation failed
    Hd(hdwallet::Error),
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::AccountOutOfBound(given) => write!(
                f,
                "Account out of bound, should be below 0x{:x} but received 0x{:x}",
                BIP44_SOFT_UPPER_BOUND, given
            ),
            Error::IndexOutOfBound(given) => write!(
                f,
                "Index out of bound, should be a soft derivation but received 0x{:x}",
                given
            ),
            Error::DerivationExhausted => write!(
                f,
                "No zone-valid address found within {} derivation attempts",
                MAX_DERIVATION_ATTEMPTS
            ),
            Error::Hd(err) => write!(f, "Key derivation failed: {}", err),
        }
    }
}
impl From<hdwallet::Error> for Error {
    fn from(e: hdwallet::Error) -> Error {
        Error::Hd(e)
    }
}
impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Hd(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Account(u32);
impl Account {
    pub fn new(account: u32) -> Result<Self> {
        if account >= BIP44_SOFT_UPPER_BOUND {
            return Err(Error::AccountOutOfBound(account));
        }
        Ok(Account(account))
    }

    pub fn number(&self) -> u32 {
        self.0
    }

    /// the index used to derive this account non hardened (BIP-44
    /// external/change chains)
    pub fn soft_index(&self) -> u32 {
        self.0
    }

    /// the index used to derive this account hardened (payment code
    /// account nodes)
    pub fn hardened_index(&self) -> u32 {
        self.0 | HARDENED_INDEX_START
    }
}
impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Index(u32);
impl Index {
    pub fn new(index: u32) -> Result<Self> {
        if index >= BIP44_SOFT_UPPER_BOUND {
            return Err(Error::IndexOutOfBound(index));
        }
        Ok(Index(index))
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn incr(&self, i: u32) -> Result<Self> {
        if i >= BIP44_SOFT_UPPER_BOUND {
            return Err(Error::IndexOutOfBound(i));
        }
        Index::new(self.0 + i)
    }
}
impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two sequential chains of a BIP44 account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AddrType {
    External,
    Internal,
}
impl AddrType {
    pub fn index(self) -> u32 {
        match self {
            AddrType::External => 0,
            AddrType::Internal => 1,
        }
    }

    pub fn is_change(self) -> bool {
        self == AddrType::Internal
    }
}
impl fmt::Display for AddrType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AddrType::External => write!(f, "external"),
            AddrType::Internal => write!(f, "change"),
        }
    }
}

/// A leaf produced by the zone-filtered search: the child index it was
/// found at and the derived extended public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivedLeaf {
    pub index: u32,
    pub xpub: XPub,
    pub address: Addr,
}

/// search forward from `start` for the first child of `change_node`
/// whose address lives in `zone` on the ledger of `coin_type`
///
/// On success the returned leaf's `index` is the child index the caller
/// must record as consumed. Fails with `DerivationExhausted` after
/// `MAX_DERIVATION_ATTEMPTS` candidates.
pub fn search_zone_address(
    change_node: &XPrv,
    start: u32,
    zone: Zone,
    coin_type: CoinType,
) -> Result<DerivedLeaf> {
    let mut index = start;
    for attempt in 0..MAX_DERIVATION_ATTEMPTS {
        if index >= BIP44_SOFT_UPPER_BOUND {
            return Err(Error::IndexOutOfBound(index));
        }
        let leaf = change_node.derive(index)?;
        let xpub = leaf.public();
        let address = xpub.address();
        if is_valid_address_for_zone(coin_type, &address, zone) {
            if attempt > 64 {
                debug!(
                    "zone {} address found at index {} after {} attempts",
                    zone,
                    index,
                    attempt + 1
                );
            }
            return Ok(DerivedLeaf {
                index,
                xpub,
                address,
            });
        }
        index += 1;
    }
    Err(Error::DerivationExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::zone_of;
    use crate::hdwallet::XPrv;

    fn change_node() -> XPrv {
        XPrv::generate_from_seed_bytes(b"bip44 search test seed")
            .unwrap()
            .derive_path(&[BIP44_PURPOSE, crate::hdwallet::hardened(969), 0, 0])
            .unwrap()
    }

    #[test]
    fn account_and_index_bounds() {
        assert!(Account::new(0).is_ok());
        assert!(Account::new(BIP44_SOFT_UPPER_BOUND - 1).is_ok());
        assert_eq!(
            Account::new(BIP44_SOFT_UPPER_BOUND),
            Err(Error::AccountOutOfBound(BIP44_SOFT_UPPER_BOUND))
        );
        assert!(Index::new(42).is_ok());
        assert!(Index::new(BIP44_SOFT_UPPER_BOUND).is_err());
        assert_eq!(Index::new(40).unwrap().incr(2).unwrap(), Index::new(42).unwrap());
    }

    #[test]
    fn hardened_account_index() {
        let account = Account::new(3).unwrap();
        assert_eq!(account.soft_index(), 3);
        assert_eq!(account.hardened_index(), 0x8000_0003);
    }

    #[test]
    fn search_finds_zone_valid_address() {
        let node = change_node();
        let leaf = search_zone_address(&node, 0, Zone::Cyprus1, CoinType::Qi).unwrap();
        assert_eq!(zone_of(&leaf.address), Some(Zone::Cyprus1));
        assert!(crate::address::is_qi_address(&leaf.address));
        assert_eq!(node.derive(leaf.index).unwrap().address(), leaf.address);
    }

    #[test]
    fn search_respects_start_index() {
        let node = change_node();
        let first = search_zone_address(&node, 0, Zone::Cyprus1, CoinType::Qi).unwrap();
        let second = search_zone_address(&node, first.index + 1, Zone::Cyprus1, CoinType::Qi)
            .unwrap();
        assert!(second.index > first.index);
        assert_ne!(second.address, first.address);
    }

    #[test]
    fn search_filters_by_ledger() {
        let node = change_node();
        let qi = search_zone_address(&node, 0, Zone::Paxos2, CoinType::Qi).unwrap();
        let quai = search_zone_address(&node, 0, Zone::Paxos2, CoinType::Quai).unwrap();
        assert!(crate::address::is_qi_address(&qi.address));
        assert!(!crate::address::is_qi_address(&quai.address));
    }
}
