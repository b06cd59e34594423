//! Qi HD wallet
//!
//! The wallet aggregates several *sub-wallets*, one per derivation
//! scheme: the two BIP-44 chains (external and change) and, per opened
//! payment channel, a self-receive and a counterparty-send BIP-47
//! sub-wallet. Every sub-wallet exclusively owns its address records
//! and its per `(zone, account)` derivation cursor; the facade
//! ([`qi::QiWallet`]) only composes them and exposes union views.

use std::collections::BTreeMap;
use std::{error, fmt, result, str::FromStr};

use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};

use crate::address::{Addr, Zone};
use crate::bip::{bip44, bip47};
use crate::tx::TxId;

pub mod qi;

mod channel;
mod sequential;

pub use self::channel::PaymentChannel;
pub use self::sequential::Bip44Wallet;

/// number of consecutive unknown addresses a scan tolerates before
/// declaring the derivation sequence exhausted
pub const DEFAULT_GAP_LIMIT: u32 = 5;

/// derivation path tag of the BIP-44 external chain
pub const BIP44_EXTERNAL_TAG: &str = "BIP44:external";
/// derivation path tag of the BIP-44 change chain
pub const BIP44_CHANGE_TAG: &str = "BIP44:change";

/// Wallet errors
#[derive(Debug)]
pub enum Error {
    /// an address for this `(account, change, index)` is already stored
    /// in the sub-wallet
    IndexInUse {
        account: u32,
        change: bool,
        index: u32,
    },
    /// the zone-filtered search exceeded its attempt bound
    DerivationExhausted,
    /// the given payment code could not be decoded or failed validation
    InvalidPaymentCode(bip47::Error),
    /// no channel is open for the given payment code
    ChannelNotOpen(String),
    /// replaying a serialized address record produced different key
    /// material
    ImportMismatch { address: Addr },
    /// the serialized wallet carries an unsupported version
    UnsupportedVersion(u32),
    /// the serialized wallet was created for another coin type
    WrongCoinType(u32),
    /// the mnemonic phrase could not be parsed
    InvalidMnemonic(bip39::Error),
    /// the derived address does not belong to any zone of the ledger
    InvalidAddressZone(Addr),
    /// an error from the typed BIP-44 layer (bounds, key derivation)
    Bip44(bip44::Error),
    /// an error from the payment code engine
    Bip47(bip47::Error),
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IndexInUse {
                account,
                change,
                index,
            } => write!(
                f,
                "An address is already stored at account {}, change {}, index {}.",
                account, change, index
            ),
            Error::DerivationExhausted => write!(
                f,
                "No zone-valid address found within {} derivation attempts.",
                bip44::MAX_DERIVATION_ATTEMPTS
            ),
            Error::InvalidPaymentCode(err) => write!(f, "Invalid payment code: {}", err),
            Error::ChannelNotOpen(code) => {
                write!(f, "No payment channel is open for {}.", code)
            }
            Error::ImportMismatch { address } => write!(
                f,
                "Re-derivation of the serialized record for {} disagrees with the stored key material.",
                address
            ),
            Error::UnsupportedVersion(version) => {
                write!(f, "Unsupported wallet serialization version {}.", version)
            }
            Error::WrongCoinType(coin_type) => {
                write!(f, "The serialized wallet is for coin type {}.", coin_type)
            }
            Error::InvalidMnemonic(err) => write!(f, "Invalid mnemonic phrase: {}", err),
            Error::InvalidAddressZone(addr) => {
                write!(f, "Address {} does not belong to any zone of the ledger.", addr)
            }
            Error::Bip44(err) => write!(f, "{}", err),
            Error::Bip47(err) => write!(f, "{}", err),
        }
    }
}
impl From<bip44::Error> for Error {
    fn from(e: bip44::Error) -> Error {
        match e {
            bip44::Error::DerivationExhausted => Error::DerivationExhausted,
            other => Error::Bip44(other),
        }
    }
}
impl From<bip47::Error> for Error {
    fn from(e: bip47::Error) -> Error {
        Error::Bip47(e)
    }
}
impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::InvalidPaymentCode(err) => Some(err),
            Error::InvalidMnemonic(err) => Some(err),
            Error::Bip44(err) => Some(err),
            Error::Bip47(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Lifecycle of a derived address.
///
/// An address starts `Unknown`; a chain scan promotes it to `Used` once
/// it has appeared on chain and to `Retired` once its outputs are fully
/// spent and it should not receive again.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AddressStatus {
    Unknown,
    Used,
    Retired,
}

/// Which derivation scheme produced an address.
///
/// The legacy serialized form is a string: the two literal BIP-44 tags,
/// or the counterparty payment code for BIP-47 addresses.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum DerivationPath {
    Bip44External,
    Bip44Change,
    Bip47(String),
}
impl DerivationPath {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            BIP44_EXTERNAL_TAG => DerivationPath::Bip44External,
            BIP44_CHANGE_TAG => DerivationPath::Bip44Change,
            other => DerivationPath::Bip47(other.to_owned()),
        }
    }
}
impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DerivationPath::Bip44External => write!(f, "{}", BIP44_EXTERNAL_TAG),
            DerivationPath::Bip44Change => write!(f, "{}", BIP44_CHANGE_TAG),
            DerivationPath::Bip47(code) => write!(f, "{}", code),
        }
    }
}
impl FromStr for DerivationPath {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> result::Result<Self, Self::Err> {
        Ok(DerivationPath::from_tag(s))
    }
}
impl Serialize for DerivationPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
impl<'de> Deserialize<'de> for DerivationPath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(DerivationPath::from_tag(&s))
    }
}

/// Reference to the block a record was last reconciled against.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRef {
    pub hash: TxId,
    pub number: u64,
}

/// A derived address record, the unit of wallet state.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QiAddressInfo {
    pub address: Addr,
    #[serde(with = "pubkey_hex")]
    pub pub_key: PublicKey,
    pub index: u32,
    pub account: u32,
    pub zone: Zone,
    pub change: bool,
    pub status: AddressStatus,
    pub derivation_path: DerivationPath,
    pub last_synced_block: Option<BlockRef>,
}

mod pubkey_hex {
    use secp256k1::PublicKey;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &PublicKey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PublicKey, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.strip_prefix("0x")
            .unwrap_or(&s)
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

/// Insertion-ordered store of address records with the per
/// `(zone, account)` last-consumed-index cursor.
///
/// Exclusively owned by one sub-wallet; the uniqueness checks therefore
/// cover the `(account, change, index)` triple of that sub-wallet.
#[derive(Debug, Clone)]
pub struct AddressBook {
    addresses: Vec<QiAddressInfo>,
    by_address: BTreeMap<Addr, usize>,
    last_index: BTreeMap<(Zone, u32), u32>,
    gap_limit: u32,
}
impl AddressBook {
    pub fn new(gap_limit: u32) -> Self {
        AddressBook {
            addresses: Vec::new(),
            by_address: BTreeMap::new(),
            last_index: BTreeMap::new(),
            gap_limit,
        }
    }

    pub fn gap_limit(&self) -> u32 {
        self.gap_limit
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// records, in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &QiAddressInfo> {
        self.addresses.iter()
    }

    pub fn get(&self, addr: &Addr) -> Option<&QiAddressInfo> {
        self.by_address.get(addr).map(|ix| &self.addresses[*ix])
    }

    /// highest child index ever consumed for this `(zone, account)`,
    /// `None` when nothing was derived yet
    pub fn last_index(&self, zone: Zone, account: u32) -> Option<u32> {
        self.last_index.get(&(zone, account)).copied()
    }

    /// the child index the next derivation starts searching from
    pub fn next_index(&self, zone: Zone, account: u32) -> u32 {
        self.last_index(zone, account).map_or(0, |ix| ix + 1)
    }

    pub fn contains_index(&self, account: u32, index: u32) -> bool {
        self.addresses
            .iter()
            .any(|a| a.account == account && a.index == index)
    }

    /// the `pos`-th record of this `(zone, account)`, in derivation order
    pub fn nth_for(&self, zone: Zone, account: u32, pos: usize) -> Option<&QiAddressInfo> {
        self.addresses
            .iter()
            .filter(|a| a.zone == zone && a.account == account)
            .nth(pos)
    }

    /// insert a new record, enforcing the sub-wallet uniqueness
    /// invariants and advancing the cursor
    pub(crate) fn insert(&mut self, info: QiAddressInfo) -> Result<()> {
        if self.contains_index(info.account, info.index) {
            return Err(Error::IndexInUse {
                account: info.account,
                change: info.change,
                index: info.index,
            });
        }
        if self.by_address.contains_key(&info.address) {
            return Err(Error::IndexInUse {
                account: info.account,
                change: info.change,
                index: info.index,
            });
        }
        let cursor = self.last_index.entry((info.zone, info.account)).or_insert(info.index);
        if *cursor < info.index {
            *cursor = info.index;
        }
        self.by_address.insert(info.address, self.addresses.len());
        self.addresses.push(info);
        Ok(())
    }

    /// apply a reported status transition; the synced block reference
    /// is updated only when the report carries one
    pub(crate) fn mark(
        &mut self,
        addr: &Addr,
        status: AddressStatus,
        block: Option<BlockRef>,
    ) -> bool {
        match self.by_address.get(addr) {
            Some(ix) => {
                let info = &mut self.addresses[*ix];
                info.status = status;
                if block.is_some() {
                    info.last_synced_block = block;
                }
                true
            }
            None => false,
        }
    }
}

/// What a chain scan learned about one address.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct AddressProbe {
    pub status: AddressStatus,
    pub last_synced_block: Option<BlockRef>,
}

/// The injected scan/sync collaborator.
///
/// The wallet drives the gap-limit walk and asks the scanner about one
/// address at a time; the scanner is the only place a wallet operation
/// may block on the network.
pub trait AddressScanner {
    type Error: fmt::Debug;

    fn probe(&mut self, info: &QiAddressInfo) -> result::Result<AddressProbe, Self::Error>;
}

/// Error of a scan run: either the wallet side failed to derive, or the
/// scanner collaborator reported a failure.
#[derive(Debug)]
pub enum SyncError<E> {
    Wallet(Error),
    Scanner(E),
}
impl<E: fmt::Debug> fmt::Display for SyncError<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyncError::Wallet(err) => write!(f, "{}", err),
            SyncError::Scanner(err) => write!(f, "Scan collaborator failed: {:?}", err),
        }
    }
}
impl<E: fmt::Debug> error::Error for SyncError<E> {}
impl<E> From<Error> for SyncError<E> {
    fn from(e: Error) -> Self {
        SyncError::Wallet(e)
    }
}

impl AddressBook {
    /// walk this book's `(zone, account)` sequence, deriving fresh
    /// addresses through `derive_next` until `gap_limit` consecutive
    /// unknown addresses have been probed
    ///
    /// Existing records are re-probed first, so a scan that discovers a
    /// used address at index `k` has necessarily queried every record
    /// at lower indices. Returns the number of addresses probed.
    pub(crate) fn scan_with<S, D>(
        &mut self,
        zone: Zone,
        account: u32,
        scanner: &mut S,
        mut derive_next: D,
    ) -> result::Result<usize, SyncError<S::Error>>
    where
        S: AddressScanner,
        D: FnMut(&mut AddressBook) -> Result<Addr>,
    {
        let gap_limit = self.gap_limit;
        let mut unknown_run = 0;
        let mut pos = 0;
        while unknown_run < gap_limit {
            let addr = match self.nth_for(zone, account, pos) {
                Some(info) => info.address,
                None => derive_next(self)?,
            };
            let info = self
                .get(&addr)
                .expect("the record was just inserted or found");
            let probe = scanner.probe(info).map_err(SyncError::Scanner)?;
            self.mark(&addr, probe.status, probe.last_synced_block);
            match probe.status {
                AddressStatus::Unknown => unknown_run += 1,
                _ => unknown_run = 0,
            }
            pos += 1;
        }
        Ok(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_path_tags_round_trip() {
        assert_eq!(
            DerivationPath::from_tag("BIP44:external"),
            DerivationPath::Bip44External
        );
        assert_eq!(
            DerivationPath::from_tag("BIP44:change"),
            DerivationPath::Bip44Change
        );
        let code = "PM8TJbcHbQFnBsc3bLYoWcZt4Pfh2behWKRQ8qD8DmYQ9Z3Jzk2PairWt5JJ5jBVEYtVEcUMciXBYQpQnrVWVFdqVrKZMZoZz4TrXztYtvRBM9Hh";
        assert_eq!(
            DerivationPath::from_tag(code),
            DerivationPath::Bip47(code.to_owned())
        );
        assert_eq!(DerivationPath::Bip44Change.to_string(), "BIP44:change");
    }

    #[test]
    fn book_enforces_index_uniqueness() {
        let mut book = AddressBook::new(DEFAULT_GAP_LIMIT);
        let info = dummy_info(0, 3, [1u8; 20]);
        book.insert(info.clone()).unwrap();
        match book.insert(dummy_info(0, 3, [2u8; 20])) {
            Err(Error::IndexInUse { account, index, .. }) => {
                assert_eq!(account, 0);
                assert_eq!(index, 3);
            }
            other => panic!("expected IndexInUse, got {:?}", other),
        }
    }

    #[test]
    fn book_cursor_tracks_max_index() {
        let mut book = AddressBook::new(DEFAULT_GAP_LIMIT);
        assert_eq!(book.last_index(Zone::Cyprus1, 0), None);
        assert_eq!(book.next_index(Zone::Cyprus1, 0), 0);

        book.insert(dummy_info(0, 4, [1u8; 20])).unwrap();
        book.insert(dummy_info(0, 2, [2u8; 20])).unwrap();
        assert_eq!(book.last_index(Zone::Cyprus1, 0), Some(4));
        assert_eq!(book.next_index(Zone::Cyprus1, 0), 5);
        // another account keeps its own cursor
        assert_eq!(book.last_index(Zone::Cyprus1, 1), None);
    }

    #[test]
    fn book_marks_status_and_block() {
        let mut book = AddressBook::new(DEFAULT_GAP_LIMIT);
        let info = dummy_info(0, 0, [1u8; 20]);
        let addr = info.address;
        book.insert(info).unwrap();

        let block = BlockRef {
            hash: TxId::from_bytes([9u8; 32]),
            number: 1200,
        };
        assert!(book.mark(&addr, AddressStatus::Used, Some(block.clone())));
        let stored = book.get(&addr).unwrap();
        assert_eq!(stored.status, AddressStatus::Used);
        assert_eq!(stored.last_synced_block, Some(block.clone()));

        // a report without a block keeps the previous reference
        assert!(book.mark(&addr, AddressStatus::Retired, None));
        let stored = book.get(&addr).unwrap();
        assert_eq!(stored.status, AddressStatus::Retired);
        assert_eq!(stored.last_synced_block, Some(block));

        let unknown = Addr::from_bytes([0xEE; 20]);
        assert!(!book.mark(&unknown, AddressStatus::Used, None));
    }

    fn dummy_info(account: u32, index: u32, addr: [u8; 20]) -> QiAddressInfo {
        let secp = secp256k1::Secp256k1::signing_only();
        let secret = secp256k1::SecretKey::from_slice(&[7u8; 32]).unwrap();
        QiAddressInfo {
            address: Addr::from_bytes(addr),
            pub_key: PublicKey::from_secret_key(&secp, &secret),
            index,
            account,
            zone: Zone::Cyprus1,
            change: false,
            status: AddressStatus::Unknown,
            derivation_path: DerivationPath::Bip44External,
            last_synced_block: None,
        }
    }
}
