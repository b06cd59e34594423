//! Address parsing and the zone/ledger classifier
//!
//! A Quai network address is 20 bytes (the last 20 bytes of the
//! Keccak-256 of the uncompressed public key, like other
//! Ethereum-derived chains). The leading bytes encode two orthogonal
//! facts:
//!
//! * the **zone** (shard) the address lives in: the first byte matches
//!   one of the nine registered zone tags;
//! * the **ledger** it belongs to: the most significant bit of the
//!   second byte, set for the Qi UTXO ledger and clear for the Quai
//!   account ledger.

use std::{fmt, result, str::FromStr};

use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::config::CoinType;

/// size in bytes of an address
pub const ADDR_SIZE: usize = 20;

#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    /// the given bytes are not of the expected length. The parameter is
    /// the given length, see `ADDR_SIZE` for the expected one.
    InvalidAddrSize(usize),
    /// the given string is not valid hexadecimal
    HexadecimalError(hex::FromHexError),
    /// the given name does not belong to the finite zone set
    InvalidZone(String),
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidAddrSize(sz) => write!(
                f,
                "Invalid address size, expected {} bytes, but received {} bytes.",
                ADDR_SIZE, sz
            ),
            Error::HexadecimalError(err) => write!(f, "Invalid hexadecimal: {}.", err),
            Error::InvalidZone(name) => write!(f, "Unknown zone: {}.", name),
        }
    }
}
impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Error {
        Error::HexadecimalError(e)
    }
}
impl std::error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

/// One of the nine shards of the Quai network.
///
/// The discriminants are the address tag bytes: region in the high
/// nibble, zone-within-region in the low nibble.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Cyprus1,
    Cyprus2,
    Cyprus3,
    Paxos1,
    Paxos2,
    Paxos3,
    Hydra1,
    Hydra2,
    Hydra3,
}

/// all the zones, in tag-byte order
pub const ZONES: [Zone; 9] = [
    Zone::Cyprus1,
    Zone::Cyprus2,
    Zone::Cyprus3,
    Zone::Paxos1,
    Zone::Paxos2,
    Zone::Paxos3,
    Zone::Hydra1,
    Zone::Hydra2,
    Zone::Hydra3,
];

impl Zone {
    /// the first-byte tag of addresses in this zone
    pub fn tag_byte(self) -> u8 {
        match self {
            Zone::Cyprus1 => 0x00,
            Zone::Cyprus2 => 0x01,
            Zone::Cyprus3 => 0x02,
            Zone::Paxos1 => 0x10,
            Zone::Paxos2 => 0x11,
            Zone::Paxos3 => 0x12,
            Zone::Hydra1 => 0x20,
            Zone::Hydra2 => 0x21,
            Zone::Hydra3 => 0x22,
        }
    }

    pub fn from_tag_byte(b: u8) -> Option<Self> {
        ZONES.iter().cloned().find(|z| z.tag_byte() == b)
    }
}
impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Zone::Cyprus1 => "cyprus1",
            Zone::Cyprus2 => "cyprus2",
            Zone::Cyprus3 => "cyprus3",
            Zone::Paxos1 => "paxos1",
            Zone::Paxos2 => "paxos2",
            Zone::Paxos3 => "paxos3",
            Zone::Hydra1 => "hydra1",
            Zone::Hydra2 => "hydra2",
            Zone::Hydra3 => "hydra3",
        };
        write!(f, "{}", name)
    }
}
impl FromStr for Zone {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cyprus1" => Ok(Zone::Cyprus1),
            "cyprus2" => Ok(Zone::Cyprus2),
            "cyprus3" => Ok(Zone::Cyprus3),
            "paxos1" => Ok(Zone::Paxos1),
            "paxos2" => Ok(Zone::Paxos2),
            "paxos3" => Ok(Zone::Paxos3),
            "hydra1" => Ok(Zone::Hydra1),
            "hydra2" => Ok(Zone::Hydra2),
            "hydra3" => Ok(Zone::Hydra3),
            _ => Err(Error::InvalidZone(s.to_owned())),
        }
    }
}

/// Which of the two ledgers an address belongs to.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ledger {
    /// the account based ledger (coin type 994)
    Quai,
    /// the UTXO based ledger (coin type 969)
    Qi,
}
impl Ledger {
    pub fn coin_type(self) -> CoinType {
        match self {
            Ledger::Quai => CoinType::Quai,
            Ledger::Qi => CoinType::Qi,
        }
    }

    /// the nibble used when masking a transaction hash with the
    /// originating/destination ledger
    pub fn hash_nibble(self) -> u8 {
        match self {
            Ledger::Qi => 0xF,
            Ledger::Quai => 0x1,
        }
    }
}

/// A 20 byte address of either ledger.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct Addr([u8; ADDR_SIZE]);
impl Addr {
    pub fn from_bytes(bytes: [u8; ADDR_SIZE]) -> Self {
        Addr(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ADDR_SIZE {
            return Err(Error::InvalidAddrSize(bytes.len()));
        }
        let mut buf = [0u8; ADDR_SIZE];
        buf[..].clone_from_slice(bytes);
        Ok(Addr(buf))
    }

    /// compute the address of the given public key: the last 20 bytes of
    /// the Keccak-256 of the uncompressed point (0x04 prefix stripped)
    pub fn from_pubkey(key: &PublicKey) -> Self {
        let uncompressed = key.serialize_uncompressed();
        let hash = Keccak256::digest(&uncompressed[1..]);
        let mut buf = [0u8; ADDR_SIZE];
        buf.clone_from_slice(&hash[12..]);
        Addr(buf)
    }
}
impl AsRef<[u8]> for Addr {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}
impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}
impl FromStr for Addr {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        Addr::from_slice(&bytes)
    }
}
impl Serialize for Addr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
impl<'de> Deserialize<'de> for Addr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// the zone an address belongs to, or `None` if the first byte is not a
/// registered zone tag
pub fn zone_of(addr: &Addr) -> Option<Zone> {
    Zone::from_tag_byte(addr.as_ref()[0])
}

/// the ledger an address belongs to
pub fn ledger_of(addr: &Addr) -> Ledger {
    if is_qi_address(addr) {
        Ledger::Qi
    } else {
        Ledger::Quai
    }
}

/// whether the address belongs to the Qi UTXO ledger (most significant
/// bit of the second byte set)
pub fn is_qi_address(addr: &Addr) -> bool {
    addr.as_ref()[1] & 0x80 != 0
}

/// whether the address lives in the given zone and on the ledger the
/// coin type designates
pub fn is_valid_address_for_zone(coin_type: CoinType, addr: &Addr, zone: Zone) -> bool {
    zone_of(addr) == Some(zone) && is_qi_address(addr) == (coin_type == CoinType::Qi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr_with_prefix(b0: u8, b1: u8) -> Addr {
        let mut bytes = [0x5Au8; ADDR_SIZE];
        bytes[0] = b0;
        bytes[1] = b1;
        Addr::from_bytes(bytes)
    }

    #[test]
    fn zone_classification() {
        assert_eq!(zone_of(&addr_with_prefix(0x00, 0x00)), Some(Zone::Cyprus1));
        assert_eq!(zone_of(&addr_with_prefix(0x12, 0x00)), Some(Zone::Paxos3));
        assert_eq!(zone_of(&addr_with_prefix(0x22, 0x00)), Some(Zone::Hydra3));
        assert_eq!(zone_of(&addr_with_prefix(0x03, 0x00)), None);
        assert_eq!(zone_of(&addr_with_prefix(0xFF, 0x00)), None);
    }

    #[test]
    fn ledger_classification() {
        assert!(is_qi_address(&addr_with_prefix(0x00, 0x80)));
        assert!(is_qi_address(&addr_with_prefix(0x00, 0xFF)));
        assert!(!is_qi_address(&addr_with_prefix(0x00, 0x7F)));
        assert_eq!(ledger_of(&addr_with_prefix(0x11, 0x90)), Ledger::Qi);
        assert_eq!(ledger_of(&addr_with_prefix(0x11, 0x10)), Ledger::Quai);
    }

    #[test]
    fn zone_and_ledger_validation() {
        let qi = addr_with_prefix(0x01, 0xA0);
        assert!(is_valid_address_for_zone(CoinType::Qi, &qi, Zone::Cyprus2));
        assert!(!is_valid_address_for_zone(CoinType::Quai, &qi, Zone::Cyprus2));
        assert!(!is_valid_address_for_zone(CoinType::Qi, &qi, Zone::Cyprus1));

        let quai = addr_with_prefix(0x20, 0x00);
        assert!(is_valid_address_for_zone(CoinType::Quai, &quai, Zone::Hydra1));
        assert!(!is_valid_address_for_zone(CoinType::Qi, &quai, Zone::Hydra1));
    }

    #[test]
    fn display_from_str_round_trip() {
        let addr = addr_with_prefix(0x10, 0x85);
        let s = addr.to_string();
        assert!(s.starts_with("0x"));
        assert_eq!(s.len(), 2 + ADDR_SIZE * 2);
        assert_eq!(s.parse::<Addr>().unwrap(), addr);

        assert!("0x00".parse::<Addr>().is_err());
        assert!("not hexadecimal".parse::<Addr>().is_err());
    }

    #[test]
    fn zone_names_round_trip() {
        for zone in ZONES.iter() {
            assert_eq!(zone.to_string().parse::<Zone>().unwrap(), *zone);
        }
        assert_eq!(
            "atlantis1".parse::<Zone>(),
            Err(Error::InvalidZone("atlantis1".to_owned()))
        );
    }
}
