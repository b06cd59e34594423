//! Qi transaction building blocks
//!
//! The Qi ledger is a UTXO ledger over a fixed table of permitted output
//! values (the *denominations*). Every UTXO and every transaction output
//! carries a denomination index rather than a free-form amount; only the
//! denomination values participate in arithmetic.
//!
//! This module also carries the minimal transaction model consumed by
//! the wire codec capability and the sharded transaction hash
//! construction. The protobuf codec itself is an external collaborator;
//! only its I/O signature is fixed here.

use std::{error, fmt, result, str::FromStr};

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::address::{Addr, Ledger, Zone};

/// the permitted Qi output values, in base units (1 unit = 0.001 qi),
/// strictly increasing
pub const DENOMINATIONS: [u64; 17] = [
    1,
    5,
    10,
    50,
    100,
    250,
    500,
    1_000,
    5_000,
    10_000,
    20_000,
    50_000,
    100_000,
    1_000_000,
    10_000_000,
    100_000_000,
    1_000_000_000,
];

/// size of a transaction (or block) hash
pub const HASH_SIZE: usize = 32;

/// wire type tag of Quai (account ledger) transactions
pub const QUAI_TX_TYPE: u8 = 0;
/// wire type tag of Qi (UTXO ledger) transactions
pub const QI_TX_TYPE: u8 = 2;

#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    /// the given index does not point into the denomination table
    InvalidDenomination(u8),
    /// the given bytes are not of the expected hash length
    InvalidHashSize(usize),
    /// the given string is not valid hexadecimal
    HexadecimalError(hex::FromHexError),
    /// the transaction spans both ledgers across two zones
    UnsupportedCrossLedger {
        origin: Zone,
        destination: Zone,
    },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidDenomination(ix) => write!(
                f,
                "Denomination index {} is out of range, the table has {} entries.",
                ix,
                DENOMINATIONS.len()
            ),
            Error::InvalidHashSize(sz) => write!(
                f,
                "Invalid hash size, expected {} bytes, but received {} bytes.",
                HASH_SIZE, sz
            ),
            Error::HexadecimalError(err) => write!(f, "Invalid hexadecimal: {}.", err),
            Error::UnsupportedCrossLedger {
                origin,
                destination,
            } => write!(
                f,
                "Transactions between ledgers are confined to a single zone, got {} to {}.",
                origin, destination
            ),
        }
    }
}
impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Error {
        Error::HexadecimalError(e)
    }
}
impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

/// An index into the denomination table.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Denomination(u8);
impl Denomination {
    /// the largest denomination of the table
    pub const MAX: Denomination = Denomination(DENOMINATIONS.len() as u8 - 1);

    pub fn new(index: u8) -> Result<Self> {
        if (index as usize) < DENOMINATIONS.len() {
            Ok(Denomination(index))
        } else {
            Err(Error::InvalidDenomination(index))
        }
    }

    pub fn index(self) -> u8 {
        self.0
    }

    /// the value of this denomination in base units
    pub fn value(self) -> u64 {
        DENOMINATIONS[self.0 as usize]
    }
}
impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}
impl From<Denomination> for u8 {
    fn from(d: Denomination) -> u8 {
        d.0
    }
}
impl std::convert::TryFrom<u8> for Denomination {
    type Error = Error;
    fn try_from(v: u8) -> Result<Self> {
        Denomination::new(v)
    }
}

/// sum of the values of the given denominations
pub fn denomination_sum<'a, I: Iterator<Item = &'a Denomination>>(iter: I) -> u64 {
    iter.map(|d| d.value()).sum()
}

/// A transaction (or block) hash.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct TxId([u8; HASH_SIZE]);
impl TxId {
    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        TxId(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HASH_SIZE {
            return Err(Error::InvalidHashSize(bytes.len()));
        }
        let mut buf = [0u8; HASH_SIZE];
        buf[..].clone_from_slice(bytes);
        Ok(TxId(buf))
    }
}
impl AsRef<[u8]> for TxId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}
impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}
impl FromStr for TxId {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        TxId::from_slice(&bytes)
    }
}
impl Serialize for TxId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
impl<'de> Deserialize<'de> for TxId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Reference to a transaction output: the transaction it was created in
/// and its position among that transaction's outputs.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Serialize, Deserialize)]
pub struct TxOutpoint {
    pub txhash: TxId,
    pub index: u32,
}
impl TxOutpoint {
    pub fn new(txhash: TxId, index: u32) -> Self {
        TxOutpoint { txhash, index }
    }
}
impl fmt::Display for TxOutpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.txhash, self.index)
    }
}

/// An unspent transaction output of the Qi ledger.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Utxo {
    pub outpoint: TxOutpoint,
    pub address: Addr,
    pub denomination: Denomination,
}
impl Utxo {
    pub fn new(outpoint: TxOutpoint, address: Addr, denomination: Denomination) -> Self {
        Utxo {
            outpoint,
            address,
            denomination,
        }
    }

    pub fn value(&self) -> u64 {
        self.denomination.value()
    }
}

/// A Qi transaction input: the consumed outpoint and the public key
/// that proves ownership of its address.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct TxIn {
    pub previous_outpoint: TxOutpoint,
    pub pub_key: Vec<u8>,
}

/// A Qi transaction output.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct TxOut {
    pub address: Addr,
    pub denomination: Denomination,
}
impl TxOut {
    pub fn new(address: Addr, denomination: Denomination) -> Self {
        TxOut {
            address,
            denomination,
        }
    }
}

/// A transaction of the Qi UTXO ledger (wire type 2).
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct QiTransaction {
    pub chain_id: u64,
    pub tx_inputs: Vec<TxIn>,
    pub tx_outputs: Vec<TxOut>,
    /// aggregated Schnorr signature over all inputs, opaque here
    pub signature: Vec<u8>,
}

/// A transaction of the Quai account ledger (wire type 0).
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct QuaiTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub to: Option<Addr>,
    pub value: u128,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub data: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Either kind of transaction, tagged with its wire type.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum Transaction {
    Quai(QuaiTransaction),
    Qi(QiTransaction),
}
impl Transaction {
    pub fn tx_type(&self) -> u8 {
        match self {
            Transaction::Quai(_) => QUAI_TX_TYPE,
            Transaction::Qi(_) => QI_TX_TYPE,
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Transaction::Quai(tx) => tx.chain_id,
            Transaction::Qi(tx) => tx.chain_id,
        }
    }
}

/// Wire codec capability for protobuf encoded transactions.
///
/// Implementations must round-trip the fields this crate populates:
/// the type tag, chain id, inputs/outputs of Qi transactions, the
/// recipient/value/gas fields of Quai transactions and the signature
/// blob.
pub trait TxCodec {
    type Error: fmt::Debug;

    fn encode_transaction(&self, tx: &Transaction) -> result::Result<Vec<u8>, Self::Error>;
    fn decode_transaction(&self, bytes: &[u8]) -> result::Result<Transaction, Self::Error>;
}

/// compute the sharded hash of a serialized transaction
///
/// The base Keccak-256 of the payload is masked so that the leading
/// bytes locate the transaction: byte 0 carries the origin zone tag,
/// byte 1's high nibble the origin ledger, bytes 2 and 3 the same for
/// the destination. Transactions that change ledger *and* zone at once
/// are not representable and are rejected.
pub fn transaction_hash(
    payload: &[u8],
    origin: (Zone, Ledger),
    destination: (Zone, Ledger),
) -> Result<TxId> {
    let (origin_zone, origin_ledger) = origin;
    let (dest_zone, dest_ledger) = destination;
    if origin_ledger != dest_ledger && origin_zone != dest_zone {
        return Err(Error::UnsupportedCrossLedger {
            origin: origin_zone,
            destination: dest_zone,
        });
    }

    let mut out = [0u8; HASH_SIZE];
    out.clone_from_slice(&Keccak256::digest(payload));
    out[0] = origin_zone.tag_byte();
    out[1] = (origin_ledger.hash_nibble() << 4) | (out[1] & 0x0F);
    out[2] = dest_zone.tag_byte();
    out[3] = (dest_ledger.hash_nibble() << 4) | (out[3] & 0x0F);
    Ok(TxId::from_bytes(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denomination_table_is_strictly_increasing() {
        for window in DENOMINATIONS.windows(2) {
            assert!(window[0] < window[1]);
        }
        assert_eq!(DENOMINATIONS[0], 1);
    }

    #[test]
    fn denomination_bounds() {
        assert!(Denomination::new(0).is_ok());
        assert_eq!(Denomination::MAX.value(), 1_000_000_000);
        assert_eq!(
            Denomination::new(DENOMINATIONS.len() as u8),
            Err(Error::InvalidDenomination(DENOMINATIONS.len() as u8))
        );
        assert_eq!(Denomination::new(2).unwrap().value(), 10);
        assert_eq!(Denomination::new(3).unwrap().value(), 50);
    }

    #[test]
    fn txid_hex_round_trip() {
        let id = TxId::from_bytes([0xAB; HASH_SIZE]);
        let s = id.to_string();
        assert_eq!(s.len(), 2 + HASH_SIZE * 2);
        assert_eq!(s.parse::<TxId>().unwrap(), id);
        assert!("0xdead".parse::<TxId>().is_err());
    }

    #[test]
    fn sharded_hash_masks_leading_bytes() {
        let payload = b"some serialized transaction";
        let id = transaction_hash(
            payload,
            (Zone::Cyprus1, Ledger::Qi),
            (Zone::Paxos2, Ledger::Qi),
        )
        .unwrap();
        let bytes = id.as_ref();
        assert_eq!(bytes[0], 0x00);
        assert_eq!(bytes[1] & 0xF0, 0xF0);
        assert_eq!(bytes[2], 0x11);
        assert_eq!(bytes[3] & 0xF0, 0xF0);

        // the tail is the plain keccak of the payload
        let base = Keccak256::digest(payload);
        assert_eq!(&bytes[4..], &base[4..]);
    }

    #[test]
    fn sharded_hash_ledger_nibbles() {
        let id = transaction_hash(
            b"payload",
            (Zone::Hydra3, Ledger::Quai),
            (Zone::Hydra3, Ledger::Qi),
        )
        .unwrap();
        let bytes = id.as_ref();
        assert_eq!(bytes[0], 0x22);
        assert_eq!(bytes[1] & 0xF0, 0x10);
        assert_eq!(bytes[3] & 0xF0, 0xF0);
    }

    struct JsonCodec;
    impl TxCodec for JsonCodec {
        type Error = serde_json::Error;

        fn encode_transaction(&self, tx: &Transaction) -> result::Result<Vec<u8>, Self::Error> {
            serde_json::to_vec(tx)
        }

        fn decode_transaction(&self, bytes: &[u8]) -> result::Result<Transaction, Self::Error> {
            serde_json::from_slice(bytes)
        }
    }

    #[test]
    fn codec_round_trips_populated_fields() {
        let qi = Transaction::Qi(QiTransaction {
            chain_id: 9000,
            tx_inputs: vec![TxIn {
                previous_outpoint: TxOutpoint::new(TxId::from_bytes([1u8; HASH_SIZE]), 2),
                pub_key: vec![0x02; 33],
            }],
            tx_outputs: vec![TxOut::new(
                Addr::from_bytes([0x07; 20]),
                Denomination::new(3).unwrap(),
            )],
            signature: vec![0xAA; 64],
        });
        assert_eq!(qi.tx_type(), QI_TX_TYPE);
        assert_eq!(qi.chain_id(), 9000);

        let quai = Transaction::Quai(QuaiTransaction {
            chain_id: 9000,
            nonce: 7,
            to: Some(Addr::from_bytes([0x08; 20])),
            value: 1_000_000,
            gas_limit: 21_000,
            gas_price: 2_000_000_000,
            data: Vec::new(),
            signature: vec![0xBB; 65],
        });
        assert_eq!(quai.tx_type(), QUAI_TX_TYPE);

        let codec = JsonCodec;
        for tx in [qi, quai].iter() {
            let bytes = codec.encode_transaction(tx).unwrap();
            assert_eq!(&codec.decode_transaction(&bytes).unwrap(), tx);
        }
    }

    #[test]
    fn cross_zone_cross_ledger_is_rejected() {
        let err = transaction_hash(
            b"payload",
            (Zone::Cyprus1, Ledger::Qi),
            (Zone::Paxos1, Ledger::Quai),
        )
        .unwrap_err();
        assert_eq!(
            err,
            Error::UnsupportedCrossLedger {
                origin: Zone::Cyprus1,
                destination: Zone::Paxos1,
            }
        );

        // same zone, different ledger is fine
        assert!(transaction_hash(
            b"payload",
            (Zone::Cyprus1, Ledger::Qi),
            (Zone::Cyprus1, Ledger::Quai),
        )
        .is_ok());
    }
}
