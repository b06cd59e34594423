//! BIP47 payment codes
//!
//! A payment code packages the public half of a hardened account node
//! (compressed point + chain code) in an 80 byte payload, exchanged as
//! Base58Check text under version byte `0x47`. Two parties that know
//! each other's payment codes can derive a shared sequence of *stealth
//! addresses* without ever reusing an address on chain:
//!
//! * the receiver tweaks its i-th private key with the shared secret
//!   (`priv' = priv_i + s_i`), so only the receiver can spend;
//! * the sender tweaks the receiver's i-th public key with the same
//!   secret (`pub' = pub_i + s_i·G`), so both sides agree on the
//!   address without communicating.
//!
//! The shared secret is `SHA256(x)` of the ECDH point between one
//! side's notification key (index 0) and the other side's i-th key.

use std::{error, fmt, result, str::FromStr};

use secp256k1::{ecdh, PublicKey, Scalar, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use crate::address::Addr;
use crate::hdwallet::{self, XPrv, XPub, CHAIN_CODE_SIZE, PUBLIC_KEY_SIZE};

/// Base58Check version byte of the payment code wire form
pub const PAYMENT_CODE_VERSION: u8 = 0x47;
/// size of the decoded payment code payload
pub const PAYMENT_CODE_SIZE: usize = 80;

/// version byte of the payload itself (first payload byte)
const PAYLOAD_VERSION: u8 = 0x01;

/// byte offsets within the payload
const PUBKEY_OFFSET: usize = 2;
const CHAIN_CODE_OFFSET: usize = PUBKEY_OFFSET + PUBLIC_KEY_SIZE;
const RESERVED_OFFSET: usize = CHAIN_CODE_OFFSET + CHAIN_CODE_SIZE;

/// Payment code errors
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Error {
    /// the decoded payload is not `PAYMENT_CODE_SIZE` bytes
    InvalidSize(usize),
    /// the payload version byte is not `0x01`
    InvalidPayloadVersion(u8),
    /// the Base58Check text could not be decoded (bad alphabet,
    /// checksum, or version byte)
    Base58(bs58::decode::Error),
    /// the derived shared secret is not a valid curve scalar; the
    /// index must be skipped
    InvalidSharedSecret(u32),
    /// the underlying key derivation failed
    Hd(hdwallet::Error),
    /// a secp256k1 level error (malformed point, tweak out of range)
    Secp256k1(secp256k1::Error),
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidSize(sz) => write!(
                f,
                "Invalid payment code size, expected {} bytes, but received {} bytes.",
                PAYMENT_CODE_SIZE, sz
            ),
            Error::InvalidPayloadVersion(v) => {
                write!(f, "Invalid payment code payload version: 0x{:02x}.", v)
            }
            Error::Base58(err) => write!(f, "Invalid payment code encoding: {}.", err),
            Error::InvalidSharedSecret(index) => {
                write!(f, "Shared secret at index {} is not a valid scalar.", index)
            }
            Error::Hd(err) => write!(f, "Key derivation failed: {}", err),
            Error::Secp256k1(err) => write!(f, "Invalid key material: {}.", err),
        }
    }
}
impl From<bs58::decode::Error> for Error {
    fn from(e: bs58::decode::Error) -> Error {
        Error::Base58(e)
    }
}
impl From<hdwallet::Error> for Error {
    fn from(e: hdwallet::Error) -> Error {
        Error::Hd(e)
    }
}
impl From<secp256k1::Error> for Error {
    fn from(e: secp256k1::Error) -> Error {
        Error::Secp256k1(e)
    }
}
impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Base58(err) => Some(err),
            Error::Hd(err) => Some(err),
            Error::Secp256k1(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

/// The public half of a payment code: enough to derive the payment key
/// sequence of the owning wallet.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PaymentCode(XPub);
impl PaymentCode {
    pub fn new(xpub: XPub) -> Self {
        PaymentCode(xpub)
    }

    pub fn xpub(&self) -> &XPub {
        &self.0
    }

    /// the 80 byte payload: `[0x01, 0x00, pubkey, chain code, reserved]`
    pub fn to_payload(&self) -> [u8; PAYMENT_CODE_SIZE] {
        let mut out = [0u8; PAYMENT_CODE_SIZE];
        out[0] = PAYLOAD_VERSION;
        out[1] = 0x00; // feature bits, none defined
        out[PUBKEY_OFFSET..CHAIN_CODE_OFFSET]
            .clone_from_slice(&self.0.public_key().serialize());
        out[CHAIN_CODE_OFFSET..RESERVED_OFFSET].clone_from_slice(self.0.chain_code());
        out
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() != PAYMENT_CODE_SIZE {
            return Err(Error::InvalidSize(payload.len()));
        }
        if payload[0] != PAYLOAD_VERSION {
            return Err(Error::InvalidPayloadVersion(payload[0]));
        }
        let xpub = XPub::from_slice(&payload[PUBKEY_OFFSET..RESERVED_OFFSET])?;
        Ok(PaymentCode(xpub))
    }

    /// the i-th payment public key of the code's owner (soft derivation)
    pub fn payment_pubkey(&self, index: u32) -> Result<PublicKey> {
        Ok(*self.0.derive(index)?.public_key())
    }
}
impl fmt::Display for PaymentCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = bs58::encode(&self.to_payload()[..])
            .with_check_version(PAYMENT_CODE_VERSION)
            .into_string();
        write!(f, "{}", s)
    }
}
impl fmt::Debug for PaymentCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PaymentCode({})", self)
    }
}
impl FromStr for PaymentCode {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let bytes = bs58::decode(s)
            .with_check(Some(PAYMENT_CODE_VERSION))
            .into_vec()?;
        // the version byte is kept by the decoder
        PaymentCode::from_payload(&bytes[1..])
    }
}

/// The private half of a payment code: the hardened account node the
/// code was built from. Owning it allows deriving the spendable side of
/// the stealth address sequence.
#[derive(Clone, PartialEq, Eq)]
pub struct PaymentCodePrivate {
    node: XPrv,
    code: PaymentCode,
}
impl PaymentCodePrivate {
    /// wrap the hardened account node `m/44'/coinType'/account'`
    pub fn from_account_node(node: XPrv) -> Self {
        let code = PaymentCode::new(node.public());
        PaymentCodePrivate { node, code }
    }

    pub fn code(&self) -> &PaymentCode {
        &self.code
    }

    fn payment_secret(&self, index: u32) -> Result<SecretKey> {
        Ok(self.node.derive(index)?.secret_key())
    }

    /// derive the i-th stealth address receivable from `sender`
    ///
    /// This is the receiver side: the returned key pair is spendable by
    /// this wallet (`priv_i + s_i`).
    pub fn payment_address(&self, sender: &PaymentCode, index: u32) -> Result<(Addr, PublicKey)> {
        let secret_i = self.payment_secret(index)?;
        let notification = sender.payment_pubkey(0)?;
        let tweak = shared_secret_scalar(&secret_i, &notification, index)?;
        let ephemeral = secret_i
            .add_tweak(&tweak)
            .map_err(|_| Error::InvalidSharedSecret(index))?;
        let secp = Secp256k1::signing_only();
        let pubkey = PublicKey::from_secret_key(&secp, &ephemeral);
        Ok((Addr::from_pubkey(&pubkey), pubkey))
    }

    /// derive the i-th stealth address for sending to `receiver`
    ///
    /// This is the sender side: only `receiver` can spend the result
    /// (`pub_i + s_i·G`).
    pub fn send_address(&self, receiver: &PaymentCode, index: u32) -> Result<(Addr, PublicKey)> {
        let notification_secret = self.payment_secret(0)?;
        let their_pubkey = receiver.payment_pubkey(index)?;
        let tweak = shared_secret_scalar(&notification_secret, &their_pubkey, index)?;
        let secp = Secp256k1::verification_only();
        let pubkey = their_pubkey
            .add_exp_tweak(&secp, &tweak)
            .map_err(|_| Error::InvalidSharedSecret(index))?;
        Ok((Addr::from_pubkey(&pubkey), pubkey))
    }
}
impl fmt::Debug for PaymentCodePrivate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PaymentCodePrivate({})", self.code)
    }
}

/// the BIP47 shared secret between the two keys, as a curve scalar:
/// `SHA256(x coordinate of the ECDH point)`
fn shared_secret_scalar(secret: &SecretKey, pubkey: &PublicKey, index: u32) -> Result<Scalar> {
    let point = ecdh::shared_secret_point(pubkey, secret);
    let digest = Sha256::digest(&point[..32]);
    let mut bytes = [0u8; 32];
    bytes.clone_from_slice(&digest);
    Scalar::from_be_bytes(bytes).map_err(|_| Error::InvalidSharedSecret(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdwallet::{hardened, XPrv};

    fn account_node(seed: &[u8], account: u32) -> XPrv {
        XPrv::generate_from_seed_bytes(seed)
            .unwrap()
            .derive_path(&[hardened(44), hardened(969), hardened(account)])
            .unwrap()
    }

    #[test]
    fn wire_round_trip() {
        let ours = PaymentCodePrivate::from_account_node(account_node(b"alice seed", 0));
        let encoded = ours.code().to_string();
        let decoded: PaymentCode = encoded.parse().unwrap();
        assert_eq!(&decoded, ours.code());
        assert_eq!(decoded.to_string(), encoded);
    }

    #[test]
    fn wire_rejects_tampering() {
        let ours = PaymentCodePrivate::from_account_node(account_node(b"alice seed", 0));
        let encoded = ours.code().to_string();

        // flip a character: the checksum must catch it
        let mut tampered: Vec<char> = encoded.chars().collect();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == '1' { '2' } else { '1' };
        let tampered: String = tampered.into_iter().collect();
        assert!(tampered.parse::<PaymentCode>().is_err());

        // a different version byte must be rejected even with a valid checksum
        let other_version = bs58::encode(&ours.code().to_payload()[..])
            .with_check_version(0x48)
            .into_string();
        assert!(other_version.parse::<PaymentCode>().is_err());
    }

    #[test]
    fn payload_version_is_checked() {
        let ours = PaymentCodePrivate::from_account_node(account_node(b"alice seed", 0));
        let mut payload = ours.code().to_payload();
        payload[0] = 0x02;
        assert_eq!(
            PaymentCode::from_payload(&payload),
            Err(Error::InvalidPayloadVersion(0x02))
        );
        assert!(PaymentCode::from_payload(&payload[..79]).is_err());
    }

    #[test]
    fn stealth_addresses_are_symmetric() {
        let alice = PaymentCodePrivate::from_account_node(account_node(b"alice seed", 0));
        let bob = PaymentCodePrivate::from_account_node(account_node(b"bob seed", 0));

        for index in 0..8u32 {
            let (receive_addr, receive_key) =
                alice.payment_address(bob.code(), index).unwrap();
            let (send_addr, send_key) = bob.send_address(alice.code(), index).unwrap();
            assert_eq!(receive_addr, send_addr);
            assert_eq!(receive_key, send_key);
        }
    }

    #[test]
    fn stealth_addresses_differ_per_index_and_party() {
        let alice = PaymentCodePrivate::from_account_node(account_node(b"alice seed", 0));
        let bob = PaymentCodePrivate::from_account_node(account_node(b"bob seed", 0));
        let carol = PaymentCodePrivate::from_account_node(account_node(b"carol seed", 0));

        let (a0, _) = alice.payment_address(bob.code(), 0).unwrap();
        let (a1, _) = alice.payment_address(bob.code(), 1).unwrap();
        let (c0, _) = alice.payment_address(carol.code(), 0).unwrap();
        assert_ne!(a0, a1);
        assert_ne!(a0, c0);
    }
}
