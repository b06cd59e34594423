//! Hierarchical Deterministic (HD) Wallet
//!
//! BIP-32 extended keys over secp256k1.
//!
//! Supports:
//! * Transform a BIP-39 seed into a root extended private key
//! * Hard and soft derivation using 32 bit indices
//! * Soft-only derivation on the public side
//!
//! The address of a key is the last 20 bytes of the Keccak-256 of its
//! uncompressed public point, see [`Addr::from_pubkey`].

use std::{fmt, result};

use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey};
use sha2::Sha512;
use zeroize::Zeroize;

use crate::address::Addr;

/// size of a BIP-39 derived seed
pub const SEED_SIZE: usize = 64;
/// serialized size of an extended private key (secret || chain code)
pub const XPRV_SIZE: usize = 64;
/// serialized size of an extended public key (compressed point || chain code)
pub const XPUB_SIZE: usize = 65;

pub const SECRET_KEY_SIZE: usize = 32;
pub const PUBLIC_KEY_SIZE: usize = 33;
pub const CHAIN_CODE_SIZE: usize = 32;

/// derivation indices at or above this bound are hardened
pub const HARDENED_INDEX_START: u32 = 0x8000_0000;

pub type DerivationIndex = u32;

/// the hardened form of the given index
pub const fn hardened(index: u32) -> DerivationIndex {
    index | HARDENED_INDEX_START
}

pub fn is_hardened(index: DerivationIndex) -> bool {
    index >= HARDENED_INDEX_START
}

/// HDWallet errors
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Error {
    /// the given seed is of invalid size, the parameter is the given size
    ///
    /// See `SEED_SIZE` for details about the expected size.
    InvalidSeedSize(usize),
    /// the given extended private key is of invalid size
    InvalidXPrvSize(usize),
    /// the given extended public key is of invalid size
    InvalidXPubSize(usize),
    /// the HMAC output at this index does not yield a usable child key;
    /// the next index must be tried
    InvalidChildKey(DerivationIndex),
    /// public-side derivation was requested for a hardened index
    ExpectedSoftDerivation(DerivationIndex),
    /// a secp256k1 level error (malformed key material)
    Secp256k1(secp256k1::Error),
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidSeedSize(sz) => write!(
                f,
                "Invalid Seed Size, expected {} bytes, but received {} bytes.",
                SEED_SIZE, sz
            ),
            Error::InvalidXPrvSize(sz) => write!(
                f,
                "Invalid XPrv Size, expected {} bytes, but received {} bytes.",
                XPRV_SIZE, sz
            ),
            Error::InvalidXPubSize(sz) => write!(
                f,
                "Invalid XPub Size, expected {} bytes, but received {} bytes.",
                XPUB_SIZE, sz
            ),
            Error::InvalidChildKey(index) => {
                write!(f, "No valid child key at derivation index {}.", index)
            }
            Error::ExpectedSoftDerivation(index) => write!(
                f,
                "Expected soft derivation, but index {} is hardened.",
                index
            ),
            Error::Secp256k1(err) => write!(f, "Invalid key material: {}.", err),
        }
    }
}
impl From<secp256k1::Error> for Error {
    fn from(e: secp256k1::Error) -> Error {
        Error::Secp256k1(e)
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Secp256k1(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Seed used to generate the root private key of the HDWallet.
pub struct Seed([u8; SEED_SIZE]);
impl Seed {
    /// create a Seed by taking ownership of the given array
    pub fn from_bytes(buf: [u8; SEED_SIZE]) -> Self {
        Seed(buf)
    }

    /// create a Seed by copying the given slice into a new array
    ///
    /// ```
    /// use quai::hdwallet::{Seed, SEED_SIZE};
    ///
    /// let bytes = [0u8; SEED_SIZE];
    /// let wrong = [0u8; 31];
    ///
    /// assert!(Seed::from_slice(&wrong[..]).is_err());
    /// assert!(Seed::from_slice(&bytes[..]).is_ok());
    /// ```
    pub fn from_slice(buf: &[u8]) -> Result<Self> {
        if buf.len() != SEED_SIZE {
            return Err(Error::InvalidSeedSize(buf.len()));
        }
        let mut v = [0u8; SEED_SIZE];
        v[..].clone_from_slice(buf);
        Ok(Seed::from_bytes(v))
    }
}
impl AsRef<[u8]> for Seed {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
impl Drop for Seed {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// HDWallet extended private key
///
/// Effectively this is a secp256k1 secret scalar (32 bytes) followed by a
/// chain code (32 bytes).
#[derive(Clone)]
pub struct XPrv {
    key: [u8; SECRET_KEY_SIZE],
    chain_code: [u8; CHAIN_CODE_SIZE],
}
impl XPrv {
    /// create the root private key `XPrv` of the HDWallet associated to
    /// this `Seed`
    ///
    /// This is a deterministic construction. The `XPrv` returned will
    /// always be the same for the same given `Seed`.
    pub fn generate_from_seed(seed: &Seed) -> Result<Self> {
        Self::generate_from_seed_bytes(seed.as_ref())
    }

    /// generate a root key from raw seed bytes of any length
    ///
    /// Useful for the published BIP-32 test vectors whose seeds are
    /// shorter than a BIP-39 seed; prefer [`XPrv::generate_from_seed`].
    pub fn generate_from_seed_bytes(bytes: &[u8]) -> Result<Self> {
        let out = hmac_sha512(b"Bitcoin seed", bytes);
        // reject the (astronomically unlikely) out-of-range master key
        let _ = SecretKey::from_slice(&out[..SECRET_KEY_SIZE])?;
        let mut key = [0u8; SECRET_KEY_SIZE];
        let mut chain_code = [0u8; CHAIN_CODE_SIZE];
        key.clone_from_slice(&out[..SECRET_KEY_SIZE]);
        chain_code.clone_from_slice(&out[SECRET_KEY_SIZE..]);
        Ok(XPrv { key, chain_code })
    }

    /// reconstruct an `XPrv` from its serialized form (secret || chain code)
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != XPRV_SIZE {
            return Err(Error::InvalidXPrvSize(bytes.len()));
        }
        let _ = SecretKey::from_slice(&bytes[..SECRET_KEY_SIZE])?;
        let mut key = [0u8; SECRET_KEY_SIZE];
        let mut chain_code = [0u8; CHAIN_CODE_SIZE];
        key.clone_from_slice(&bytes[..SECRET_KEY_SIZE]);
        chain_code.clone_from_slice(&bytes[SECRET_KEY_SIZE..]);
        Ok(XPrv { key, chain_code })
    }

    // the bytes were validated on construction
    pub(crate) fn secret_key(&self) -> SecretKey {
        SecretKey::from_slice(&self.key).expect("the secret key bytes were validated")
    }

    pub fn chain_code(&self) -> &[u8; CHAIN_CODE_SIZE] {
        &self.chain_code
    }

    /// Get the associated `XPub`
    pub fn public(&self) -> XPub {
        let secp = Secp256k1::signing_only();
        XPub {
            key: PublicKey::from_secret_key(&secp, &self.secret_key()),
            chain_code: self.chain_code,
        }
    }

    /// the address of the associated public key
    pub fn address(&self) -> Addr {
        self.public().address()
    }

    /// derive the child key at the given index (hardened or soft)
    pub fn derive(&self, index: DerivationIndex) -> Result<Self> {
        let mut data = Vec::with_capacity(37);
        if is_hardened(index) {
            data.push(0u8);
            data.extend_from_slice(&self.key);
        } else {
            let secp = Secp256k1::signing_only();
            let pk = PublicKey::from_secret_key(&secp, &self.secret_key());
            data.extend_from_slice(&pk.serialize());
        }
        data.extend_from_slice(&index.to_be_bytes());

        let out = hmac_sha512(&self.chain_code, &data);
        let mut il = [0u8; SECRET_KEY_SIZE];
        il.clone_from_slice(&out[..SECRET_KEY_SIZE]);

        let tweak = Scalar::from_be_bytes(il).map_err(|_| Error::InvalidChildKey(index))?;
        let child = self
            .secret_key()
            .add_tweak(&tweak)
            .map_err(|_| Error::InvalidChildKey(index))?;

        let mut chain_code = [0u8; CHAIN_CODE_SIZE];
        chain_code.clone_from_slice(&out[SECRET_KEY_SIZE..]);
        Ok(XPrv {
            key: child.secret_bytes(),
            chain_code,
        })
    }

    /// descend along the given path, from left to right
    pub fn derive_path(&self, path: &[DerivationIndex]) -> Result<Self> {
        let mut node = self.clone();
        for index in path {
            node = node.derive(*index)?;
        }
        Ok(node)
    }
}
impl PartialEq for XPrv {
    fn eq(&self, rhs: &XPrv) -> bool {
        self.key == rhs.key && self.chain_code == rhs.chain_code
    }
}
impl Eq for XPrv {}
impl fmt::Debug for XPrv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // never print the secret scalar
        write!(f, "XPrv(chain_code: {})", hex::encode(self.chain_code))
    }
}
impl Drop for XPrv {
    fn drop(&mut self) {
        self.key.zeroize();
        self.chain_code.zeroize();
    }
}

/// Extended Public Key (compressed point + chain code)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct XPub {
    key: PublicKey,
    chain_code: [u8; CHAIN_CODE_SIZE],
}
impl XPub {
    pub fn new(key: PublicKey, chain_code: [u8; CHAIN_CODE_SIZE]) -> Self {
        XPub { key, chain_code }
    }

    /// reconstruct an `XPub` from its serialized form
    /// (compressed point || chain code)
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != XPUB_SIZE {
            return Err(Error::InvalidXPubSize(bytes.len()));
        }
        let key = PublicKey::from_slice(&bytes[..PUBLIC_KEY_SIZE])?;
        let mut chain_code = [0u8; CHAIN_CODE_SIZE];
        chain_code.clone_from_slice(&bytes[PUBLIC_KEY_SIZE..]);
        Ok(XPub { key, chain_code })
    }

    pub fn to_bytes(&self) -> [u8; XPUB_SIZE] {
        let mut out = [0u8; XPUB_SIZE];
        out[..PUBLIC_KEY_SIZE].clone_from_slice(&self.key.serialize());
        out[PUBLIC_KEY_SIZE..].clone_from_slice(&self.chain_code);
        out
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.key
    }

    pub fn chain_code(&self) -> &[u8; CHAIN_CODE_SIZE] {
        &self.chain_code
    }

    pub fn address(&self) -> Addr {
        Addr::from_pubkey(&self.key)
    }

    /// derive the child public key at the given index
    ///
    /// Only soft derivation is possible on the public side; hardened
    /// indices fail with `Error::ExpectedSoftDerivation`.
    pub fn derive(&self, index: DerivationIndex) -> Result<Self> {
        if is_hardened(index) {
            return Err(Error::ExpectedSoftDerivation(index));
        }
        let mut data = Vec::with_capacity(37);
        data.extend_from_slice(&self.key.serialize());
        data.extend_from_slice(&index.to_be_bytes());

        let out = hmac_sha512(&self.chain_code, &data);
        let mut il = [0u8; SECRET_KEY_SIZE];
        il.clone_from_slice(&out[..SECRET_KEY_SIZE]);

        let tweak = Scalar::from_be_bytes(il).map_err(|_| Error::InvalidChildKey(index))?;
        let secp = Secp256k1::verification_only();
        let child = self
            .key
            .add_exp_tweak(&secp, &tweak)
            .map_err(|_| Error::InvalidChildKey(index))?;

        let mut chain_code = [0u8; CHAIN_CODE_SIZE];
        chain_code.clone_from_slice(&out[SECRET_KEY_SIZE..]);
        Ok(XPub {
            key: child,
            chain_code,
        })
    }
}
impl fmt::Debug for XPub {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}
impl fmt::Display for XPub {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

fn hmac_sha512(key: &[u8], data: &[u8]) -> [u8; 64] {
    let mut mac = Hmac::<Sha512>::new_from_slice(key).expect("HMAC accepts keys of any size");
    mac.update(data);
    let mut out = [0u8; 64];
    out.clone_from_slice(&mac.finalize().into_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // BIP-32 test vector 1
    const TV1_SEED: &str = "000102030405060708090a0b0c0d0e0f";
    const TV1_M_KEY: &str = "e8f32e723decf4051aefac8e2c93c9c5b214313817cdb01a1494b917c8436b35";
    const TV1_M_CC: &str = "873dff81c02f525623fd1fe5167eac3a55a049de3d314bb42ee227ffed37d508";
    const TV1_M_PUB: &str = "0339a36013301597daef41fbe593a02cc513d0b55527ec2df1050e2e8ff49c85c2";
    const TV1_M0H_KEY: &str = "edb2e14f9ee77d26dd93b4ecede8d16ed408ce149b6cd80b0715a2d911a0afea";
    const TV1_M0H_CC: &str = "47fdacbd0f1097043b78c63c20c34ef4ed9a111d980047ad16282c7ae6236141";
    const TV1_M0H1_KEY: &str = "3c6cb8d0f6a264c91ea8b5030fadaa8e538b020f0a387421a12de9319dc93368";
    const TV1_M0H1_CC: &str = "2a7857631386ba23dacac34180dd1983734e444fdbf774041578e9b6adb37c19";

    fn tv1_root() -> XPrv {
        let bytes = hex::decode(TV1_SEED).unwrap();
        XPrv::generate_from_seed_bytes(&bytes).unwrap()
    }

    #[test]
    fn bip32_vector_1_master() {
        let root = tv1_root();
        assert_eq!(hex::encode(root.secret_key().secret_bytes()), TV1_M_KEY);
        assert_eq!(hex::encode(root.chain_code()), TV1_M_CC);
        assert_eq!(
            hex::encode(root.public().public_key().serialize()),
            TV1_M_PUB
        );
    }

    #[test]
    fn bip32_vector_1_hardened_child() {
        let child = tv1_root().derive(hardened(0)).unwrap();
        assert_eq!(hex::encode(child.secret_key().secret_bytes()), TV1_M0H_KEY);
        assert_eq!(hex::encode(child.chain_code()), TV1_M0H_CC);
    }

    #[test]
    fn bip32_vector_1_soft_child() {
        let child = tv1_root().derive_path(&[hardened(0), 1]).unwrap();
        assert_eq!(hex::encode(child.secret_key().secret_bytes()), TV1_M0H1_KEY);
        assert_eq!(hex::encode(child.chain_code()), TV1_M0H1_CC);
    }

    #[test]
    fn random_seeds_round_trip_through_serialization() {
        for _ in 0..8 {
            let seed: [u8; 32] = rand::random();
            let xprv = XPrv::generate_from_seed_bytes(&seed).unwrap();
            let mut bytes = [0u8; XPRV_SIZE];
            bytes[..SECRET_KEY_SIZE].clone_from_slice(&xprv.secret_key().secret_bytes());
            bytes[SECRET_KEY_SIZE..].clone_from_slice(xprv.chain_code());
            assert_eq!(XPrv::from_slice(&bytes).unwrap(), xprv);
        }
    }

    #[test]
    fn public_derivation_matches_private() {
        let node = tv1_root().derive(hardened(7)).unwrap();
        for index in [0u32, 1, 42, 1000].iter() {
            let via_priv = node.derive(*index).unwrap().public();
            let via_pub = node.public().derive(*index).unwrap();
            assert_eq!(via_priv, via_pub);
            assert_eq!(via_priv.address(), via_pub.address());
        }
    }

    #[test]
    fn public_derivation_is_soft_only() {
        let xpub = tv1_root().public();
        assert_eq!(
            xpub.derive(hardened(0)),
            Err(Error::ExpectedSoftDerivation(hardened(0)))
        );
    }

    #[test]
    fn xpub_serialization_round_trip() {
        let xpub = tv1_root().derive(hardened(3)).unwrap().public();
        let bytes = xpub.to_bytes();
        assert_eq!(XPub::from_slice(&bytes).unwrap(), xpub);
        assert!(XPub::from_slice(&bytes[..XPUB_SIZE - 1]).is_err());
    }

    #[test]
    fn seed_size_is_checked() {
        assert!(Seed::from_slice(&[0u8; 63]).is_err());
        assert!(Seed::from_slice(&[0u8; SEED_SIZE]).is_ok());
    }

    #[test]
    fn hardened_bounds() {
        assert!(is_hardened(hardened(0)));
        assert!(is_hardened(u32::MAX));
        assert!(!is_hardened(HARDENED_INDEX_START - 1));
    }
}
