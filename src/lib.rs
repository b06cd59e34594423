//! The Quai library
//!
//! Client-side support for the Quai network's two ledgers: the
//! account-based Quai ledger and the UTXO-based Qi ledger. This crate
//! provides the cryptographic wallet primitives (BIP-32 extended keys over
//! secp256k1, BIP-44 sequential addressing, BIP-47 payment channels), the
//! Qi HD wallet with its address lifecycle and stable serialization, and
//! the denomination-aware UTXO selection engine used to build Qi
//! transactions.

pub mod address;
pub mod bip;
pub mod config;
pub mod gas;
pub mod hdwallet;
pub mod input_selection;
pub mod tx;
pub mod wallet;
