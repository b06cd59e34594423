//! Block gas-limit admission policy
//!
//! Before submitting an account-ledger transaction the wallet checks
//! the estimated gas against the current block's gas limit: a
//! transaction may consume at most 90% of the block. The comparison is
//! exact integer arithmetic (`10·g ≤ 9·B`), no floating point.

use std::{error, fmt, result};

use log::debug;

use crate::address::Zone;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// no provider is attached to the wallet
    ProviderMissing,
    /// the current block of the zone could not be fetched
    BlockUnavailable(Zone),
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ProviderMissing => write!(f, "No provider attached to the wallet"),
            Error::BlockUnavailable(zone) => {
                write!(f, "The current block of zone {} is unavailable", zone)
            }
        }
    }
}
impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

/// Capability to read the gas limit of a zone's current head block.
pub trait BlockGasProvider {
    /// `None` when the current block cannot be fetched
    fn current_gas_limit(&self, zone: Zone) -> Option<u64>;
}

/// check an estimated gas amount against the 90% block gas-limit policy
///
/// Returns whether the transaction is admissible; fails when no
/// provider is attached or the current block cannot be fetched.
pub fn verify_gas_limit<P: BlockGasProvider>(
    provider: Option<&P>,
    zone: Zone,
    estimated_gas: u64,
) -> Result<bool> {
    let provider = provider.ok_or(Error::ProviderMissing)?;
    let block_limit = provider
        .current_gas_limit(zone)
        .ok_or(Error::BlockUnavailable(zone))?;
    let admissible = 10u128 * u128::from(estimated_gas) <= 9u128 * u128::from(block_limit);
    if !admissible {
        debug!(
            "estimated gas {} exceeds 90% of the {} block limit {}",
            estimated_gas, zone, block_limit
        );
    }
    Ok(admissible)
}
