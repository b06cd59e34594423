//! Input selection for Qi transactions
//!
//! The algorithms work over the fixed denomination table: a selection
//! decides which UTXOs to consume and decomposes the payment target and
//! the change into denomination multi-sets. After every successful
//! operation the accounting invariant holds:
//!
//! `sum(inputs) = sum(spend outputs) + sum(change outputs) + fee`

use std::{error, fmt, result};

use crate::tx::{Denomination, Utxo, DENOMINATIONS};

mod fewest;

pub use self::fewest::FewestCoinSelector;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Error {
    /// the payment target must be strictly positive
    TargetNonPositive,
    /// no UTXO was made available to the selector
    NoUtxos,
    /// the available UTXOs do not cover the target plus fee; the
    /// parameters give the aggregate available and the required value
    InsufficientFunds { available: u64, required: u64 },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::TargetNonPositive => write!(f, "Target amount must be greater than 0"),
            Error::NoUtxos => write!(f, "No UTXOs available for selection"),
            Error::InsufficientFunds {
                available,
                required,
            } => write!(
                f,
                "Insufficient funds, {} available but {} required",
                available, required
            ),
        }
    }
}
impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

/// The input selection result structure
///
/// This allows to put a name (and a meaning) to the output.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SelectionResult {
    /// the UTXOs consumed by the selection
    pub inputs: Vec<Utxo>,

    /// the denominations paying the target, summing exactly to it
    pub spend_outputs: Vec<Denomination>,

    /// the denominations refunded to the wallet
    pub change_outputs: Vec<Denomination>,

    /// the aggregate value of `inputs`
    pub total_input_value: u64,
}

/// greedy largest-first decomposition of `value` into denominations
///
/// The remainder is whatever the table cannot represent; with the
/// standard table (smallest denomination 1) it is always 0. A selector
/// must construct its operands so that no remainder occurs.
pub fn decompose_with_remainder(value: u64) -> (Vec<Denomination>, u64) {
    let mut outputs = Vec::new();
    let mut rest = value;
    for index in (0..DENOMINATIONS.len()).rev() {
        let denomination =
            Denomination::new(index as u8).expect("index is within the denomination table");
        while rest >= denomination.value() {
            rest -= denomination.value();
            outputs.push(denomination);
        }
    }
    (outputs, rest)
}

/// exact greedy decomposition of `value` into denominations
pub fn decompose(value: u64) -> Vec<Denomination> {
    decompose_with_remainder(value).0
}
