use log::{debug, warn};

use super::*;
use crate::tx::denomination_sum;

/// The fewest-inputs selection strategy.
///
/// UTXOs are consumed from the largest denomination downward until the
/// target plus fee is covered, which keeps the input count (and so the
/// signing and wire cost) low. The selector keeps its session state so
/// the fee can be adjusted in place after the initial selection:
/// [`FewestCoinSelector::increase_fee`] and
/// [`FewestCoinSelector::decrease_fee`] re-plan inputs and change while
/// preserving the accounting invariant.
///
/// A selector instance drives one selection session at a time.
#[derive(Debug, Clone)]
pub struct FewestCoinSelector {
    available: Vec<Utxo>,
    selected: Vec<Utxo>,
    spend_outputs: Vec<Denomination>,
    change_outputs: Vec<Denomination>,
    target: u64,
    fee: u64,
}

impl FewestCoinSelector {
    pub fn new(available: Vec<Utxo>) -> Self {
        FewestCoinSelector {
            available,
            selected: Vec::new(),
            spend_outputs: Vec::new(),
            change_outputs: Vec::new(),
            target: 0,
            fee: 0,
        }
    }

    /// the UTXOs consumed by the current selection
    pub fn selected(&self) -> &[Utxo] {
        &self.selected
    }

    pub fn spend_outputs(&self) -> &[Denomination] {
        &self.spend_outputs
    }

    pub fn change_outputs(&self) -> &[Denomination] {
        &self.change_outputs
    }

    /// the aggregate value of the consumed UTXOs
    pub fn total_input_value(&self) -> u64 {
        self.selected.iter().map(|u| u.value()).sum()
    }

    /// the fee implied by the current selection state: the initial fee
    /// plus or minus every adjustment applied since
    pub fn current_fee(&self) -> u64 {
        self.fee
    }

    fn unused(&self) -> Vec<Utxo> {
        self.available
            .iter()
            .filter(|u| !self.selected.iter().any(|s| s.outpoint == u.outpoint))
            .cloned()
            .collect()
    }

    fn result(&self) -> SelectionResult {
        SelectionResult {
            inputs: self.selected.clone(),
            spend_outputs: self.spend_outputs.clone(),
            change_outputs: self.change_outputs.clone(),
            total_input_value: self.total_input_value(),
        }
    }

    /// select the fewest inputs covering `target + fee` and decompose
    /// the target and the excess into denominations
    pub fn perform_selection(&mut self, target: u64, fee: u64) -> Result<SelectionResult> {
        if target == 0 {
            return Err(Error::TargetNonPositive);
        }
        if self.available.is_empty() {
            return Err(Error::NoUtxos);
        }

        let need = target + fee;
        let mut candidates = self.available.clone();
        // stable sort: ties keep their original ordering
        candidates.sort_by(|a, b| b.value().cmp(&a.value()));

        let mut sum = 0u64;
        let mut selected = Vec::new();
        for utxo in candidates {
            if sum >= need {
                break;
            }
            sum += utxo.value();
            selected.push(utxo);
        }
        if sum < need {
            return Err(Error::InsufficientFunds {
                available: sum,
                required: need,
            });
        }

        debug!(
            "selected {} inputs worth {} to cover {} (fee {})",
            selected.len(),
            sum,
            target,
            fee
        );

        let excess = sum - target - fee;
        self.selected = selected;
        self.spend_outputs = decompose(target);
        self.change_outputs = decompose(excess);
        self.target = target;
        self.fee = fee;
        Ok(self.result())
    }

    /// grow the fee by `additional`, reclaiming change first and
    /// consuming further UTXOs only when the change does not suffice
    ///
    /// Best effort: when the unused UTXOs cannot cover the whole
    /// increase, everything available is absorbed and the implied fee
    /// grows only by the absorbed amount. Returns the new implied fee.
    pub fn increase_fee(&mut self, additional: u64) -> u64 {
        let change_total = denomination_sum(self.change_outputs.iter());

        if change_total >= additional {
            self.change_outputs = decompose(change_total - additional);
            self.fee += additional;
            return self.fee;
        }

        // all the change goes toward the fee; the rest comes from
        // not-yet-consumed UTXOs
        let remaining = additional - change_total;
        self.change_outputs = Vec::new();

        let mut unused = self.unused();
        unused.sort_by(|a, b| b.value().cmp(&a.value()));

        let mut added = 0u64;
        for utxo in unused {
            if added >= remaining {
                break;
            }
            added += utxo.value();
            self.selected.push(utxo);
        }

        if added >= remaining {
            self.change_outputs = decompose(added - remaining);
            self.fee += additional;
        } else {
            warn!(
                "fee increase of {} only partially absorbed ({} available)",
                additional,
                change_total + added
            );
            self.fee += change_total + added;
        }
        self.fee
    }

    /// shrink the fee by `reduction`, releasing inputs where possible
    /// and returning the freed value as additional change outputs
    ///
    /// Pre-existing change outputs are kept as they are; the freed
    /// excess is appended. Returns the new implied fee.
    pub fn decrease_fee(&mut self, reduction: u64) -> u64 {
        let reduction = reduction.min(self.fee);
        let new_fee = self.fee - reduction;
        let change_total = denomination_sum(self.change_outputs.iter());

        // an input is removable while the remaining inputs still cover
        // the target, the reduced fee and the change already promised
        let required = self.target + new_fee + change_total;
        loop {
            let total = self.total_input_value();
            let removable = self
                .selected
                .iter()
                .enumerate()
                .filter(|(_, u)| total - u.value() >= required)
                .max_by_key(|(_, u)| u.value())
                .map(|(i, _)| i);
            match removable {
                Some(i) => {
                    let released = self.selected.remove(i);
                    debug!("released input {} worth {}", released.outpoint, released.value());
                }
                None => break,
            }
        }

        let excess = self.total_input_value() - required;
        self.change_outputs.extend(decompose(excess));
        self.fee = new_fee;
        self.fee
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Addr;
    use crate::tx::{TxId, TxOutpoint};

    use quickcheck::{quickcheck, Arbitrary, Gen};

    fn utxo(nonce: u8, denomination: u8) -> Utxo {
        let outpoint = TxOutpoint::new(TxId::from_bytes([nonce; 32]), nonce as u32);
        let mut addr = [0u8; 20];
        addr[1] = 0x80;
        addr[19] = nonce;
        Utxo::new(
            outpoint,
            Addr::from_bytes(addr),
            Denomination::new(denomination).unwrap(),
        )
    }

    fn selector(denominations: &[u8]) -> FewestCoinSelector {
        let utxos = denominations
            .iter()
            .enumerate()
            .map(|(i, d)| utxo(i as u8, *d))
            .collect();
        FewestCoinSelector::new(utxos)
    }

    fn values(outputs: &[Denomination]) -> Vec<u64> {
        outputs.iter().map(|d| d.value()).collect()
    }

    fn assert_balanced(s: &FewestCoinSelector, target: u64) {
        let spend = denomination_sum(s.spend_outputs().iter());
        let change = denomination_sum(s.change_outputs().iter());
        assert_eq!(spend, target);
        assert_eq!(s.total_input_value(), spend + change + s.current_fee());
    }

    #[test]
    fn exact_match_selection() {
        let mut s = selector(&[1, 2, 3]);
        let result = s.perform_selection(50, 0).unwrap();
        assert_eq!(result.inputs.len(), 1);
        assert_eq!(result.inputs[0].value(), 50);
        assert_eq!(values(&result.spend_outputs), vec![50]);
        assert!(result.change_outputs.is_empty());
        assert_balanced(&s, 50);
    }

    #[test]
    fn combined_inputs_no_change() {
        let mut s = selector(&[1, 2, 2, 3]);
        let result = s.perform_selection(60, 0).unwrap();
        assert_eq!(result.inputs.len(), 2);
        assert_eq!(result.total_input_value, 60);
        assert_eq!(result.spend_outputs.len(), 2);
        assert!(result.change_outputs.is_empty());
        assert_balanced(&s, 60);
    }

    #[test]
    fn single_input_with_change() {
        let mut s = selector(&[2, 4]);
        let result = s.perform_selection(50, 0).unwrap();
        assert_eq!(result.inputs.len(), 1);
        assert_eq!(result.inputs[0].value(), 100);
        assert_eq!(values(&result.spend_outputs), vec![50]);
        assert_eq!(values(&result.change_outputs), vec![50]);
        assert_balanced(&s, 50);
    }

    #[test]
    fn zero_target_is_rejected() {
        let mut s = selector(&[1]);
        assert_eq!(s.perform_selection(0, 0), Err(Error::TargetNonPositive));
    }

    #[test]
    fn empty_utxo_set_is_rejected() {
        let mut s = FewestCoinSelector::new(Vec::new());
        assert_eq!(s.perform_selection(10, 0), Err(Error::NoUtxos));
    }

    #[test]
    fn insufficient_funds_is_reported() {
        let mut s = selector(&[1, 2]);
        match s.perform_selection(100, 0) {
            Err(Error::InsufficientFunds {
                available,
                required,
            }) => {
                assert_eq!(available, 15);
                assert_eq!(required, 100);
            }
            other => panic!("expected insufficient funds, got {:?}", other),
        }
    }

    #[test]
    fn fee_is_covered_by_selection() {
        let mut s = selector(&[2, 2]);
        // target 10 and fee 5 cannot be covered by one 10-input
        let result = s.perform_selection(10, 5).unwrap();
        assert_eq!(result.inputs.len(), 2);
        assert_eq!(values(&result.change_outputs), vec![5]);
        assert_eq!(s.current_fee(), 5);
        assert_balanced(&s, 10);
    }

    #[test]
    fn increase_fee_from_change_alone() {
        let mut s = selector(&[2, 4]);
        s.perform_selection(50, 0).unwrap();
        assert_eq!(values(s.change_outputs()), vec![50]);

        let fee = s.increase_fee(10);
        assert_eq!(fee, 10);
        assert_eq!(s.selected().len(), 1);
        assert_eq!(values(s.change_outputs()), vec![10, 10, 10, 10]);
        assert_balanced(&s, 50);
    }

    #[test]
    fn increase_fee_consumes_further_inputs() {
        // three UTXOs of value 10; selection takes two, the fee bump
        // pulls in the third while keeping the original fee counted
        let mut s = selector(&[2, 2, 2]);
        s.perform_selection(10, 5).unwrap();
        assert_eq!(s.selected().len(), 2);
        assert_eq!(s.total_input_value(), 20);

        let fee = s.increase_fee(10);
        assert_eq!(fee, 15);
        assert_eq!(s.selected().len(), 3);
        assert_eq!(s.total_input_value(), 30);
        assert_eq!(denomination_sum(s.change_outputs().iter()), 5);
        assert_balanced(&s, 10);
    }

    #[test]
    fn increase_fee_is_best_effort_without_unused_utxos() {
        let mut s = selector(&[2]);
        s.perform_selection(5, 0).unwrap();
        assert_eq!(values(s.change_outputs()), vec![5]);

        // only the change can be absorbed; no further UTXO exists
        let fee = s.increase_fee(20);
        assert_eq!(fee, 5);
        assert!(s.change_outputs().is_empty());
        assert_eq!(s.selected().len(), 1);
        assert_balanced(&s, 5);
    }

    #[test]
    fn decrease_fee_returns_excess_as_change() {
        let mut s = selector(&[2, 2, 2]);
        s.perform_selection(10, 5).unwrap();
        assert_eq!(values(s.change_outputs()), vec![5]);

        let fee = s.decrease_fee(5);
        assert_eq!(fee, 0);
        // the pre-existing change output is kept, the freed fee appended
        assert_eq!(values(s.change_outputs()), vec![5, 5]);
        assert_balanced(&s, 10);
    }

    #[test]
    fn decrease_fee_releases_inputs_where_possible() {
        let mut s = selector(&[3, 2]);
        s.perform_selection(40, 20).unwrap();
        assert_eq!(s.selected().len(), 2);
        assert_eq!(s.total_input_value(), 60);
        assert!(s.change_outputs().is_empty());

        let fee = s.decrease_fee(20);
        assert_eq!(fee, 0);
        // the 10-input is released, the 50-input still covers the target
        assert_eq!(s.selected().len(), 1);
        assert_eq!(s.total_input_value(), 50);
        assert_eq!(values(s.change_outputs()), vec![10]);
        assert_balanced(&s, 40);
    }

    #[test]
    fn released_inputs_become_available_again() {
        let mut s = selector(&[3, 2]);
        s.perform_selection(40, 20).unwrap();
        s.decrease_fee(20);
        assert_eq!(s.selected().len(), 1);

        // a later fee increase can re-consume the released UTXO
        let fee = s.increase_fee(15);
        assert_eq!(fee, 15);
        assert_balanced(&s, 40);
    }

    #[derive(Debug, Clone)]
    struct Plan {
        denominations: Vec<u8>,
        target: u64,
        fee: u64,
    }
    impl Arbitrary for Plan {
        fn arbitrary(g: &mut Gen) -> Self {
            let count = usize::arbitrary(g) % 12 + 1;
            let denominations = (0..count)
                .map(|_| (u8::arbitrary(g) % 10))
                .collect::<Vec<u8>>();
            Plan {
                denominations,
                target: u64::arbitrary(g) % 20_000 + 1,
                fee: u64::arbitrary(g) % 500,
            }
        }
    }

    quickcheck! {
        fn selection_balances(plan: Plan) -> bool {
            let mut s = selector(&plan.denominations);
            match s.perform_selection(plan.target, plan.fee) {
                Ok(result) => {
                    denomination_sum(result.spend_outputs.iter()) == plan.target
                        && result.total_input_value
                            == plan.target
                                + denomination_sum(result.change_outputs.iter())
                                + plan.fee
                }
                Err(Error::InsufficientFunds { .. }) => true,
                Err(_) => false,
            }
        }

        fn fee_adjustments_preserve_balance(plan: Plan, bump: u64, cut: u64) -> bool {
            let bump = bump % 2_000;
            let mut s = selector(&plan.denominations);
            if s.perform_selection(plan.target, plan.fee).is_err() {
                return true;
            }
            s.increase_fee(bump);
            let spend = denomination_sum(s.spend_outputs().iter());
            let change = denomination_sum(s.change_outputs().iter());
            if s.total_input_value() != spend + change + s.current_fee() {
                return false;
            }
            let cut = cut % (s.current_fee() + 1);
            s.decrease_fee(cut);
            let spend = denomination_sum(s.spend_outputs().iter());
            let change = denomination_sum(s.change_outputs().iter());
            s.total_input_value() == spend + change + s.current_fee()
        }
    }
}
