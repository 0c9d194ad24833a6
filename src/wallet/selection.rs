//! UTXO selection
//!
//! Chooses inputs covering a payment plus its fee. The order in which
//! candidates are tried is a [`SelectionStrategy`]; the accounting is the
//! same for every strategy:
//!
//! 1. candidates whose value would not pay for their own input are skipped
//! 2. candidates are added until inputs cover payments + fee
//! 3. a change output is added only if it would not be dust; otherwise the
//!    remainder goes to the fee
//!
//! In every result `total_input == target + change + fee`.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::WalletError;
use crate::core::fee::estimate_vsize;
use crate::core::{FeeRate, WalletUtxo};

/// Decides the order in which candidate UTXOs are tried
pub trait SelectionStrategy {
    fn order(&self, candidates: &mut [WalletUtxo]);
}

/// Built-in strategies, selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "policy")]
pub enum SelectionPolicy {
    /// Descending value; deterministic
    LargestFirst,
    /// Shuffled order to reduce linkability. A fixed seed makes it reproducible.
    Randomized {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seed: Option<u64>,
    },
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        SelectionPolicy::LargestFirst
    }
}

impl SelectionStrategy for SelectionPolicy {
    fn order(&self, candidates: &mut [WalletUtxo]) {
        match self {
            SelectionPolicy::LargestFirst => {
                // Ties broken by outpoint so the order is total
                candidates.sort_by(|a, b| {
                    b.value()
                        .cmp(&a.value())
                        .then_with(|| a.outpoint().cmp(&b.outpoint()))
                });
            }
            SelectionPolicy::Randomized { seed } => {
                candidates.sort_by_key(|c| c.outpoint());
                match seed {
                    Some(seed) => candidates.shuffle(&mut StdRng::seed_from_u64(*seed)),
                    None => candidates.shuffle(&mut rand::thread_rng()),
                }
            }
        }
    }
}

/// What the selected inputs must pay for
#[derive(Debug, Clone)]
pub struct SelectionTarget {
    /// Sum of payment outputs
    pub amount: u64,
    pub fee_rate: FeeRate,
    /// Script lengths of the payment outputs
    pub output_script_lens: Vec<usize>,
    /// Script length of the change output, if one is added
    pub change_script_len: usize,
    /// Smallest change value worth creating
    pub change_dust_limit: u64,
}

/// Result of a selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Chosen inputs, in the order they were selected
    pub chosen: Vec<WalletUtxo>,
    pub fee: u64,
    /// Change value, if a change output is needed
    pub change: Option<u64>,
    /// Estimated virtual size of the signed transaction
    pub vsize: usize,
}

impl Selection {
    pub fn total_input(&self) -> u64 {
        self.chosen.iter().map(|u| u.value()).sum()
    }
}

/// Select inputs from `available` for `target`, trying candidates in the
/// order `strategy` gives them.
///
/// Fails with `InsufficientFunds` if no subset of spendable candidates can
/// cover the amount plus fee.
pub fn select<S: SelectionStrategy + ?Sized>(
    available: &[WalletUtxo],
    target: &SelectionTarget,
    strategy: &S,
) -> Result<Selection, WalletError> {
    if target.amount == 0 {
        return Err(WalletError::NoOutputs);
    }

    let mut candidates: Vec<WalletUtxo> = available
        .iter()
        .filter(|u| u.value() > target.fee_rate.fee_for_weight(u.kind().weight()))
        .cloned()
        .collect();
    let skipped = available.len() - candidates.len();
    if skipped > 0 {
        log::debug!("Skipping {} uneconomical UTXOs", skipped);
    }
    strategy.order(&mut candidates);

    let mut with_change_lens = target.output_script_lens.clone();
    with_change_lens.push(target.change_script_len);

    let mut chosen = Vec::new();
    let mut kinds = Vec::new();
    let mut total: u64 = 0;

    for candidate in candidates {
        total = total.saturating_add(candidate.value());
        kinds.push(candidate.kind());
        chosen.push(candidate);

        let vsize_no_change = estimate_vsize(&kinds, &target.output_script_lens);
        let fee_no_change = target.fee_rate.fee_for_vsize(vsize_no_change);
        let needed = target.amount.saturating_add(fee_no_change);
        if total < needed {
            continue;
        }

        let vsize_change = estimate_vsize(&kinds, &with_change_lens);
        let fee_change = target.fee_rate.fee_for_vsize(vsize_change);
        let change = total
            .checked_sub(target.amount)
            .and_then(|rest| rest.checked_sub(fee_change))
            .filter(|change| *change >= target.change_dust_limit);

        let selection = match change {
            Some(change) => Selection {
                chosen,
                fee: fee_change,
                change: Some(change),
                vsize: vsize_change,
            },
            None => Selection {
                chosen,
                fee: total - target.amount,
                change: None,
                vsize: vsize_no_change,
            },
        };

        log::debug!(
            "Selected {} inputs ({} sat) for {} sat, fee {} sat",
            selection.chosen.len(),
            total,
            target.amount,
            selection.fee
        );
        return Ok(selection);
    }

    let required = target.amount.saturating_add(
        target
            .fee_rate
            .fee_for_vsize(estimate_vsize(&kinds, &target.output_script_lens)),
    );
    Err(WalletError::InsufficientFunds {
        available: total,
        required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{InputKind, OutPoint, Script, ScriptVariant, SpendInfo, Txid, Utxo};
    use std::collections::BTreeMap;

    fn utxo(n: u8, value: u64) -> WalletUtxo {
        WalletUtxo::new(
            Utxo::new(OutPoint::new(Txid([n; 32]), 0), value, Script::p2wpkh(&[n; 20])),
            SpendInfo {
                kind: InputKind::SingleSig {
                    variant: ScriptVariant::NativeSegwit,
                },
                redeem_script: None,
                witness_script: None,
                key_origins: BTreeMap::new(),
            },
        )
    }

    fn target(amount: u64, rate: u64) -> SelectionTarget {
        SelectionTarget {
            amount,
            fee_rate: FeeRate(rate),
            output_script_lens: vec![22],
            change_script_len: 22,
            change_dust_limit: 294,
        }
    }

    fn balanced(selection: &Selection, amount: u64) -> bool {
        selection.total_input() == amount + selection.fee + selection.change.unwrap_or(0)
    }

    #[test]
    fn test_largest_first() {
        let available = vec![utxo(1, 10_000), utxo(2, 80_000), utxo(3, 40_000)];
        let selection = select(&available, &target(60_000, 2), &SelectionPolicy::LargestFirst).unwrap();
        assert_eq!(selection.chosen.len(), 1);
        assert_eq!(selection.chosen[0].value(), 80_000);
        assert!(selection.change.is_some());
        assert!(balanced(&selection, 60_000));
    }

    #[test]
    fn test_multiple_inputs() {
        let available = vec![utxo(1, 30_000), utxo(2, 50_000)];
        let selection = select(&available, &target(70_000, 5), &SelectionPolicy::LargestFirst).unwrap();
        assert_eq!(selection.chosen.len(), 2);
        assert!(balanced(&selection, 70_000));
    }

    #[test]
    fn test_small_remainder_goes_to_fee() {
        let available = vec![utxo(1, 60_300)];
        let selection = select(&available, &target(60_000, 1), &SelectionPolicy::LargestFirst).unwrap();
        assert_eq!(selection.change, None);
        assert_eq!(selection.fee, 300);
        assert!(balanced(&selection, 60_000));
    }

    #[test]
    fn test_insufficient_funds() {
        let available = vec![utxo(1, 10_000), utxo(2, 20_000)];
        let err = select(&available, &target(30_000, 1), &SelectionPolicy::LargestFirst).unwrap_err();
        assert!(matches!(
            err,
            WalletError::InsufficientFunds {
                available: 30_000,
                ..
            }
        ));
    }

    #[test]
    fn test_uneconomical_utxos_skipped() {
        // At 100 sat/vB a P2WPKH input costs ~6,800 sat to spend
        let available = vec![utxo(1, 5_000), utxo(2, 200_000)];
        let selection = select(&available, &target(100_000, 100), &SelectionPolicy::LargestFirst).unwrap();
        assert!(selection.chosen.iter().all(|u| u.value() != 5_000));

        let only_dust = vec![utxo(1, 5_000)];
        assert!(select(&only_dust, &target(1_000, 100), &SelectionPolicy::LargestFirst).is_err());
    }

    #[test]
    fn test_randomized_with_seed_is_reproducible() {
        let available: Vec<WalletUtxo> = (1..=8).map(|n| utxo(n, 10_000 * n as u64)).collect();
        let policy = SelectionPolicy::Randomized { seed: Some(7) };
        let a = select(&available, &target(50_000, 1), &policy).unwrap();

        let mut reversed = available.clone();
        reversed.reverse();
        let b = select(&reversed, &target(50_000, 1), &policy).unwrap();

        assert_eq!(a, b);
        assert!(balanced(&a, 50_000));
    }

    struct SmallestFirst;

    impl SelectionStrategy for SmallestFirst {
        fn order(&self, candidates: &mut [WalletUtxo]) {
            candidates.sort_by_key(|c| c.value());
        }
    }

    #[test]
    fn test_custom_strategy() {
        let available = vec![utxo(1, 90_000), utxo(2, 20_000), utxo(3, 30_000)];
        let selection = select(&available, &target(40_000, 1), &SmallestFirst).unwrap();
        let values: Vec<u64> = selection.chosen.iter().map(|u| u.value()).collect();
        assert_eq!(values, vec![20_000, 30_000]);
        assert!(balanced(&selection, 40_000));
    }

    #[test]
    fn test_policy_json() {
        let policy: SelectionPolicy =
            serde_json::from_str(r#"{"policy":"randomized","seed":3}"#).unwrap();
        assert_eq!(policy, SelectionPolicy::Randomized { seed: Some(3) });
        let default: SelectionPolicy = serde_json::from_str(r#"{"policy":"largest-first"}"#).unwrap();
        assert_eq!(default, SelectionPolicy::LargestFirst);
    }
}
