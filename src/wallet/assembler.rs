//! Unsigned transaction assembly
//!
//! Turns chosen inputs and outputs into an unsigned transaction skeleton
//! plus the per-input metadata (prevout, scripts, key origins) signers need.

use std::collections::HashSet;

use super::selection::Selection;
use super::WalletError;
use crate::core::fee::{dust_threshold, estimate_vsize};
use crate::core::{
    Address, FeeRate, InputKind, SpendInfo, Transaction, TxIn, TxOut, Txid, WalletUtxo,
    DUST_RELAY_FEE, SEQUENCE_FINAL, SEQUENCE_RBF_ENABLED,
};

/// Change output paying back to the wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeOutput {
    pub address: Address,
    pub value: u64,
    /// Origins and scripts so co-signers can recognize the change
    pub spend: Option<SpendInfo>,
}

/// Unsigned transaction and the metadata needed to sign it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub tx: Transaction,
    /// Spent outputs, in input order
    pub inputs: Vec<WalletUtxo>,
    /// Per-output wallet metadata (set for change)
    pub output_spend: Vec<Option<SpendInfo>>,
    pub fee: u64,
    pub change_index: Option<usize>,
}

impl UnsignedTransaction {
    pub fn txid(&self) -> Txid {
        self.tx.txid()
    }

    /// Sums saturate; `build` rejects sets that would overflow
    pub fn total_input(&self) -> u64 {
        self.inputs
            .iter()
            .fold(0u64, |total, u| total.saturating_add(u.value()))
    }

    pub fn total_output(&self) -> u64 {
        self.tx
            .outputs
            .iter()
            .fold(0u64, |total, o| total.saturating_add(o.value))
    }

    /// Estimated size once every input is signed
    pub fn estimated_vsize(&self) -> usize {
        let kinds: Vec<InputKind> = self.inputs.iter().map(|u| u.kind()).collect();
        let lens: Vec<usize> = self
            .tx
            .outputs
            .iter()
            .map(|o| o.script_pubkey.len())
            .collect();
        estimate_vsize(&kinds, &lens)
    }

    /// Fee rate the signed transaction will pay
    pub fn fee_rate(&self) -> FeeRate {
        FeeRate::from_fee_and_vsize(self.fee, self.estimated_vsize())
    }
}

/// Builds unsigned transactions
#[derive(Debug, Clone)]
pub struct TransactionAssembler {
    /// Dust relay fee in sat/kvB
    pub dust_relay_fee: u64,
    /// Signal BIP125 replaceability on every input
    pub rbf: bool,
    pub lock_time: u32,
}

impl Default for TransactionAssembler {
    fn default() -> Self {
        Self {
            dust_relay_fee: DUST_RELAY_FEE,
            rbf: true,
            lock_time: 0,
        }
    }
}

impl TransactionAssembler {
    pub fn new(dust_relay_fee: u64, rbf: bool) -> Self {
        Self {
            dust_relay_fee,
            rbf,
            lock_time: 0,
        }
    }

    pub fn with_lock_time(mut self, lock_time: u32) -> Self {
        self.lock_time = lock_time;
        self
    }

    /// Assemble `inputs` paying `outputs` (+ optional change) with an explicit `fee`.
    ///
    /// Rejects duplicate inputs, dust outputs and any transaction where
    /// inputs != outputs + fee.
    pub fn build(
        &self,
        inputs: &[WalletUtxo],
        outputs: &[TxOut],
        change: Option<ChangeOutput>,
        fee: u64,
    ) -> Result<UnsignedTransaction, WalletError> {
        if inputs.is_empty() {
            return Err(WalletError::NoInputs);
        }
        if outputs.is_empty() && change.is_none() {
            return Err(WalletError::NoOutputs);
        }

        let mut seen = HashSet::new();
        for input in inputs {
            if !seen.insert(input.outpoint()) {
                return Err(WalletError::DuplicateInput(input.outpoint()));
            }
        }

        let mut tx_outputs: Vec<TxOut> = outputs.to_vec();
        let mut output_spend: Vec<Option<SpendInfo>> = vec![None; outputs.len()];
        let mut change_index = None;
        if let Some(change) = change {
            change_index = Some(tx_outputs.len());
            tx_outputs.push(TxOut::new(change.value, change.address.script_pubkey));
            output_spend.push(change.spend);
        }

        for (index, output) in tx_outputs.iter().enumerate() {
            let threshold = dust_threshold(&output.script_pubkey, self.dust_relay_fee);
            if output.value < threshold {
                return Err(WalletError::DustOutput {
                    index,
                    value: output.value,
                    threshold,
                });
            }
        }

        let total_in = checked_sum(inputs.iter().map(|u| u.value()));
        let total_out = checked_sum(tx_outputs.iter().map(|o| o.value));
        let balanced = match (total_in, total_out) {
            (Some(i), Some(o)) => o.checked_add(fee) == Some(i),
            _ => false,
        };
        if !balanced {
            return Err(WalletError::Unbalanced {
                inputs: total_in.unwrap_or(u64::MAX),
                outputs: total_out.unwrap_or(u64::MAX),
                fee,
            });
        }

        let sequence = if self.rbf {
            SEQUENCE_RBF_ENABLED
        } else {
            SEQUENCE_FINAL
        };
        let tx_inputs = inputs
            .iter()
            .map(|u| TxIn::new(u.outpoint(), sequence))
            .collect();

        let mut tx = Transaction::new(tx_inputs, tx_outputs);
        tx.lock_time = self.lock_time;

        let unsigned = UnsignedTransaction {
            tx,
            inputs: inputs.to_vec(),
            output_spend,
            fee,
            change_index,
        };
        log::info!(
            "Assembled transaction {} ({} inputs, {} outputs, fee {} sat)",
            unsigned.txid(),
            unsigned.inputs.len(),
            unsigned.tx.outputs.len(),
            fee
        );
        Ok(unsigned)
    }

    /// Assemble from a selection, sending any change to `change_address`
    pub fn from_selection(
        &self,
        selection: Selection,
        outputs: &[TxOut],
        change_address: &Address,
        change_spend: Option<SpendInfo>,
    ) -> Result<UnsignedTransaction, WalletError> {
        let change = selection.change.map(|value| ChangeOutput {
            address: change_address.clone(),
            value,
            spend: change_spend,
        });
        self.build(&selection.chosen, outputs, change, selection.fee)
    }
}

fn checked_sum(values: impl Iterator<Item = u64>) -> Option<u64> {
    values.fold(Some(0u64), |acc, v| acc.and_then(|a| a.checked_add(v)))
}
