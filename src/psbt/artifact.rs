//! The PSBT signing artifact
//!
//! Global, per-input and per-output maps. All keyed collections are
//! `BTreeMap`s so that serialization and merging are deterministic.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::{codec, coordinator, PsbtError};
use crate::core::{Script, SigHashType, Transaction, TxOut, Txid};
use crate::crypto::{ExtendedKey, KeySource, PubKey};
use crate::wallet::UnsignedTransaction;

/// Highest PSBT version this crate reads and writes
pub const PSBT_VERSION: u32 = 0;

/// Where an artifact is in its signing lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SigningState {
    /// No signatures yet
    Unsigned,
    /// Some signatures, but at least one input is below its threshold
    PartiallySigned,
    /// Every input has enough signatures to finalize
    ThresholdReached,
    /// Every input carries its final scriptSig / witness
    Finalized,
}

impl fmt::Display for SigningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SigningState::Unsigned => "unsigned",
            SigningState::PartiallySigned => "partially-signed",
            SigningState::ThresholdReached => "threshold-reached",
            SigningState::Finalized => "finalized",
        };
        write!(f, "{}", name)
    }
}

/// Per-input signing data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PsbtInput {
    /// Full previous transaction (legacy inputs)
    pub non_witness_utxo: Option<Transaction>,
    /// The output being spent
    pub witness_utxo: Option<TxOut>,
    /// DER signature plus sighash byte, keyed by signer
    pub partial_sigs: BTreeMap<PubKey, Vec<u8>>,
    pub sighash_type: Option<SigHashType>,
    pub redeem_script: Option<Script>,
    pub witness_script: Option<Script>,
    pub bip32_derivation: BTreeMap<PubKey, KeySource>,
    pub final_script_sig: Option<Script>,
    pub final_script_witness: Option<Vec<Vec<u8>>>,
    /// Unrecognized entries, kept verbatim
    pub unknown: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl PsbtInput {
    pub fn is_finalized(&self) -> bool {
        self.final_script_sig.is_some() || self.final_script_witness.is_some()
    }

    /// Sighash type signatures on this input commit to
    pub fn sighash(&self) -> SigHashType {
        self.sighash_type.unwrap_or_default()
    }
}

/// Per-output data, used by signers to recognize change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PsbtOutput {
    pub redeem_script: Option<Script>,
    pub witness_script: Option<Script>,
    pub bip32_derivation: BTreeMap<PubKey, KeySource>,
    pub unknown: BTreeMap<Vec<u8>, Vec<u8>>,
}

/// A partially signed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Psbt {
    pub unsigned_tx: Transaction,
    pub version: u32,
    /// Serialized (78-byte) account xpubs and their origins
    pub xpubs: BTreeMap<Vec<u8>, KeySource>,
    pub unknown: BTreeMap<Vec<u8>, Vec<u8>>,
    pub inputs: Vec<PsbtInput>,
    pub outputs: Vec<PsbtOutput>,
}

impl Psbt {
    /// Empty artifact around a transaction with no scriptSigs or witnesses
    pub fn from_unsigned_tx(tx: Transaction) -> Result<Self, PsbtError> {
        if tx.inputs.iter().any(|i| !i.script_sig.is_empty() || !i.witness.is_empty()) {
            return Err(PsbtError::UnsignedTxHasSignatures);
        }
        Ok(Self {
            inputs: vec![PsbtInput::default(); tx.inputs.len()],
            outputs: vec![PsbtOutput::default(); tx.outputs.len()],
            unsigned_tx: tx,
            version: PSBT_VERSION,
            xpubs: BTreeMap::new(),
            unknown: BTreeMap::new(),
        })
    }

    /// Artifact carrying the prevouts, scripts and key origins of an
    /// assembled transaction
    pub fn from_unsigned(unsigned: &UnsignedTransaction) -> Result<Self, PsbtError> {
        let mut psbt = Self::from_unsigned_tx(unsigned.tx.clone())?;

        for (input, utxo) in psbt.inputs.iter_mut().zip(&unsigned.inputs) {
            input.witness_utxo = Some(utxo.utxo.txout());
            input.redeem_script = utxo.spend.redeem_script.clone();
            input.witness_script = utxo.spend.witness_script.clone();
            input.bip32_derivation = utxo.spend.key_origins.clone();
        }
        for (output, spend) in psbt.outputs.iter_mut().zip(&unsigned.output_spend) {
            if let Some(spend) = spend {
                output.redeem_script = spend.redeem_script.clone();
                output.witness_script = spend.witness_script.clone();
                output.bip32_derivation = spend.key_origins.clone();
            }
        }

        log::debug!(
            "Created PSBT for {} ({} inputs)",
            psbt.txid(),
            psbt.inputs.len()
        );
        Ok(psbt)
    }

    /// Record an account xpub in the global map
    pub fn add_xpub(&mut self, xpub: &ExtendedKey, origin: KeySource) {
        self.xpubs.insert(xpub.to_public().encode().to_vec(), origin);
    }

    pub fn txid(&self) -> Txid {
        self.unsigned_tx.txid()
    }

    /// The output spent by input `index`
    pub fn spent_output(&self, index: usize) -> Result<TxOut, PsbtError> {
        let input = self.input(index)?;
        if let Some(utxo) = &input.witness_utxo {
            return Ok(utxo.clone());
        }
        let prev = input
            .non_witness_utxo
            .as_ref()
            .ok_or(PsbtError::MissingUtxo(index))?;
        let outpoint = self
            .unsigned_tx
            .inputs
            .get(index)
            .ok_or(PsbtError::InputIndexOutOfRange {
                index,
                count: self.unsigned_tx.inputs.len(),
            })?
            .previous_output;
        if prev.txid() != outpoint.txid {
            return Err(PsbtError::TransactionMismatch {
                expected: outpoint.txid,
                found: prev.txid(),
            });
        }
        prev.outputs
            .get(outpoint.vout as usize)
            .cloned()
            .ok_or(PsbtError::MissingUtxo(index))
    }

    pub(crate) fn input(&self, index: usize) -> Result<&PsbtInput, PsbtError> {
        self.inputs.get(index).ok_or(PsbtError::InputIndexOutOfRange {
            index,
            count: self.inputs.len(),
        })
    }

    /// Inputs minus outputs
    pub fn fee(&self) -> Result<u64, PsbtError> {
        let mut total_in: u64 = 0;
        for index in 0..self.inputs.len() {
            total_in = total_in
                .checked_add(self.spent_output(index)?.value)
                .ok_or_else(|| PsbtError::Malformed("input value overflow".to_string()))?;
        }
        let total_out = self
            .unsigned_tx
            .checked_total_output()
            .ok_or_else(|| PsbtError::Malformed("output value overflow".to_string()))?;
        total_in
            .checked_sub(total_out)
            .ok_or_else(|| PsbtError::Malformed("outputs exceed inputs".to_string()))
    }

    pub fn is_finalized(&self) -> bool {
        !self.inputs.is_empty() && self.inputs.iter().all(|i| i.is_finalized())
    }

    pub fn state(&self) -> SigningState {
        if self.is_finalized() {
            return SigningState::Finalized;
        }
        if self.inputs.iter().all(|i| i.partial_sigs.is_empty()) {
            return SigningState::Unsigned;
        }
        if coordinator::has_threshold(self) {
            SigningState::ThresholdReached
        } else {
            SigningState::PartiallySigned
        }
    }

    /// Network-ready transaction from a finalized artifact
    pub fn extract_tx(&self) -> Result<Transaction, PsbtError> {
        if !self.is_finalized() {
            return Err(PsbtError::NotFinalized);
        }
        let mut tx = self.unsigned_tx.clone();
        for (txin, input) in tx.inputs.iter_mut().zip(&self.inputs) {
            txin.script_sig = input.final_script_sig.clone().unwrap_or_default();
            txin.witness = input.final_script_witness.clone().unwrap_or_default();
        }
        Ok(tx)
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    pub fn serialize(&self) -> Vec<u8> {
        codec::serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, PsbtError> {
        codec::deserialize(bytes)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.serialize())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, PsbtError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| PsbtError::Base64(e.to_string()))?;
        Self::deserialize(&bytes)
    }
}

impl fmt::Display for Psbt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl FromStr for Psbt {
    type Err = PsbtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OutPoint, TxIn};

    fn tx() -> Transaction {
        Transaction::new(
            vec![TxIn::new(OutPoint::new(Txid([1; 32]), 0), 0xffff_fffd)],
            vec![TxOut::new(40_000, Script::p2wpkh(&[2; 20]))],
        )
    }

    #[test]
    fn test_from_unsigned_tx_rejects_signed() {
        let mut signed = tx();
        signed.inputs[0].witness = vec![vec![1, 2, 3]];
        assert_eq!(
            Psbt::from_unsigned_tx(signed),
            Err(PsbtError::UnsignedTxHasSignatures)
        );
    }

    #[test]
    fn test_fee_and_state() {
        let mut psbt = Psbt::from_unsigned_tx(tx()).unwrap();
        assert_eq!(psbt.state(), SigningState::Unsigned);
        assert_eq!(psbt.fee(), Err(PsbtError::MissingUtxo(0)));

        psbt.inputs[0].witness_utxo = Some(TxOut::new(41_000, Script::p2wpkh(&[3; 20])));
        assert_eq!(psbt.fee(), Ok(1_000));
        assert_eq!(psbt.extract_tx(), Err(PsbtError::NotFinalized));
    }

    #[test]
    fn test_fee_with_overflowing_outputs() {
        let mut overflowing = tx();
        overflowing.outputs = vec![
            TxOut::new(u64::MAX, Script::p2wpkh(&[2; 20])),
            TxOut::new(1, Script::p2wpkh(&[2; 20])),
        ];
        let mut psbt = Psbt::from_unsigned_tx(overflowing).unwrap();
        psbt.inputs[0].witness_utxo = Some(TxOut::new(41_000, Script::p2wpkh(&[3; 20])));
        assert!(matches!(psbt.fee(), Err(PsbtError::Malformed(_))));
    }

    #[test]
    fn test_spent_output_with_missing_tx_input() {
        let mut psbt = Psbt::from_unsigned_tx(tx()).unwrap();
        let prev = Transaction::new(vec![], vec![TxOut::new(5_000, Script::p2wpkh(&[3; 20]))]);
        psbt.inputs[0].non_witness_utxo = Some(prev);
        psbt.unsigned_tx.inputs.clear();
        assert_eq!(
            psbt.spent_output(0),
            Err(PsbtError::InputIndexOutOfRange { index: 0, count: 0 })
        );
    }

    #[test]
    fn test_non_witness_utxo_txid_checked() {
        let mut psbt = Psbt::from_unsigned_tx(tx()).unwrap();
        let prev = Transaction::new(vec![], vec![TxOut::new(5, Script::new())]);
        psbt.inputs[0].non_witness_utxo = Some(prev);
        assert!(matches!(
            psbt.spent_output(0),
            Err(PsbtError::TransactionMismatch { .. })
        ));
    }
}
