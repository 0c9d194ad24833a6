//! Bitcoin transactions
//!
//! Wire encoding (with and without segwit witness data), transaction ids,
//! weight, and the two signature hash algorithms the wallet signs with:
//! - legacy (pre-segwit) sighash for P2PKH / P2SH inputs
//! - BIP143 sighash for P2WPKH / P2WSH inputs and their P2SH-wrapped forms
//!
//! Locktime and sequence handling follows BIP65/BIP125.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::encode::{compact_size_len, write_compact_size, write_var_bytes, DecodeError, Reader};
use super::script::{Script, SigHashType};
use crate::crypto::double_sha256;

// =============================================================================
// Constants
// =============================================================================

/// Transaction version the wallet creates
pub const TX_VERSION: i32 = 2;

/// Sequence number that disables locktime
pub const SEQUENCE_FINAL: u32 = 0xFFFFFFFF;

/// Sequence that enables locktime but not replacement
/// Any sequence < SEQUENCE_RBF_MAX signals RBF (BIP-125)
pub const SEQUENCE_RBF_MAX: u32 = 0xFFFFFFFE;

/// Sequence the wallet uses to signal RBF
pub const SEQUENCE_RBF_ENABLED: u32 = 0xFFFFFFFD;

/// Witness scale factor between weight units and virtual bytes
pub const WITNESS_SCALE_FACTOR: usize = 4;

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Input index {index} out of range ({count} inputs)")]
    InputIndexOutOfRange { index: usize, count: usize },
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Invalid txid: {0}")]
    InvalidTxid(String),
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

// =============================================================================
// Txid / OutPoint
// =============================================================================

/// Transaction id in internal byte order; displayed byte-reversed
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Txid(pub [u8; 32]);

impl Txid {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

impl fmt::Debug for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txid({})", self)
    }
}

impl FromStr for Txid {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| TransactionError::InvalidTxid(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(TransactionError::InvalidTxid(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        out.reverse();
        Ok(Self(out))
    }
}

impl Serialize for Txid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Txid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Reference to a previous transaction output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Txid,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Txid, vout: u32) -> Self {
        Self { txid, vout }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.txid.0);
        out.extend_from_slice(&self.vout.to_le_bytes());
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

// =============================================================================
// Inputs and Outputs
// =============================================================================

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: Script,
    /// Sequence number for RBF and locktime
    /// - SEQUENCE_FINAL (0xFFFFFFFF): disables locktime for this input
    /// - < SEQUENCE_RBF_MAX (0xFFFFFFFE): signals RBF is enabled
    pub sequence: u32,
    pub witness: Vec<Vec<u8>>,
}

impl TxIn {
    /// Unsigned input spending `previous_output`
    pub fn new(previous_output: OutPoint, sequence: u32) -> Self {
        Self {
            previous_output,
            script_sig: Script::new(),
            sequence,
            witness: Vec::new(),
        }
    }

    /// Check if this input signals RBF
    pub fn signals_rbf(&self) -> bool {
        self.sequence < SEQUENCE_RBF_MAX
    }
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Amount in satoshis
    pub value: u64,
    pub script_pubkey: Script,
}

impl TxOut {
    pub fn new(value: u64, script_pubkey: Script) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.value.to_le_bytes());
        write_var_bytes(out, self.script_pubkey.as_bytes());
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9 + self.script_pubkey.len());
        self.encode_into(&mut out);
        out
    }

    pub fn decode_from(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let value = reader.read_u64_le()?;
        let script_pubkey = Script::from_bytes(reader.read_var_bytes()?.to_vec());
        Ok(Self {
            value,
            script_pubkey,
        })
    }

    /// Serialized size in bytes
    pub fn size(&self) -> usize {
        8 + compact_size_len(self.script_pubkey.len() as u64) + self.script_pubkey.len()
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A Bitcoin transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    /// Block height or timestamp before which the tx is invalid; 0 disables
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Self {
        Self {
            version: TX_VERSION,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    /// True if any input carries witness data
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|i| !i.witness.is_empty())
    }

    /// Copy with every scriptSig and witness removed
    pub fn unsigned_copy(&self) -> Self {
        let mut tx = self.clone();
        for input in &mut tx.inputs {
            input.script_sig = Script::new();
            input.witness.clear();
        }
        tx
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    /// Serialization without witness data (the txid preimage)
    pub fn serialize_no_witness(&self) -> Vec<u8> {
        self.encode(false)
    }

    /// Full serialization, segwit format if any witness is present
    pub fn serialize(&self) -> Vec<u8> {
        self.encode(self.has_witness())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.serialize())
    }

    fn encode(&self, with_witness: bool) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        if with_witness {
            out.extend_from_slice(&[0x00, 0x01]);
        }

        write_compact_size(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            input.previous_output.encode_into(&mut out);
            write_var_bytes(&mut out, input.script_sig.as_bytes());
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }

        write_compact_size(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            output.encode_into(&mut out);
        }

        if with_witness {
            for input in &self.inputs {
                write_compact_size(&mut out, input.witness.len() as u64);
                for item in &input.witness {
                    write_var_bytes(&mut out, item);
                }
            }
        }

        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }

    /// Parse a transaction in either legacy or segwit format
    pub fn deserialize(bytes: &[u8]) -> Result<Self, TransactionError> {
        let mut reader = Reader::new(bytes);
        let version = reader.read_i32_le()?;

        let mut segwit = false;
        if reader.peek() == Some(0x00) {
            reader.read_u8()?;
            if reader.read_u8()? != 0x01 {
                return Err(TransactionError::InvalidTransaction(
                    "bad segwit flag".to_string(),
                ));
            }
            segwit = true;
        }

        let input_count = reader.read_compact_size()?;
        let mut inputs = Vec::new();
        for _ in 0..input_count {
            let txid = Txid(reader.read_array()?);
            let vout = reader.read_u32_le()?;
            let script_sig = Script::from_bytes(reader.read_var_bytes()?.to_vec());
            let sequence = reader.read_u32_le()?;
            inputs.push(TxIn {
                previous_output: OutPoint::new(txid, vout),
                script_sig,
                sequence,
                witness: Vec::new(),
            });
        }

        let output_count = reader.read_compact_size()?;
        let mut outputs = Vec::new();
        for _ in 0..output_count {
            outputs.push(TxOut::decode_from(&mut reader)?);
        }

        if segwit {
            for input in &mut inputs {
                let items = reader.read_compact_size()?;
                for _ in 0..items {
                    input.witness.push(reader.read_var_bytes()?.to_vec());
                }
            }
        }

        let lock_time = reader.read_u32_le()?;
        reader.finish()?;

        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }

    pub fn from_hex(hex_tx: &str) -> Result<Self, TransactionError> {
        let bytes = hex::decode(hex_tx.trim())
            .map_err(|e| TransactionError::InvalidTransaction(e.to_string()))?;
        Self::deserialize(&bytes)
    }

    /// Transaction id (double SHA-256 of the non-witness serialization)
    pub fn txid(&self) -> Txid {
        Txid(double_sha256(&self.serialize_no_witness()))
    }

    /// Witness transaction id
    pub fn wtxid(&self) -> Txid {
        Txid(double_sha256(&self.serialize()))
    }

    /// Weight units: base size * 3 + total size
    pub fn weight(&self) -> usize {
        self.serialize_no_witness().len() * (WITNESS_SCALE_FACTOR - 1) + self.serialize().len()
    }

    /// Virtual size in vbytes (weight / 4, rounded up)
    pub fn vsize(&self) -> usize {
        (self.weight() + WITNESS_SCALE_FACTOR - 1) / WITNESS_SCALE_FACTOR
    }

    /// Sum of output values; `None` on overflow
    pub fn checked_total_output(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |total, o| total.checked_add(o.value))
    }

    // =========================================================================
    // Locktime & Replace-By-Fee
    // =========================================================================

    /// Check if this transaction signals RBF (at least one input has sequence < 0xFFFFFFFE)
    pub fn signals_rbf(&self) -> bool {
        self.inputs.iter().any(|i| i.signals_rbf())
    }

    // =========================================================================
    // Signature hashes
    // =========================================================================

    fn check_index(&self, index: usize) -> Result<(), TransactionError> {
        if index >= self.inputs.len() {
            return Err(TransactionError::InputIndexOutOfRange {
                index,
                count: self.inputs.len(),
            });
        }
        Ok(())
    }

    /// Pre-segwit signature hash of input `index` against `script_code`
    pub fn legacy_sighash(
        &self,
        index: usize,
        script_code: &Script,
        sighash: SigHashType,
    ) -> Result<[u8; 32], TransactionError> {
        self.check_index(index)?;

        let base = sighash.base_type();
        if base == SigHashType::Single && index >= self.outputs.len() {
            // Historical quirk: signs the value 1
            let mut one = [0u8; 32];
            one[0] = 1;
            return Ok(one);
        }

        let mut tx = self.unsigned_copy();
        tx.inputs[index].script_sig = script_code.clone();

        match base {
            SigHashType::None => {
                tx.outputs.clear();
                zero_other_sequences(&mut tx, index);
            }
            SigHashType::Single => {
                tx.outputs.truncate(index + 1);
                for output in tx.outputs.iter_mut().take(index) {
                    *output = TxOut::new(u64::MAX, Script::new());
                }
                zero_other_sequences(&mut tx, index);
            }
            _ => {}
        }

        if sighash.is_anyone_can_pay() {
            tx.inputs = vec![tx.inputs[index].clone()];
        }

        let mut preimage = tx.serialize_no_witness();
        preimage.extend_from_slice(&sighash.to_u32().to_le_bytes());
        Ok(double_sha256(&preimage))
    }

    /// BIP143 signature hash of input `index` spending `value` with `script_code`
    pub fn segwit_sighash(
        &self,
        index: usize,
        script_code: &Script,
        value: u64,
        sighash: SigHashType,
    ) -> Result<[u8; 32], TransactionError> {
        self.check_index(index)?;

        let base = sighash.base_type();
        let anyone_can_pay = sighash.is_anyone_can_pay();
        let zero = [0u8; 32];

        let hash_prevouts = if anyone_can_pay {
            zero
        } else {
            let mut data = Vec::with_capacity(36 * self.inputs.len());
            for input in &self.inputs {
                input.previous_output.encode_into(&mut data);
            }
            double_sha256(&data)
        };

        let hash_sequence = if anyone_can_pay || base != SigHashType::All {
            zero
        } else {
            let data: Vec<u8> = self
                .inputs
                .iter()
                .flat_map(|i| i.sequence.to_le_bytes())
                .collect();
            double_sha256(&data)
        };

        let hash_outputs = match base {
            SigHashType::All => {
                let mut data = Vec::new();
                for output in &self.outputs {
                    output.encode_into(&mut data);
                }
                double_sha256(&data)
            }
            SigHashType::Single if index < self.outputs.len() => {
                double_sha256(&self.outputs[index].encode())
            }
            _ => zero,
        };

        let input = &self.inputs[index];
        let mut preimage = Vec::with_capacity(160 + script_code.len());
        preimage.extend_from_slice(&self.version.to_le_bytes());
        preimage.extend_from_slice(&hash_prevouts);
        preimage.extend_from_slice(&hash_sequence);
        input.previous_output.encode_into(&mut preimage);
        write_var_bytes(&mut preimage, script_code.as_bytes());
        preimage.extend_from_slice(&value.to_le_bytes());
        preimage.extend_from_slice(&input.sequence.to_le_bytes());
        preimage.extend_from_slice(&hash_outputs);
        preimage.extend_from_slice(&self.lock_time.to_le_bytes());
        preimage.extend_from_slice(&sighash.to_u32().to_le_bytes());

        Ok(double_sha256(&preimage))
    }
}

fn zero_other_sequences(tx: &mut Transaction, index: usize) {
    for (i, input) in tx.inputs.iter_mut().enumerate() {
        if i != index {
            input.sequence = 0;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
