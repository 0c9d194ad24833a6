//! Partially signed transactions (BIP174)
//!
//! A [`Psbt`] carries an unsigned transaction together with everything a
//! co-signer needs to sign it offline: the outputs being spent, the redeem
//! and witness scripts, BIP32 key origins, and the partial signatures
//! collected so far.
//!
//! Lifecycle: `Unsigned -> PartiallySigned -> ThresholdReached -> Finalized`.
//! Signing and merging only ever add signatures; finalization is terminal.

pub mod artifact;
pub mod codec;
pub mod coordinator;

use thiserror::Error;

use crate::core::{DecodeError, ScriptError, TransactionError, Txid};
use crate::crypto::{DerivationError, KeyError};

pub use artifact::{Psbt, PsbtInput, PsbtOutput, SigningState, PSBT_VERSION};
pub use coordinator::{
    count_signatures, finalize, finalize_psbt, has_threshold, inspect, merge, merge_all,
    required_signatures, sign, sign_input, sign_with_xprv, InputSummary, PsbtSummary,
};

/// PSBT errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PsbtError {
    #[error("Invalid PSBT magic bytes")]
    InvalidMagic,
    #[error("Missing unsigned transaction")]
    MissingUnsignedTx,
    #[error("Unsigned transaction must not carry scriptSigs or witnesses")]
    UnsignedTxHasSignatures,
    #[error("Duplicate key 0x{0} in PSBT map")]
    DuplicateKey(String),
    #[error("Malformed PSBT: {0}")]
    Malformed(String),
    #[error("Invalid base64: {0}")]
    Base64(String),
    #[error("Transaction mismatch: expected {expected}, found {found}")]
    TransactionMismatch { expected: Txid, found: Txid },
    #[error("Key {key} is not in the script of input {input}")]
    KeyNotInScript { key: String, input: usize },
    #[error("Input {input} has {found} of {required} required signatures")]
    InsufficientSignatures {
        input: usize,
        found: usize,
        required: usize,
    },
    #[error("Invalid signature from {key} on input {input}")]
    InvalidSignature { key: String, input: usize },
    #[error("Input {0} is missing the output it spends")]
    MissingUtxo(usize),
    #[error("Input {0} is missing its redeem or witness script")]
    MissingScript(usize),
    #[error("Input {0} script does not match the output it spends")]
    ScriptMismatch(usize),
    #[error("Input {0} uses an unsupported script")]
    UnsupportedScript(usize),
    #[error("Input index {index} out of range ({count} inputs)")]
    InputIndexOutOfRange { index: usize, count: usize },
    #[error("PSBT is already finalized")]
    AlreadyFinalized,
    #[error("PSBT is not finalized")]
    NotFinalized,
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Derivation error: {0}")]
    Derivation(#[from] DerivationError),
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),
}
