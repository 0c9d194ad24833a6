//! Core Bitcoin components
//!
//! This module contains the fundamental building blocks:
//! - Network parameters (prefixes, HRPs, coin types)
//! - Scripts and script variants
//! - Address building and parsing
//! - Wire transactions and signature hashes
//! - Fee rates, size estimation and dust limits
//! - Unspent outputs

pub mod address;
pub mod encode;
pub mod fee;
pub mod network;
pub mod script;
pub mod transaction;
pub mod utxo;

pub use address::{build_multisig, build_single_sig, encode_script, parse_address, Address, AddressError};
pub use encode::{DecodeError, Reader};
pub use fee::{
    dust_threshold, estimate_vsize, estimate_weight, is_dust, FeeRate, InputKind, Priority,
    DUST_RELAY_FEE,
};
pub use network::Network;
pub use script::{Script, ScriptError, ScriptType, ScriptVariant, SigHashType};
pub use transaction::{
    OutPoint, Transaction, TransactionError, TxIn, TxOut, Txid, SEQUENCE_FINAL,
    SEQUENCE_RBF_ENABLED, SEQUENCE_RBF_MAX, TX_VERSION,
};
pub use utxo::{SpendInfo, Utxo, WalletUtxo};
