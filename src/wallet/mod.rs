//! Wallet layer: accounts, UTXO selection, transaction assembly and the
//! session that ties them to a key store and a blockchain-data provider.

pub mod account;
pub mod assembler;
pub mod selection;
pub mod session;
pub mod spend;

use thiserror::Error;

use crate::core::{AddressError, OutPoint, TransactionError};
use crate::crypto::{DerivationError, KeyError, MnemonicError};
use crate::multisig::MultisigError;
use crate::psbt::PsbtError;

pub use account::{single_sig_account_path, Account, AccountKind, SingleSigAccount};
pub use assembler::{ChangeOutput, TransactionAssembler, UnsignedTransaction};
pub use selection::{select, Selection, SelectionPolicy, SelectionStrategy, SelectionTarget};
pub use session::{KeyStore, MnemonicKeyStore, Session};
pub use spend::{BlockchainData, Recipient, SpendBuilder};

/// Wallet-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("Insufficient funds: have {available}, need {required}")]
    InsufficientFunds { available: u64, required: u64 },
    #[error("Transaction has no inputs")]
    NoInputs,
    #[error("Transaction has no outputs")]
    NoOutputs,
    #[error("Payment amounts overflow")]
    AmountOverflow,
    #[error("Input {0} is spent twice")]
    DuplicateInput(OutPoint),
    #[error("Output {index} value {value} is below the dust limit {threshold}")]
    DustOutput {
        index: usize,
        value: u64,
        threshold: u64,
    },
    #[error("Unbalanced transaction: inputs {inputs} != outputs {outputs} + fee {fee}")]
    Unbalanced { inputs: u64, outputs: u64, fee: u64 },
    #[error("Key store is locked")]
    Locked,
    #[error("Blockchain data error: {0}")]
    Chain(String),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Derivation error: {0}")]
    Derivation(#[from] DerivationError),
    #[error("Mnemonic error: {0}")]
    Mnemonic(#[from] MnemonicError),
    #[error("Address error: {0}")]
    Address(#[from] AddressError),
    #[error("Multisig error: {0}")]
    Multisig(#[from] MultisigError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("PSBT error: {0}")]
    Psbt(#[from] PsbtError),
}
