//! Multi-signature key sets and accounts
//!
//! Provides M-of-N threshold configurations where M signatures from N
//! authorized keys are required to spend funds.
//!
//! # Example
//!
//! ```ignore
//! use btc_cosigner::multisig::{order_hex_keys, MultisigConfig};
//! use btc_cosigner::core::{Network, ScriptVariant};
//!
//! // Any co-signer, given the keys in any order, gets the same address
//! let keys = order_hex_keys(&[key_a, key_b, key_c])?;
//! let config = MultisigConfig::new(2, &keys, ScriptVariant::NativeSegwit, None)?;
//! let address = config.address(Network::Testnet)?;
//! ```

pub mod account;
pub mod config;
pub mod ordering;

pub use account::{multisig_account_path, Cosigner, MultisigAccount};
pub use config::{MultisigConfig, MultisigError, MAX_MULTISIG_KEYS, MIN_MULTISIG_KEYS};
pub use ordering::{order_hex_keys, order_keys};
