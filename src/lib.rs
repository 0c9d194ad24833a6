//! btc-cosigner: HD key derivation and M-of-N multisig co-signing for Bitcoin
//!
//! This crate provides:
//! - BIP32 key derivation from BIP39 seeds, with key origins
//! - BIP67 canonical key ordering for multisig key sets
//! - Legacy, wrapped-segwit and native-segwit address construction
//! - UTXO selection with swappable policies and fee/dust accounting
//! - Unsigned transaction assembly with per-input signing metadata
//! - BIP174 PSBT signing, merging, threshold tracking and finalization
//! - Chunked transport of PSBTs for air-gapped co-signers
//!
//! # Example
//!
//! ```rust
//! use btc_cosigner::core::{Network, ScriptVariant};
//! use btc_cosigner::crypto::KeyPair;
//! use btc_cosigner::multisig::MultisigConfig;
//!
//! let keys: Vec<_> = (1u8..=3)
//!     .map(|n| KeyPair::from_secret_bytes(&[n; 32]).unwrap().public_key)
//!     .collect();
//!
//! // Key order does not matter; every co-signer gets the same address
//! let config = MultisigConfig::new(2, &keys, ScriptVariant::NativeSegwit, None).unwrap();
//! let address = config.address(Network::Testnet).unwrap();
//! assert!(address.encoded.starts_with("tb1q"));
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod multisig;
pub mod psbt;
pub mod transport;
pub mod wallet;

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig};
pub use core::{
    build_multisig, build_single_sig, parse_address, Address, FeeRate, Network, ScriptVariant,
    Transaction, Txid, Utxo,
};
pub use crypto::{DerivationPath, ExtendedKey, KeyPair, PubKey};
pub use error::{Error, ErrorKind, Result};
pub use multisig::{order_keys, Cosigner, MultisigAccount, MultisigConfig};
pub use psbt::{finalize, merge, sign, Psbt, SigningState};
pub use transport::{reassemble, split, Chunk, ChunkCollector};
pub use wallet::{
    select, BlockchainData, KeyStore, MnemonicKeyStore, SelectionPolicy, Session,
    TransactionAssembler,
};
