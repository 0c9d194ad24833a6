//! Cryptographic primitives for the wallet engine
//!
//! This module provides:
//! - SHA-256 / HASH160 / HMAC-SHA512 hashing
//! - Base58Check encoding
//! - ECDSA key management (secp256k1) and WIF
//! - BIP32 hierarchical derivation
//! - BIP39 mnemonics

pub mod bip32;
pub mod encoding;
pub mod hash;
pub mod keys;
pub mod mnemonic;

pub use bip32::{
    derive, ChildNumber, DerivationError, DerivationPath, ExtendedKey, KeyMaterial, KeySource,
    HARDENED_OFFSET,
};
pub use encoding::{base58check_decode, base58check_encode, Base58Error};
pub use hash::{double_sha256, hash160, hmac_sha512, sha256, sha256_hex};
pub use keys::{KeyError, KeyPair, PubKey};
pub use mnemonic::{
    generate_mnemonic, mnemonic_to_seed, parse_mnemonic, validate_mnemonic, MnemonicError, Seed,
};
