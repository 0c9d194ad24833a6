//! ECDSA key management
//!
//! Provides public key parsing with strict encoding checks, key pairs,
//! WIF import/export and sighash signing/verification on secp256k1.

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::encoding::{base58check_decode, base58check_encode, Base58Error};
use super::hash::hash160;
use crate::core::Network;

/// Errors that can occur during key operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid key encoding: {0}")]
    InvalidKeyEncoding(String),
    #[error("Invalid signature encoding")]
    InvalidSignature,
    #[error("Unknown WIF prefix: 0x{0:02x}")]
    UnknownWifPrefix(u8),
    #[error("Base58 error: {0}")]
    Base58(#[from] Base58Error),
    #[error("Secp256k1 error: {0}")]
    Secp256k1(#[from] secp256k1::Error),
}

// =============================================================================
// Public keys
// =============================================================================

/// A secp256k1 public key that remembers the encoding it was supplied in.
///
/// Ordering, equality and hashing all operate on the raw serialized bytes,
/// which is what canonical multisig key ordering sorts on.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PubKey {
    key: PublicKey,
    compressed: bool,
}

impl PubKey {
    /// Wrap a key in compressed form
    pub fn compressed(key: PublicKey) -> Self {
        Self {
            key,
            compressed: true,
        }
    }

    /// Parse a serialized key.
    ///
    /// Only 33-byte keys with prefix 0x02/0x03 and 65-byte keys with prefix
    /// 0x04 are accepted; hybrid encodings and off-curve points are rejected.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let compressed = match (bytes.len(), bytes.first()) {
            (33, Some(0x02)) | (33, Some(0x03)) => true,
            (65, Some(0x04)) => false,
            (len, prefix) => {
                return Err(KeyError::InvalidKeyEncoding(format!(
                    "{} bytes with prefix {:02x?}",
                    len, prefix
                )))
            }
        };

        let key = PublicKey::from_slice(bytes)
            .map_err(|_| KeyError::InvalidKeyEncoding("point not on curve".to_string()))?;

        Ok(Self { key, compressed })
    }

    /// Parse a hex-encoded key
    pub fn from_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|_| KeyError::InvalidKeyEncoding(format!("not hex: {}", hex_key)))?;
        Self::from_slice(&bytes)
    }

    /// Serialized bytes in the original encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.compressed {
            self.key.serialize().to_vec()
        } else {
            self.key.serialize_uncompressed().to_vec()
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Underlying secp256k1 point
    pub fn inner(&self) -> &PublicKey {
        &self.key
    }

    /// HASH160 of the serialized key
    pub fn hash160(&self) -> [u8; 20] {
        hash160(&self.to_bytes())
    }

    /// Verify a DER signature over a 32-byte digest
    pub fn verify_digest(&self, digest: &[u8; 32], der_signature: &[u8]) -> Result<bool, KeyError> {
        let secp = Secp256k1::verification_only();
        let message = Message::from_digest_slice(digest)?;
        let signature =
            Signature::from_der(der_signature).map_err(|_| KeyError::InvalidSignature)?;

        Ok(secp.verify_ecdsa(&message, &signature, &self.key).is_ok())
    }
}

impl Ord for PubKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_bytes().cmp(&other.to_bytes())
    }
}

impl PartialOrd for PubKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({})", self.to_hex())
    }
}

impl FromStr for PubKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for PubKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PubKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PubKey::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Key pairs
// =============================================================================

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PubKey,
}

impl KeyPair {
    /// Create a key pair from an existing secret key (compressed public key)
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::signing_only();
        let public_key = PubKey::compressed(PublicKey::from_secret_key(&secp, &secret_key));
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from 32 raw secret bytes
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPrivateKey)?;
        Self::from_secret_bytes(&bytes)
    }

    /// Import a WIF-encoded private key, returning the network it was encoded for
    pub fn from_wif(wif: &str) -> Result<(Self, Network), KeyError> {
        let payload = base58check_decode(wif)?;

        let network = match payload.first() {
            Some(0x80) => Network::Mainnet,
            Some(0xef) => Network::Testnet,
            Some(other) => return Err(KeyError::UnknownWifPrefix(*other)),
            None => return Err(KeyError::InvalidPrivateKey),
        };

        let compressed = match payload.len() {
            33 => false,
            34 if payload[33] == 0x01 => true,
            _ => return Err(KeyError::InvalidPrivateKey),
        };

        let secret_key =
            SecretKey::from_slice(&payload[1..33]).map_err(|_| KeyError::InvalidPrivateKey)?;
        let mut pair = Self::from_secret_key(secret_key);
        pair.public_key.compressed = compressed;

        Ok((pair, network))
    }

    /// Export as WIF for the given network
    pub fn to_wif(&self, network: Network) -> String {
        let mut payload = Vec::with_capacity(34);
        payload.push(network.wif_prefix());
        payload.extend_from_slice(&self.secret_key.secret_bytes());
        if self.public_key.is_compressed() {
            payload.push(0x01);
        }
        base58check_encode(&payload)
    }

    /// Get the public key as a hex string
    pub fn public_key_hex(&self) -> String {
        self.public_key.to_hex()
    }

    /// Sign a 32-byte digest (RFC6979 nonce, low-S), returning DER bytes
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<Vec<u8>, KeyError> {
        let secp = Secp256k1::signing_only();
        let message = Message::from_digest_slice(digest)?;
        let signature = secp.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_der().to_vec())
    }

    /// Verify a DER signature against this key pair's public key
    pub fn verify_digest(&self, digest: &[u8; 32], der_signature: &[u8]) -> Result<bool, KeyError> {
        self.public_key.verify_digest(digest, der_signature)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256;

    const GENERATOR: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    fn secret_one() -> KeyPair {
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        KeyPair::from_secret_bytes(&bytes).unwrap()
    }

    #[test]
    fn test_secret_one_is_generator() {
        assert_eq!(secret_one().public_key_hex(), GENERATOR);
    }

    #[test]
    fn test_encoding_validation() {
        assert!(PubKey::from_hex(GENERATOR).is_ok());

        // Wrong prefix for a 33-byte key
        let bad_prefix = format!("04{}", &GENERATOR[2..]);
        assert!(matches!(
            PubKey::from_hex(&bad_prefix),
            Err(KeyError::InvalidKeyEncoding(_))
        ));

        // Truncated
        assert!(matches!(
            PubKey::from_hex(&GENERATOR[..64]),
            Err(KeyError::InvalidKeyEncoding(_))
        ));

        // Not hex
        assert!(PubKey::from_hex("zz").is_err());
    }

    #[test]
    fn test_uncompressed_roundtrip() {
        let pair = secret_one();
        let uncompressed = pair.public_key.inner().serialize_uncompressed();
        let parsed = PubKey::from_slice(&uncompressed).unwrap();
        assert!(!parsed.is_compressed());
        assert_eq!(parsed.to_bytes(), uncompressed.to_vec());
        assert_ne!(parsed, pair.public_key);
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let a = PubKey::from_hex(GENERATOR).unwrap();
        let uncompressed = PubKey::from_slice(&a.inner().serialize_uncompressed()).unwrap();
        // 0x02.. sorts before 0x04..
        assert!(a < uncompressed);
    }

    #[test]
    fn test_sign_and_verify() {
        let pair = secret_one();
        let digest = sha256(b"Hello, bitcoin!");

        let signature = pair.sign_digest(&digest).unwrap();
        assert!(pair.verify_digest(&digest, &signature).unwrap());

        let other = sha256(b"something else");
        assert!(!pair.verify_digest(&other, &signature).unwrap());
    }

    #[test]
    fn test_signing_is_deterministic() {
        let pair = secret_one();
        let digest = sha256(b"same message");
        assert_eq!(
            pair.sign_digest(&digest).unwrap(),
            pair.sign_digest(&digest).unwrap()
        );
    }

    #[test]
    fn test_wif_roundtrip() {
        let pair = secret_one();
        let wif = pair.to_wif(Network::Mainnet);
        assert_eq!(wif, "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn");

        let (imported, network) = KeyPair::from_wif(&wif).unwrap();
        assert_eq!(network, Network::Mainnet);
        assert_eq!(imported.public_key, pair.public_key);

        let testnet = pair.to_wif(Network::Testnet);
        let (_, network) = KeyPair::from_wif(&testnet).unwrap();
        assert_eq!(network, Network::Testnet);
    }

    #[test]
    fn test_serde_hex() {
        let key = PubKey::from_hex(GENERATOR).unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", GENERATOR));
        let back: PubKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
