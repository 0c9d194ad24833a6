//! BIP32 hierarchical deterministic key derivation
//!
//! Derivation is iterative per path segment. Each step is
//! HMAC-SHA512(chain_code, data || index), so the child key is a pure
//! function of (seed, path). Private keys can derive hardened and normal
//! children; public keys can only derive normal children.

use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::encoding::{base58check_decode, base58check_encode};
use super::hash::{hash160, hmac_sha512};
use super::keys::{KeyError, KeyPair, PubKey};
use crate::core::Network;

/// First hardened child index
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// Serialized extended key length (without checksum)
pub const EXTENDED_KEY_LEN: usize = 78;

/// Errors from key derivation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DerivationError {
    #[error("Invalid derivation path: {0}")]
    InvalidPath(String),
    #[error("Seed must be 16 to 64 bytes, got {0}")]
    InvalidSeed(usize),
    #[error("Derived key at index {0} is invalid")]
    InvalidChild(u32),
    #[error("Invalid extended key: {0}")]
    InvalidExtendedKey(String),
    #[error("Wrong network: expected {expected}, found {found}")]
    WrongNetwork { expected: Network, found: Network },
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

// =============================================================================
// Derivation paths
// =============================================================================

/// One segment of a derivation path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChildNumber {
    pub index: u32,
    pub hardened: bool,
}

impl ChildNumber {
    pub fn normal(index: u32) -> Result<Self, DerivationError> {
        Self::new(index, false)
    }

    pub fn hardened(index: u32) -> Result<Self, DerivationError> {
        Self::new(index, true)
    }

    fn new(index: u32, hardened: bool) -> Result<Self, DerivationError> {
        if index >= HARDENED_OFFSET {
            return Err(DerivationError::InvalidPath(format!(
                "index {} out of range",
                index
            )));
        }
        Ok(Self { index, hardened })
    }

    /// Index as serialized in BIP32 (with the hardened bit)
    pub fn to_u32(&self) -> u32 {
        if self.hardened {
            self.index | HARDENED_OFFSET
        } else {
            self.index
        }
    }

    pub fn from_u32(raw: u32) -> Self {
        Self {
            index: raw & !HARDENED_OFFSET,
            hardened: raw & HARDENED_OFFSET != 0,
        }
    }
}

impl fmt::Display for ChildNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hardened {
            write!(f, "{}'", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

impl FromStr for ChildNumber {
    type Err = DerivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (digits, hardened) = match s.strip_suffix(['\'', 'h', 'H']) {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        let index: u32 = digits
            .parse()
            .map_err(|_| DerivationError::InvalidPath(format!("bad segment '{}'", s)))?;
        Self::new(index, hardened)
    }
}

/// Ordered sequence of child numbers, e.g. `m/48'/1'/0'/2'`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DerivationPath(Vec<ChildNumber>);

impl DerivationPath {
    pub fn master() -> Self {
        Self(Vec::new())
    }

    pub fn segments(&self) -> &[ChildNumber] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// New path with one more segment
    pub fn child(&self, child: ChildNumber) -> Self {
        let mut segments = self.0.clone();
        segments.push(child);
        Self(segments)
    }

    /// New path with `other` appended
    pub fn extend(&self, other: &DerivationPath) -> Self {
        let mut segments = self.0.clone();
        segments.extend_from_slice(&other.0);
        Self(segments)
    }

    /// True if any segment is hardened
    pub fn has_hardened(&self) -> bool {
        self.0.iter().any(|c| c.hardened)
    }

    /// Non-hardened `change/index` suffix used for address derivation
    pub fn change_index(change: u32, index: u32) -> Result<Self, DerivationError> {
        Ok(Self(vec![
            ChildNumber::normal(change)?,
            ChildNumber::normal(index)?,
        ]))
    }
}

impl From<Vec<ChildNumber>> for DerivationPath {
    fn from(segments: Vec<ChildNumber>) -> Self {
        Self(segments)
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for child in &self.0 {
            write!(f, "/{}", child)?;
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = DerivationError;

    /// Parses `m/44'/0'/0'/0/1`; a bare relative path `0/1` is also accepted
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut parts = s.split('/').peekable();

        if matches!(parts.peek(), Some(&"m") | Some(&"M")) {
            parts.next();
        }

        let mut segments = Vec::new();
        for part in parts {
            if part.is_empty() {
                return Err(DerivationError::InvalidPath(format!("empty segment in '{}'", s)));
            }
            segments.push(part.parse()?);
        }

        Ok(Self(segments))
    }
}

impl serde::Serialize for DerivationPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for DerivationPath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Origin of a key: master fingerprint and the path from that master
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeySource {
    pub fingerprint: [u8; 4],
    pub path: DerivationPath,
}

impl KeySource {
    pub fn new(fingerprint: [u8; 4], path: DerivationPath) -> Self {
        Self { fingerprint, path }
    }

    /// Origin of a descendant `suffix` levels below this one
    pub fn extend(&self, suffix: &DerivationPath) -> Self {
        Self {
            fingerprint: self.fingerprint,
            path: self.path.extend(suffix),
        }
    }
}

impl fmt::Display for KeySource {
    /// `[d34db33f/48'/1'/0'/2']`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", hex::encode(self.fingerprint))?;
        for child in self.path.segments() {
            write!(f, "/{}", child)?;
        }
        f.write_str("]")
    }
}

impl FromStr for KeySource {
    type Err = DerivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .trim()
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| DerivationError::InvalidPath(format!("bad key origin '{}'", s)))?;
        let (fp_hex, path) = match inner.split_once('/') {
            Some((fp, path)) => (fp, path.parse()?),
            None => (inner, DerivationPath::master()),
        };
        let bytes = hex::decode(fp_hex)
            .ok()
            .filter(|b| b.len() == 4)
            .ok_or_else(|| DerivationError::InvalidPath(format!("bad fingerprint '{}'", fp_hex)))?;
        Ok(Self {
            fingerprint: [bytes[0], bytes[1], bytes[2], bytes[3]],
            path,
        })
    }
}

impl serde::Serialize for KeySource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for KeySource {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Extended keys
// =============================================================================

/// Private or public key material of an extended key
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum KeyMaterial {
    Private(SecretKey),
    Public(PublicKey),
}

/// A BIP32 extended key
#[derive(Clone, PartialEq, Eq)]
pub struct ExtendedKey {
    pub network: Network,
    pub depth: u8,
    pub parent_fingerprint: [u8; 4],
    pub child_number: ChildNumber,
    pub chain_code: [u8; 32],
    pub key: KeyMaterial,
    /// Path from the master key when known; relative to this key's origin
    /// for keys imported from Base58
    pub path: DerivationPath,
}

/// Extended public key version bytes accepted on import, including the
/// SLIP-132 script-type variants that cosigners commonly export.
const PUBLIC_VERSIONS: [([u8; 4], Network); 10] = [
    ([0x04, 0x88, 0xb2, 0x1e], Network::Mainnet), // xpub
    ([0x04, 0x9d, 0x7c, 0xb2], Network::Mainnet), // ypub
    ([0x04, 0xb2, 0x47, 0x46], Network::Mainnet), // zpub
    ([0x02, 0x95, 0xb4, 0x3f], Network::Mainnet), // Ypub
    ([0x02, 0xaa, 0x7e, 0xd3], Network::Mainnet), // Zpub
    ([0x04, 0x35, 0x87, 0xcf], Network::Testnet), // tpub
    ([0x04, 0x4a, 0x52, 0x62], Network::Testnet), // upub
    ([0x04, 0x5f, 0x1c, 0xf6], Network::Testnet), // vpub
    ([0x02, 0x42, 0x89, 0xef], Network::Testnet), // Upub
    ([0x02, 0x57, 0x54, 0x83], Network::Testnet), // Vpub
];

const PRIVATE_VERSIONS: [([u8; 4], Network); 2] = [
    ([0x04, 0x88, 0xad, 0xe4], Network::Mainnet), // xprv
    ([0x04, 0x35, 0x83, 0x94], Network::Testnet), // tprv
];

impl ExtendedKey {
    /// Master key from a seed: I = HMAC-SHA512("Bitcoin seed", seed)
    pub fn master(seed: &[u8], network: Network) -> Result<Self, DerivationError> {
        if !(16..=64).contains(&seed.len()) {
            return Err(DerivationError::InvalidSeed(seed.len()));
        }

        let i = hmac_sha512(b"Bitcoin seed", seed);
        let secret_key =
            SecretKey::from_slice(&i[..32]).map_err(|_| DerivationError::InvalidChild(0))?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&i[32..]);

        Ok(Self {
            network,
            depth: 0,
            parent_fingerprint: [0; 4],
            child_number: ChildNumber {
                index: 0,
                hardened: false,
            },
            chain_code,
            key: KeyMaterial::Private(secret_key),
            path: DerivationPath::master(),
        })
    }

    pub fn is_private(&self) -> bool {
        matches!(self.key, KeyMaterial::Private(_))
    }

    /// The (compressed) public key
    pub fn public_key(&self) -> PubKey {
        match self.key {
            KeyMaterial::Private(secret) => {
                let secp = Secp256k1::signing_only();
                PubKey::compressed(PublicKey::from_secret_key(&secp, &secret))
            }
            KeyMaterial::Public(public) => PubKey::compressed(public),
        }
    }

    pub fn secret_key(&self) -> Option<SecretKey> {
        match self.key {
            KeyMaterial::Private(secret) => Some(secret),
            KeyMaterial::Public(_) => None,
        }
    }

    /// Signing key pair, if this is a private key
    pub fn key_pair(&self) -> Option<KeyPair> {
        self.secret_key().map(KeyPair::from_secret_key)
    }

    /// First four bytes of HASH160 of the public key
    pub fn fingerprint(&self) -> [u8; 4] {
        let id = self.public_key().hash160();
        [id[0], id[1], id[2], id[3]]
    }

    /// Public counterpart of this key (identity if already public)
    pub fn to_public(&self) -> Self {
        let mut public = self.clone();
        public.key = KeyMaterial::Public(*self.public_key().inner());
        public
    }

    /// Derive a single child
    pub fn derive_child(&self, child: ChildNumber) -> Result<Self, DerivationError> {
        let mut data = Vec::with_capacity(37);
        match (&self.key, child.hardened) {
            (KeyMaterial::Public(_), true) => {
                return Err(DerivationError::InvalidPath(format!(
                    "hardened segment {} requested from a public key",
                    child
                )));
            }
            (KeyMaterial::Private(secret), true) => {
                data.push(0x00);
                data.extend_from_slice(&secret.secret_bytes());
            }
            (_, false) => data.extend_from_slice(&self.public_key().to_bytes()),
        }
        data.extend_from_slice(&child.to_u32().to_be_bytes());

        let i = hmac_sha512(&self.chain_code, &data);
        let mut tweak_bytes = [0u8; 32];
        tweak_bytes.copy_from_slice(&i[..32]);
        let tweak = Scalar::from_be_bytes(tweak_bytes)
            .map_err(|_| DerivationError::InvalidChild(child.to_u32()))?;

        let key = match self.key {
            KeyMaterial::Private(secret) => KeyMaterial::Private(
                secret
                    .add_tweak(&tweak)
                    .map_err(|_| DerivationError::InvalidChild(child.to_u32()))?,
            ),
            KeyMaterial::Public(public) => {
                let secp = Secp256k1::verification_only();
                KeyMaterial::Public(
                    public
                        .add_exp_tweak(&secp, &tweak)
                        .map_err(|_| DerivationError::InvalidChild(child.to_u32()))?,
                )
            }
        };

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&i[32..]);

        let depth = self
            .depth
            .checked_add(1)
            .ok_or_else(|| DerivationError::InvalidPath("depth exceeds 255".to_string()))?;

        Ok(Self {
            network: self.network,
            depth,
            parent_fingerprint: self.fingerprint(),
            child_number: child,
            chain_code,
            key,
            path: self.path.child(child),
        })
    }

    /// Derive along every segment of `path`
    pub fn derive_path(&self, path: &DerivationPath) -> Result<Self, DerivationError> {
        path.segments()
            .iter()
            .try_fold(self.clone(), |key, child| key.derive_child(*child))
    }

    /// 78-byte BIP32 serialization
    pub fn encode(&self) -> [u8; EXTENDED_KEY_LEN] {
        let mut out = [0u8; EXTENDED_KEY_LEN];
        let version = match self.key {
            KeyMaterial::Private(_) => self.network.xprv_version(),
            KeyMaterial::Public(_) => self.network.xpub_version(),
        };
        out[0..4].copy_from_slice(&version);
        out[4] = self.depth;
        out[5..9].copy_from_slice(&self.parent_fingerprint);
        out[9..13].copy_from_slice(&self.child_number.to_u32().to_be_bytes());
        out[13..45].copy_from_slice(&self.chain_code);
        match self.key {
            KeyMaterial::Private(secret) => {
                out[45] = 0x00;
                out[46..78].copy_from_slice(&secret.secret_bytes());
            }
            KeyMaterial::Public(public) => out[45..78].copy_from_slice(&public.serialize()),
        }
        out
    }

    /// Parse a 78-byte BIP32 serialization
    pub fn decode(data: &[u8]) -> Result<Self, DerivationError> {
        if data.len() != EXTENDED_KEY_LEN {
            return Err(DerivationError::InvalidExtendedKey(format!(
                "expected {} bytes, got {}",
                EXTENDED_KEY_LEN,
                data.len()
            )));
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&data[0..4]);

        let key = if let Some((_, network)) = PRIVATE_VERSIONS.iter().find(|(v, _)| *v == version)
        {
            if data[45] != 0x00 {
                return Err(DerivationError::InvalidExtendedKey(
                    "private key must be prefixed by 0x00".to_string(),
                ));
            }
            let secret = SecretKey::from_slice(&data[46..78])
                .map_err(|_| KeyError::InvalidPrivateKey)?;
            (KeyMaterial::Private(secret), *network)
        } else if let Some((_, network)) = PUBLIC_VERSIONS.iter().find(|(v, _)| *v == version) {
            let public = PubKey::from_slice(&data[45..78])?;
            (KeyMaterial::Public(*public.inner()), *network)
        } else {
            return Err(DerivationError::InvalidExtendedKey(format!(
                "unknown version {}",
                hex::encode(version)
            )));
        };

        let depth = data[4];
        let mut parent_fingerprint = [0u8; 4];
        parent_fingerprint.copy_from_slice(&data[5..9]);
        let child_number = ChildNumber::from_u32(u32::from_be_bytes([
            data[9], data[10], data[11], data[12],
        ]));
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&data[13..45]);

        if depth == 0 && (parent_fingerprint != [0; 4] || child_number.to_u32() != 0) {
            return Err(DerivationError::InvalidExtendedKey(
                "master key with non-zero parent or index".to_string(),
            ));
        }

        Ok(Self {
            network: key.1,
            depth,
            parent_fingerprint,
            child_number,
            chain_code,
            key: key.0,
            path: DerivationPath::master(),
        })
    }

    /// Base58Check string (xpub/xprv/tpub/tprv)
    pub fn to_base58(&self) -> String {
        base58check_encode(&self.encode())
    }

    /// Parse a Base58Check extended key
    pub fn from_base58(encoded: &str) -> Result<Self, DerivationError> {
        let data = base58check_decode(encoded.trim()).map_err(KeyError::from)?;
        Self::decode(&data)
    }

    /// Parse and require a specific network
    pub fn from_base58_for(encoded: &str, network: Network) -> Result<Self, DerivationError> {
        let mut key = Self::from_base58(encoded)?;
        if !network.base58_compatible(key.network) {
            return Err(DerivationError::WrongNetwork {
                expected: network,
                found: key.network,
            });
        }
        key.network = network;
        Ok(key)
    }
}

impl fmt::Debug for ExtendedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedKey")
            .field("network", &self.network)
            .field("depth", &self.depth)
            .field("path", &self.path.to_string())
            .field("public_key", &self.public_key())
            .field("private", &self.is_private())
            .finish()
    }
}

/// Derive the extended key at `path` from `seed`
pub fn derive(seed: &[u8], path: &DerivationPath, network: Network) -> Result<ExtendedKey, DerivationError> {
    let key = ExtendedKey::master(seed, network)?.derive_path(path)?;
    log::debug!("Derived key at {} (depth {})", path, key.depth);
    Ok(key)
}
