//! Multi-signature account configuration
//!
//! A [`MultisigConfig`] is the validated, immutable description of an M-of-N
//! key set: threshold, canonically ordered keys and script variant. Changing
//! cosigners means creating a new config.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ordering::order_keys;
use crate::core::{build_multisig, Address, AddressError, InputKind, Network, ScriptVariant};
use crate::crypto::{DerivationError, PubKey};

/// Fewest keys a multisig config may have
pub const MIN_MULTISIG_KEYS: usize = 2;

/// Most keys a multisig config may have
pub const MAX_MULTISIG_KEYS: usize = 15;

/// Errors related to multisig operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MultisigError {
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),
    #[error("Invalid signer count {0}: need 2 to 15 signers")]
    InvalidSignerCount(usize),
    #[error("Duplicate signer public key: {0}")]
    DuplicateKey(String),
    #[error("Invalid key encoding: {0}")]
    InvalidKeyEncoding(String),
    #[error("Invalid cosigner: {0}")]
    InvalidCosigner(String),
    #[error("Address error: {0}")]
    Address(#[from] AddressError),
    #[error("Derivation error: {0}")]
    Derivation(#[from] DerivationError),
}

/// Configuration for a multisig key set
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMultisigConfig")]
pub struct MultisigConfig {
    /// Minimum signatures required (M in M-of-N)
    threshold: usize,
    /// Public keys of all authorized signers, canonically ordered
    keys: Vec<PubKey>,
    variant: ScriptVariant,
    /// Optional human-readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
}

#[derive(Deserialize)]
struct RawMultisigConfig {
    threshold: usize,
    keys: Vec<PubKey>,
    variant: ScriptVariant,
    #[serde(default)]
    label: Option<String>,
}

impl TryFrom<RawMultisigConfig> for MultisigConfig {
    type Error = MultisigError;

    fn try_from(raw: RawMultisigConfig) -> Result<Self, Self::Error> {
        MultisigConfig::new(raw.threshold, &raw.keys, raw.variant, raw.label)
    }
}

impl MultisigConfig {
    /// Create a new multisig configuration
    ///
    /// # Arguments
    /// * `threshold` - Minimum signatures required (M)
    /// * `keys` - Public keys of authorized signers (N), in any order
    /// * `variant` - How the multisig script is wrapped
    /// * `label` - Optional label
    ///
    /// # Errors
    /// Returns error if the threshold or key count is out of bounds, or a key
    /// appears twice. Nothing is derived from an invalid config.
    pub fn new(
        threshold: usize,
        keys: &[PubKey],
        variant: ScriptVariant,
        label: Option<String>,
    ) -> Result<Self, MultisigError> {
        if !(MIN_MULTISIG_KEYS..=MAX_MULTISIG_KEYS).contains(&keys.len()) {
            return Err(MultisigError::InvalidSignerCount(keys.len()));
        }

        if threshold == 0 {
            return Err(MultisigError::InvalidThreshold(
                "threshold must be at least 1".to_string(),
            ));
        }

        if threshold > keys.len() {
            return Err(MultisigError::InvalidThreshold(format!(
                "threshold {} exceeds signer count {}",
                threshold,
                keys.len()
            )));
        }

        let keys = order_keys(keys)?;

        Ok(Self {
            threshold,
            keys,
            variant,
            label,
        })
    }

    /// Get the threshold (M)
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Get the total signer count (N)
    pub fn total(&self) -> usize {
        self.keys.len()
    }

    /// Keys in canonical order
    pub fn keys(&self) -> &[PubKey] {
        &self.keys
    }

    pub fn variant(&self) -> ScriptVariant {
        self.variant
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Check if a public key is an authorized signer
    pub fn is_signer(&self, key: &PubKey) -> bool {
        self.keys.binary_search(key).is_ok()
    }

    /// Get description like "2-of-3"
    pub fn description(&self) -> String {
        format!("{}-of-{}", self.threshold, self.keys.len())
    }

    /// Size-estimation kind for inputs spending this config
    pub fn input_kind(&self) -> InputKind {
        InputKind::Multisig {
            variant: self.variant,
            threshold: self.threshold,
            total: self.keys.len(),
        }
    }

    /// Address and scripts for this key set on `network`
    pub fn address(&self, network: Network) -> Result<Address, MultisigError> {
        Ok(build_multisig(
            &self.keys,
            self.threshold,
            self.variant,
            network,
        )?)
    }
}
