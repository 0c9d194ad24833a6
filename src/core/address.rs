//! Address construction and parsing
//!
//! Builds locking scripts and their encodings for one key (single-sig) or a
//! canonically ordered key set (multisig) in each [`ScriptVariant`]:
//!
//! | variant          | single-sig    | multisig      |
//! |------------------|---------------|---------------|
//! | `Legacy`         | P2PKH         | P2SH          |
//! | `WrappedSegwit`  | P2SH-P2WPKH   | P2SH-P2WSH    |
//! | `NativeSegwit`   | P2WPKH        | P2WSH         |
//!
//! Everything here is a pure function of its inputs and the network.

use bech32::Fe32;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::network::Network;
use super::script::{
    Script, ScriptError, ScriptType, ScriptVariant, MAX_MULTISIG_KEYS, MAX_SCRIPT_ELEMENT_SIZE,
    MAX_STANDARD_WITNESS_SCRIPT_SIZE,
};
use crate::crypto::{base58check_decode, base58check_encode, PubKey};

/// Address-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Unsupported variant: {0}")]
    UnsupportedVariant(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Wrong network: expected {expected}, address is for {found}")]
    WrongNetwork { expected: Network, found: Network },
    #[error("Multisig keys are not in canonical order")]
    KeysNotOrdered,
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),
}

/// An encoded address together with the scripts behind it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Base58Check or bech32 string
    pub encoded: String,
    pub variant: ScriptVariant,
    pub network: Network,
    /// Output script paid to by this address
    pub script_pubkey: Script,
    /// Script revealed in the scriptSig for P2SH forms
    pub redeem_script: Option<Script>,
    /// Script revealed in the witness for P2WSH forms
    pub witness_script: Option<Script>,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

// =============================================================================
// Building
// =============================================================================

/// Address for a single public key
pub fn build_single_sig(
    pubkey: &PubKey,
    variant: ScriptVariant,
    network: Network,
) -> Result<Address, AddressError> {
    if variant.is_segwit() && !pubkey.is_compressed() {
        return Err(AddressError::UnsupportedVariant(format!(
            "{} requires a compressed public key",
            variant
        )));
    }

    let key_hash = pubkey.hash160();
    let (script_pubkey, redeem_script) = match variant {
        ScriptVariant::Legacy => (Script::p2pkh(&key_hash), None),
        ScriptVariant::WrappedSegwit => {
            let redeem = Script::p2wpkh(&key_hash);
            (redeem.to_p2sh(), Some(redeem))
        }
        ScriptVariant::NativeSegwit => (Script::p2wpkh(&key_hash), None),
    };

    Ok(Address {
        encoded: encode_script(&script_pubkey, network)?,
        variant,
        network,
        script_pubkey,
        redeem_script,
        witness_script: None,
    })
}

/// Address for an M-of-N key set that is already in canonical order
pub fn build_multisig(
    ordered_keys: &[PubKey],
    threshold: usize,
    variant: ScriptVariant,
    network: Network,
) -> Result<Address, AddressError> {
    if ordered_keys.windows(2).any(|w| w[0] >= w[1]) {
        return Err(AddressError::KeysNotOrdered);
    }

    let total = ordered_keys.len();
    if total > MAX_MULTISIG_KEYS || threshold == 0 || threshold > total {
        return Err(AddressError::UnsupportedVariant(format!(
            "{}-of-{} exceeds multisig limits",
            threshold, total
        )));
    }
    if variant.is_segwit() && ordered_keys.iter().any(|k| !k.is_compressed()) {
        return Err(AddressError::UnsupportedVariant(format!(
            "{} requires compressed public keys",
            variant
        )));
    }

    let multisig = Script::multisig(threshold, ordered_keys)?;
    let limit = match variant {
        ScriptVariant::Legacy => MAX_SCRIPT_ELEMENT_SIZE,
        _ => MAX_STANDARD_WITNESS_SCRIPT_SIZE,
    };
    if multisig.len() > limit {
        return Err(AddressError::UnsupportedVariant(format!(
            "{}-of-{} script is {} bytes, {} allows at most {}",
            threshold,
            total,
            multisig.len(),
            variant,
            limit
        )));
    }

    let (script_pubkey, redeem_script, witness_script) = match variant {
        ScriptVariant::Legacy => (multisig.to_p2sh(), Some(multisig), None),
        ScriptVariant::WrappedSegwit => {
            let redeem = multisig.to_p2wsh();
            (redeem.to_p2sh(), Some(redeem), Some(multisig))
        }
        ScriptVariant::NativeSegwit => (multisig.to_p2wsh(), None, Some(multisig)),
    };

    Ok(Address {
        encoded: encode_script(&script_pubkey, network)?,
        variant,
        network,
        script_pubkey,
        redeem_script,
        witness_script,
    })
}

/// Encode an output script as an address string, if it has one
pub fn encode_script(script: &Script, network: Network) -> Result<String, AddressError> {
    match script.classify() {
        ScriptType::P2pkh(hash) => Ok(base58_address(network.p2pkh_prefix(), &hash)),
        ScriptType::P2sh(hash) => Ok(base58_address(network.p2sh_prefix(), &hash)),
        ScriptType::P2wpkh(hash) => segwit_address(network, 0, &hash),
        ScriptType::P2wsh(hash) => segwit_address(network, 0, &hash),
        ScriptType::WitnessProgram { version, program } => {
            segwit_address(network, version, &program)
        }
        _ => Err(AddressError::InvalidAddress(format!(
            "script {} has no address form",
            script
        ))),
    }
}

fn base58_address(prefix: u8, hash: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(prefix);
    payload.extend_from_slice(hash);
    base58check_encode(&payload)
}

fn segwit_address(network: Network, version: u8, program: &[u8]) -> Result<String, AddressError> {
    let version = Fe32::try_from(version)
        .map_err(|e| AddressError::InvalidAddress(format!("witness version: {}", e)))?;
    bech32::segwit::encode(network.bech32_hrp(), version, program)
        .map_err(|e| AddressError::InvalidAddress(e.to_string()))
}

// =============================================================================
// Parsing
// =============================================================================

/// Decode an address string into the output script it pays to.
///
/// Fails with `WrongNetwork` when the prefix or HRP belongs to another network.
pub fn parse_address(encoded: &str, network: Network) -> Result<Script, AddressError> {
    let encoded = encoded.trim();

    if let Ok((hrp, version, program)) = bech32::segwit::decode(encoded) {
        let found = [Network::Mainnet, Network::Testnet, Network::Regtest]
            .into_iter()
            .find(|n| n.bech32_hrp().to_lowercase() == hrp.to_lowercase())
            .ok_or_else(|| {
                AddressError::InvalidAddress(format!("unknown prefix '{}'", hrp))
            })?;
        if found != network {
            return Err(AddressError::WrongNetwork {
                expected: network,
                found,
            });
        }
        return Ok(Script::witness_program(version.to_u8(), &program));
    }

    let payload =
        base58check_decode(encoded).map_err(|e| AddressError::InvalidAddress(e.to_string()))?;
    if payload.len() != 21 {
        return Err(AddressError::InvalidAddress(format!(
            "expected 21-byte payload, got {}",
            payload.len()
        )));
    }

    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[1..]);
    let prefix = payload[0];

    let (found, script) = match prefix {
        0x00 => (Network::Mainnet, Script::p2pkh(&hash)),
        0x05 => (Network::Mainnet, Script::p2sh(&hash)),
        0x6f => (Network::Testnet, Script::p2pkh(&hash)),
        0xc4 => (Network::Testnet, Script::p2sh(&hash)),
        other => {
            return Err(AddressError::InvalidAddress(format!(
                "unknown version byte {:#04x}",
                other
            )))
        }
    };

    if !network.base58_compatible(found) {
        return Err(AddressError::WrongNetwork {
            expected: network,
            found,
        });
    }
    Ok(script)
}
