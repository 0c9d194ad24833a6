//! Script system for output locking conditions
//!
//! Scripts are raw Bitcoin script bytes. This module builds the standard
//! templates the wallet emits (P2PKH, P2SH, P2WPKH, P2WSH and bare
//! `OP_M <keys> OP_N OP_CHECKMULTISIG`), parses them back, and defines the
//! closed set of address variants and signature hash types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::crypto::{hash160, sha256, PubKey};

// =============================================================================
// Script Constants
// =============================================================================

/// Maximum size of a pushed element, which bounds a P2SH redeem script
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// Standardness limit for a P2WSH witness script
pub const MAX_STANDARD_WITNESS_SCRIPT_SIZE: usize = 3600;

/// Maximum number of keys in a CHECKMULTISIG script the wallet will build
pub const MAX_MULTISIG_KEYS: usize = 15;

/// Opcodes used by the standard templates
pub mod opcodes {
    pub const OP_0: u8 = 0x00;
    pub const OP_PUSHDATA1: u8 = 0x4c;
    pub const OP_PUSHDATA2: u8 = 0x4d;
    pub const OP_PUSHDATA4: u8 = 0x4e;
    pub const OP_1NEGATE: u8 = 0x4f;
    pub const OP_1: u8 = 0x51;
    pub const OP_16: u8 = 0x60;
    pub const OP_RETURN: u8 = 0x6a;
    pub const OP_DUP: u8 = 0x76;
    pub const OP_EQUAL: u8 = 0x87;
    pub const OP_EQUALVERIFY: u8 = 0x88;
    pub const OP_HASH160: u8 = 0xa9;
    pub const OP_CHECKSIG: u8 = 0xac;
    pub const OP_CHECKMULTISIG: u8 = 0xae;
}

use opcodes::*;

// =============================================================================
// Script Errors
// =============================================================================

/// Script-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Malformed script: {0}")]
    Malformed(String),
    #[error("Script too large: {0} bytes")]
    ScriptTooLarge(usize),
    #[error("Invalid multisig parameters: {threshold}-of-{total}")]
    InvalidMultisig { threshold: usize, total: usize },
    #[error("Unknown script variant: {0}")]
    UnknownVariant(String),
    #[error("Invalid hex: {0}")]
    InvalidHex(String),
}

// =============================================================================
// Signature Hash Types
// =============================================================================

/// Signature hash type determines what parts of the transaction are signed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SigHashType {
    /// Sign all inputs and all outputs (default)
    All = 0x01,
    /// Sign all inputs but no outputs
    None = 0x02,
    /// Sign all inputs and only the output with same index
    Single = 0x03,
    /// SIGHASH_ALL | SIGHASH_ANYONECANPAY
    AllAnyoneCanPay = 0x81,
    /// SIGHASH_NONE | SIGHASH_ANYONECANPAY
    NoneAnyoneCanPay = 0x82,
    /// SIGHASH_SINGLE | SIGHASH_ANYONECANPAY
    SingleAnyoneCanPay = 0x83,
}

impl Default for SigHashType {
    fn default() -> Self {
        SigHashType::All
    }
}

impl SigHashType {
    /// Parse sighash type from byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(SigHashType::All),
            0x02 => Some(SigHashType::None),
            0x03 => Some(SigHashType::Single),
            0x81 => Some(SigHashType::AllAnyoneCanPay),
            0x82 => Some(SigHashType::NoneAnyoneCanPay),
            0x83 => Some(SigHashType::SingleAnyoneCanPay),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Value committed to in the sighash preimage
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    /// Check if this sighash includes ANYONECANPAY flag
    pub fn is_anyone_can_pay(&self) -> bool {
        (*self as u8) & 0x80 != 0
    }

    /// Get the base type (without ANYONECANPAY flag)
    pub fn base_type(&self) -> SigHashType {
        match (*self as u8) & 0x1f {
            0x02 => SigHashType::None,
            0x03 => SigHashType::Single,
            _ => SigHashType::All,
        }
    }
}

// =============================================================================
// Script Variants
// =============================================================================

/// How a key or key set is wrapped into an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScriptVariant {
    /// P2PKH / P2SH
    Legacy,
    /// P2SH-P2WPKH / P2SH-P2WSH
    WrappedSegwit,
    /// P2WPKH / P2WSH
    NativeSegwit,
}

impl Default for ScriptVariant {
    fn default() -> Self {
        ScriptVariant::NativeSegwit
    }
}

impl ScriptVariant {
    pub const ALL: [ScriptVariant; 3] = [
        ScriptVariant::Legacy,
        ScriptVariant::WrappedSegwit,
        ScriptVariant::NativeSegwit,
    ];

    pub fn is_segwit(&self) -> bool {
        !matches!(self, ScriptVariant::Legacy)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScriptVariant::Legacy => "legacy",
            ScriptVariant::WrappedSegwit => "wrapped-segwit",
            ScriptVariant::NativeSegwit => "native-segwit",
        }
    }
}

impl fmt::Display for ScriptVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScriptVariant {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" | "p2pkh" | "p2sh" => Ok(ScriptVariant::Legacy),
            "wrapped-segwit" | "segwit" | "p2sh-p2wpkh" | "p2sh-p2wsh" => {
                Ok(ScriptVariant::WrappedSegwit)
            }
            "native-segwit" | "bech32" | "p2wpkh" | "p2wsh" => Ok(ScriptVariant::NativeSegwit),
            other => Err(ScriptError::UnknownVariant(other.to_string())),
        }
    }
}

// =============================================================================
// Script
// =============================================================================

/// A single parsed script element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    Push(&'a [u8]),
    Op(u8),
}

/// Recognized output templates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptType {
    P2pkh([u8; 20]),
    P2sh([u8; 20]),
    P2wpkh([u8; 20]),
    P2wsh([u8; 32]),
    /// Witness versions 1..16
    WitnessProgram { version: u8, program: Vec<u8> },
    Multisig { threshold: usize, keys: Vec<PubKey> },
    OpReturn,
    NonStandard,
}

/// Raw script bytes
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Script(Vec<u8>);

impl Script {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_hex(hex_script: &str) -> Result<Self, ScriptError> {
        hex::decode(hex_script)
            .map(Self)
            .map_err(|e| ScriptError::InvalidHex(e.to_string()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// HASH160 of the script (P2SH commitment)
    pub fn hash160(&self) -> [u8; 20] {
        hash160(&self.0)
    }

    /// SHA-256 of the script (P2WSH commitment)
    pub fn sha256(&self) -> [u8; 32] {
        sha256(&self.0)
    }

    // -------------------------------------------------------------------------
    // Building
    // -------------------------------------------------------------------------

    pub fn push_opcode(mut self, op: u8) -> Self {
        self.0.push(op);
        self
    }

    /// Push data with the minimal push opcode for its length
    pub fn push_slice(mut self, data: &[u8]) -> Self {
        append_push(&mut self.0, data);
        self
    }

    /// Push a small integer 0..=16 as OP_0 / OP_1..OP_16
    pub fn push_small_int(self, n: u8) -> Self {
        debug_assert!(n <= 16);
        if n == 0 {
            self.push_opcode(OP_0)
        } else {
            self.push_opcode(OP_1 + n - 1)
        }
    }

    /// OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG
    pub fn p2pkh(pubkey_hash: &[u8; 20]) -> Self {
        Self::new()
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(pubkey_hash)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
    }

    /// OP_HASH160 <20> OP_EQUAL
    pub fn p2sh(script_hash: &[u8; 20]) -> Self {
        Self::new()
            .push_opcode(OP_HASH160)
            .push_slice(script_hash)
            .push_opcode(OP_EQUAL)
    }

    /// OP_0 <20>
    pub fn p2wpkh(pubkey_hash: &[u8; 20]) -> Self {
        Self::new().push_opcode(OP_0).push_slice(pubkey_hash)
    }

    /// OP_0 <32>
    pub fn p2wsh(script_hash: &[u8; 32]) -> Self {
        Self::new().push_opcode(OP_0).push_slice(script_hash)
    }

    /// Witness program of any version
    pub fn witness_program(version: u8, program: &[u8]) -> Self {
        Self::new().push_small_int(version).push_slice(program)
    }

    /// OP_M <keys...> OP_N OP_CHECKMULTISIG, keys in the given order
    pub fn multisig(threshold: usize, keys: &[PubKey]) -> Result<Self, ScriptError> {
        let total = keys.len();
        if threshold == 0 || threshold > total || total > MAX_MULTISIG_KEYS {
            return Err(ScriptError::InvalidMultisig { threshold, total });
        }

        let mut script = Self::new().push_small_int(threshold as u8);
        for key in keys {
            script = script.push_slice(&key.to_bytes());
        }
        Ok(script
            .push_small_int(total as u8)
            .push_opcode(OP_CHECKMULTISIG))
    }

    /// Output script for a P2SH wrapper around this script
    pub fn to_p2sh(&self) -> Self {
        Self::p2sh(&self.hash160())
    }

    /// Output script for a P2WSH wrapper around this script
    pub fn to_p2wsh(&self) -> Self {
        Self::p2wsh(&self.sha256())
    }

    // -------------------------------------------------------------------------
    // Parsing
    // -------------------------------------------------------------------------

    /// Split the script into pushes and opcodes
    pub fn instructions(&self) -> Result<Vec<Instruction<'_>>, ScriptError> {
        let bytes = &self.0;
        let mut out = Vec::new();
        let mut i = 0;

        while i < bytes.len() {
            let op = bytes[i];
            i += 1;

            let len = match op {
                0x01..=0x4b => op as usize,
                OP_PUSHDATA1 => read_len(bytes, &mut i, 1)?,
                OP_PUSHDATA2 => read_len(bytes, &mut i, 2)?,
                OP_PUSHDATA4 => read_len(bytes, &mut i, 4)?,
                _ => {
                    out.push(Instruction::Op(op));
                    continue;
                }
            };

            let end = i
                .checked_add(len)
                .filter(|end| *end <= bytes.len())
                .ok_or_else(|| ScriptError::Malformed(format!("push of {} bytes overruns script", len)))?;
            out.push(Instruction::Push(&bytes[i..end]));
            i = end;
        }

        Ok(out)
    }

    /// Threshold and keys of a bare multisig script
    pub fn parse_multisig(&self) -> Option<(usize, Vec<PubKey>)> {
        let instructions = self.instructions().ok()?;
        let (first, rest) = instructions.split_first()?;
        let (last, rest) = rest.split_last()?;
        let (total_op, key_pushes) = rest.split_last()?;

        if *last != Instruction::Op(OP_CHECKMULTISIG) {
            return None;
        }
        let threshold = small_int(first)?;
        let total = small_int(total_op)?;

        let keys = key_pushes
            .iter()
            .map(|ins| match ins {
                Instruction::Push(data) => PubKey::from_slice(data).ok(),
                Instruction::Op(_) => None,
            })
            .collect::<Option<Vec<_>>>()?;

        if keys.len() != total || threshold == 0 || threshold > total {
            return None;
        }
        Some((threshold, keys))
    }

    /// Recognize the standard template this script follows
    pub fn classify(&self) -> ScriptType {
        let b = &self.0;

        if b.len() == 25
            && b[0] == OP_DUP
            && b[1] == OP_HASH160
            && b[2] == 20
            && b[23] == OP_EQUALVERIFY
            && b[24] == OP_CHECKSIG
        {
            return ScriptType::P2pkh(to_array(&b[3..23]));
        }
        if b.len() == 23 && b[0] == OP_HASH160 && b[1] == 20 && b[22] == OP_EQUAL {
            return ScriptType::P2sh(to_array(&b[2..22]));
        }
        if b.len() == 22 && b[0] == OP_0 && b[1] == 20 {
            return ScriptType::P2wpkh(to_array(&b[2..22]));
        }
        if b.len() == 34 && b[0] == OP_0 && b[1] == 32 {
            return ScriptType::P2wsh(to_array(&b[2..34]));
        }
        if (4..=42).contains(&b.len())
            && (OP_1..=OP_16).contains(&b[0])
            && b[1] as usize == b.len() - 2
        {
            return ScriptType::WitnessProgram {
                version: b[0] - OP_1 + 1,
                program: b[2..].to_vec(),
            };
        }
        if b.first() == Some(&OP_RETURN) {
            return ScriptType::OpReturn;
        }
        if let Some((threshold, keys)) = self.parse_multisig() {
            return ScriptType::Multisig { threshold, keys };
        }
        ScriptType::NonStandard
    }

    pub fn is_witness_program(&self) -> bool {
        matches!(
            self.classify(),
            ScriptType::P2wpkh(_) | ScriptType::P2wsh(_) | ScriptType::WitnessProgram { .. }
        )
    }
}

fn append_push(out: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len < OP_PUSHDATA1 as usize {
        out.push(len as u8);
    } else if len <= 0xff {
        out.push(OP_PUSHDATA1);
        out.push(len as u8);
    } else if len <= 0xffff {
        out.push(OP_PUSHDATA2);
        out.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        out.push(OP_PUSHDATA4);
        out.extend_from_slice(&(len as u32).to_le_bytes());
    }
    out.extend_from_slice(data);
}

/// Script-sig style push sequence: each element pushed minimally
pub fn push_all(elements: &[&[u8]]) -> Script {
    let mut bytes = Vec::new();
    for element in elements {
        if element.is_empty() {
            bytes.push(OP_0);
        } else {
            append_push(&mut bytes, element);
        }
    }
    Script(bytes)
}

fn read_len(bytes: &[u8], i: &mut usize, width: usize) -> Result<usize, ScriptError> {
    let end = *i + width;
    if end > bytes.len() {
        return Err(ScriptError::Malformed("truncated push length".to_string()));
    }
    let mut buf = [0u8; 4];
    buf[..width].copy_from_slice(&bytes[*i..end]);
    *i = end;
    Ok(u32::from_le_bytes(buf) as usize)
}

fn small_int(ins: &Instruction<'_>) -> Option<usize> {
    match ins {
        Instruction::Op(op) if (OP_1..=OP_16).contains(op) => Some((op - OP_1 + 1) as usize),
        _ => None,
    }
}

fn to_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", self.to_hex())
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<Vec<u8>> for Script {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Serialize for Script {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Script::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn key(hex_key: &str) -> PubKey {
        PubKey::from_hex(hex_key).unwrap()
    }

    #[test]
    fn test_sighash_types() {
        assert_eq!(SigHashType::default(), SigHashType::All);
        assert!(!SigHashType::All.is_anyone_can_pay());
        assert!(SigHashType::AllAnyoneCanPay.is_anyone_can_pay());
        assert_eq!(SigHashType::AllAnyoneCanPay.base_type(), SigHashType::All);
        assert_eq!(SigHashType::from_byte(0x83), Some(SigHashType::SingleAnyoneCanPay));
        assert_eq!(SigHashType::from_byte(0x80), None);
    }

    #[test]
    fn test_variant_parse() {
        assert_eq!(
            "native-segwit".parse::<ScriptVariant>().unwrap(),
            ScriptVariant::NativeSegwit
        );
        assert_eq!(
            "segwit".parse::<ScriptVariant>().unwrap(),
            ScriptVariant::WrappedSegwit
        );
        assert!("taproot".parse::<ScriptVariant>().is_err());
        assert_eq!(
            serde_json::to_string(&ScriptVariant::WrappedSegwit).unwrap(),
            "\"wrapped-segwit\""
        );
    }

    #[test]
    fn test_templates_classify() {
        let h20 = [7u8; 20];
        let h32 = [9u8; 32];
        assert_eq!(Script::p2pkh(&h20).len(), 25);
        assert_eq!(Script::p2pkh(&h20).classify(), ScriptType::P2pkh(h20));
        assert_eq!(Script::p2sh(&h20).classify(), ScriptType::P2sh(h20));
        assert_eq!(Script::p2wpkh(&h20).classify(), ScriptType::P2wpkh(h20));
        assert_eq!(Script::p2wsh(&h32).classify(), ScriptType::P2wsh(h32));
        assert_eq!(
            Script::witness_program(1, &h32).classify(),
            ScriptType::WitnessProgram {
                version: 1,
                program: h32.to_vec()
            }
        );
    }

    #[test]
    fn test_multisig_script_layout() {
        let a = key("02fe6f0a5a297eb38c391581c4413e084773ea23954d93f7753db7dc0adc188b2f");
        let b = key("02ff12471208c14bd580709cb2358d98975247d8765f92bc25eab3b2763ed605f8");
        let script = Script::multisig(2, &[a.clone(), b.clone()]).unwrap();
        assert_eq!(
            script.to_hex(),
            "522102fe6f0a5a297eb38c391581c4413e084773ea23954d93f7753db7dc0adc188b2f2102ff12471208c14bd580709cb2358d98975247d8765f92bc25eab3b2763ed605f852ae"
        );
        assert_eq!(script.parse_multisig(), Some((2, vec![a, b])));
    }

    #[test]
    fn test_multisig_bounds() {
        let a = key("02fe6f0a5a297eb38c391581c4413e084773ea23954d93f7753db7dc0adc188b2f");
        assert!(Script::multisig(0, &[a.clone()]).is_err());
        assert!(Script::multisig(2, &[a]).is_err());
    }

    #[test]
    fn test_push_encoding() {
        let long = vec![1u8; 80];
        let script = Script::new().push_slice(&long);
        assert_eq!(script.as_bytes()[0], OP_PUSHDATA1);
        assert_eq!(script.as_bytes()[1], 80);
        assert_eq!(script.instructions().unwrap(), vec![Instruction::Push(&long[..])]);

        let truncated = Script::from_bytes(vec![0x05, 1, 2]);
        assert!(truncated.instructions().is_err());
    }

    #[test]
    fn test_push_all_uses_op0_for_empty() {
        let script = push_all(&[&[], &[0xaa, 0xbb]]);
        assert_eq!(script.to_hex(), "0002aabb");
    }
}
