//! Fee rates, size estimation and dust limits
//!
//! Sizes are estimated in weight units before signing so the fee can be
//! fixed up front. Signatures are assumed to be the 72-byte worst case
//! (DER plus sighash byte) and keys 33 bytes, so estimates never
//! undershoot the signed transaction.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::encode::compact_size_len;
use super::script::{Script, ScriptType, ScriptVariant};
use super::transaction::WITNESS_SCALE_FACTOR;

// =============================================================================
// Constants
// =============================================================================

/// Default minimum fee rate (sat/vB)
pub const MIN_FEE_RATE: u64 = 1;

/// Default maximum fee rate (sat/vB)
pub const MAX_FEE_RATE: u64 = 10_000;

/// Dust relay fee in sat per 1000 vbytes (Bitcoin Core default)
pub const DUST_RELAY_FEE: u64 = 3_000;

/// Worst-case signature push payload: 71-byte DER + sighash byte
pub const SIGNATURE_SIZE: usize = 72;

/// Compressed public key size
pub const PUBKEY_SIZE: usize = 33;

/// version + locktime + input/output counts
const TX_OVERHEAD: usize = 10;

/// outpoint + sequence
const INPUT_BASE: usize = 32 + 4 + 4;

// =============================================================================
// Fee Rate
// =============================================================================

/// Fee rate in satoshis per virtual byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeeRate(pub u64);

impl FeeRate {
    /// Create from satoshis per byte
    pub fn from_sat_per_vb(rate: u64) -> Self {
        Self(rate)
    }

    /// Create from total fee and transaction size
    pub fn from_fee_and_vsize(fee: u64, vsize: usize) -> Self {
        if vsize == 0 {
            Self(0)
        } else {
            Self(fee / vsize as u64)
        }
    }

    /// Calculate fee for a given virtual size
    pub fn fee_for_vsize(&self, vsize: usize) -> u64 {
        self.0.saturating_mul(vsize as u64)
    }

    /// Fee for a weight, rounding the vsize up
    pub fn fee_for_weight(&self, weight: usize) -> u64 {
        self.fee_for_vsize(weight_to_vsize(weight))
    }

    /// Get rate as satoshis per vbyte
    pub fn as_sat_per_vb(&self) -> u64 {
        self.0
    }

    /// Clamp into the accepted range
    pub fn clamped(self) -> Self {
        Self(self.0.clamp(MIN_FEE_RATE, MAX_FEE_RATE))
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        Self(MIN_FEE_RATE)
    }
}

/// Transaction priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
    Economy,
}

impl Priority {
    /// Confirmation target in blocks
    pub fn target_blocks(&self) -> u32 {
        match self {
            Priority::High => 1,
            Priority::Normal => 3,
            Priority::Low => 6,
            Priority::Economy => 25,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            "economy" => Ok(Priority::Economy),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

// =============================================================================
// Size estimation
// =============================================================================

/// How an input will be signed, for size estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum InputKind {
    SingleSig {
        variant: ScriptVariant,
    },
    Multisig {
        variant: ScriptVariant,
        threshold: usize,
        total: usize,
    },
}

impl InputKind {
    pub fn variant(&self) -> ScriptVariant {
        match self {
            InputKind::SingleSig { variant } | InputKind::Multisig { variant, .. } => *variant,
        }
    }

    pub fn is_segwit(&self) -> bool {
        self.variant().is_segwit()
    }

    /// Estimated weight of the signed input, excluding the segwit marker
    pub fn weight(&self) -> usize {
        let (script_sig, witness) = match *self {
            InputKind::SingleSig { variant } => {
                let sig_and_key = push_len(SIGNATURE_SIZE) + push_len(PUBKEY_SIZE);
                let witness = 1 + sig_and_key;
                match variant {
                    ScriptVariant::Legacy => (sig_and_key, 0),
                    // push of OP_0 <20>
                    ScriptVariant::WrappedSegwit => (push_len(22), witness),
                    ScriptVariant::NativeSegwit => (0, witness),
                }
            }
            InputKind::Multisig {
                variant,
                threshold,
                total,
            } => {
                let script = multisig_script_len(total);
                let sigs = threshold * push_len(SIGNATURE_SIZE);
                // empty dummy element + M signatures + witness script
                let witness = compact_size_len((threshold + 2) as u64)
                    + 1
                    + threshold * (1 + SIGNATURE_SIZE)
                    + compact_size_len(script as u64)
                    + script;
                match variant {
                    ScriptVariant::Legacy => (1 + sigs + push_len(script), 0),
                    // push of OP_0 <32>
                    ScriptVariant::WrappedSegwit => (push_len(34), witness),
                    ScriptVariant::NativeSegwit => (0, witness),
                }
            }
        };

        let base = INPUT_BASE + compact_size_len(script_sig as u64) + script_sig;
        base * WITNESS_SCALE_FACTOR + witness
    }
}

/// OP_M + N * (push 33) + OP_N + OP_CHECKMULTISIG
pub fn multisig_script_len(total: usize) -> usize {
    3 + total * (1 + PUBKEY_SIZE)
}

/// Bytes taken by a minimal push of `len` bytes
fn push_len(len: usize) -> usize {
    let opcode = match len {
        0..=75 => 1,
        76..=255 => 2,
        256..=65535 => 3,
        _ => 5,
    };
    opcode + len
}

/// Serialized size of an output paying to a script of `script_len` bytes
pub fn output_size(script_len: usize) -> usize {
    8 + compact_size_len(script_len as u64) + script_len
}

/// Round weight up to virtual bytes
pub fn weight_to_vsize(weight: usize) -> usize {
    (weight + WITNESS_SCALE_FACTOR - 1) / WITNESS_SCALE_FACTOR
}

/// Estimated weight of a signed transaction
pub fn estimate_weight(inputs: &[InputKind], output_script_lens: &[usize]) -> usize {
    let any_segwit = inputs.iter().any(InputKind::is_segwit);

    let mut weight = TX_OVERHEAD * WITNESS_SCALE_FACTOR;
    if any_segwit {
        // marker + flag, plus an empty witness count for each legacy input
        weight += 2 + inputs.iter().filter(|i| !i.is_segwit()).count();
    }
    weight += inputs.iter().map(InputKind::weight).sum::<usize>();
    weight += output_script_lens
        .iter()
        .map(|len| output_size(*len) * WITNESS_SCALE_FACTOR)
        .sum::<usize>();
    weight
}

/// Estimated virtual size of a signed transaction
pub fn estimate_vsize(inputs: &[InputKind], output_script_lens: &[usize]) -> usize {
    weight_to_vsize(estimate_weight(inputs, output_script_lens))
}

// =============================================================================
// Dust
// =============================================================================

/// Smallest economical value for an output, following Bitcoin Core's rule:
/// the cost of creating and later spending the output at the dust relay fee.
pub fn dust_threshold(script_pubkey: &Script, dust_relay_fee: u64) -> u64 {
    let spend_size = match script_pubkey.classify() {
        ScriptType::OpReturn => return 0,
        ScriptType::P2wpkh(_) | ScriptType::P2wsh(_) | ScriptType::WitnessProgram { .. } => {
            INPUT_BASE + 1 + 107 / WITNESS_SCALE_FACTOR
        }
        _ => INPUT_BASE + 1 + 107,
    };
    let size = output_size(script_pubkey.len()) + spend_size;
    size as u64 * dust_relay_fee / 1000
}

/// True if `value` is below the dust threshold for `script_pubkey`
pub fn is_dust(value: u64, script_pubkey: &Script, dust_relay_fee: u64) -> bool {
    value < dust_threshold(script_pubkey, dust_relay_fee)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_rate() {
        let rate = FeeRate::from_sat_per_vb(10);
        assert_eq!(rate.fee_for_vsize(250), 2500);
        assert_eq!(rate.fee_for_weight(401), 1010);

        let rate2 = FeeRate::from_fee_and_vsize(1000, 200);
        assert_eq!(rate2.0, 5);
        assert_eq!(FeeRate(0).clamped(), FeeRate(MIN_FEE_RATE));
    }

    #[test]
    fn test_priority_targets() {
        assert_eq!(Priority::High.target_blocks(), 1);
        assert_eq!(Priority::default().target_blocks(), 3);
        assert_eq!("economy".parse::<Priority>().unwrap(), Priority::Economy);
    }

    #[test]
    fn test_single_sig_input_sizes() {
        let legacy = InputKind::SingleSig {
            variant: ScriptVariant::Legacy,
        };
        let wrapped = InputKind::SingleSig {
            variant: ScriptVariant::WrappedSegwit,
        };
        let native = InputKind::SingleSig {
            variant: ScriptVariant::NativeSegwit,
        };
        assert_eq!(legacy.weight(), 148 * 4);
        assert_eq!(wrapped.weight(), 64 * 4 + 108);
        assert_eq!(native.weight(), 41 * 4 + 108);
    }

    #[test]
    fn test_multisig_scales_with_m_and_n() {
        let kind = |threshold, total| InputKind::Multisig {
            variant: ScriptVariant::NativeSegwit,
            threshold,
            total,
        };
        // 2-of-3: 4 items, empty, 2 * 73, 1 + 105
        assert_eq!(kind(2, 3).weight(), 41 * 4 + 1 + 1 + 146 + 1 + 105);
        assert!(kind(3, 3).weight() > kind(2, 3).weight());
        assert!(kind(2, 5).weight() > kind(2, 3).weight());

        let legacy = InputKind::Multisig {
            variant: ScriptVariant::Legacy,
            threshold: 2,
            total: 3,
        };
        // scriptSig: OP_0 + 2 * 73 + PUSHDATA1(105)
        assert_eq!(legacy.weight(), (40 + 3 + 1 + 146 + 107) * 4);
    }

    #[test]
    fn test_estimate_vsize() {
        let native = InputKind::SingleSig {
            variant: ScriptVariant::NativeSegwit,
        };
        // 1-in 2-out P2WPKH is roughly 141 vB
        let vsize = estimate_vsize(&[native], &[22, 22]);
        assert_eq!(vsize, 141);

        let legacy = InputKind::SingleSig {
            variant: ScriptVariant::Legacy,
        };
        assert_eq!(estimate_vsize(&[legacy], &[25]), 10 + 148 + 34);
    }

    #[test]
    fn test_dust_thresholds() {
        assert_eq!(dust_threshold(&Script::p2pkh(&[0; 20]), DUST_RELAY_FEE), 546);
        assert_eq!(dust_threshold(&Script::p2wpkh(&[0; 20]), DUST_RELAY_FEE), 294);
        assert_eq!(dust_threshold(&Script::p2sh(&[0; 20]), DUST_RELAY_FEE), 540);
        assert_eq!(dust_threshold(&Script::p2wsh(&[0; 32]), DUST_RELAY_FEE), 330);
        assert!(is_dust(293, &Script::p2wpkh(&[0; 20]), DUST_RELAY_FEE));
        assert!(!is_dust(294, &Script::p2wpkh(&[0; 20]), DUST_RELAY_FEE));
    }
}
