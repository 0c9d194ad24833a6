//! Partial signature coordination
//!
//! Every operation takes an artifact snapshot and returns a new one; a
//! failed operation leaves its input untouched. Merging is a union of
//! signatures and metadata, so co-signers may exchange artifacts in any
//! order and any grouping and still converge on the same result.

use serde::Serialize;
use std::collections::BTreeMap;

use super::artifact::{Psbt, PsbtInput, PsbtOutput, SigningState};
use super::PsbtError;
use crate::core::script::push_all;
use crate::core::{Script, ScriptType, SigHashType, Transaction, Txid};
use crate::crypto::{ExtendedKey, KeyError, KeyPair, PubKey};

// =============================================================================
// Input script analysis
// =============================================================================

/// Spending template of an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Template {
    P2pkh,
    P2wpkh,
    P2shP2wpkh,
    P2shMultisig,
    P2wshMultisig,
    P2shP2wshMultisig,
}

impl Template {
    fn is_segwit(&self) -> bool {
        !matches!(self, Template::P2pkh | Template::P2shMultisig)
    }
}

/// What it takes to satisfy one input
struct InputScript {
    template: Template,
    /// Multisig keys in script order
    keys: Vec<PubKey>,
    /// Key hash of single-key templates
    key_hash: Option<[u8; 20]>,
    threshold: usize,
    script_code: Script,
    value: u64,
}

impl InputScript {
    fn contains(&self, key: &PubKey) -> bool {
        match self.key_hash {
            Some(hash) => key.hash160() == hash,
            None => self.keys.contains(key),
        }
    }

    fn sighash(
        &self,
        tx: &Transaction,
        index: usize,
        sighash: SigHashType,
    ) -> Result<[u8; 32], PsbtError> {
        let digest = if self.template.is_segwit() {
            tx.segwit_sighash(index, &self.script_code, self.value, sighash)?
        } else {
            tx.legacy_sighash(index, &self.script_code, sighash)?
        };
        Ok(digest)
    }

    /// Check a partial signature (DER + sighash byte) from `key`
    fn verify(&self, tx: &Transaction, index: usize, key: &PubKey, signature: &[u8]) -> bool {
        let (sighash_byte, der) = match signature.split_last() {
            Some(parts) => parts,
            None => return false,
        };
        let sighash = match SigHashType::from_byte(*sighash_byte) {
            Some(sighash) => sighash,
            None => return false,
        };
        match self.sighash(tx, index, sighash) {
            Ok(digest) => key.verify_digest(&digest, der).unwrap_or(false),
            Err(_) => false,
        }
    }
}

fn single_key(template: Template, hash: [u8; 20], value: u64) -> InputScript {
    InputScript {
        template,
        keys: Vec::new(),
        key_hash: Some(hash),
        threshold: 1,
        script_code: Script::p2pkh(&hash),
        value,
    }
}

fn multisig(
    template: Template,
    script: &Script,
    value: u64,
    index: usize,
) -> Result<InputScript, PsbtError> {
    let (threshold, keys) = script
        .parse_multisig()
        .ok_or(PsbtError::UnsupportedScript(index))?;
    Ok(InputScript {
        template,
        keys,
        key_hash: None,
        threshold,
        script_code: script.clone(),
        value,
    })
}

fn witness_script_for(
    input: &PsbtInput,
    program: &[u8; 32],
    index: usize,
) -> Result<Script, PsbtError> {
    let script = input
        .witness_script
        .as_ref()
        .ok_or(PsbtError::MissingScript(index))?;
    if script.sha256() != *program {
        return Err(PsbtError::ScriptMismatch(index));
    }
    Ok(script.clone())
}

fn analyze(psbt: &Psbt, index: usize) -> Result<InputScript, PsbtError> {
    let utxo = psbt.spent_output(index)?;
    let input = psbt.input(index)?;
    let value = utxo.value;

    match utxo.script_pubkey.classify() {
        ScriptType::P2pkh(hash) => Ok(single_key(Template::P2pkh, hash, value)),
        ScriptType::P2wpkh(hash) => Ok(single_key(Template::P2wpkh, hash, value)),
        ScriptType::P2wsh(program) => {
            let witness_script = witness_script_for(input, &program, index)?;
            multisig(Template::P2wshMultisig, &witness_script, value, index)
        }
        ScriptType::P2sh(hash) => {
            let redeem = input
                .redeem_script
                .as_ref()
                .ok_or(PsbtError::MissingScript(index))?;
            if redeem.hash160() != hash {
                return Err(PsbtError::ScriptMismatch(index));
            }
            match redeem.classify() {
                ScriptType::P2wpkh(key_hash) => Ok(single_key(Template::P2shP2wpkh, key_hash, value)),
                ScriptType::P2wsh(program) => {
                    let witness_script = witness_script_for(input, &program, index)?;
                    multisig(Template::P2shP2wshMultisig, &witness_script, value, index)
                }
                ScriptType::Multisig { .. } => multisig(Template::P2shMultisig, redeem, value, index),
                _ => Err(PsbtError::UnsupportedScript(index)),
            }
        }
        _ => Err(PsbtError::UnsupportedScript(index)),
    }
}

// =============================================================================
// Signing
// =============================================================================

fn sign_in_place(psbt: &mut Psbt, index: usize, key_pair: &KeyPair) -> Result<(), PsbtError> {
    if psbt.input(index)?.is_finalized() {
        return Err(PsbtError::AlreadyFinalized);
    }
    let script = analyze(psbt, index)?;
    let key = key_pair.public_key;
    if !script.contains(&key) {
        return Err(PsbtError::KeyNotInScript {
            key: key.to_hex(),
            input: index,
        });
    }

    let sighash = psbt.inputs[index].sighash();
    let digest = script.sighash(&psbt.unsigned_tx, index, sighash)?;
    let mut signature = key_pair.sign_digest(&digest)?;
    signature.push(sighash.to_byte());

    psbt.inputs[index].partial_sigs.insert(key, signature);
    log::debug!("Signed input {} of {} with {}", index, psbt.txid(), key);
    Ok(())
}

/// Add `key_pair`'s signature to input `index`
pub fn sign_input(psbt: &Psbt, index: usize, key_pair: &KeyPair) -> Result<Psbt, PsbtError> {
    let mut signed = psbt.clone();
    sign_in_place(&mut signed, index, key_pair)?;
    Ok(signed)
}

/// Add `key_pair`'s signature to every input.
///
/// Fails with `KeyNotInScript` if any input cannot be signed by this key.
pub fn sign(psbt: &Psbt, key_pair: &KeyPair) -> Result<Psbt, PsbtError> {
    let mut signed = psbt.clone();
    for index in 0..signed.inputs.len() {
        sign_in_place(&mut signed, index, key_pair)?;
    }
    log::info!(
        "Signed {} inputs of {} with {}",
        signed.inputs.len(),
        signed.txid(),
        key_pair.public_key
    );
    Ok(signed)
}

/// Sign every input whose key origins descend from `master`.
///
/// Returns the signed artifact and the number of signatures added.
pub fn sign_with_xprv(psbt: &Psbt, master: &ExtendedKey) -> Result<(Psbt, usize), PsbtError> {
    if !master.is_private() {
        return Err(PsbtError::Key(KeyError::InvalidPrivateKey));
    }
    let fingerprint = master.fingerprint();
    let mut signed = psbt.clone();
    let mut added = 0;

    for index in 0..signed.inputs.len() {
        if signed.inputs[index].is_finalized() {
            continue;
        }
        let ours: Vec<_> = signed.inputs[index]
            .bip32_derivation
            .iter()
            .filter(|(_, origin)| origin.fingerprint == fingerprint)
            .map(|(key, origin)| (*key, origin.path.clone()))
            .collect();

        for (key, path) in ours {
            let child = master.derive_path(&path)?;
            if child.public_key() != key {
                log::warn!(
                    "Key origin {} on input {} does not match derived key",
                    path,
                    index
                );
                continue;
            }
            let key_pair = child
                .key_pair()
                .ok_or(PsbtError::Key(KeyError::InvalidPrivateKey))?;
            sign_in_place(&mut signed, index, &key_pair)?;
            added += 1;
        }
    }

    log::info!(
        "Added {} signatures to {} from master {}",
        added,
        signed.txid(),
        hex::encode(fingerprint)
    );
    Ok((signed, added))
}

// =============================================================================
// Counting
// =============================================================================

/// Valid signatures on input `index` from distinct keys in its script
pub fn count_signatures(psbt: &Psbt, index: usize) -> Result<usize, PsbtError> {
    let script = analyze(psbt, index)?;
    let input = psbt.input(index)?;
    Ok(input
        .partial_sigs
        .iter()
        .filter(|(key, sig)| script.contains(key) && script.verify(&psbt.unsigned_tx, index, key, sig))
        .count())
}

/// Signatures required on input `index`
pub fn required_signatures(psbt: &Psbt, index: usize) -> Result<usize, PsbtError> {
    Ok(analyze(psbt, index)?.threshold)
}

/// True once every input has enough valid signatures to finalize
pub fn has_threshold(psbt: &Psbt) -> bool {
    !psbt.inputs.is_empty()
        && (0..psbt.inputs.len()).all(|index| {
            psbt.inputs[index].is_finalized()
                || match (count_signatures(psbt, index), required_signatures(psbt, index)) {
                    (Ok(found), Ok(required)) => found >= required,
                    _ => false,
                }
        })
}

// =============================================================================
// Merging
// =============================================================================

/// Union of two maps; on conflicting values the smaller one wins
fn merge_map<K, V>(a: &BTreeMap<K, V>, b: &BTreeMap<K, V>) -> BTreeMap<K, V>
where
    K: Ord + Clone,
    V: Ord + Clone,
{
    let mut merged = a.clone();
    for (key, value) in b {
        match merged.get_mut(key) {
            Some(existing) => {
                if *value < *existing {
                    *existing = value.clone();
                }
            }
            None => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

/// Either side if only one is set; the smaller by `order_key` if both differ
fn merge_option<T: Clone, K: Ord>(
    a: &Option<T>,
    b: &Option<T>,
    order_key: impl Fn(&T) -> K,
) -> Option<T> {
    match (a, b) {
        (Some(x), Some(y)) => {
            if order_key(y) < order_key(x) {
                Some(y.clone())
            } else {
                Some(x.clone())
            }
        }
        (Some(x), None) | (None, Some(x)) => Some(x.clone()),
        (None, None) => None,
    }
}

fn script_bytes(script: &Script) -> Vec<u8> {
    script.as_bytes().to_vec()
}

fn merge_input(a: &PsbtInput, b: &PsbtInput) -> PsbtInput {
    PsbtInput {
        non_witness_utxo: merge_option(&a.non_witness_utxo, &b.non_witness_utxo, |tx| tx.serialize()),
        witness_utxo: merge_option(&a.witness_utxo, &b.witness_utxo, |utxo| utxo.encode()),
        partial_sigs: merge_map(&a.partial_sigs, &b.partial_sigs),
        sighash_type: merge_option(&a.sighash_type, &b.sighash_type, |s| vec![s.to_byte()]),
        redeem_script: merge_option(&a.redeem_script, &b.redeem_script, script_bytes),
        witness_script: merge_option(&a.witness_script, &b.witness_script, script_bytes),
        bip32_derivation: merge_map(&a.bip32_derivation, &b.bip32_derivation),
        final_script_sig: merge_option(&a.final_script_sig, &b.final_script_sig, script_bytes),
        final_script_witness: merge_option(&a.final_script_witness, &b.final_script_witness, |w| {
            w.clone()
        }),
        unknown: merge_map(&a.unknown, &b.unknown),
    }
}

fn merge_output(a: &PsbtOutput, b: &PsbtOutput) -> PsbtOutput {
    PsbtOutput {
        redeem_script: merge_option(&a.redeem_script, &b.redeem_script, script_bytes),
        witness_script: merge_option(&a.witness_script, &b.witness_script, script_bytes),
        bip32_derivation: merge_map(&a.bip32_derivation, &b.bip32_derivation),
        unknown: merge_map(&a.unknown, &b.unknown),
    }
}

/// Conflicting signatures from one key keep the one that verifies, or the
/// smaller encoding when both or neither do
fn resolve_signature_conflicts(merged: &mut Psbt, a: &PsbtInput, b: &PsbtInput, index: usize) {
    let conflicts: Vec<PubKey> = a
        .partial_sigs
        .iter()
        .filter(|(key, sig)| b.partial_sigs.get(*key).map_or(false, |other| other != *sig))
        .map(|(key, _)| *key)
        .collect();
    if conflicts.is_empty() {
        return;
    }

    let script = analyze(merged, index).ok();
    for key in conflicts {
        let (x, y) = (&a.partial_sigs[&key], &b.partial_sigs[&key]);
        let verifies = |sig: &[u8]| {
            script
                .as_ref()
                .map_or(false, |s| s.verify(&merged.unsigned_tx, index, &key, sig))
        };
        let keep = match (verifies(x), verifies(y)) {
            (true, false) => x,
            (false, true) => y,
            _ => std::cmp::min(x, y),
        };
        log::warn!("Conflicting signatures from {} on input {}", key, index);
        merged.inputs[index].partial_sigs.insert(key, keep.clone());
    }
}

/// Per-input and per-output maps must line up with the transaction
fn check_shape(psbt: &Psbt) -> Result<(), PsbtError> {
    let tx = &psbt.unsigned_tx;
    if psbt.inputs.len() != tx.inputs.len() || psbt.outputs.len() != tx.outputs.len() {
        return Err(PsbtError::Malformed(format!(
            "{} input and {} output maps for a transaction with {} inputs and {} outputs",
            psbt.inputs.len(),
            psbt.outputs.len(),
            tx.inputs.len(),
            tx.outputs.len()
        )));
    }
    Ok(())
}

/// Combine two artifacts for the same transaction
pub fn merge(a: &Psbt, b: &Psbt) -> Result<Psbt, PsbtError> {
    check_shape(a)?;
    check_shape(b)?;
    let (txid_a, txid_b) = (a.txid(), b.txid());
    if txid_a != txid_b {
        return Err(PsbtError::TransactionMismatch {
            expected: txid_a,
            found: txid_b,
        });
    }

    let mut merged = Psbt {
        unsigned_tx: a.unsigned_tx.clone(),
        version: a.version.max(b.version),
        xpubs: merge_map(&a.xpubs, &b.xpubs),
        unknown: merge_map(&a.unknown, &b.unknown),
        inputs: a
            .inputs
            .iter()
            .zip(&b.inputs)
            .map(|(x, y)| merge_input(x, y))
            .collect(),
        outputs: a
            .outputs
            .iter()
            .zip(&b.outputs)
            .map(|(x, y)| merge_output(x, y))
            .collect(),
    };
    for (index, (x, y)) in a.inputs.iter().zip(&b.inputs).enumerate() {
        resolve_signature_conflicts(&mut merged, x, y, index);
    }

    log::debug!("Merged PSBTs for {} ({})", txid_a, merged.state());
    Ok(merged)
}

/// Fold any number of artifacts into one
pub fn merge_all(psbts: &[Psbt]) -> Result<Psbt, PsbtError> {
    let (first, rest) = psbts
        .split_first()
        .ok_or_else(|| PsbtError::Malformed("nothing to merge".to_string()))?;
    rest.iter().try_fold(first.clone(), |acc, next| merge(&acc, next))
}

// =============================================================================
// Finalization
// =============================================================================

fn finalize_input(psbt: &Psbt, index: usize) -> Result<PsbtInput, PsbtError> {
    let script = analyze(psbt, index)?;
    let input = psbt.input(index)?;
    let tx = &psbt.unsigned_tx;

    // Candidate signers in script order
    let candidates: Vec<&PubKey> = match script.key_hash {
        Some(_) => input.partial_sigs.keys().filter(|k| script.contains(k)).collect(),
        None => script.keys.iter().collect(),
    };

    let mut valid: Vec<(PubKey, &[u8])> = Vec::new();
    let mut invalid = None;
    for key in candidates {
        if let Some(signature) = input.partial_sigs.get(key) {
            if script.verify(tx, index, key, signature) {
                valid.push((*key, signature.as_slice()));
            } else {
                log::warn!("Dropping invalid signature from {} on input {}", key, index);
                invalid.get_or_insert(*key);
            }
        }
    }

    if valid.len() < script.threshold {
        return Err(match invalid {
            Some(key) => PsbtError::InvalidSignature {
                key: key.to_hex(),
                input: index,
            },
            None => PsbtError::InsufficientSignatures {
                input: index,
                found: valid.len(),
                required: script.threshold,
            },
        });
    }
    valid.truncate(script.threshold);

    let (script_sig, witness) = match script.template {
        Template::P2pkh => {
            let (key, sig) = &valid[0];
            (push_all(&[*sig, key.to_bytes().as_slice()]), None)
        }
        Template::P2wpkh | Template::P2shP2wpkh => {
            let (key, sig) = &valid[0];
            let script_sig = match (&script.template, &input.redeem_script) {
                (Template::P2shP2wpkh, Some(redeem)) => push_all(&[redeem.as_bytes()]),
                _ => Script::new(),
            };
            (script_sig, Some(vec![sig.to_vec(), key.to_bytes()]))
        }
        Template::P2shMultisig => {
            let mut elements: Vec<&[u8]> = vec![&[]];
            elements.extend(valid.iter().map(|(_, sig)| *sig));
            elements.push(script.script_code.as_bytes());
            (push_all(&elements), None)
        }
        Template::P2wshMultisig | Template::P2shP2wshMultisig => {
            let mut witness = vec![Vec::new()];
            witness.extend(valid.iter().map(|(_, sig)| sig.to_vec()));
            witness.push(script.script_code.as_bytes().to_vec());
            let script_sig = match (&script.template, &input.redeem_script) {
                (Template::P2shP2wshMultisig, Some(redeem)) => push_all(&[redeem.as_bytes()]),
                _ => Script::new(),
            };
            (script_sig, Some(witness))
        }
    };

    // Signing metadata is no longer needed once the input is final
    Ok(PsbtInput {
        non_witness_utxo: input.non_witness_utxo.clone(),
        witness_utxo: input.witness_utxo.clone(),
        final_script_sig: (!script_sig.is_empty()).then_some(script_sig),
        final_script_witness: witness,
        unknown: input.unknown.clone(),
        ..PsbtInput::default()
    })
}

/// Finalize every input, producing the terminal artifact.
///
/// Each input needs its threshold of valid signatures from distinct
/// script keys; the first M in script key order are used.
pub fn finalize_psbt(psbt: &Psbt) -> Result<Psbt, PsbtError> {
    if psbt.is_finalized() {
        return Err(PsbtError::AlreadyFinalized);
    }

    let mut finalized = psbt.clone();
    for index in 0..psbt.inputs.len() {
        if psbt.inputs[index].is_finalized() {
            continue;
        }
        finalized.inputs[index] = finalize_input(psbt, index)?;
    }

    log::info!("Finalized PSBT {}", finalized.txid());
    Ok(finalized)
}

/// Finalize and extract the network-ready transaction
pub fn finalize(psbt: &Psbt) -> Result<Transaction, PsbtError> {
    finalize_psbt(psbt)?.extract_tx()
}

// =============================================================================
// Inspection
// =============================================================================

/// Signing progress of one input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputSummary {
    pub index: usize,
    pub outpoint: String,
    pub value: Option<u64>,
    pub signatures: usize,
    pub required: Option<usize>,
    pub finalized: bool,
}

/// Human-oriented overview of an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PsbtSummary {
    pub txid: Txid,
    pub state: SigningState,
    pub fee: Option<u64>,
    pub inputs: Vec<InputSummary>,
    pub outputs: Vec<u64>,
}

pub fn inspect(psbt: &Psbt) -> PsbtSummary {
    let inputs = psbt
        .inputs
        .iter()
        .enumerate()
        .map(|(index, input)| InputSummary {
            index,
            outpoint: psbt
                .unsigned_tx
                .inputs
                .get(index)
                .map(|i| i.previous_output.to_string())
                .unwrap_or_default(),
            value: psbt.spent_output(index).ok().map(|o| o.value),
            signatures: count_signatures(psbt, index).unwrap_or(0),
            required: required_signatures(psbt, index).ok(),
            finalized: input.is_finalized(),
        })
        .collect();

    PsbtSummary {
        txid: psbt.txid(),
        state: psbt.state(),
        fee: psbt.fee().ok(),
        inputs,
        outputs: psbt.unsigned_tx.outputs.iter().map(|o| o.value).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        build_single_sig, InputKind, Network, OutPoint, ScriptVariant, SpendInfo, TxOut, Utxo,
        WalletUtxo,
    };
    use crate::multisig::MultisigConfig;
    use crate::wallet::TransactionAssembler;

    fn signers() -> Vec<KeyPair> {
        (1u8..=3)
            .map(|n| KeyPair::from_secret_bytes(&[n; 32]).unwrap())
            .collect()
    }

    fn multisig_psbt(variant: ScriptVariant, keys: &[KeyPair]) -> Psbt {
        let pubkeys: Vec<PubKey> = keys.iter().map(|k| k.public_key).collect();
        let config = MultisigConfig::new(2, &pubkeys, variant, None).unwrap();
        let address = config.address(Network::Testnet).unwrap();
        let utxo = WalletUtxo::new(
            Utxo::new(OutPoint::new(Txid([5; 32]), 0), 100_000, address.script_pubkey.clone()),
            SpendInfo {
                kind: config.input_kind(),
                redeem_script: address.redeem_script.clone(),
                witness_script: address.witness_script.clone(),
                key_origins: BTreeMap::new(),
            },
        );
        let pay = TxOut::new(90_000, Script::p2wpkh(&[0xaa; 20]));
        let unsigned = TransactionAssembler::default()
            .build(&[utxo], &[pay], None, 10_000)
            .unwrap();
        Psbt::from_unsigned(&unsigned).unwrap()
    }

    fn single_sig_psbt(variant: ScriptVariant, key: &KeyPair) -> Psbt {
        let address = build_single_sig(&key.public_key, variant, Network::Testnet).unwrap();
        let utxo = WalletUtxo::new(
            Utxo::new(OutPoint::new(Txid([6; 32]), 3), 50_000, address.script_pubkey.clone()),
            SpendInfo {
                kind: InputKind::SingleSig { variant },
                redeem_script: address.redeem_script.clone(),
                witness_script: None,
                key_origins: BTreeMap::new(),
            },
        );
        let pay = TxOut::new(45_000, Script::p2wpkh(&[0xbb; 20]));
        let unsigned = TransactionAssembler::default()
            .build(&[utxo], &[pay], None, 5_000)
            .unwrap();
        Psbt::from_unsigned(&unsigned).unwrap()
    }

    #[test]
    fn test_two_of_three_native_lifecycle() {
        let keys = signers();
        let psbt = multisig_psbt(ScriptVariant::NativeSegwit, &keys);
        assert_eq!(psbt.state(), SigningState::Unsigned);

        let one = sign(&psbt, &keys[0]).unwrap();
        assert_eq!(count_signatures(&one, 0).unwrap(), 1);
        assert_eq!(one.state(), SigningState::PartiallySigned);
        assert!(matches!(
            finalize(&one),
            Err(PsbtError::InsufficientSignatures {
                found: 1,
                required: 2,
                ..
            })
        ));

        let two = sign(&one, &keys[2]).unwrap();
        assert!(has_threshold(&two));
        assert_eq!(two.state(), SigningState::ThresholdReached);

        let tx = finalize(&two).unwrap();
        let witness = &tx.inputs[0].witness;
        assert_eq!(witness.len(), 4);
        assert!(witness[0].is_empty());
        assert!(tx.inputs[0].script_sig.is_empty());
        assert_eq!(tx.txid(), psbt.txid());
    }

    #[test]
    fn test_signatures_in_script_key_order() {
        let keys = signers();
        let psbt = multisig_psbt(ScriptVariant::NativeSegwit, &keys);
        let signed = sign(&sign(&psbt, &keys[2]).unwrap(), &keys[0]).unwrap();
        let tx = finalize(&signed).unwrap();

        let witness_script = psbt.inputs[0].witness_script.clone().unwrap();
        let (_, script_keys) = witness_script.parse_multisig().unwrap();
        let digest = psbt
            .unsigned_tx
            .segwit_sighash(0, &witness_script, 100_000, SigHashType::All)
            .unwrap();

        let witness = &tx.inputs[0].witness;
        let signed_by: Vec<&PubKey> = script_keys
            .iter()
            .filter(|k| **k == keys[0].public_key || **k == keys[2].public_key)
            .collect();
        for (sig, key) in witness[1..3].iter().zip(signed_by) {
            let der = &sig[..sig.len() - 1];
            assert!(key.verify_digest(&digest, der).unwrap());
        }
    }

    #[test]
    fn test_wrapped_and_legacy_multisig_finalize() {
        let keys = signers();

        let wrapped = multisig_psbt(ScriptVariant::WrappedSegwit, &keys);
        let signed = sign(&sign(&wrapped, &keys[0]).unwrap(), &keys[1]).unwrap();
        let tx = finalize(&signed).unwrap();
        assert!(!tx.inputs[0].script_sig.is_empty());
        assert_eq!(tx.inputs[0].witness.len(), 4);

        let legacy = multisig_psbt(ScriptVariant::Legacy, &keys);
        let signed = sign(&sign(&legacy, &keys[1]).unwrap(), &keys[2]).unwrap();
        let finalized = finalize_psbt(&signed).unwrap();
        assert_eq!(finalized.state(), SigningState::Finalized);
        assert!(finalized.inputs[0].partial_sigs.is_empty());
        let tx = finalized.extract_tx().unwrap();
        assert!(tx.inputs[0].witness.is_empty());
        assert_eq!(tx.inputs[0].script_sig.as_bytes()[0], 0x00);
    }

    #[test]
    fn test_single_sig_variants() {
        let key = KeyPair::from_secret_bytes(&[9; 32]).unwrap();
        for variant in ScriptVariant::ALL {
            let psbt = single_sig_psbt(variant, &key);
            let tx = finalize(&sign(&psbt, &key).unwrap()).unwrap();
            let input = &tx.inputs[0];
            match variant {
                ScriptVariant::Legacy => {
                    assert!(input.witness.is_empty());
                    assert!(!input.script_sig.is_empty());
                }
                ScriptVariant::WrappedSegwit => {
                    assert_eq!(input.witness.len(), 2);
                    assert!(!input.script_sig.is_empty());
                }
                ScriptVariant::NativeSegwit => {
                    assert_eq!(input.witness.len(), 2);
                    assert!(input.script_sig.is_empty());
                }
            }
        }
    }

    #[test]
    fn test_foreign_key_rejected() {
        let keys = signers();
        let psbt = multisig_psbt(ScriptVariant::NativeSegwit, &keys);
        let outsider = KeyPair::from_secret_bytes(&[42; 32]).unwrap();
        assert!(matches!(
            sign(&psbt, &outsider),
            Err(PsbtError::KeyNotInScript { input: 0, .. })
        ));
        assert!(matches!(
            sign_input(&psbt, 3, &keys[0]),
            Err(PsbtError::InputIndexOutOfRange { index: 3, count: 1 })
        ));
    }

    #[test]
    fn test_merge_properties() {
        let keys = signers();
        let psbt = multisig_psbt(ScriptVariant::NativeSegwit, &keys);
        let a = sign(&psbt, &keys[0]).unwrap();
        let b = sign(&psbt, &keys[1]).unwrap();
        let c = sign(&psbt, &keys[2]).unwrap();

        assert_eq!(merge(&a, &b).unwrap(), merge(&b, &a).unwrap());
        assert_eq!(merge(&a, &a).unwrap(), a);
        assert_eq!(
            merge(&merge(&a, &b).unwrap(), &c).unwrap(),
            merge(&a, &merge(&b, &c).unwrap()).unwrap()
        );

        let all = merge_all(&[a, b, c]).unwrap();
        assert_eq!(all.inputs[0].partial_sigs.len(), 3);
        assert_eq!(count_signatures(&all, 0).unwrap(), 3);
        // First two in script order are used
        assert_eq!(finalize(&all).unwrap().inputs[0].witness.len(), 4);
    }

    #[test]
    fn test_merge_different_transactions() {
        let keys = signers();
        let multisig = multisig_psbt(ScriptVariant::NativeSegwit, &keys);
        let single = single_sig_psbt(ScriptVariant::NativeSegwit, &keys[0]);
        assert!(matches!(
            merge(&multisig, &single),
            Err(PsbtError::TransactionMismatch { .. })
        ));
    }

    /// Copy of `signed` whose signature from `key` on input 0 is altered
    fn with_altered_signature(signed: &Psbt, key: &PubKey, alter: impl Fn(&mut Vec<u8>)) -> Psbt {
        let mut altered = signed.clone();
        alter(altered.inputs[0].partial_sigs.get_mut(key).unwrap());
        altered
    }

    #[test]
    fn test_conflicting_signature_keeps_valid() {
        let keys = signers();
        let psbt = multisig_psbt(ScriptVariant::NativeSegwit, &keys);
        let key = keys[0].public_key;
        let valid = sign(&psbt, &keys[0]).unwrap();

        // Invalid and byte-wise smaller than the valid signature
        let forged = with_altered_signature(&valid, &key, |sig| {
            if let Some(byte) = sig.iter_mut().skip(4).find(|b| **b > 0) {
                *byte -= 1;
            }
        });
        let forged_sig = &forged.inputs[0].partial_sigs[&key];
        let valid_sig = &valid.inputs[0].partial_sigs[&key];
        assert!(forged_sig < valid_sig);

        let ab = merge(&valid, &forged).unwrap();
        let ba = merge(&forged, &valid).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(&ab.inputs[0].partial_sigs[&key], valid_sig);
        assert_eq!(count_signatures(&ab, 0).unwrap(), 1);

        let two = merge(&ab, &sign(&psbt, &keys[1]).unwrap()).unwrap();
        assert!(finalize(&two).is_ok());
    }

    #[test]
    fn test_conflicting_invalid_signatures_keep_smaller() {
        let keys = signers();
        let psbt = multisig_psbt(ScriptVariant::NativeSegwit, &keys);
        let key = keys[0].public_key;
        let signed = sign(&psbt, &keys[0]).unwrap();
        let a = with_altered_signature(&signed, &key, |sig| sig[5] ^= 0x01);
        let b = with_altered_signature(&signed, &key, |sig| sig[6] ^= 0x01);

        let ab = merge(&a, &b).unwrap();
        let ba = merge(&b, &a).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(
            &ab.inputs[0].partial_sigs[&key],
            std::cmp::min(
                &a.inputs[0].partial_sigs[&key],
                &b.inputs[0].partial_sigs[&key]
            )
        );
    }

    #[test]
    fn test_merge_rejects_misaligned_maps() {
        let keys = signers();
        let psbt = multisig_psbt(ScriptVariant::NativeSegwit, &keys);
        let mut short = psbt.clone();
        short.inputs.clear();

        assert!(matches!(merge(&psbt, &short), Err(PsbtError::Malformed(_))));
        assert!(matches!(merge(&short, &psbt), Err(PsbtError::Malformed(_))));

        // Summaries tolerate extra maps
        let mut long = psbt.clone();
        long.inputs.push(PsbtInput::default());
        let summary = inspect(&long);
        assert_eq!(summary.inputs.len(), 2);
        assert_eq!(summary.inputs[1].outpoint, "");
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let keys = signers();
        let psbt = multisig_psbt(ScriptVariant::NativeSegwit, &keys);
        let mut signed = sign(&sign(&psbt, &keys[0]).unwrap(), &keys[1]).unwrap();

        // Replace key 1's signature with one over a different transaction
        let other = single_sig_psbt(ScriptVariant::NativeSegwit, &keys[1]);
        let foreign = sign(&other, &keys[1]).unwrap().inputs[0].partial_sigs[&keys[1].public_key].clone();
        signed.inputs[0]
            .partial_sigs
            .insert(keys[1].public_key, foreign);

        assert_eq!(count_signatures(&signed, 0).unwrap(), 1);
        assert!(!has_threshold(&signed));
        assert!(matches!(
            finalize(&signed),
            Err(PsbtError::InvalidSignature { input: 0, .. })
        ));

        // A third valid signature still reaches the threshold
        let rescued = sign(&signed, &keys[2]).unwrap();
        assert!(finalize(&rescued).is_ok());
    }

    #[test]
    fn test_finalized_is_terminal() {
        let keys = signers();
        let psbt = multisig_psbt(ScriptVariant::NativeSegwit, &keys);
        let signed = sign(&sign(&psbt, &keys[0]).unwrap(), &keys[1]).unwrap();
        let finalized = finalize_psbt(&signed).unwrap();
        assert_eq!(finalize_psbt(&finalized), Err(PsbtError::AlreadyFinalized));
        assert_eq!(sign(&finalized, &keys[2]), Err(PsbtError::AlreadyFinalized));
    }

    #[test]
    fn test_inspect_summary() {
        let keys = signers();
        let psbt = sign(&multisig_psbt(ScriptVariant::NativeSegwit, &keys), &keys[0]).unwrap();
        let summary = inspect(&psbt);
        assert_eq!(summary.state, SigningState::PartiallySigned);
        assert_eq!(summary.fee, Some(10_000));
        assert_eq!(summary.inputs[0].signatures, 1);
        assert_eq!(summary.inputs[0].required, Some(2));
        assert_eq!(summary.outputs, vec![90_000]);
    }

    #[test]
    fn test_serialized_roundtrip_after_signing() {
        let keys = signers();
        let psbt = sign(&multisig_psbt(ScriptVariant::WrappedSegwit, &keys), &keys[1]).unwrap();
        let decoded = Psbt::from_base64(&psbt.to_base64()).unwrap();
        assert_eq!(decoded, psbt);
        assert_eq!(count_signatures(&decoded, 0).unwrap(), 1);
    }
}
