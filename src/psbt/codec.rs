//! BIP174 binary encoding
//!
//! `magic || global map || input maps || output maps`, where each map is a
//! sequence of `<compact key len><key type><key data><compact value len><value>`
//! records closed by a single 0x00 byte. Records are written in key-type
//! order, keyed entries in ascending key order, and unknown records last.

use std::collections::{BTreeMap, HashSet};

use super::artifact::{Psbt, PsbtInput, PsbtOutput, PSBT_VERSION};
use super::PsbtError;
use crate::core::encode::{write_compact_size, write_var_bytes, Reader};
use crate::core::{Script, SigHashType, Transaction, TxOut};
use crate::crypto::{ChildNumber, DerivationPath, KeySource, PubKey};

/// `psbt` followed by 0xff
pub const PSBT_MAGIC: [u8; 5] = [0x70, 0x73, 0x62, 0x74, 0xff];

const SEPARATOR: u8 = 0x00;

// Global types
const GLOBAL_UNSIGNED_TX: u8 = 0x00;
const GLOBAL_XPUB: u8 = 0x01;
const GLOBAL_VERSION: u8 = 0xfb;

// Input types
const IN_NON_WITNESS_UTXO: u8 = 0x00;
const IN_WITNESS_UTXO: u8 = 0x01;
const IN_PARTIAL_SIG: u8 = 0x02;
const IN_SIGHASH_TYPE: u8 = 0x03;
const IN_REDEEM_SCRIPT: u8 = 0x04;
const IN_WITNESS_SCRIPT: u8 = 0x05;
const IN_BIP32_DERIVATION: u8 = 0x06;
const IN_FINAL_SCRIPTSIG: u8 = 0x07;
const IN_FINAL_SCRIPTWITNESS: u8 = 0x08;

// Output types
const OUT_REDEEM_SCRIPT: u8 = 0x00;
const OUT_WITNESS_SCRIPT: u8 = 0x01;
const OUT_BIP32_DERIVATION: u8 = 0x02;

// =============================================================================
// Encoding
// =============================================================================

fn write_record(out: &mut Vec<u8>, key_type: u8, key_data: &[u8], value: &[u8]) {
    write_compact_size(out, 1 + key_data.len() as u64);
    out.push(key_type);
    out.extend_from_slice(key_data);
    write_var_bytes(out, value);
}

fn write_unknown(out: &mut Vec<u8>, unknown: &BTreeMap<Vec<u8>, Vec<u8>>) {
    for (key, value) in unknown {
        write_var_bytes(out, key);
        write_var_bytes(out, value);
    }
}

fn encode_key_source(source: &KeySource) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 4 * source.path.len());
    out.extend_from_slice(&source.fingerprint);
    for child in source.path.segments() {
        out.extend_from_slice(&child.to_u32().to_le_bytes());
    }
    out
}

fn encode_witness(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    write_compact_size(&mut out, items.len() as u64);
    for item in items {
        write_var_bytes(&mut out, item);
    }
    out
}

fn write_derivations(out: &mut Vec<u8>, key_type: u8, derivations: &BTreeMap<PubKey, KeySource>) {
    for (key, source) in derivations {
        write_record(out, key_type, &key.to_bytes(), &encode_key_source(source));
    }
}

fn write_input(out: &mut Vec<u8>, input: &PsbtInput) {
    if let Some(tx) = &input.non_witness_utxo {
        write_record(out, IN_NON_WITNESS_UTXO, &[], &tx.serialize());
    }
    if let Some(utxo) = &input.witness_utxo {
        write_record(out, IN_WITNESS_UTXO, &[], &utxo.encode());
    }
    for (key, sig) in &input.partial_sigs {
        write_record(out, IN_PARTIAL_SIG, &key.to_bytes(), sig);
    }
    if let Some(sighash) = input.sighash_type {
        write_record(out, IN_SIGHASH_TYPE, &[], &sighash.to_u32().to_le_bytes());
    }
    if let Some(script) = &input.redeem_script {
        write_record(out, IN_REDEEM_SCRIPT, &[], script.as_bytes());
    }
    if let Some(script) = &input.witness_script {
        write_record(out, IN_WITNESS_SCRIPT, &[], script.as_bytes());
    }
    write_derivations(out, IN_BIP32_DERIVATION, &input.bip32_derivation);
    if let Some(script) = &input.final_script_sig {
        write_record(out, IN_FINAL_SCRIPTSIG, &[], script.as_bytes());
    }
    if let Some(witness) = &input.final_script_witness {
        write_record(out, IN_FINAL_SCRIPTWITNESS, &[], &encode_witness(witness));
    }
    write_unknown(out, &input.unknown);
    out.push(SEPARATOR);
}

fn write_output(out: &mut Vec<u8>, output: &PsbtOutput) {
    if let Some(script) = &output.redeem_script {
        write_record(out, OUT_REDEEM_SCRIPT, &[], script.as_bytes());
    }
    if let Some(script) = &output.witness_script {
        write_record(out, OUT_WITNESS_SCRIPT, &[], script.as_bytes());
    }
    write_derivations(out, OUT_BIP32_DERIVATION, &output.bip32_derivation);
    write_unknown(out, &output.unknown);
    out.push(SEPARATOR);
}

/// Serialize to BIP174 binary form
pub fn serialize(psbt: &Psbt) -> Vec<u8> {
    let mut out = PSBT_MAGIC.to_vec();

    write_record(
        &mut out,
        GLOBAL_UNSIGNED_TX,
        &[],
        &psbt.unsigned_tx.serialize_no_witness(),
    );
    for (xpub, source) in &psbt.xpubs {
        write_record(&mut out, GLOBAL_XPUB, xpub, &encode_key_source(source));
    }
    if psbt.version > 0 {
        write_record(&mut out, GLOBAL_VERSION, &[], &psbt.version.to_le_bytes());
    }
    write_unknown(&mut out, &psbt.unknown);
    out.push(SEPARATOR);

    for input in &psbt.inputs {
        write_input(&mut out, input);
    }
    for output in &psbt.outputs {
        write_output(&mut out, output);
    }
    out
}

// =============================================================================
// Decoding
// =============================================================================

/// One key-value record
struct Record<'a> {
    key: &'a [u8],
    value: &'a [u8],
}

impl<'a> Record<'a> {
    fn key_type(&self) -> u8 {
        self.key[0]
    }

    fn key_data(&self) -> &'a [u8] {
        &self.key[1..]
    }

    /// Value of a record whose key must have no key data
    fn keyless(&self, what: &str) -> Result<&'a [u8], PsbtError> {
        if !self.key_data().is_empty() {
            return Err(PsbtError::Malformed(format!("{} key carries data", what)));
        }
        Ok(self.value)
    }
}

/// Read records up to the map separator, rejecting duplicate keys
fn read_map<'a>(reader: &mut Reader<'a>) -> Result<Vec<Record<'a>>, PsbtError> {
    let mut records = Vec::new();
    let mut seen = HashSet::new();
    loop {
        let key = reader.read_var_bytes()?;
        if key.is_empty() {
            return Ok(records);
        }
        let value = reader.read_var_bytes()?;
        if !seen.insert(key) {
            return Err(PsbtError::DuplicateKey(hex::encode(key)));
        }
        records.push(Record { key, value });
    }
}

fn decode_key_source(value: &[u8]) -> Result<KeySource, PsbtError> {
    if value.len() < 4 || value.len() % 4 != 0 {
        return Err(PsbtError::Malformed("bad key origin length".to_string()));
    }
    let fingerprint = [value[0], value[1], value[2], value[3]];
    let path: Vec<ChildNumber> = value[4..]
        .chunks_exact(4)
        .map(|c| ChildNumber::from_u32(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
        .collect();
    Ok(KeySource::new(fingerprint, DerivationPath::from(path)))
}

fn decode_witness(value: &[u8]) -> Result<Vec<Vec<u8>>, PsbtError> {
    let mut reader = Reader::new(value);
    let count = reader.read_compact_size()?;
    let mut items = Vec::new();
    for _ in 0..count {
        items.push(reader.read_var_bytes()?.to_vec());
    }
    reader.finish()?;
    Ok(items)
}

fn decode_sighash(value: &[u8]) -> Result<SigHashType, PsbtError> {
    let raw: [u8; 4] = value
        .try_into()
        .map_err(|_| PsbtError::Malformed("sighash type must be 4 bytes".to_string()))?;
    let raw = u32::from_le_bytes(raw);
    u8::try_from(raw)
        .ok()
        .and_then(SigHashType::from_byte)
        .ok_or_else(|| PsbtError::Malformed(format!("unsupported sighash type {:#x}", raw)))
}

fn decode_input(records: Vec<Record<'_>>) -> Result<PsbtInput, PsbtError> {
    let mut input = PsbtInput::default();
    for record in records {
        match record.key_type() {
            IN_NON_WITNESS_UTXO => {
                let value = record.keyless("non-witness utxo")?;
                input.non_witness_utxo = Some(Transaction::deserialize(value)?);
            }
            IN_WITNESS_UTXO => {
                let mut reader = Reader::new(record.keyless("witness utxo")?);
                let utxo = TxOut::decode_from(&mut reader)?;
                reader.finish()?;
                input.witness_utxo = Some(utxo);
            }
            IN_PARTIAL_SIG => {
                let key = PubKey::from_slice(record.key_data())?;
                input.partial_sigs.insert(key, record.value.to_vec());
            }
            IN_SIGHASH_TYPE => {
                input.sighash_type = Some(decode_sighash(record.keyless("sighash type")?)?);
            }
            IN_REDEEM_SCRIPT => {
                input.redeem_script = Some(Script::from_bytes(record.keyless("redeem script")?.to_vec()));
            }
            IN_WITNESS_SCRIPT => {
                input.witness_script = Some(Script::from_bytes(record.keyless("witness script")?.to_vec()));
            }
            IN_BIP32_DERIVATION => {
                let key = PubKey::from_slice(record.key_data())?;
                input.bip32_derivation.insert(key, decode_key_source(record.value)?);
            }
            IN_FINAL_SCRIPTSIG => {
                input.final_script_sig = Some(Script::from_bytes(record.keyless("final scriptSig")?.to_vec()));
            }
            IN_FINAL_SCRIPTWITNESS => {
                input.final_script_witness = Some(decode_witness(record.keyless("final witness")?)?);
            }
            _ => {
                input.unknown.insert(record.key.to_vec(), record.value.to_vec());
            }
        }
    }
    Ok(input)
}

fn decode_output(records: Vec<Record<'_>>) -> Result<PsbtOutput, PsbtError> {
    let mut output = PsbtOutput::default();
    for record in records {
        match record.key_type() {
            OUT_REDEEM_SCRIPT => {
                output.redeem_script = Some(Script::from_bytes(record.keyless("redeem script")?.to_vec()));
            }
            OUT_WITNESS_SCRIPT => {
                output.witness_script = Some(Script::from_bytes(record.keyless("witness script")?.to_vec()));
            }
            OUT_BIP32_DERIVATION => {
                let key = PubKey::from_slice(record.key_data())?;
                output.bip32_derivation.insert(key, decode_key_source(record.value)?);
            }
            _ => {
                output.unknown.insert(record.key.to_vec(), record.value.to_vec());
            }
        }
    }
    Ok(output)
}

/// Parse BIP174 binary form
pub fn deserialize(bytes: &[u8]) -> Result<Psbt, PsbtError> {
    let mut reader = Reader::new(bytes);
    if reader.read_bytes(PSBT_MAGIC.len()).ok() != Some(&PSBT_MAGIC[..]) {
        return Err(PsbtError::InvalidMagic);
    }

    let mut unsigned_tx = None;
    let mut version = PSBT_VERSION;
    let mut xpubs = BTreeMap::new();
    let mut unknown = BTreeMap::new();

    for record in read_map(&mut reader)? {
        match record.key_type() {
            GLOBAL_UNSIGNED_TX => {
                let tx = Transaction::deserialize(record.keyless("unsigned tx")?)?;
                if tx.inputs.is_empty() {
                    return Err(PsbtError::Malformed("transaction has no inputs".to_string()));
                }
                if tx.checked_total_output().is_none() {
                    return Err(PsbtError::Malformed("output value overflow".to_string()));
                }
                unsigned_tx = Some(tx);
            }
            GLOBAL_XPUB => {
                if record.key_data().len() != 78 {
                    return Err(PsbtError::Malformed("xpub key must be 78 bytes".to_string()));
                }
                xpubs.insert(record.key_data().to_vec(), decode_key_source(record.value)?);
            }
            GLOBAL_VERSION => {
                let raw: [u8; 4] = record
                    .keyless("version")?
                    .try_into()
                    .map_err(|_| PsbtError::Malformed("version must be 4 bytes".to_string()))?;
                version = u32::from_le_bytes(raw);
                if version > PSBT_VERSION {
                    return Err(PsbtError::Malformed(format!("unsupported version {}", version)));
                }
            }
            _ => {
                unknown.insert(record.key.to_vec(), record.value.to_vec());
            }
        }
    }

    let unsigned_tx = unsigned_tx.ok_or(PsbtError::MissingUnsignedTx)?;
    if unsigned_tx
        .inputs
        .iter()
        .any(|i| !i.script_sig.is_empty() || !i.witness.is_empty())
    {
        return Err(PsbtError::UnsignedTxHasSignatures);
    }

    let mut inputs = Vec::with_capacity(unsigned_tx.inputs.len());
    for _ in 0..unsigned_tx.inputs.len() {
        inputs.push(decode_input(read_map(&mut reader)?)?);
    }
    let mut outputs = Vec::with_capacity(unsigned_tx.outputs.len());
    for _ in 0..unsigned_tx.outputs.len() {
        outputs.push(decode_output(read_map(&mut reader)?)?);
    }
    reader.finish()?;

    Ok(Psbt {
        unsigned_tx,
        version,
        xpubs,
        unknown,
        inputs,
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OutPoint, TxIn, Txid};

    fn sample() -> Psbt {
        let tx = Transaction::new(
            vec![
                TxIn::new(OutPoint::new(Txid([7; 32]), 1), 0xffff_fffd),
                TxIn::new(OutPoint::new(Txid([8; 32]), 0), 0xffff_fffd),
            ],
            vec![TxOut::new(90_000, Script::p2wpkh(&[9; 20]))],
        );
        let mut psbt = Psbt::from_unsigned_tx(tx).unwrap();
        let key = PubKey::from_hex(
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
        )
        .unwrap();
        psbt.inputs[0].witness_utxo = Some(TxOut::new(60_000, Script::p2wpkh(&key.hash160())));
        psbt.inputs[0]
            .bip32_derivation
            .insert(key, "[0a0b0c0d/84'/1'/0'/0/3]".parse().unwrap());
        psbt.inputs[1].witness_script = Some(Script::from_bytes(vec![0x51]));
        psbt.inputs[1].sighash_type = Some(SigHashType::All);
        psbt.inputs[1].final_script_witness = Some(vec![vec![], vec![1, 2]]);
        psbt.outputs[0].unknown.insert(vec![0xfc, 1, 2], vec![3]);
        psbt
    }

    #[test]
    fn test_roundtrip_preserves_everything() {
        let psbt = sample();
        let bytes = serialize(&psbt);
        assert_eq!(&bytes[..5], b"psbt\xff");

        let decoded = deserialize(&bytes).unwrap();
        assert_eq!(decoded, psbt);
        assert_eq!(serialize(&decoded), bytes);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = serialize(&sample());
        bytes[0] = b'x';
        assert_eq!(deserialize(&bytes), Err(PsbtError::InvalidMagic));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let psbt = sample();
        let mut bytes = PSBT_MAGIC.to_vec();
        let tx = psbt.unsigned_tx.serialize_no_witness();
        write_record(&mut bytes, GLOBAL_UNSIGNED_TX, &[], &tx);
        write_record(&mut bytes, GLOBAL_UNSIGNED_TX, &[], &tx);
        bytes.push(SEPARATOR);
        assert!(matches!(deserialize(&bytes), Err(PsbtError::DuplicateKey(_))));
    }

    #[test]
    fn test_truncated_rejected() {
        let bytes = serialize(&sample());
        assert!(deserialize(&bytes[..bytes.len() - 1]).is_err());
        assert!(deserialize(&PSBT_MAGIC).is_err());
    }

    #[test]
    fn test_overflowing_outputs_rejected() {
        let mut psbt = sample();
        psbt.unsigned_tx.outputs = vec![
            TxOut::new(u64::MAX, Script::p2wpkh(&[9; 20])),
            TxOut::new(1, Script::p2wpkh(&[9; 20])),
        ];
        psbt.outputs.push(Default::default());
        let bytes = serialize(&psbt);
        assert!(matches!(deserialize(&bytes), Err(PsbtError::Malformed(_))));
    }

    #[test]
    fn test_missing_unsigned_tx() {
        let mut bytes = PSBT_MAGIC.to_vec();
        bytes.push(SEPARATOR);
        assert_eq!(deserialize(&bytes), Err(PsbtError::MissingUnsignedTx));
    }
}
