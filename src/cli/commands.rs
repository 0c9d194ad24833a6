//! CLI commands for the co-signer
//!
//! Implements all command handlers for the CLI interface. PSBTs are read
//! from and written to files as base64 text; raw binary files are accepted
//! on input too.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::core::{build_single_sig, ScriptVariant};
use crate::crypto::{generate_mnemonic, PubKey};
use crate::multisig::{order_hex_keys, Cosigner, MultisigAccount, MultisigConfig};
use crate::psbt::{finalize, inspect, merge_all, Psbt};
use crate::transport::{reassemble_psbt, split_psbt, Chunk};
use crate::wallet::{Account, MnemonicKeyStore, Session};

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Load the config file, or defaults when it does not exist
pub fn load_config(path: Option<&Path>) -> CliResult<EngineConfig> {
    match path {
        Some(path) => Ok(EngineConfig::load_or_default(path)?),
        None => Ok(EngineConfig::default()),
    }
}

/// Read a PSBT file: base64 text, or raw BIP174 bytes
pub fn read_psbt(path: &Path) -> CliResult<Psbt> {
    let bytes = fs::read(path)?;
    match std::str::from_utf8(&bytes) {
        Ok(text) if !bytes.starts_with(b"psbt") => Ok(Psbt::from_base64(text.trim())?),
        _ => Ok(Psbt::deserialize(&bytes)?),
    }
}

/// Write a PSBT as base64 to `output`, or print it
pub fn write_psbt(psbt: &Psbt, output: Option<&PathBuf>) -> CliResult<()> {
    match output {
        Some(path) => {
            fs::write(path, format!("{}\n", psbt.to_base64()))?;
            println!("💾 PSBT written to {:?}", path);
        }
        None => println!("{}", psbt.to_base64()),
    }
    Ok(())
}

fn session(config: &EngineConfig, mnemonic: &str, passphrase: &str) -> CliResult<Session<MnemonicKeyStore>> {
    Ok(Session::new(
        config.network,
        MnemonicKeyStore::new(mnemonic, passphrase)?,
    ))
}

// =============================================================================
// Setup
// =============================================================================

/// Write a default config file
pub fn cmd_config_init(path: &Path) -> CliResult<()> {
    if path.exists() {
        println!("⚠️  Config already exists at {:?}", path);
        return Ok(());
    }
    let config = EngineConfig::default();
    config.save(path)?;
    println!("✅ Config written to {:?}", path);
    println!("   🌐 Network: {}", config.network);
    Ok(())
}

/// Generate a new BIP39 phrase
pub fn cmd_mnemonic_new(words: usize) -> CliResult<()> {
    let phrase = generate_mnemonic(words)?;
    println!("🔐 New {}-word mnemonic:", words);
    println!("   {}", phrase);
    println!("\n   ⚠️  IMPORTANT: Write this down and keep it offline.");
    println!("   Anyone holding these words can spend your funds!");
    Ok(())
}

/// Print this wallet's cosigner descriptor for a multisig account
pub fn cmd_cosigner_export(
    config: &EngineConfig,
    mnemonic: &str,
    passphrase: &str,
    variant: ScriptVariant,
    account: u32,
) -> CliResult<()> {
    let session = session(config, mnemonic, passphrase)?;
    let cosigner = session.cosigner(variant, account)?;

    println!("🔑 Cosigner key ({}, {})", variant, config.network);
    println!("   ├─ Fingerprint: {}", hex::encode(cosigner.fingerprint()));
    println!("   ├─ Path: {}", cosigner.origin().path);
    println!("   └─ {}", cosigner);
    Ok(())
}

// =============================================================================
// Addresses
// =============================================================================

/// Address for one public key
pub fn cmd_address_single(config: &EngineConfig, key: &str, variant: ScriptVariant) -> CliResult<()> {
    let pubkey = PubKey::from_hex(key)?;
    let address = build_single_sig(&pubkey, variant, config.network)?;

    println!("📍 {}", address);
    println!("   ├─ Variant: {}", variant);
    println!("   └─ scriptPubKey: {}", address.script_pubkey.to_hex());
    Ok(())
}

/// M-of-N address from raw public keys, given in any order
pub fn cmd_address_multisig(
    config: &EngineConfig,
    threshold: usize,
    keys: &[String],
    variant: ScriptVariant,
) -> CliResult<()> {
    let ordered = order_hex_keys(keys)?;
    let multisig = MultisigConfig::new(threshold, &ordered, variant, None)?;
    let address = multisig.address(config.network)?;

    println!("📍 {}", address);
    println!("   ├─ Policy: {}", multisig.description());
    println!("   ├─ Variant: {}", variant);
    if let Some(script) = &address.witness_script {
        println!("   ├─ Witness script: {}", script.to_hex());
    }
    if let Some(script) = &address.redeem_script {
        println!("   ├─ Redeem script: {}", script.to_hex());
    }
    println!("   └─ Keys (sorted):");
    for key in multisig.keys() {
        println!("      └─ {}", key);
    }
    Ok(())
}

/// Addresses of a multisig account built from cosigner xpubs
pub fn cmd_address_account(
    config: &EngineConfig,
    threshold: usize,
    cosigners: &[String],
    variant: ScriptVariant,
    change: u32,
    count: u32,
) -> CliResult<()> {
    let cosigners = cosigners
        .iter()
        .map(|c| Cosigner::parse(c, config.network))
        .collect::<Result<Vec<_>, _>>()?;
    let account = MultisigAccount::new(threshold, variant, config.network, cosigners, None)?;

    println!(
        "📋 {}-of-{} {} addresses (branch {}):",
        threshold,
        account.cosigners().len(),
        variant,
        change
    );
    for index in 0..count {
        let address = Account::address_at(&account, change, index)?;
        println!("   {:>4} {}", index, address);
    }
    Ok(())
}

// =============================================================================
// PSBT
// =============================================================================

/// Show signing progress
pub fn cmd_psbt_inspect(path: &Path, json: bool) -> CliResult<()> {
    let psbt = read_psbt(path)?;
    let summary = inspect(&psbt);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("📄 PSBT {}", summary.txid);
    println!("   ├─ State: {}", summary.state);
    match summary.fee {
        Some(fee) => println!("   ├─ Fee: {} sat", fee),
        None => println!("   ├─ Fee: unknown"),
    }
    println!("   ├─ Outputs: {:?}", summary.outputs);
    println!("   └─ Inputs:");
    for input in &summary.inputs {
        let required = input
            .required
            .map(|r| r.to_string())
            .unwrap_or_else(|| "?".to_string());
        let marker = if input.finalized { " (final)" } else { "" };
        println!(
            "      └─ #{} {} {}/{} signatures{}",
            input.index, input.outpoint, input.signatures, required, marker
        );
    }
    Ok(())
}

/// Add this wallet's signatures
pub fn cmd_psbt_sign(
    config: &EngineConfig,
    path: &Path,
    mnemonic: &str,
    passphrase: &str,
    output: Option<&PathBuf>,
) -> CliResult<()> {
    let psbt = read_psbt(path)?;
    let session = session(config, mnemonic, passphrase)?;
    let (signed, added) = session.sign_psbt(&psbt)?;

    if added == 0 {
        println!("❌ No inputs of this PSBT belong to this wallet");
        return Ok(());
    }
    eprintln!("✍️  Added {} signature(s); state: {}", added, signed.state());
    write_psbt(&signed, output)
}

/// Merge independently signed copies
pub fn cmd_psbt_combine(paths: &[PathBuf], output: Option<&PathBuf>) -> CliResult<()> {
    let psbts = paths
        .iter()
        .map(|p| read_psbt(p))
        .collect::<CliResult<Vec<_>>>()?;
    let merged = merge_all(&psbts)?;
    eprintln!("🔗 Combined {} PSBTs; state: {}", psbts.len(), merged.state());
    write_psbt(&merged, output)
}

/// Finalize and print the raw transaction hex
pub fn cmd_psbt_finalize(path: &Path, output: Option<&PathBuf>) -> CliResult<()> {
    let psbt = read_psbt(path)?;
    let tx = finalize(&psbt)?;
    let raw = tx.to_hex();

    eprintln!("✅ Finalized {}", tx.txid());
    match output {
        Some(path) => {
            fs::write(path, format!("{}\n", raw))?;
            eprintln!("   💾 Raw transaction written to {:?}", path);
        }
        None => println!("{}", raw),
    }
    Ok(())
}

// =============================================================================
// Chunked transport
// =============================================================================

/// Print a PSBT as text chunks, one per line
pub fn cmd_chunk_split(config: &EngineConfig, path: &Path, size: Option<usize>) -> CliResult<()> {
    let psbt = read_psbt(path)?;
    let chunks = split_psbt(&psbt, size.unwrap_or(config.max_chunk_size))?;
    eprintln!("📦 {} chunk(s) for {}", chunks.len(), psbt.txid());
    for chunk in &chunks {
        println!("{}", chunk);
    }
    Ok(())
}

/// Rebuild a PSBT from a file of text chunks in any order
pub fn cmd_chunk_join(path: &Path, output: Option<&PathBuf>) -> CliResult<()> {
    let text = fs::read_to_string(path)?;
    let chunks = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::parse::<Chunk>)
        .collect::<Result<Vec<_>, _>>()?;
    let psbt = reassemble_psbt(&chunks)?;
    eprintln!("📥 Reassembled {} from {} chunk(s)", psbt.txid(), chunks.len());
    write_psbt(&psbt, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Network, OutPoint, Script, TxOut, Txid, Utxo, WalletUtxo};
    use crate::psbt::{sign, SigningState};
    use crate::crypto::KeyPair;
    use crate::wallet::TransactionAssembler;

    fn sample_psbt() -> (Psbt, Vec<KeyPair>) {
        let keys: Vec<KeyPair> = (1u8..=3)
            .map(|n| KeyPair::from_secret_bytes(&[n; 32]).unwrap())
            .collect();
        let pubkeys: Vec<PubKey> = keys.iter().map(|k| k.public_key).collect();
        let config = MultisigConfig::new(2, &pubkeys, ScriptVariant::NativeSegwit, None).unwrap();
        let address = config.address(Network::Testnet).unwrap();
        let utxo = WalletUtxo::new(
            Utxo::new(OutPoint::new(Txid([4; 32]), 0), 100_000, address.script_pubkey.clone()),
            crate::core::SpendInfo {
                kind: config.input_kind(),
                redeem_script: None,
                witness_script: address.witness_script.clone(),
                key_origins: Default::default(),
            },
        );
        let unsigned = TransactionAssembler::default()
            .build(&[utxo], &[TxOut::new(95_000, Script::p2wpkh(&[1; 20]))], None, 5_000)
            .unwrap();
        (Psbt::from_unsigned(&unsigned).unwrap(), keys)
    }

    #[test]
    fn test_psbt_file_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (psbt, _) = sample_psbt();

        let text_path = temp_dir.path().join("tx.psbt");
        write_psbt(&psbt, Some(&text_path)).unwrap();
        assert_eq!(read_psbt(&text_path).unwrap(), psbt);

        let binary_path = temp_dir.path().join("tx.bin");
        fs::write(&binary_path, psbt.serialize()).unwrap();
        assert_eq!(read_psbt(&binary_path).unwrap(), psbt);
    }

    #[test]
    fn test_combine_and_finalize_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (psbt, keys) = sample_psbt();

        let a = temp_dir.path().join("a.psbt");
        let b = temp_dir.path().join("b.psbt");
        write_psbt(&sign(&psbt, &keys[0]).unwrap(), Some(&a)).unwrap();
        write_psbt(&sign(&psbt, &keys[2]).unwrap(), Some(&b)).unwrap();

        let merged = temp_dir.path().join("merged.psbt");
        cmd_psbt_combine(&[a, b], Some(&merged)).unwrap();
        assert_eq!(read_psbt(&merged).unwrap().state(), SigningState::ThresholdReached);

        let raw = temp_dir.path().join("tx.hex");
        cmd_psbt_finalize(&merged, Some(&raw)).unwrap();
        assert!(!fs::read_to_string(&raw).unwrap().trim().is_empty());
    }

    #[test]
    fn test_chunk_file_join() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (psbt, _) = sample_psbt();

        let mut chunks = split_psbt(&psbt, 40).unwrap();
        chunks.reverse();
        let lines: Vec<String> = chunks.iter().map(|c| c.to_string()).collect();
        let chunk_path = temp_dir.path().join("chunks.txt");
        fs::write(&chunk_path, lines.join("\n")).unwrap();

        let out = temp_dir.path().join("joined.psbt");
        cmd_chunk_join(&chunk_path, Some(&out)).unwrap();
        assert_eq!(read_psbt(&out).unwrap(), psbt);
    }

    #[test]
    fn test_config_init() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("cosigner.json");
        cmd_config_init(&path).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), EngineConfig::default());
    }
}
