//! BIP39 mnemonic handling
//!
//! Phrases are validated against the English wordlist and checksum before a
//! seed is produced. Seeds are wiped from memory on drop.

use bip39::{Language, Mnemonic};
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Errors from mnemonic handling
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MnemonicError {
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),
    #[error("Unsupported word count: {0} (expected 12, 15, 18, 21 or 24)")]
    UnsupportedWordCount(usize),
}

/// 64-byte BIP39 seed
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Seed([u8; 64]);

impl Seed {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Seed(..)")
    }
}

/// Collapse whitespace and lowercase a user-entered phrase
fn normalize(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse and validate a phrase (wordlist + checksum)
pub fn parse_mnemonic(phrase: &str) -> Result<Mnemonic, MnemonicError> {
    let normalized = normalize(phrase);
    let words = normalized.split(' ').filter(|w| !w.is_empty()).count();
    if ![12, 15, 18, 21, 24].contains(&words) {
        return Err(MnemonicError::UnsupportedWordCount(words));
    }

    Mnemonic::parse_in(Language::English, &normalized)
        .map_err(|e| MnemonicError::InvalidMnemonic(e.to_string()))
}

/// True if the phrase is a valid English BIP39 mnemonic
pub fn validate_mnemonic(phrase: &str) -> bool {
    parse_mnemonic(phrase).is_ok()
}

/// Generate a fresh mnemonic of `word_count` words from OS randomness
pub fn generate_mnemonic(word_count: usize) -> Result<String, MnemonicError> {
    let entropy_len = match word_count {
        12 => 16,
        15 => 20,
        18 => 24,
        21 => 28,
        24 => 32,
        other => return Err(MnemonicError::UnsupportedWordCount(other)),
    };

    let mut entropy = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut entropy[..entropy_len]);

    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy[..entropy_len])
        .map_err(|e| MnemonicError::InvalidMnemonic(e.to_string()));
    entropy.zeroize();

    Ok(mnemonic?.to_string())
}

/// Derive the BIP39 seed for a phrase and optional passphrase
pub fn mnemonic_to_seed(phrase: &str, passphrase: &str) -> Result<Seed, MnemonicError> {
    let mnemonic = parse_mnemonic(phrase)?;
    Ok(Seed(mnemonic.to_seed(passphrase)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_reference_seed() {
        let seed = mnemonic_to_seed(ABANDON, "TREZOR").unwrap();
        assert_eq!(
            hex::encode(seed.as_bytes()),
            "c55257c360c07c72029aebc1b53c05ed0362ada38ead3e3e9efa3708e53495531f09a6987599d18264c1e1c92f2cf141630c7a3c4ab7c81b2f001698e7463b04"
        );
    }

    #[test]
    fn test_normalization() {
        let messy = format!("  {}  ", ABANDON.to_uppercase().replace(' ', "   "));
        let a = mnemonic_to_seed(&messy, "").unwrap();
        let b = mnemonic_to_seed(ABANDON, "").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let bad = ABANDON.replace("about", "abandon");
        assert!(matches!(
            parse_mnemonic(&bad),
            Err(MnemonicError::InvalidMnemonic(_))
        ));
        assert!(!validate_mnemonic("not a mnemonic"));
    }

    #[test]
    fn test_generate() {
        let phrase = generate_mnemonic(24).unwrap();
        assert_eq!(phrase.split(' ').count(), 24);
        assert!(validate_mnemonic(&phrase));
        assert_eq!(
            generate_mnemonic(13),
            Err(MnemonicError::UnsupportedWordCount(13))
        );
    }
}
