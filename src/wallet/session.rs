//! Signing sessions
//!
//! A [`Session`] is an unlocked wallet: a network plus a handle to the key
//! store holding its seed. It is passed explicitly to whatever needs key
//! material; there is no global wallet state.

use zeroize::{Zeroize, ZeroizeOnDrop};

use super::account::SingleSigAccount;
use super::WalletError;
use crate::core::{Network, ScriptVariant};
use crate::crypto::{mnemonic_to_seed, parse_mnemonic, ExtendedKey, KeySource, Seed};
use crate::multisig::{multisig_account_path, Cosigner};
use crate::psbt::{sign_with_xprv, Psbt};

/// Source of the master seed
pub trait KeyStore {
    /// Seed of the unlocked wallet; `Locked` if unavailable
    fn seed(&self) -> Result<Seed, WalletError>;
}

/// Key store holding a BIP39 phrase in memory
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MnemonicKeyStore {
    phrase: String,
    passphrase: String,
    #[zeroize(skip)]
    locked: bool,
}

impl MnemonicKeyStore {
    pub fn new(phrase: &str, passphrase: &str) -> Result<Self, WalletError> {
        let mnemonic = parse_mnemonic(phrase)?;
        Ok(Self {
            phrase: mnemonic.to_string(),
            passphrase: passphrase.to_string(),
            locked: false,
        })
    }

    /// Wipe the phrase; later seed requests fail with `Locked`
    pub fn lock(&mut self) {
        self.phrase.zeroize();
        self.passphrase.zeroize();
        self.locked = true;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl KeyStore for MnemonicKeyStore {
    fn seed(&self) -> Result<Seed, WalletError> {
        if self.locked {
            return Err(WalletError::Locked);
        }
        Ok(mnemonic_to_seed(&self.phrase, &self.passphrase)?)
    }
}

impl std::fmt::Debug for MnemonicKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MnemonicKeyStore")
            .field("locked", &self.locked)
            .finish()
    }
}

/// Unlocked wallet bound to a network
#[derive(Debug)]
pub struct Session<K: KeyStore> {
    network: Network,
    key_store: K,
}

impl<K: KeyStore> Session<K> {
    pub fn new(network: Network, key_store: K) -> Self {
        Self { network, key_store }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn key_store(&self) -> &K {
        &self.key_store
    }

    /// Master extended private key; derived on demand, never cached
    pub fn master_key(&self) -> Result<ExtendedKey, WalletError> {
        let seed = self.key_store.seed()?;
        Ok(ExtendedKey::master(seed.as_bytes(), self.network)?)
    }

    /// Master key fingerprint
    pub fn fingerprint(&self) -> Result<[u8; 4], WalletError> {
        Ok(self.master_key()?.fingerprint())
    }

    /// This wallet's cosigner entry for a multisig account
    pub fn cosigner(&self, variant: ScriptVariant, account: u32) -> Result<Cosigner, WalletError> {
        let master = self.master_key()?;
        let path = multisig_account_path(variant, self.network, account)?;
        let account_key = master.derive_path(&path)?;
        log::debug!("Exported cosigner key at {}", path);
        Ok(Cosigner::new(
            &account_key,
            KeySource::new(master.fingerprint(), path),
        ))
    }

    /// BIP44/49/84 account
    pub fn single_sig_account(
        &self,
        variant: ScriptVariant,
        account: u32,
    ) -> Result<SingleSigAccount, WalletError> {
        SingleSigAccount::from_master(&self.master_key()?, variant, account)
    }

    /// Sign every input of `psbt` this wallet holds keys for
    pub fn sign_psbt(&self, psbt: &Psbt) -> Result<(Psbt, usize), WalletError> {
        let master = self.master_key()?;
        let (signed, added) = sign_with_xprv(psbt, &master)?;
        if added == 0 {
            log::warn!("No inputs of {} belong to this wallet", psbt.txid());
        }
        Ok((signed, added))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Account;

    const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_invalid_phrase_rejected() {
        assert!(MnemonicKeyStore::new("abandon abandon abandon", "").is_err());
        assert!(MnemonicKeyStore::new(&ABANDON.replace("about", "abandon"), "").is_err());
    }

    #[test]
    fn test_locked_store() {
        let mut store = MnemonicKeyStore::new(ABANDON, "").unwrap();
        assert!(store.seed().is_ok());
        store.lock();
        assert!(store.is_locked());
        let session = Session::new(Network::Testnet, store);
        assert_eq!(session.master_key().unwrap_err(), WalletError::Locked);
    }

    #[test]
    fn test_master_fingerprint() {
        let session = Session::new(Network::Mainnet, MnemonicKeyStore::new(ABANDON, "").unwrap());
        assert_eq!(hex::encode(session.fingerprint().unwrap()), "73c5da0a");
    }

    #[test]
    fn test_cosigner_origin() {
        let session = Session::new(Network::Testnet, MnemonicKeyStore::new(ABANDON, "").unwrap());
        let cosigner = session.cosigner(ScriptVariant::NativeSegwit, 0).unwrap();
        assert_eq!(cosigner.to_string().split(']').next().unwrap(), "[73c5da0a/48'/1'/0'/2'");
        assert!(!cosigner.xpub().is_private());

        let account = session.single_sig_account(ScriptVariant::NativeSegwit, 0).unwrap();
        assert!(account.address_at(0, 0).unwrap().encoded.starts_with("tb1q"));
    }
}
