//! HD accounts
//!
//! An [`Account`] turns `(change, index)` into an address and the spend
//! metadata for outputs paying to it. Single-sig accounts follow
//! BIP44/49/84; multisig accounts are built from cosigner xpubs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::WalletError;
use crate::core::{build_single_sig, Address, InputKind, Network, Script, ScriptVariant, SpendInfo};
use crate::crypto::{ChildNumber, DerivationPath, ExtendedKey, KeySource};
use crate::multisig::{Cosigner, MultisigAccount};

/// Receive branch
pub const RECEIVE: u32 = 0;
/// Change branch
pub const CHANGE: u32 = 1;

/// Account path for single-sig: `m/44'` (legacy), `m/49'` (wrapped),
/// `m/84'` (native), then `coin'/account'`
pub fn single_sig_account_path(
    variant: ScriptVariant,
    network: Network,
    account: u32,
) -> Result<DerivationPath, WalletError> {
    let purpose = match variant {
        ScriptVariant::Legacy => 44,
        ScriptVariant::WrappedSegwit => 49,
        ScriptVariant::NativeSegwit => 84,
    };
    Ok(DerivationPath::from(vec![
        ChildNumber::hardened(purpose)?,
        ChildNumber::hardened(network.coin_type())?,
        ChildNumber::hardened(account)?,
    ]))
}

/// Anything that derives wallet addresses
pub trait Account {
    fn network(&self) -> Network;

    /// Input shape of every output this account receives
    fn input_kind(&self) -> InputKind;

    fn address_at(&self, change: u32, index: u32) -> Result<Address, WalletError>;

    fn spend_info_at(&self, change: u32, index: u32) -> Result<SpendInfo, WalletError>;

    /// First `count` addresses of both branches, receive first
    fn addresses(&self, count: u32) -> Result<Vec<Address>, WalletError> {
        let mut addresses = Vec::with_capacity(2 * count as usize);
        for change in [RECEIVE, CHANGE] {
            for index in 0..count {
                addresses.push(self.address_at(change, index)?);
            }
        }
        Ok(addresses)
    }

    /// Spend metadata keyed by scriptPubKey for the first `count`
    /// addresses of both branches
    fn spend_index(&self, count: u32) -> Result<HashMap<Script, SpendInfo>, WalletError> {
        let mut index_map = HashMap::new();
        for change in [RECEIVE, CHANGE] {
            for index in 0..count {
                let address = self.address_at(change, index)?;
                index_map.insert(address.script_pubkey, self.spend_info_at(change, index)?);
            }
        }
        Ok(index_map)
    }
}

// =============================================================================
// Single-sig
// =============================================================================

/// BIP44/49/84 account from one account-level xpub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleSigAccount {
    key: Cosigner,
    variant: ScriptVariant,
    network: Network,
}

impl SingleSigAccount {
    pub fn new(account_key: &ExtendedKey, origin: KeySource, variant: ScriptVariant) -> Self {
        Self {
            key: Cosigner::new(account_key, origin),
            variant,
            network: account_key.network,
        }
    }

    /// Derive account `account` of `variant` from a master key
    pub fn from_master(
        master: &ExtendedKey,
        variant: ScriptVariant,
        account: u32,
    ) -> Result<Self, WalletError> {
        let path = single_sig_account_path(variant, master.network, account)?;
        let account_key = master.derive_path(&path)?;
        Ok(Self::new(
            &account_key,
            KeySource::new(master.fingerprint(), path),
            variant,
        ))
    }

    pub fn variant(&self) -> ScriptVariant {
        self.variant
    }

    pub fn xpub(&self) -> &ExtendedKey {
        self.key.xpub()
    }

    pub fn origin(&self) -> &KeySource {
        self.key.origin()
    }
}

impl Account for SingleSigAccount {
    fn network(&self) -> Network {
        self.network
    }

    fn input_kind(&self) -> InputKind {
        InputKind::SingleSig {
            variant: self.variant,
        }
    }

    fn address_at(&self, change: u32, index: u32) -> Result<Address, WalletError> {
        let (key, _) = self.key.derive(change, index)?;
        Ok(build_single_sig(&key, self.variant, self.network)?)
    }

    fn spend_info_at(&self, change: u32, index: u32) -> Result<SpendInfo, WalletError> {
        let (key, origin) = self.key.derive(change, index)?;
        let address = build_single_sig(&key, self.variant, self.network)?;
        Ok(SpendInfo {
            kind: self.input_kind(),
            redeem_script: address.redeem_script,
            witness_script: None,
            key_origins: [(key, origin)].into_iter().collect(),
        })
    }
}

// =============================================================================
// Multisig
// =============================================================================

impl Account for MultisigAccount {
    fn network(&self) -> Network {
        MultisigAccount::network(self)
    }

    fn input_kind(&self) -> InputKind {
        InputKind::Multisig {
            variant: self.variant(),
            threshold: self.threshold(),
            total: self.cosigners().len(),
        }
    }

    fn address_at(&self, change: u32, index: u32) -> Result<Address, WalletError> {
        Ok(MultisigAccount::address_at(self, change, index)?)
    }

    fn spend_info_at(&self, change: u32, index: u32) -> Result<SpendInfo, WalletError> {
        Ok(MultisigAccount::spend_info_at(self, change, index)?)
    }
}

/// Either kind of account, as stored in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type")]
pub enum AccountKind {
    SingleSig(SingleSigAccount),
    Multisig(MultisigAccount),
}

impl AccountKind {
    fn inner(&self) -> &dyn Account {
        match self {
            AccountKind::SingleSig(account) => account,
            AccountKind::Multisig(account) => account,
        }
    }
}

impl Account for AccountKind {
    fn network(&self) -> Network {
        self.inner().network()
    }

    fn input_kind(&self) -> InputKind {
        self.inner().input_kind()
    }

    fn address_at(&self, change: u32, index: u32) -> Result<Address, WalletError> {
        self.inner().address_at(change, index)
    }

    fn spend_info_at(&self, change: u32, index: u32) -> Result<SpendInfo, WalletError> {
        self.inner().spend_info_at(change, index)
    }
}
