//! Unspent outputs
//!
//! A [`Utxo`] is the on-chain record returned by the blockchain-data
//! provider. A [`WalletUtxo`] pairs it with the [`SpendInfo`] the wallet
//! derived for its script: how it is signed, the scripts revealed when
//! spending, and the BIP32 origin of every key involved.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::fee::InputKind;
use super::script::Script;
use super::transaction::{OutPoint, TxOut};
use crate::crypto::{KeySource, PubKey};

/// Unspent Transaction Output as observed on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub outpoint: OutPoint,
    /// Value in satoshis
    pub value: u64,
    pub script_pubkey: Script,
    #[serde(default)]
    pub confirmations: u32,
}

impl Utxo {
    pub fn new(outpoint: OutPoint, value: u64, script_pubkey: Script) -> Self {
        Self {
            outpoint,
            value,
            script_pubkey,
            confirmations: 0,
        }
    }

    /// The output being spent
    pub fn txout(&self) -> TxOut {
        TxOut::new(self.value, self.script_pubkey.clone())
    }
}

/// Everything needed to sign for a wallet-owned script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendInfo {
    pub kind: InputKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeem_script: Option<Script>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witness_script: Option<Script>,
    /// Keys that may sign, with where they were derived from
    pub key_origins: BTreeMap<PubKey, KeySource>,
}

impl SpendInfo {
    /// Number of signatures required to spend
    pub fn required_signatures(&self) -> usize {
        match self.kind {
            InputKind::SingleSig { .. } => 1,
            InputKind::Multisig { threshold, .. } => threshold,
        }
    }
}

/// A UTXO the wallet knows how to spend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletUtxo {
    pub utxo: Utxo,
    pub spend: SpendInfo,
}

impl WalletUtxo {
    pub fn new(utxo: Utxo, spend: SpendInfo) -> Self {
        Self { utxo, spend }
    }

    pub fn outpoint(&self) -> OutPoint {
        self.utxo.outpoint
    }

    pub fn value(&self) -> u64 {
        self.utxo.value
    }

    pub fn kind(&self) -> InputKind {
        self.spend.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ScriptVariant, Txid};

    #[test]
    fn test_required_signatures() {
        let single = SpendInfo {
            kind: InputKind::SingleSig {
                variant: ScriptVariant::NativeSegwit,
            },
            redeem_script: None,
            witness_script: None,
            key_origins: BTreeMap::new(),
        };
        assert_eq!(single.required_signatures(), 1);

        let multi = SpendInfo {
            kind: InputKind::Multisig {
                variant: ScriptVariant::NativeSegwit,
                threshold: 2,
                total: 3,
            },
            ..single
        };
        assert_eq!(multi.required_signatures(), 2);
    }

    #[test]
    fn test_utxo_json() {
        let utxo = Utxo::new(
            OutPoint::new(Txid([0xab; 32]), 3),
            50_000,
            Script::p2wpkh(&[1; 20]),
        );
        let json = serde_json::to_string(&utxo).unwrap();
        let back: Utxo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, utxo);
        assert_eq!(utxo.txout().value, 50_000);
    }
}
