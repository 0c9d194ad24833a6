//! Spend orchestration
//!
//! Glue between an [`Account`], the blockchain-data collaborator and the
//! engine: discover spendable outputs, select and assemble, hand out a PSBT,
//! and later finalize and broadcast the signed result.

use serde::{Deserialize, Serialize};

use super::account::{Account, CHANGE};
use super::assembler::TransactionAssembler;
use super::selection::{select, SelectionPolicy, SelectionTarget};
use super::WalletError;
use crate::config::EngineConfig;
use crate::core::fee::dust_threshold;
use crate::core::{parse_address, Address, FeeRate, Priority, TxOut, Txid, Utxo, WalletUtxo};
use crate::psbt::{finalize, Psbt};

/// Blockchain data provider (indexer, node RPC, ...)
pub trait BlockchainData {
    /// Unspent outputs paying to any of `addresses`
    fn get_utxos(&self, addresses: &[Address]) -> Result<Vec<Utxo>, WalletError>;

    /// Fee rate expected to confirm within `target_blocks`
    fn get_fee_rate(&self, target_blocks: u32) -> Result<FeeRate, WalletError>;

    /// Submit a raw transaction, returning its txid
    fn broadcast(&self, raw_tx_hex: &str) -> Result<Txid, WalletError>;
}

/// A payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub address: String,
    /// Amount in satoshis
    pub amount: u64,
}

impl Recipient {
    pub fn new(address: impl Into<String>, amount: u64) -> Self {
        Self {
            address: address.into(),
            amount,
        }
    }
}

/// Builds spends from an account
#[derive(Debug, Clone)]
pub struct SpendBuilder {
    pub policy: SelectionPolicy,
    pub priority: Priority,
    /// Overrides the provider's estimate when set
    pub fee_rate: Option<FeeRate>,
    pub dust_relay_fee: u64,
    pub rbf: bool,
    /// Addresses per branch to scan
    pub lookahead: u32,
}

impl Default for SpendBuilder {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl SpendBuilder {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            policy: config.selection_policy,
            priority: config.priority,
            fee_rate: None,
            dust_relay_fee: config.dust_relay_fee,
            rbf: config.rbf,
            lookahead: config.address_lookahead,
        }
    }

    pub fn with_fee_rate(mut self, fee_rate: FeeRate) -> Self {
        self.fee_rate = Some(fee_rate);
        self
    }

    /// Outputs the provider reports for this account's addresses
    pub fn scan(
        &self,
        account: &dyn Account,
        chain: &dyn BlockchainData,
    ) -> Result<Vec<WalletUtxo>, WalletError> {
        let addresses = account.addresses(self.lookahead)?;
        let index = account.spend_index(self.lookahead)?;

        let utxos = chain.get_utxos(&addresses)?;
        let found = utxos.len();
        let owned: Vec<WalletUtxo> = utxos
            .into_iter()
            .filter_map(|utxo| {
                let spend = index.get(&utxo.script_pubkey)?.clone();
                Some(WalletUtxo::new(utxo, spend))
            })
            .collect();

        if owned.len() < found {
            log::warn!(
                "Ignoring {} UTXOs not paying to scanned addresses",
                found - owned.len()
            );
        }
        log::info!(
            "Found {} spendable UTXOs ({} sat)",
            owned.len(),
            owned.iter().map(|u| u.value()).sum::<u64>()
        );
        Ok(owned)
    }

    /// Unsigned PSBT paying `recipients`, with change to change address
    /// `change_index`
    pub fn create_psbt(
        &self,
        account: &dyn Account,
        chain: &dyn BlockchainData,
        recipients: &[Recipient],
        change_index: u32,
    ) -> Result<Psbt, WalletError> {
        if recipients.is_empty() {
            return Err(WalletError::NoOutputs);
        }
        let network = account.network();

        let mut outputs = Vec::with_capacity(recipients.len());
        let mut amount: u64 = 0;
        for recipient in recipients {
            let script_pubkey = parse_address(&recipient.address, network)?;
            amount = amount
                .checked_add(recipient.amount)
                .ok_or(WalletError::AmountOverflow)?;
            outputs.push(TxOut::new(recipient.amount, script_pubkey));
        }

        let fee_rate = match self.fee_rate {
            Some(rate) => rate,
            None => chain.get_fee_rate(self.priority.target_blocks())?,
        }
        .clamped();

        let change_address = account.address_at(CHANGE, change_index)?;
        let change_spend = account.spend_info_at(CHANGE, change_index)?;
        let target = SelectionTarget {
            amount,
            fee_rate,
            output_script_lens: outputs.iter().map(|o| o.script_pubkey.len()).collect(),
            change_script_len: change_address.script_pubkey.len(),
            change_dust_limit: dust_threshold(&change_address.script_pubkey, self.dust_relay_fee),
        };

        let available = self.scan(account, chain)?;
        let selection = select(&available, &target, &self.policy)?;

        let assembler = TransactionAssembler::new(self.dust_relay_fee, self.rbf);
        let unsigned =
            assembler.from_selection(selection, &outputs, &change_address, Some(change_spend))?;
        log::info!(
            "Prepared spend of {} sat at {} sat/vB (fee {} sat)",
            amount,
            fee_rate.as_sat_per_vb(),
            unsigned.fee
        );
        Ok(Psbt::from_unsigned(&unsigned)?)
    }

    /// Finalize a fully signed PSBT and hand it to the provider
    pub fn broadcast(&self, chain: &dyn BlockchainData, psbt: &Psbt) -> Result<Txid, WalletError> {
        let tx = finalize(psbt)?;
        let txid = chain.broadcast(&tx.to_hex())?;
        log::info!("Broadcast {}", txid);
        Ok(txid)
    }
}
