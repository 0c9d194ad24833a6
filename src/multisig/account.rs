//! HD multisig accounts
//!
//! Each cosigner contributes an account-level extended public key. Address
//! `change/index` is derived from every cosigner's xpub, the resulting keys
//! are canonically ordered, and the multisig script is built from them. All
//! cosigners holding the same xpub set derive identical addresses.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::config::{MultisigConfig, MultisigError, MAX_MULTISIG_KEYS, MIN_MULTISIG_KEYS};
use crate::core::{Address, Network, ScriptVariant, SpendInfo};
use crate::crypto::{
    ChildNumber, DerivationError, DerivationPath, ExtendedKey, KeySource, PubKey,
};

/// Fixed account path for a multisig variant:
/// - legacy P2SH: `m/45'/coin'/account'`
/// - wrapped segwit: `m/48'/coin'/account'/1'`
/// - native segwit: `m/48'/coin'/account'/2'`
pub fn multisig_account_path(
    variant: ScriptVariant,
    network: Network,
    account: u32,
) -> Result<DerivationPath, MultisigError> {
    let coin = ChildNumber::hardened(network.coin_type())?;
    let account = ChildNumber::hardened(account)?;
    let segments = match variant {
        ScriptVariant::Legacy => vec![ChildNumber::hardened(45)?, coin, account],
        ScriptVariant::WrappedSegwit => vec![
            ChildNumber::hardened(48)?,
            coin,
            account,
            ChildNumber::hardened(1)?,
        ],
        ScriptVariant::NativeSegwit => vec![
            ChildNumber::hardened(48)?,
            coin,
            account,
            ChildNumber::hardened(2)?,
        ],
    };
    Ok(DerivationPath::from(segments))
}

/// One cosigner's account xpub and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cosigner {
    xpub: ExtendedKey,
    origin: KeySource,
}

impl Cosigner {
    /// The key is reduced to its public part; private material is never kept
    pub fn new(xpub: &ExtendedKey, origin: KeySource) -> Self {
        let mut xpub = xpub.to_public();
        xpub.path = DerivationPath::master();
        Self { xpub, origin }
    }

    /// Parse `[fingerprint/path]xpub...`, or a bare xpub.
    ///
    /// A bare xpub is treated as its own origin: its fingerprint and an
    /// empty path.
    pub fn parse(s: &str, network: Network) -> Result<Self, MultisigError> {
        let s = s.trim();
        let (origin, encoded) = match s.strip_prefix('[') {
            Some(_) => {
                let end = s.find(']').ok_or_else(|| {
                    MultisigError::InvalidCosigner(format!("unterminated origin in '{}'", s))
                })?;
                let origin: KeySource = s[..=end].parse()?;
                (Some(origin), &s[end + 1..])
            }
            None => (None, s),
        };

        let xpub = ExtendedKey::from_base58_for(encoded, network)?;
        if xpub.is_private() {
            return Err(MultisigError::InvalidCosigner(
                "expected an extended public key".to_string(),
            ));
        }
        let origin = origin
            .unwrap_or_else(|| KeySource::new(xpub.fingerprint(), DerivationPath::master()));

        Ok(Self { xpub, origin })
    }

    pub fn xpub(&self) -> &ExtendedKey {
        &self.xpub
    }

    pub fn origin(&self) -> &KeySource {
        &self.origin
    }

    /// Master fingerprint of this cosigner
    pub fn fingerprint(&self) -> [u8; 4] {
        self.origin.fingerprint
    }

    /// Child key at `change/index` and its full origin
    pub fn derive(&self, change: u32, index: u32) -> Result<(PubKey, KeySource), MultisigError> {
        let suffix = DerivationPath::change_index(change, index)?;
        let child = self.xpub.derive_path(&suffix)?;
        Ok((child.public_key(), self.origin.extend(&suffix)))
    }
}

impl fmt::Display for Cosigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.origin, self.xpub.to_base58())
    }
}

impl Serialize for Cosigner {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Cosigner {
    /// Deserialized cosigners keep the network encoded in their xpub
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let (origin, encoded) = match s.find(']') {
            Some(end) => (
                Some(KeySource::from_str(&s[..=end]).map_err(serde::de::Error::custom)?),
                &s[end + 1..],
            ),
            None => (None, s.as_str()),
        };
        let xpub = ExtendedKey::from_base58(encoded).map_err(serde::de::Error::custom)?;
        let origin = origin
            .unwrap_or_else(|| KeySource::new(xpub.fingerprint(), DerivationPath::master()));
        Ok(Self { xpub, origin })
    }
}

/// An M-of-N account built from cosigner xpubs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMultisigAccount")]
pub struct MultisigAccount {
    threshold: usize,
    variant: ScriptVariant,
    network: Network,
    cosigners: Vec<Cosigner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
}

#[derive(Deserialize)]
struct RawMultisigAccount {
    threshold: usize,
    variant: ScriptVariant,
    network: Network,
    cosigners: Vec<Cosigner>,
    #[serde(default)]
    label: Option<String>,
}

impl TryFrom<RawMultisigAccount> for MultisigAccount {
    type Error = MultisigError;

    fn try_from(raw: RawMultisigAccount) -> Result<Self, Self::Error> {
        MultisigAccount::new(raw.threshold, raw.variant, raw.network, raw.cosigners, raw.label)
    }
}

impl MultisigAccount {
    pub fn new(
        threshold: usize,
        variant: ScriptVariant,
        network: Network,
        cosigners: Vec<Cosigner>,
        label: Option<String>,
    ) -> Result<Self, MultisigError> {
        if !(MIN_MULTISIG_KEYS..=MAX_MULTISIG_KEYS).contains(&cosigners.len()) {
            return Err(MultisigError::InvalidSignerCount(cosigners.len()));
        }
        if threshold == 0 || threshold > cosigners.len() {
            return Err(MultisigError::InvalidThreshold(format!(
                "{}-of-{}",
                threshold,
                cosigners.len()
            )));
        }

        let mut seen = BTreeSet::new();
        for cosigner in &cosigners {
            if !network.base58_compatible(cosigner.xpub.network) {
                return Err(MultisigError::Derivation(DerivationError::WrongNetwork {
                    expected: network,
                    found: cosigner.xpub.network,
                }));
            }
            if !seen.insert(cosigner.xpub.public_key()) {
                return Err(MultisigError::DuplicateKey(cosigner.to_string()));
            }
        }

        Ok(Self {
            threshold,
            variant,
            network,
            cosigners,
            label,
        })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn variant(&self) -> ScriptVariant {
        self.variant
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn cosigners(&self) -> &[Cosigner] {
        &self.cosigners
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Keys and origins at `change/index`
    fn keys_at(&self, change: u32, index: u32) -> Result<BTreeMap<PubKey, KeySource>, MultisigError> {
        self.cosigners
            .iter()
            .map(|c| c.derive(change, index))
            .collect()
    }

    /// Validated key-set config at `change/index`
    pub fn config_at(&self, change: u32, index: u32) -> Result<MultisigConfig, MultisigError> {
        let keys: Vec<PubKey> = self.keys_at(change, index)?.into_keys().collect();
        MultisigConfig::new(self.threshold, &keys, self.variant, self.label.clone())
    }

    /// Address at `change/index`
    pub fn address_at(&self, change: u32, index: u32) -> Result<Address, MultisigError> {
        self.config_at(change, index)?.address(self.network)
    }

    /// Signing metadata for outputs paying to `change/index`
    pub fn spend_info_at(&self, change: u32, index: u32) -> Result<SpendInfo, MultisigError> {
        let key_origins = self.keys_at(change, index)?;
        let keys: Vec<PubKey> = key_origins.keys().cloned().collect();
        let config = MultisigConfig::new(self.threshold, &keys, self.variant, None)?;
        let address = config.address(self.network)?;

        Ok(SpendInfo {
            kind: config.input_kind(),
            redeem_script: address.redeem_script,
            witness_script: address.witness_script,
            key_origins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::derive;

    fn cosigner(seed_byte: u8, variant: ScriptVariant) -> Cosigner {
        let seed = [seed_byte; 32];
        let path = multisig_account_path(variant, Network::Testnet, 0).unwrap();
        let master = ExtendedKey::master(&seed, Network::Testnet).unwrap();
        let account = derive(&seed, &path, Network::Testnet).unwrap();
        Cosigner::new(&account, KeySource::new(master.fingerprint(), path))
    }

    #[test]
    fn test_account_paths() {
        let path = |variant| {
            multisig_account_path(variant, Network::Testnet, 3)
                .unwrap()
                .to_string()
        };
        assert_eq!(path(ScriptVariant::Legacy), "m/45'/1'/3'");
        assert_eq!(path(ScriptVariant::WrappedSegwit), "m/48'/1'/3'/1'");
        assert_eq!(path(ScriptVariant::NativeSegwit), "m/48'/1'/3'/2'");
    }

    #[test]
    fn test_cosigner_parse_roundtrip() {
        let c = cosigner(1, ScriptVariant::NativeSegwit);
        let text = c.to_string();
        assert!(text.starts_with('['));
        assert!(text.contains("tpub"));

        let parsed = Cosigner::parse(&text, Network::Testnet).unwrap();
        assert_eq!(parsed, c);
        assert!(Cosigner::parse(&text, Network::Mainnet).is_err());

        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(serde_json::from_str::<Cosigner>(&json).unwrap(), c);
    }

    #[test]
    fn test_bare_xpub_is_own_origin() {
        let c = cosigner(2, ScriptVariant::NativeSegwit);
        let parsed = Cosigner::parse(&c.xpub().to_base58(), Network::Testnet).unwrap();
        assert_eq!(parsed.fingerprint(), c.xpub().fingerprint());
        assert!(parsed.origin().path.is_empty());
    }

    #[test]
    fn test_cosigner_order_does_not_change_addresses() {
        let variant = ScriptVariant::NativeSegwit;
        let a = cosigner(1, variant);
        let b = cosigner(2, variant);
        let c = cosigner(3, variant);

        let abc = MultisigAccount::new(2, variant, Network::Testnet, vec![a.clone(), b.clone(), c.clone()], None).unwrap();
        let cab = MultisigAccount::new(2, variant, Network::Testnet, vec![c, a, b], None).unwrap();

        for index in 0..3 {
            let x = abc.address_at(0, index).unwrap();
            let y = cab.address_at(0, index).unwrap();
            assert_eq!(x, y);
            assert!(x.encoded.starts_with("tb1q"));
        }
        assert_ne!(abc.address_at(0, 0).unwrap(), abc.address_at(1, 0).unwrap());
    }

    #[test]
    fn test_spend_info_has_all_origins() {
        let variant = ScriptVariant::WrappedSegwit;
        let account = MultisigAccount::new(
            2,
            variant,
            Network::Testnet,
            vec![cosigner(1, variant), cosigner(2, variant), cosigner(3, variant)],
            None,
        )
        .unwrap();
        let info = account.spend_info_at(0, 5).unwrap();
        assert_eq!(info.key_origins.len(), 3);
        assert_eq!(info.required_signatures(), 2);
        assert!(info.redeem_script.is_some());
        assert!(info.witness_script.is_some());
        for origin in info.key_origins.values() {
            assert!(origin.path.to_string().ends_with("/1'/0/5"));
        }
    }

    #[test]
    fn test_duplicate_cosigner_rejected() {
        let variant = ScriptVariant::NativeSegwit;
        let a = cosigner(1, variant);
        assert!(matches!(
            MultisigAccount::new(1, variant, Network::Testnet, vec![a.clone(), a], None),
            Err(MultisigError::DuplicateKey(_))
        ));
    }
}
