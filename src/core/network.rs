//! Network parameters
//!
//! Every prefix the engine emits (address version bytes, bech32 HRP, WIF and
//! extended key versions, BIP44 coin type) is looked up here so mainnet and
//! test prefixes can never mix inside one derivation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bitcoin network selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Default for Network {
    fn default() -> Self {
        Network::Testnet
    }
}

impl Network {
    /// Version byte for P2PKH addresses
    pub fn p2pkh_prefix(&self) -> u8 {
        match self {
            Network::Mainnet => 0x00,
            Network::Testnet | Network::Regtest => 0x6f,
        }
    }

    /// Version byte for P2SH addresses
    pub fn p2sh_prefix(&self) -> u8 {
        match self {
            Network::Mainnet => 0x05,
            Network::Testnet | Network::Regtest => 0xc4,
        }
    }

    /// Human readable part for segwit addresses
    pub fn bech32_hrp(&self) -> bech32::Hrp {
        match self {
            Network::Mainnet => bech32::hrp::BC,
            Network::Testnet => bech32::hrp::TB,
            Network::Regtest => bech32::hrp::BCRT,
        }
    }

    /// WIF private key prefix
    pub fn wif_prefix(&self) -> u8 {
        match self {
            Network::Mainnet => 0x80,
            Network::Testnet | Network::Regtest => 0xef,
        }
    }

    /// BIP44 coin type used in account paths
    pub fn coin_type(&self) -> u32 {
        match self {
            Network::Mainnet => 0,
            Network::Testnet | Network::Regtest => 1,
        }
    }

    /// Extended public key version (xpub / tpub)
    pub fn xpub_version(&self) -> [u8; 4] {
        match self {
            Network::Mainnet => [0x04, 0x88, 0xb2, 0x1e],
            Network::Testnet | Network::Regtest => [0x04, 0x35, 0x87, 0xcf],
        }
    }

    /// Extended private key version (xprv / tprv)
    pub fn xprv_version(&self) -> [u8; 4] {
        match self {
            Network::Mainnet => [0x04, 0x88, 0xad, 0xe4],
            Network::Testnet | Network::Regtest => [0x04, 0x35, 0x83, 0x94],
        }
    }

    /// True for networks that share the testnet Base58 prefixes
    pub fn is_test(&self) -> bool {
        !matches!(self, Network::Mainnet)
    }

    /// Whether a Base58 prefix decoded as `other` is acceptable on this network.
    ///
    /// Regtest reuses testnet version bytes, so the two are indistinguishable
    /// for Base58 payloads.
    pub fn base58_compatible(&self, other: Network) -> bool {
        self.is_test() == other.is_test()
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        };
        f.write_str(name)
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "bitcoin" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" | "testnet3" | "signet" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(format!("unknown network: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_do_not_mix() {
        assert_ne!(
            Network::Mainnet.p2pkh_prefix(),
            Network::Testnet.p2pkh_prefix()
        );
        assert_ne!(Network::Mainnet.p2sh_prefix(), Network::Testnet.p2sh_prefix());
        assert_eq!(Network::Testnet.p2sh_prefix(), Network::Regtest.p2sh_prefix());
        assert_ne!(Network::Testnet.bech32_hrp(), Network::Regtest.bech32_hrp());
    }

    #[test]
    fn test_parse_and_display() {
        for network in [Network::Mainnet, Network::Testnet, Network::Regtest] {
            assert_eq!(network.to_string().parse::<Network>().unwrap(), network);
        }
        assert!("litecoin".parse::<Network>().is_err());
    }

    #[test]
    fn test_base58_compatibility() {
        assert!(Network::Regtest.base58_compatible(Network::Testnet));
        assert!(!Network::Mainnet.base58_compatible(Network::Testnet));
    }
}
