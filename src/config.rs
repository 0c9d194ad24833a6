//! Engine configuration
//!
//! JSON on disk. Missing fields take their defaults, so a config file only
//! needs the settings it changes.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;

use crate::core::{Network, Priority, DUST_RELAY_FEE};
use crate::transport::DEFAULT_MAX_CHUNK_SIZE;
use crate::wallet::SelectionPolicy;

/// Highest dust relay fee accepted, in sat/kvB
pub const MAX_DUST_RELAY_FEE: u64 = 100_000;
/// Most addresses scanned per branch
pub const MAX_ADDRESS_LOOKAHEAD: u32 = 10_000;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine settings shared by every command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub network: Network,
    pub selection_policy: SelectionPolicy,
    /// Dust relay fee in sat/kvB
    pub dust_relay_fee: u64,
    /// Payload bytes per transport chunk
    pub max_chunk_size: usize,
    /// Confirmation target used when asking for a fee rate
    pub priority: Priority,
    /// Signal replaceability on assembled inputs
    pub rbf: bool,
    /// Addresses per branch to scan for funds
    pub address_lookahead: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            selection_policy: SelectionPolicy::default(),
            dust_relay_fee: DUST_RELAY_FEE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            priority: Priority::default(),
            rbf: true,
            address_lookahead: 20,
        }
    }
}

impl EngineConfig {
    /// Read and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Like [`EngineConfig::load`], falling back to defaults when the file
    /// does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let file = fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "max_chunk_size must be at least 1".to_string(),
            ));
        }
        if self.dust_relay_fee > MAX_DUST_RELAY_FEE {
            return Err(ConfigError::Invalid(format!(
                "dust_relay_fee {} exceeds {}",
                self.dust_relay_fee, MAX_DUST_RELAY_FEE
            )));
        }
        if self.address_lookahead == 0 || self.address_lookahead > MAX_ADDRESS_LOOKAHEAD {
            return Err(ConfigError::Invalid(format!(
                "address_lookahead must be between 1 and {}",
                MAX_ADDRESS_LOOKAHEAD
            )));
        }
        Ok(())
    }
}
