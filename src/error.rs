//! Crate-wide error type
//!
//! Each module has its own error enum; [`Error`] wraps them all so callers
//! holding mixed results can still tell failure classes apart via
//! [`Error::kind`].

use std::fmt;
use std::io;
use thiserror::Error;

use crate::config::ConfigError;
use crate::core::{AddressError, DecodeError, ScriptError, TransactionError};
use crate::crypto::{DerivationError, KeyError, MnemonicError};
use crate::multisig::MultisigError;
use crate::psbt::PsbtError;
use crate::transport::ChunkError;
use crate::wallet::WalletError;

/// Crate result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Broad failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed keys, paths, scripts, addresses or encodings; wrong network;
    /// bad threshold or key count
    Validation,
    /// Operation not allowed in the current state: foreign key, mismatched
    /// artifacts, too few signatures, incomplete chunk sets
    State,
    /// Dust, unbalanced accounting, insufficient funds
    Economic,
    /// A signature that does not verify
    Cryptographic,
    /// File or collaborator failure
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::State => "state",
            ErrorKind::Economic => "economic",
            ErrorKind::Cryptographic => "cryptographic",
            ErrorKind::Io => "io",
        };
        f.write_str(name)
    }
}

/// Any error the engine can return
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Derivation(#[from] DerivationError),
    #[error(transparent)]
    Mnemonic(#[from] MnemonicError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Multisig(#[from] MultisigError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Psbt(#[from] PsbtError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Key(e) => key_kind(e),
            Error::Derivation(e) => derivation_kind(e),
            Error::Mnemonic(_)
            | Error::Script(_)
            | Error::Address(_)
            | Error::Decode(_)
            | Error::Transaction(_) => ErrorKind::Validation,
            Error::Multisig(e) => multisig_kind(e),
            Error::Wallet(e) => wallet_kind(e),
            Error::Psbt(e) => psbt_kind(e),
            Error::Chunk(e) => chunk_kind(e),
            Error::Config(ConfigError::Io(_)) | Error::Io(_) => ErrorKind::Io,
            Error::Config(_) => ErrorKind::Validation,
        }
    }
}

fn key_kind(e: &KeyError) -> ErrorKind {
    match e {
        KeyError::Secp256k1(_) => ErrorKind::Cryptographic,
        _ => ErrorKind::Validation,
    }
}

fn derivation_kind(e: &DerivationError) -> ErrorKind {
    match e {
        DerivationError::Key(e) => key_kind(e),
        _ => ErrorKind::Validation,
    }
}

fn multisig_kind(e: &MultisigError) -> ErrorKind {
    match e {
        MultisigError::Derivation(e) => derivation_kind(e),
        _ => ErrorKind::Validation,
    }
}

fn wallet_kind(e: &WalletError) -> ErrorKind {
    match e {
        WalletError::InsufficientFunds { .. }
        | WalletError::DustOutput { .. }
        | WalletError::Unbalanced { .. } => ErrorKind::Economic,
        WalletError::Locked => ErrorKind::State,
        WalletError::Chain(_) => ErrorKind::Io,
        WalletError::Key(e) => key_kind(e),
        WalletError::Derivation(e) => derivation_kind(e),
        WalletError::Multisig(e) => multisig_kind(e),
        WalletError::Psbt(e) => psbt_kind(e),
        WalletError::NoInputs
        | WalletError::NoOutputs
        | WalletError::AmountOverflow
        | WalletError::DuplicateInput(_)
        | WalletError::Mnemonic(_)
        | WalletError::Address(_)
        | WalletError::Transaction(_) => ErrorKind::Validation,
    }
}

fn psbt_kind(e: &PsbtError) -> ErrorKind {
    match e {
        PsbtError::InvalidSignature { .. } => ErrorKind::Cryptographic,
        PsbtError::TransactionMismatch { .. }
        | PsbtError::KeyNotInScript { .. }
        | PsbtError::InsufficientSignatures { .. }
        | PsbtError::MissingUtxo(_)
        | PsbtError::MissingScript(_)
        | PsbtError::ScriptMismatch(_)
        | PsbtError::InputIndexOutOfRange { .. }
        | PsbtError::AlreadyFinalized
        | PsbtError::NotFinalized => ErrorKind::State,
        PsbtError::Key(e) => key_kind(e),
        PsbtError::Derivation(e) => derivation_kind(e),
        PsbtError::InvalidMagic
        | PsbtError::MissingUnsignedTx
        | PsbtError::UnsignedTxHasSignatures
        | PsbtError::DuplicateKey(_)
        | PsbtError::Malformed(_)
        | PsbtError::Base64(_)
        | PsbtError::UnsupportedScript(_)
        | PsbtError::Decode(_)
        | PsbtError::Transaction(_)
        | PsbtError::Script(_) => ErrorKind::Validation,
    }
}

fn chunk_kind(e: &ChunkError) -> ErrorKind {
    match e {
        ChunkError::IncompleteChunkSet { .. }
        | ChunkError::ChunkContainerMismatch { .. }
        | ChunkError::ConflictingChunk(_)
        | ChunkError::InconsistentTotal { .. }
        | ChunkError::IndexOutOfRange { .. } => ErrorKind::State,
        ChunkError::Psbt(e) => psbt_kind(e),
        ChunkError::InvalidChunkSize | ChunkError::InvalidFormat(_) | ChunkError::Base64(_) => {
            ErrorKind::Validation
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Network, Txid};

    #[test]
    fn test_kinds_are_distinct() {
        let wrong_network: Error = AddressError::WrongNetwork {
            expected: Network::Mainnet,
            found: Network::Testnet,
        }
        .into();
        let too_few: Error = PsbtError::InsufficientSignatures {
            input: 0,
            found: 1,
            required: 2,
        }
        .into();
        assert_eq!(wrong_network.kind(), ErrorKind::Validation);
        assert_eq!(too_few.kind(), ErrorKind::State);
        assert_ne!(wrong_network.kind(), too_few.kind());
    }

    #[test]
    fn test_nested_errors_keep_their_kind() {
        let bad_sig: Error = WalletError::Psbt(PsbtError::InvalidSignature {
            key: "02ab".to_string(),
            input: 1,
        })
        .into();
        assert_eq!(bad_sig.kind(), ErrorKind::Cryptographic);

        let poor: Error = WalletError::InsufficientFunds {
            available: 1,
            required: 2,
        }
        .into();
        assert_eq!(poor.kind(), ErrorKind::Economic);

        let mixed: Error = ChunkError::ChunkContainerMismatch {
            expected: Txid([1; 32]),
            found: Txid([2; 32]),
        }
        .into();
        assert_eq!(mixed.kind(), ErrorKind::State);

        let io: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(io.kind(), ErrorKind::Io);
        assert_eq!(io.kind().to_string(), "io");
    }
}
