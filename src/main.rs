//! Co-signer CLI Application
//!
//! A command-line interface for deriving multisig addresses and passing
//! PSBTs between co-signers.

use btc_cosigner::cli;
use btc_cosigner::core::{Network, ScriptVariant};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cosigner")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "Bitcoin multisig key derivation and PSBT co-signing", long_about = None)]
struct Cli {
    /// Engine config file (JSON)
    #[arg(short, long, default_value = "cosigner.json")]
    config: PathBuf,

    /// Override the configured network
    #[arg(short, long)]
    network: Option<Network>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init,

    /// Generate a new mnemonic
    Mnemonic {
        /// Word count (12, 15, 18, 21 or 24)
        #[arg(short, long, default_value = "24")]
        words: usize,
    },

    /// Export this wallet's cosigner key for a multisig account
    Cosigner {
        #[arg(short, long)]
        mnemonic: String,

        #[arg(long, default_value = "")]
        passphrase: String,

        /// legacy, wrapped-segwit or native-segwit
        #[arg(short, long, default_value = "native-segwit")]
        variant: ScriptVariant,

        #[arg(short, long, default_value = "0")]
        account: u32,
    },

    /// Address derivation
    Address {
        #[command(subcommand)]
        action: AddressCommands,
    },

    /// PSBT operations
    Psbt {
        #[command(subcommand)]
        action: PsbtCommands,
    },

    /// Chunked transport for air-gapped transfer
    Chunk {
        #[command(subcommand)]
        action: ChunkCommands,
    },
}

#[derive(Subcommand)]
enum AddressCommands {
    /// Single-key address
    Single {
        /// Public key (hex)
        #[arg(short, long)]
        key: String,

        #[arg(short, long, default_value = "native-segwit")]
        variant: ScriptVariant,
    },

    /// M-of-N address from public keys (any order)
    Multisig {
        #[arg(short, long)]
        threshold: usize,

        /// Public keys (hex, comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        keys: Vec<String>,

        #[arg(short, long, default_value = "native-segwit")]
        variant: ScriptVariant,
    },

    /// Addresses of a multisig account from cosigner xpubs
    Account {
        #[arg(short, long)]
        threshold: usize,

        /// Cosigner keys, `[fingerprint/path]xpub` (repeatable)
        #[arg(long = "cosigner", required = true)]
        cosigners: Vec<String>,

        #[arg(short, long, default_value = "native-segwit")]
        variant: ScriptVariant,

        /// 0 for receive, 1 for change
        #[arg(long, default_value = "0")]
        change: u32,

        /// Number of addresses to show
        #[arg(long, default_value = "10")]
        count: u32,
    },
}

#[derive(Subcommand)]
enum PsbtCommands {
    /// Show state and signature counts
    Inspect {
        file: PathBuf,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Sign with a mnemonic
    Sign {
        file: PathBuf,

        #[arg(short, long)]
        mnemonic: String,

        #[arg(long, default_value = "")]
        passphrase: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Merge independently signed copies
    Combine {
        #[arg(required = true, num_args = 2..)]
        files: Vec<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Finalize into a raw transaction
    Finalize {
        file: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ChunkCommands {
    /// Split a PSBT into text chunks
    Split {
        file: PathBuf,

        /// Payload bytes per chunk (defaults to the configured size)
        #[arg(short, long)]
        size: Option<usize>,
    },

    /// Reassemble a PSBT from a file of chunks, one per line
    Join {
        file: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Init runs before a config exists
    if let Commands::Init = cli.command {
        return cli::cmd_config_init(&cli.config);
    }

    let mut config = cli::load_config(Some(&cli.config))?;
    if let Some(network) = cli.network {
        config.network = network;
    }

    match cli.command {
        Commands::Init => unreachable!(),

        Commands::Mnemonic { words } => {
            cli::cmd_mnemonic_new(words)?;
        }

        Commands::Cosigner {
            mnemonic,
            passphrase,
            variant,
            account,
        } => {
            cli::cmd_cosigner_export(&config, &mnemonic, &passphrase, variant, account)?;
        }

        Commands::Address { action } => match action {
            AddressCommands::Single { key, variant } => {
                cli::cmd_address_single(&config, &key, variant)?;
            }
            AddressCommands::Multisig {
                threshold,
                keys,
                variant,
            } => {
                cli::cmd_address_multisig(&config, threshold, &keys, variant)?;
            }
            AddressCommands::Account {
                threshold,
                cosigners,
                variant,
                change,
                count,
            } => {
                cli::cmd_address_account(&config, threshold, &cosigners, variant, change, count)?;
            }
        },

        Commands::Psbt { action } => match action {
            PsbtCommands::Inspect { file, json } => {
                cli::cmd_psbt_inspect(&file, json)?;
            }
            PsbtCommands::Sign {
                file,
                mnemonic,
                passphrase,
                output,
            } => {
                cli::cmd_psbt_sign(&config, &file, &mnemonic, &passphrase, output.as_ref())?;
            }
            PsbtCommands::Combine { files, output } => {
                cli::cmd_psbt_combine(&files, output.as_ref())?;
            }
            PsbtCommands::Finalize { file, output } => {
                cli::cmd_psbt_finalize(&file, output.as_ref())?;
            }
        },

        Commands::Chunk { action } => match action {
            ChunkCommands::Split { file, size } => {
                cli::cmd_chunk_split(&config, &file, size)?;
            }
            ChunkCommands::Join { file, output } => {
                cli::cmd_chunk_join(&file, output.as_ref())?;
            }
        },
    }

    Ok(())
}
