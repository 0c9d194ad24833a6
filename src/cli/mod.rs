//! Command handlers for the `cosigner` binary

pub mod commands;

pub use commands::*;
