//! Offline transport of signing artifacts
//!
//! Co-signers on air-gapped devices exchange PSBTs over low-capacity
//! channels (animated QR codes, short text messages). This module only
//! turns artifact bytes into bounded-size [`Chunk`]s and back; moving the
//! chunks is the caller's business.
//!
//! ```ignore
//! let chunks = split_psbt(&psbt, 2_500)?;
//! for chunk in &chunks {
//!     show_qr(&chunk.to_string()); // "p1of3 <txid> <base64>"
//! }
//!
//! let mut collector = ChunkCollector::new();
//! while !collector.is_complete() {
//!     collector.add(scan_qr()?.parse()?)?;
//! }
//! let psbt = Psbt::deserialize(&collector.finish()?)?;
//! ```

pub mod chunk;

pub use chunk::{
    reassemble, reassemble_psbt, split, split_psbt, Chunk, ChunkCollector, ChunkError,
    DEFAULT_MAX_CHUNK_SIZE,
};
