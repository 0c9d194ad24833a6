//! Chunk framing and reassembly
//!
//! Each chunk names the artifact it belongs to (the unsigned txid), its
//! position and the total count. Text form: `p{n}of{m} {txid} {base64}`
//! with `n` counted from 1.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::core::Txid;
use crate::psbt::{Psbt, PsbtError};

/// Default payload bytes per chunk
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 2_500;

/// Chunking errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Chunk size must be at least 1 byte")]
    InvalidChunkSize,
    #[error("Incomplete chunk set: {received} of {total} chunks")]
    IncompleteChunkSet { received: usize, total: usize },
    #[error("Chunk belongs to {found}, expected {expected}")]
    ChunkContainerMismatch { expected: Txid, found: Txid },
    #[error("Conflicting payloads for chunk {0}")]
    ConflictingChunk(u32),
    #[error("Chunk claims {found} total chunks, expected {expected}")]
    InconsistentTotal { expected: u32, found: u32 },
    #[error("Chunk index {index} out of range for {total} chunks")]
    IndexOutOfRange { index: u32, total: u32 },
    #[error("Invalid chunk format: {0}")]
    InvalidFormat(String),
    #[error("Invalid base64: {0}")]
    Base64(String),
    #[error("PSBT error: {0}")]
    Psbt(#[from] PsbtError),
}

/// One piece of a split artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub container_id: Txid,
    /// Zero-based position
    pub index: u32,
    pub total: u32,
    pub payload: Vec<u8>,
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p{}of{} {} {}",
            self.index + 1,
            self.total,
            self.container_id,
            STANDARD.encode(&self.payload)
        )
    }
}

impl FromStr for Chunk {
    type Err = ChunkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (header, txid, payload) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            // An empty payload leaves only the trailing space
            (Some(header), Some(txid), payload, None) => (header, txid, payload.unwrap_or("")),
            _ => {
                return Err(ChunkError::InvalidFormat(
                    "expected 'p<n>of<m> <txid> <payload>'".to_string(),
                ))
            }
        };

        let (position, total) = header
            .strip_prefix('p')
            .and_then(|rest| rest.split_once("of"))
            .ok_or_else(|| ChunkError::InvalidFormat(format!("bad header '{}'", header)))?;
        let position: u32 = position
            .parse()
            .map_err(|_| ChunkError::InvalidFormat(format!("bad position '{}'", position)))?;
        let total: u32 = total
            .parse()
            .map_err(|_| ChunkError::InvalidFormat(format!("bad total '{}'", total)))?;
        if position == 0 || total == 0 || position > total {
            return Err(ChunkError::InvalidFormat(format!("bad header '{}'", header)));
        }

        let container_id = txid
            .parse()
            .map_err(|_| ChunkError::InvalidFormat(format!("bad txid '{}'", txid)))?;
        let payload = STANDARD
            .decode(payload)
            .map_err(|e| ChunkError::Base64(e.to_string()))?;

        Ok(Self {
            container_id,
            index: position - 1,
            total,
            payload,
        })
    }
}

// =============================================================================
// Split / reassemble
// =============================================================================

/// Split `bytes` into chunks of at most `max_chunk_size` payload bytes.
/// Empty input yields a single empty chunk.
pub fn split(bytes: &[u8], container_id: Txid, max_chunk_size: usize) -> Result<Vec<Chunk>, ChunkError> {
    if max_chunk_size == 0 {
        return Err(ChunkError::InvalidChunkSize);
    }
    if bytes.is_empty() {
        return Ok(vec![Chunk {
            container_id,
            index: 0,
            total: 1,
            payload: Vec::new(),
        }]);
    }

    let pieces: Vec<&[u8]> = bytes.chunks(max_chunk_size).collect();
    let total = u32::try_from(pieces.len()).map_err(|_| ChunkError::InvalidChunkSize)?;
    log::debug!(
        "Split {} bytes of {} into {} chunks",
        bytes.len(),
        container_id,
        total
    );

    Ok(pieces
        .into_iter()
        .zip(0u32..)
        .map(|(piece, index)| Chunk {
            container_id,
            index,
            total,
            payload: piece.to_vec(),
        })
        .collect())
}

/// Rebuild the original bytes from a complete chunk set in any order
pub fn reassemble(chunks: &[Chunk]) -> Result<Vec<u8>, ChunkError> {
    let mut collector = ChunkCollector::new();
    for chunk in chunks {
        collector.add(chunk.clone())?;
    }
    collector.finish()
}

/// Split a PSBT, using its unsigned txid as the container id
pub fn split_psbt(psbt: &Psbt, max_chunk_size: usize) -> Result<Vec<Chunk>, ChunkError> {
    split(&psbt.serialize(), psbt.txid(), max_chunk_size)
}

/// Reassemble and decode a PSBT, checking it matches the container id
pub fn reassemble_psbt(chunks: &[Chunk]) -> Result<Psbt, ChunkError> {
    let bytes = reassemble(chunks)?;
    let psbt = Psbt::deserialize(&bytes)?;
    if let Some(first) = chunks.first() {
        if psbt.txid() != first.container_id {
            return Err(ChunkError::ChunkContainerMismatch {
                expected: first.container_id,
                found: psbt.txid(),
            });
        }
    }
    Ok(psbt)
}

// =============================================================================
// Incremental collection
// =============================================================================

/// Accumulates chunks as they arrive (one QR frame at a time)
#[derive(Debug, Clone, Default)]
pub struct ChunkCollector {
    container_id: Option<Txid>,
    total: u32,
    received: BTreeMap<u32, Vec<u8>>,
}

impl ChunkCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk. Returns `false` for an exact repeat of one already held.
    pub fn add(&mut self, chunk: Chunk) -> Result<bool, ChunkError> {
        match self.container_id {
            Some(expected) if expected != chunk.container_id => {
                return Err(ChunkError::ChunkContainerMismatch {
                    expected,
                    found: chunk.container_id,
                });
            }
            Some(_) if chunk.total != self.total => {
                return Err(ChunkError::InconsistentTotal {
                    expected: self.total,
                    found: chunk.total,
                });
            }
            _ => {}
        }

        if chunk.index >= chunk.total {
            return Err(ChunkError::IndexOutOfRange {
                index: chunk.index,
                total: chunk.total,
            });
        }
        if self.container_id.is_none() {
            self.container_id = Some(chunk.container_id);
            self.total = chunk.total;
        }

        match self.received.get(&chunk.index) {
            Some(existing) if *existing == chunk.payload => Ok(false),
            Some(_) => {
                log::warn!("Conflicting payloads for chunk {}", chunk.index);
                Err(ChunkError::ConflictingChunk(chunk.index))
            }
            None => {
                self.received.insert(chunk.index, chunk.payload);
                Ok(true)
            }
        }
    }

    pub fn container_id(&self) -> Option<Txid> {
        self.container_id
    }

    /// `(received, total)`
    pub fn progress(&self) -> (usize, usize) {
        (self.received.len(), self.total as usize)
    }

    pub fn is_complete(&self) -> bool {
        self.container_id.is_some() && self.received.len() == self.total as usize
    }

    /// Zero-based indices not yet received
    pub fn missing(&self) -> Vec<u32> {
        (0..self.total)
            .filter(|index| !self.received.contains_key(index))
            .collect()
    }

    /// Concatenate the payloads in index order
    pub fn finish(self) -> Result<Vec<u8>, ChunkError> {
        let (received, total) = self.progress();
        if !self.is_complete() {
            return Err(ChunkError::IncompleteChunkSet { received, total });
        }

        let bytes: Vec<u8> = self.received.into_values().flatten().collect();
        if let Some(container_id) = self.container_id {
            log::info!(
                "Reassembled {} bytes of {} from {} chunks",
                bytes.len(),
                container_id,
                total
            );
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn test_split_and_reassemble_out_of_order() {
        let bytes = artifact(6_000);
        let chunks = split(&bytes, Txid([9; 32]), 2_500).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].payload.len(), 1_000);

        let shuffled = vec![chunks[2].clone(), chunks[0].clone(), chunks[1].clone()];
        assert_eq!(reassemble(&shuffled).unwrap(), bytes);

        let missing = vec![chunks[2].clone(), chunks[0].clone()];
        assert_eq!(
            reassemble(&missing).unwrap_err(),
            ChunkError::IncompleteChunkSet {
                received: 2,
                total: 3
            }
        );
    }

    #[test]
    fn test_any_chunk_size_roundtrips() {
        let bytes = artifact(1_000);
        for size in [1, 7, 999, 1_000, 5_000] {
            let mut chunks = split(&bytes, Txid([1; 32]), size).unwrap();
            chunks.reverse();
            assert_eq!(reassemble(&chunks).unwrap(), bytes);
        }
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert_eq!(
            split(b"abc", Txid([1; 32]), 0).unwrap_err(),
            ChunkError::InvalidChunkSize
        );
    }

    #[test]
    fn test_empty_input() {
        let chunks = split(&[], Txid([1; 32]), 10).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(reassemble(&chunks).unwrap().is_empty());
        assert!(matches!(
            reassemble(&[]),
            Err(ChunkError::IncompleteChunkSet { received: 0, .. })
        ));
    }

    #[test]
    fn test_mixed_containers_rejected() {
        let a = split(&artifact(100), Txid([1; 32]), 50).unwrap();
        let b = split(&artifact(100), Txid([2; 32]), 50).unwrap();
        assert!(matches!(
            reassemble(&[a[0].clone(), b[1].clone()]),
            Err(ChunkError::ChunkContainerMismatch { .. })
        ));
    }

    #[test]
    fn test_duplicates() {
        let chunks = split(&artifact(100), Txid([1; 32]), 40).unwrap();

        let mut repeated = chunks.clone();
        repeated.push(chunks[1].clone());
        assert_eq!(reassemble(&repeated).unwrap(), artifact(100));

        let mut forged = chunks[1].clone();
        forged.payload[0] ^= 0xff;
        let mut conflicting = chunks.clone();
        conflicting.push(forged);
        assert_eq!(
            reassemble(&conflicting).unwrap_err(),
            ChunkError::ConflictingChunk(1)
        );
    }

    #[test]
    fn test_inconsistent_total_and_range() {
        let chunks = split(&artifact(100), Txid([1; 32]), 40).unwrap();

        let mut bad_total = chunks[1].clone();
        bad_total.total = 4;
        assert_eq!(
            reassemble(&[chunks[0].clone(), bad_total]).unwrap_err(),
            ChunkError::InconsistentTotal {
                expected: 3,
                found: 4
            }
        );

        let mut bad_index = chunks[0].clone();
        bad_index.index = 3;
        assert!(matches!(
            reassemble(&[bad_index]),
            Err(ChunkError::IndexOutOfRange { index: 3, total: 3 })
        ));
    }

    #[test]
    fn test_collector_progress() {
        let chunks = split(&artifact(100), Txid([1; 32]), 30).unwrap();
        let mut collector = ChunkCollector::new();
        assert!(!collector.is_complete());

        assert!(collector.add(chunks[3].clone()).unwrap());
        assert!(!collector.add(chunks[3].clone()).unwrap());
        assert!(collector.add(chunks[0].clone()).unwrap());
        assert_eq!(collector.progress(), (2, 4));
        assert_eq!(collector.missing(), vec![1, 2]);
        assert_eq!(collector.container_id(), Some(Txid([1; 32])));

        collector.add(chunks[2].clone()).unwrap();
        collector.add(chunks[1].clone()).unwrap();
        assert!(collector.is_complete());
        assert_eq!(collector.finish().unwrap(), artifact(100));
    }

    #[test]
    fn test_text_form() {
        let chunks = split(b"hello world", Txid([0xab; 32]), 6).unwrap();
        let text = chunks[1].to_string();
        assert!(text.starts_with("p2of2 abab"));
        assert!(text.ends_with(" d29ybGQ="));

        let parsed: Chunk = text.parse().unwrap();
        assert_eq!(parsed, chunks[1]);
    }

    #[test]
    fn test_empty_payload_text_form() {
        let chunks = split(&[], Txid([0xcd; 32]), 10).unwrap();
        let text = chunks[0].to_string();
        assert!(text.ends_with(' '));

        let parsed: Chunk = text.parse().unwrap();
        assert_eq!(parsed, chunks[0]);
        let trimmed: Chunk = text.trim_end().parse().unwrap();
        assert!(reassemble(&[trimmed]).unwrap().is_empty());
    }

    #[test]
    fn test_text_form_rejects_garbage() {
        let txid = Txid([1; 32]).to_string();
        for text in [
            "".to_string(),
            format!("p0of2 {} aGk=", txid),
            format!("p3of2 {} aGk=", txid),
            format!("x1of2 {} aGk=", txid),
            "p1of2 nothex aGk=".to_string(),
            format!("p1of2 {} aGk= extra", txid),
        ] {
            assert!(
                matches!(text.parse::<Chunk>(), Err(ChunkError::InvalidFormat(_))),
                "accepted {:?}",
                text
            );
        }
        assert!(matches!(
            format!("p1of2 {} !!!", txid).parse::<Chunk>(),
            Err(ChunkError::Base64(_))
        ));
    }
}
