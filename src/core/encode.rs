//! Consensus byte encoding helpers
//!
//! CompactSize integers and a bounds-checked cursor shared by the
//! transaction and PSBT codecs.

use thiserror::Error;

/// Errors from decoding consensus-encoded bytes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unexpected end of data: needed {needed} bytes at offset {offset}")]
    UnexpectedEof { offset: usize, needed: usize },
    #[error("Non-canonical CompactSize encoding")]
    NonCanonicalVarInt,
    #[error("Length {0} exceeds the remaining data")]
    OversizedLength(u64),
    #[error("Trailing data: {0} bytes")]
    TrailingData(usize),
    #[error("Malformed data: {0}")]
    Malformed(String),
}

/// Append a CompactSize integer
pub fn write_compact_size(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

/// Append a CompactSize length followed by the bytes
pub fn write_var_bytes(out: &mut Vec<u8>, data: &[u8]) {
    write_compact_size(out, data.len() as u64);
    out.extend_from_slice(data);
}

/// Encoded size of a CompactSize integer
pub fn compact_size_len(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Forward-only reader over a byte slice
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Next byte without consuming it
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEof {
                offset: self.pos,
                needed: len,
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32_le(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    /// CompactSize integer, rejecting non-minimal encodings
    pub fn read_compact_size(&mut self) -> Result<u64, DecodeError> {
        let prefix = self.read_u8()?;
        let (value, min) = match prefix {
            0xfd => (u16::from_le_bytes(self.read_array()?) as u64, 0xfd),
            0xfe => (u32::from_le_bytes(self.read_array()?) as u64, 0x1_0000),
            0xff => (self.read_u64_le()?, 0x1_0000_0000),
            n => return Ok(n as u64),
        };
        if value < min {
            return Err(DecodeError::NonCanonicalVarInt);
        }
        Ok(value)
    }

    /// CompactSize length followed by that many bytes
    pub fn read_var_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_compact_size()?;
        if len > self.remaining() as u64 {
            return Err(DecodeError::OversizedLength(len));
        }
        self.read_bytes(len as usize)
    }

    /// Error unless every byte was consumed
    pub fn finish(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingData(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_size_boundaries() {
        for n in [0u64, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, 0x1_0000_0000] {
            let mut out = Vec::new();
            write_compact_size(&mut out, n);
            assert_eq!(out.len(), compact_size_len(n));
            let mut reader = Reader::new(&out);
            assert_eq!(reader.read_compact_size().unwrap(), n);
            assert!(reader.finish().is_ok());
        }
    }

    #[test]
    fn test_non_canonical_rejected() {
        let mut reader = Reader::new(&[0xfd, 0x10, 0x00]);
        assert_eq!(
            reader.read_compact_size(),
            Err(DecodeError::NonCanonicalVarInt)
        );
    }

    #[test]
    fn test_eof_and_oversize() {
        let mut reader = Reader::new(&[0x05, 1, 2]);
        assert_eq!(reader.read_var_bytes(), Err(DecodeError::OversizedLength(5)));

        let mut reader = Reader::new(&[1, 2]);
        assert!(matches!(
            reader.read_u32_le(),
            Err(DecodeError::UnexpectedEof { .. })
        ));
    }
}
