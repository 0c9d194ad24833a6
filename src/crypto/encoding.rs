//! Base58Check encoding
//!
//! Legacy addresses, WIF keys and extended keys all share the same
//! `payload || first4(double_sha256(payload))` framing.

use super::hash::double_sha256;
use thiserror::Error;

/// Errors from Base58Check decoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Base58Error {
    #[error("Invalid base58 string: {0}")]
    InvalidCharacter(String),
    #[error("Base58 payload too short: {0} bytes")]
    TooShort(usize),
    #[error("Base58 checksum mismatch")]
    BadChecksum,
}

/// Encode `payload` with a 4-byte double-SHA256 checksum
pub fn base58check_encode(payload: &[u8]) -> String {
    let checksum = double_sha256(payload);
    let mut data = Vec::with_capacity(payload.len() + 4);
    data.extend_from_slice(payload);
    data.extend_from_slice(&checksum[..4]);
    bs58::encode(data).into_string()
}

/// Decode a Base58Check string and verify its checksum
pub fn base58check_decode(encoded: &str) -> Result<Vec<u8>, Base58Error> {
    let data = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| Base58Error::InvalidCharacter(e.to_string()))?;

    if data.len() < 4 {
        return Err(Base58Error::TooShort(data.len()));
    }

    let (payload, checksum) = data.split_at(data.len() - 4);
    if double_sha256(payload)[..4] != *checksum {
        return Err(Base58Error::BadChecksum);
    }

    Ok(payload.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let payload = [0x00u8, 1, 2, 3, 4, 5];
        let encoded = base58check_encode(&payload);
        // Leading zero byte becomes a leading '1'
        assert!(encoded.starts_with('1'));
        assert_eq!(base58check_decode(&encoded).unwrap(), payload.to_vec());
    }

    #[test]
    fn test_bad_checksum() {
        let encoded = base58check_encode(b"payload");
        let mut chars: Vec<char> = encoded.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '2' { '3' } else { '2' };
        let tampered: String = chars.into_iter().collect();
        assert_eq!(
            base58check_decode(&tampered),
            Err(Base58Error::BadChecksum)
        );
    }

    #[test]
    fn test_invalid_character() {
        assert!(matches!(
            base58check_decode("0OIl"),
            Err(Base58Error::InvalidCharacter(_))
        ));
    }
}
