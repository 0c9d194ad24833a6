//! Canonical multisig key ordering (BIP67)
//!
//! Keys are sorted by their raw serialized bytes. Because the sort is total
//! once duplicates are rejected, every co-signer arrives at the same order
//! no matter how the key set was handed to them.

use super::config::MultisigError;
use crate::crypto::PubKey;

/// Sort a key set into canonical order.
///
/// Fails with `DuplicateKey` if two keys are byte-identical.
pub fn order_keys(keys: &[PubKey]) -> Result<Vec<PubKey>, MultisigError> {
    let mut ordered = keys.to_vec();
    ordered.sort();

    if let Some(pair) = ordered.windows(2).find(|w| w[0] == w[1]) {
        return Err(MultisigError::DuplicateKey(pair[0].to_hex()));
    }

    Ok(ordered)
}

/// Parse hex-encoded keys and sort them into canonical order.
///
/// Every key must be a 33-byte compressed (02/03) or 65-byte uncompressed
/// (04) encoding; nothing is ordered if any key is malformed.
pub fn order_hex_keys<S: AsRef<str>>(keys: &[S]) -> Result<Vec<PubKey>, MultisigError> {
    let parsed = keys
        .iter()
        .map(|k| {
            PubKey::from_hex(k.as_ref().trim())
                .map_err(|e| MultisigError::InvalidKeyEncoding(format!("{}: {}", k.as_ref(), e)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    order_keys(&parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: [&str; 3] = [
        "02fe6f0a5a297eb38c391581c4413e084773ea23954d93f7753db7dc0adc188b2f",
        "02ff12471208c14bd580709cb2358d98975247d8765f92bc25eab3b2763ed605f8",
        "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
    ];

    #[test]
    fn test_order_is_permutation_independent() {
        let permutations = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        let expected = order_hex_keys(&KEYS).unwrap();
        assert_eq!(expected[0].to_hex(), KEYS[2]);
        assert_eq!(expected[1].to_hex(), KEYS[0]);
        assert_eq!(expected[2].to_hex(), KEYS[1]);

        for perm in permutations {
            let shuffled: Vec<&str> = perm.iter().map(|i| KEYS[*i]).collect();
            assert_eq!(order_hex_keys(&shuffled).unwrap(), expected);
        }
    }

    #[test]
    fn test_compressed_prefix_sorts_by_bytes() {
        // 02... sorts before 03... regardless of the x coordinate
        let g_odd = "0379be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
        let ordered = order_hex_keys(&[g_odd, KEYS[1]]).unwrap();
        assert_eq!(ordered[0].to_hex(), KEYS[1]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = order_hex_keys(&[KEYS[0], KEYS[1], KEYS[0]]).unwrap_err();
        assert_eq!(err, MultisigError::DuplicateKey(KEYS[0].to_string()));
    }

    #[test]
    fn test_invalid_encoding_rejected() {
        assert!(matches!(
            order_hex_keys(&[KEYS[0], "04abcd"]),
            Err(MultisigError::InvalidKeyEncoding(_))
        ));
        assert!(matches!(
            order_hex_keys(&[KEYS[0], "not hex"]),
            Err(MultisigError::InvalidKeyEncoding(_))
        ));
    }
}
