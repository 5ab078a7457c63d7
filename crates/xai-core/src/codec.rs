//! Canonical serialization: the single source of truth for every hash and
//! signature preimage, and for block files on disk.
//!
//! Canonical form is compact JSON with lexicographically sorted object keys,
//! no whitespace, integers in decimal, fixed-point amounts as 8-decimal
//! strings, and digests/keys/signatures as lowercase hex strings. Decoding
//! is strict: input that does not re-encode to itself byte-for-byte is
//! rejected.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::XaiError;

/// Serialize `value` to its canonical byte form.
///
/// Values pass through `serde_json::Value`, whose object representation is
/// an ordered map, so keys come out sorted regardless of field declaration
/// order.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, XaiError> {
    let tree = serde_json::to_value(value)
        .map_err(|e| XaiError::MalformedEncoding(format!("encode: {e}")))?;
    serde_json::to_vec(&tree).map_err(|e| XaiError::MalformedEncoding(format!("encode: {e}")))
}

/// Decode canonical bytes into `T`, rejecting any non-canonical input
/// (unknown layout, unsorted keys, whitespace, alternative number forms).
pub fn decode<T: Serialize + DeserializeOwned>(bytes: &[u8]) -> Result<T, XaiError> {
    let value: T = serde_json::from_slice(bytes)
        .map_err(|e| XaiError::MalformedEncoding(format!("decode: {e}")))?;
    let reencoded = canonical_bytes(&value)?;
    if reencoded != bytes {
        return Err(XaiError::MalformedEncoding(
            "input is not in canonical form".into(),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        zeta: u64,
        alpha: String,
        map: BTreeMap<String, u32>,
    }

    fn sample() -> Sample {
        let mut map = BTreeMap::new();
        map.insert("b".to_string(), 2);
        map.insert("a".to_string(), 1);
        Sample {
            zeta: 7,
            alpha: "x".to_string(),
            map,
        }
    }

    #[test]
    fn keys_are_sorted_and_compact() {
        let bytes = canonical_bytes(&sample()).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"alpha":"x","map":{"a":1,"b":2},"zeta":7}"#
        );
    }

    #[test]
    fn decode_round_trips() {
        let bytes = canonical_bytes(&sample()).unwrap();
        let back: Sample = decode(&bytes).unwrap();
        assert_eq!(back, sample());
        assert_eq!(canonical_bytes(&back).unwrap(), bytes);
    }

    #[test]
    fn decode_rejects_whitespace() {
        let loose = br#"{"alpha": "x", "map": {"a":1,"b":2}, "zeta": 7}"#;
        assert!(matches!(
            decode::<Sample>(loose),
            Err(XaiError::MalformedEncoding(_))
        ));
    }

    #[test]
    fn decode_rejects_unsorted_keys() {
        let unsorted = br#"{"zeta":7,"alpha":"x","map":{"a":1,"b":2}}"#;
        assert!(matches!(
            decode::<Sample>(unsorted),
            Err(XaiError::MalformedEncoding(_))
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode::<Sample>(b"not json").is_err());
    }
}
