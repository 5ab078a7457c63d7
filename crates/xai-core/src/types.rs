use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::XaiError;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

/// Block height (genesis = 0).
pub type Height = u64;

/// PoW difficulty: number of leading zero hex nibbles required in a block hash.
pub type Difficulty = u32;

// ── Hash256 ──────────────────────────────────────────────────────────────────

/// 32-byte SHA-256 digest. Serialized as lowercase hex on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash256(pub [u8; 32]);

/// Transaction identifier: SHA-256 of the canonical tx bytes with the
/// signature field excluded.
pub type TxId = Hash256;

/// Block identifier: SHA-256 of the canonical header bytes with the
/// hash and signature fields excluded.
pub type BlockHash = Hash256;

impl Hash256 {
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    pub const fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, XaiError> {
        let bytes = hex::decode(s)
            .map_err(|e| XaiError::MalformedEncoding(format!("invalid hex digest: {e}")))?;
        if bytes.len() != 32 {
            return Err(XaiError::MalformedEncoding(format!(
                "digest must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({}…)", &self.to_hex()[..16])
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash256::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let h = Hash256::from_bytes([0xab; 32]);
        let restored = Hash256::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, restored);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(
            Hash256::from_hex("abcd"),
            Err(XaiError::MalformedEncoding(_))
        ));
    }

    #[test]
    fn serde_as_hex_string() {
        let h = Hash256::zero();
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", "0".repeat(64)));
        let back: Hash256 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
