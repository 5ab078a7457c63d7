use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

use crate::error::XaiError;

/// Reserved system addresses that bypass the prefix + hex-body rule.
pub const SPECIAL_ADDRESSES: [&str; 6] = [
    "COINBASE",
    "GOVERNANCE",
    "STAKING",
    "TIMECAPSULE",
    "XAITRADEFEE",
    "TXAITRADEFEE",
];

/// Network prefixes, longest first so `TXAI…` never parses as mainnet.
const PREFIXES: [&str; 2] = ["TXAI", "XAI"];

const STANDARD_BODY_LEN: usize = 40;
const LEGACY_BODY_MIN: usize = 22;
const LEGACY_BODY_MAX: usize = 60;
const MAX_ADDRESS_LEN: usize = 100;

// ── Address ──────────────────────────────────────────────────────────────────

/// A validated XAI address: network prefix (`XAI` / `TXAI`) plus a hex body,
/// or one of the reserved system addresses.
///
/// Standard bodies are 40 hex chars carrying an EIP-55-style mixed-case
/// checksum (Keccak-256 of the lowercase body). Legacy bodies of 22–60 hex
/// chars are accepted without a checksum.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    /// Validate and wrap an address string. Mixed-case 40-char bodies must
    /// carry a correct checksum.
    pub fn parse(s: &str) -> Result<Self, XaiError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(XaiError::InvalidAddress("empty address".into()));
        }
        if SPECIAL_ADDRESSES.contains(&s) {
            return Ok(Self(s.to_string()));
        }
        if s.len() > MAX_ADDRESS_LEN {
            return Err(XaiError::InvalidAddress(format!(
                "address longer than {MAX_ADDRESS_LEN} characters"
            )));
        }

        let prefix = PREFIXES
            .iter()
            .find(|p| s.starts_with(**p))
            .ok_or_else(|| XaiError::InvalidAddress("prefix must be XAI or TXAI".into()))?;
        let body = &s[prefix.len()..];
        if body.is_empty() || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(XaiError::InvalidAddress("body must be hexadecimal".into()));
        }

        match body.len() {
            STANDARD_BODY_LEN => {
                let mixed = body.bytes().any(|b| b.is_ascii_lowercase())
                    && body.bytes().any(|b| b.is_ascii_uppercase());
                if mixed && !checksum_matches(body) {
                    return Err(XaiError::InvalidAddress("bad EIP-55 checksum".into()));
                }
                Ok(Self(s.to_string()))
            }
            LEGACY_BODY_MIN..=LEGACY_BODY_MAX => Ok(Self(s.to_string())),
            n => Err(XaiError::InvalidAddress(format!(
                "body length {n} outside accepted range"
            ))),
        }
    }

    /// Build the checksummed form from a prefix and a 20-byte payload.
    pub fn from_payload(prefix: &str, payload: &[u8; 20]) -> Self {
        let body = to_checksum_body(&hex::encode(payload));
        Self(format!("{prefix}{body}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_special(&self) -> bool {
        SPECIAL_ADDRESSES.contains(&self.0.as_str())
    }

    pub fn coinbase() -> Self {
        Self("COINBASE".to_string())
    }

    pub fn governance() -> Self {
        Self("GOVERNANCE".to_string())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ── EIP-55-style checksum ────────────────────────────────────────────────────

/// Apply the mixed-case checksum to a lowercase hex body: a hex letter is
/// uppercased when the corresponding nibble of Keccak-256(lowercase body)
/// is >= 8.
pub fn to_checksum_body(body: &str) -> String {
    let lower = body.to_ascii_lowercase();
    let digest = Keccak256::digest(lower.as_bytes());
    lower
        .bytes()
        .enumerate()
        .map(|(i, b)| {
            let nibble = if i % 2 == 0 {
                digest[i / 2] >> 4
            } else {
                digest[i / 2] & 0x0f
            };
            if b.is_ascii_alphabetic() && nibble >= 8 {
                b.to_ascii_uppercase() as char
            } else {
                b as char
            }
        })
        .collect()
}

fn checksum_matches(body: &str) -> bool {
    to_checksum_body(body) == body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checksummed(prefix: &str) -> String {
        format!("{prefix}{}", to_checksum_body(&"ab".repeat(20)))
    }

    #[test]
    fn special_addresses_pass() {
        for s in SPECIAL_ADDRESSES {
            assert!(Address::parse(s).is_ok(), "{s} should parse");
        }
    }

    #[test]
    fn checksummed_address_round_trips() {
        let addr = Address::parse(&checksummed("XAI")).unwrap();
        assert!(!addr.is_special());
        assert!(addr.as_str().starts_with("XAI"));
    }

    #[test]
    fn lowercase_standard_body_accepted() {
        let s = format!("XAI{}", "ab".repeat(20));
        assert!(Address::parse(&s).is_ok());
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let good = checksummed("XAI");
        // Flip the case of the first alphabetic character in the body.
        let mut chars: Vec<char> = good.chars().collect();
        for c in chars.iter_mut().skip(3) {
            if c.is_ascii_alphabetic() {
                *c = if c.is_ascii_uppercase() {
                    c.to_ascii_lowercase()
                } else {
                    c.to_ascii_uppercase()
                };
                break;
            }
        }
        let bad: String = chars.into_iter().collect();
        assert!(matches!(
            Address::parse(&bad),
            Err(XaiError::InvalidAddress(_))
        ));
    }

    #[test]
    fn testnet_prefix_not_confused_with_mainnet() {
        let s = format!("TXAI{}", "cd".repeat(20));
        let addr = Address::parse(&s).unwrap();
        assert!(addr.as_str().starts_with("TXAI"));
    }

    #[test]
    fn rejects_bad_prefix_and_body() {
        assert!(Address::parse("BTC1234").is_err());
        assert!(Address::parse("XAIzzzz").is_err());
        assert!(Address::parse("XAI").is_err());
        assert!(Address::parse(&format!("XAI{}", "a".repeat(70))).is_err());
    }

    #[test]
    fn legacy_body_lengths_accepted() {
        assert!(Address::parse(&format!("XAI{}", "a".repeat(22))).is_ok());
        assert!(Address::parse(&format!("XAI{}", "a".repeat(60))).is_ok());
        assert!(Address::parse(&format!("XAI{}", "a".repeat(21))).is_err());
    }
}
