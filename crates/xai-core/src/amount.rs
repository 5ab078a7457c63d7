use std::fmt;
use std::iter::Sum;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::MAX_SUPPLY_BASE_UNITS;
use crate::error::XaiError;

/// Fixed-point monetary amount: u64 base units, 8 decimal places
/// (1 XAI = 100_000_000 base units). Float is forbidden on the wire and
/// internally; the wire form is a decimal string with exactly 8 fractional
/// digits ("5.10000000"). All arithmetic is checked.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Amount(u64);

/// Base units per whole XAI.
pub const BASE_UNITS_PER_XAI: u64 = 100_000_000;

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Smallest representable non-zero amount (the dust floor).
    pub const ONE_BASE_UNIT: Amount = Amount(1);

    pub const fn from_base_units(units: u64) -> Self {
        Self(units)
    }

    /// Whole-XAI constructor for constants and tests.
    pub const fn from_xai(xai: u64) -> Self {
        Self(xai * BASE_UNITS_PER_XAI)
    }

    pub const fn base_units(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// `self * percent / 100`, rounding down.
    pub fn percent(self, percent: u64) -> Amount {
        Amount(((self.0 as u128 * percent as u128) / 100) as u64)
    }

    /// Sum with overflow detection.
    pub fn checked_sum<I: IntoIterator<Item = Amount>>(iter: I) -> Option<Amount> {
        iter.into_iter()
            .try_fold(Amount::ZERO, |acc, a| acc.checked_add(a))
    }

    /// Parse the canonical decimal-string form. Rejects signs, exponents,
    /// more than 8 fractional digits, and values above the supply cap.
    pub fn parse(s: &str) -> Result<Self, XaiError> {
        let malformed = |msg: &str| XaiError::MalformedEncoding(format!("amount {s:?}: {msg}"));

        let (int_part, frac_part) = match s.split_once('.') {
            Some((_, "")) => return Err(malformed("trailing decimal point")),
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed("integer part must be decimal digits"));
        }
        if frac_part.len() > 8 || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed("at most 8 fractional decimal digits"));
        }

        let whole: u64 = int_part
            .parse()
            .map_err(|_| malformed("integer part out of range"))?;
        let mut frac: u64 = if frac_part.is_empty() {
            0
        } else {
            frac_part
                .parse()
                .map_err(|_| malformed("fractional part out of range"))?
        };
        frac *= 10u64.pow(8 - frac_part.len() as u32);

        let units = whole
            .checked_mul(BASE_UNITS_PER_XAI)
            .and_then(|u| u.checked_add(frac))
            .ok_or_else(|| malformed("value overflows"))?;
        if units > MAX_SUPPLY_BASE_UNITS {
            return Err(malformed("value exceeds max supply"));
        }
        Ok(Amount(units))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:08}",
            self.0 / BASE_UNITS_PER_XAI,
            self.0 % BASE_UNITS_PER_XAI
        )
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({self})")
    }
}

impl Sum for Amount {
    /// Saturating sum for display-level aggregation. Consensus paths use
    /// `checked_sum` instead.
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, |acc, a| {
            Amount(acc.0.saturating_add(a.0))
        })
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        let a = Amount::parse("5.10000000").unwrap();
        assert_eq!(a.base_units(), 510_000_000);
        assert_eq!(a.to_string(), "5.10000000");
    }

    #[test]
    fn parse_pads_short_fractions() {
        assert_eq!(Amount::parse("0.1").unwrap(), Amount::from_base_units(10_000_000));
        assert_eq!(Amount::parse("3").unwrap(), Amount::from_xai(3));
    }

    #[test]
    fn parse_rejects_floats_and_signs() {
        for bad in ["1e8", "-1", "+1", "1.123456789", "", ".5", "1.", "NaN"] {
            assert!(Amount::parse(bad).is_err(), "should reject {bad:?}");
        }
    }

    #[test]
    fn parse_rejects_above_supply_cap() {
        assert!(Amount::parse("121000000.00000001").is_err());
        assert!(Amount::parse("121000000").is_ok());
    }

    #[test]
    fn checked_arithmetic() {
        let a = Amount::from_xai(2);
        let b = Amount::from_xai(3);
        assert_eq!(a.checked_add(b).unwrap(), Amount::from_xai(5));
        assert!(a.checked_sub(b).is_none());
        assert_eq!(Amount::from_xai(50).percent(10), Amount::from_xai(5));
    }

    #[test]
    fn serde_as_string() {
        let a = Amount::from_base_units(510_000_000);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"5.10000000\"");
        let back: Amount = serde_json::from_str("\"5.10000000\"").unwrap();
        assert_eq!(back, a);
    }
}
