//! Monetary value objects.
//!
//! # Design Decisions
//!
//! - **Money in minor units**: amounts are stored as i64 cents, never floats.
//!   Display precision is always two digits.
//! - **Currency as code**: a validated 3-letter uppercase code, no exchange
//!   logic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ValidationError;

/// Amount of money in minor units (cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero amount.
    pub const ZERO: Money = Money(0);

    /// Creates an amount from minor units (cents).
    pub fn from_minor_units(cents: i64) -> Self {
        Self(cents)
    }

    /// Creates an amount from whole major units (e.g. dollars).
    pub fn from_major_units(units: i64) -> Self {
        Self(units * 100)
    }

    /// Parses a decimal string with up to two fractional digits ("12.34").
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for malformed input or more than two
    /// fractional digits.
    pub fn parse_decimal(s: &str) -> Result<Self, ValidationError> {
        let s = s.trim();
        let (negative, s) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };

        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::invalid_format("amount", "not a decimal"));
        }
        if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::invalid_format(
                "amount",
                "more than two fractional digits",
            ));
        }

        let whole: i64 = whole
            .parse()
            .map_err(|_| ValidationError::invalid_format("amount", "whole part overflow"))?;
        let frac: i64 = if frac.is_empty() {
            0
        } else if frac.len() == 1 {
            frac.parse::<i64>().unwrap_or(0) * 10
        } else {
            frac.parse().unwrap_or(0)
        };

        let cents = whole * 100 + frac;
        Ok(Self(if negative { -cents } else { cents }))
    }

    /// The amount in minor units.
    pub fn minor_units(&self) -> i64 {
        self.0
    }

    /// Renders the amount as a decimal string with two fractional digits.
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        format!("{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal_string())
    }
}

/// ISO 4217 style 3-letter currency code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency([u8; 3]);

impl Currency {
    /// US dollars, the default plan currency.
    pub const USD: Currency = Currency(*b"USD");

    /// Creates a currency from a 3-letter code.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` unless the code is exactly three ASCII
    /// letters. Lowercase input is normalized to uppercase.
    pub fn new(code: &str) -> Result<Self, ValidationError> {
        let bytes = code.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_alphabetic()) {
            return Err(ValidationError::invalid_format(
                "currency",
                "must be a 3-letter code",
            ));
        }
        let mut out = [0u8; 3];
        for (i, b) in bytes.iter().enumerate() {
            out[i] = b.to_ascii_uppercase();
        }
        Ok(Self(out))
    }

    /// The currency code as a string slice.
    pub fn as_str(&self) -> &str {
        // Constructor guarantees ASCII letters.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Currency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_major_units_scales_to_cents() {
        assert_eq!(Money::from_major_units(12).minor_units(), 1200);
    }

    #[test]
    fn parse_decimal_accepts_two_digit_fraction() {
        assert_eq!(Money::parse_decimal("12.34").unwrap().minor_units(), 1234);
        assert_eq!(Money::parse_decimal("0.05").unwrap().minor_units(), 5);
    }

    #[test]
    fn parse_decimal_pads_single_digit_fraction() {
        assert_eq!(Money::parse_decimal("9.9").unwrap().minor_units(), 990);
    }

    #[test]
    fn parse_decimal_accepts_whole_numbers() {
        assert_eq!(Money::parse_decimal("15").unwrap().minor_units(), 1500);
    }

    #[test]
    fn parse_decimal_rejects_three_digit_fraction() {
        assert!(Money::parse_decimal("1.234").is_err());
    }

    #[test]
    fn parse_decimal_rejects_garbage() {
        assert!(Money::parse_decimal("abc").is_err());
        assert!(Money::parse_decimal("1.2x").is_err());
        assert!(Money::parse_decimal("").is_err());
    }

    #[test]
    fn parse_decimal_handles_negative_amounts() {
        assert_eq!(Money::parse_decimal("-3.50").unwrap().minor_units(), -350);
    }

    #[test]
    fn displays_with_two_digit_precision() {
        assert_eq!(Money::from_minor_units(1999).to_string(), "19.99");
        assert_eq!(Money::from_minor_units(5).to_string(), "0.05");
        assert_eq!(Money::from_minor_units(-350).to_string(), "-3.50");
    }

    #[test]
    fn currency_normalizes_to_uppercase() {
        assert_eq!(Currency::new("usd").unwrap().as_str(), "USD");
    }

    #[test]
    fn currency_rejects_wrong_length_or_digits() {
        assert!(Currency::new("US").is_err());
        assert!(Currency::new("USDD").is_err());
        assert!(Currency::new("U5D").is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decimal_rendering_roundtrips(cents in -1_000_000_000i64..1_000_000_000) {
                let money = Money::from_minor_units(cents);
                let parsed = Money::parse_decimal(&money.to_decimal_string()).unwrap();
                prop_assert_eq!(parsed, money);
            }

            #[test]
            fn parse_never_panics(s in "\\PC{0,24}") {
                let _ = Money::parse_decimal(&s);
            }
        }
    }
}
