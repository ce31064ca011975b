//! # Money Module
//!
//! Provides the `Money` type used for product prices.
//!
//! ## Integer Minor Units
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Prices are stored as integer minor units (agorot, cents).              │
//! │                                                                         │
//! │  On the wire and in the snapshot file they travel as a plain JSON       │
//! │  number in major units, which is what the browser UI expects:           │
//! │                                                                         │
//! │    Money::from_cents(12050)  ⇄  "price": 120.5                          │
//! │                                                                         │
//! │  The float only exists at the serde boundary and is rounded to the      │
//! │  nearest minor unit on the way in.                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Sub};

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    ///
    /// ```rust
    /// use discreet_core::money::Money;
    ///
    /// let price = Money::from_cents(12050);
    /// assert_eq!(price.cents(), 12050);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units.
    ///
    /// For negative amounts only the major unit carries the sign.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Creates a Money value from a decimal amount in major units, rounded
    /// to the nearest minor unit. Non-finite input yields zero.
    pub fn from_decimal(amount: f64) -> Self {
        if !amount.is_finite() {
            return Money::zero();
        }
        Money((amount * 100.0).round() as i64)
    }

    /// Parses the leading decimal number of `text` the way a lenient price
    /// field does: `"120"`, `" 49.90 "`, `"12.5 NIS"` all parse, `"abc"`
    /// does not.
    ///
    /// ```rust
    /// use discreet_core::money::Money;
    ///
    /// assert_eq!(Money::parse_decimal("49.90"), Some(Money::from_cents(4990)));
    /// assert_eq!(Money::parse_decimal("12.5 NIS"), Some(Money::from_cents(1250)));
    /// assert_eq!(Money::parse_decimal("abc"), None);
    /// ```
    pub fn parse_decimal(text: &str) -> Option<Self> {
        let text = text.trim();
        let mut end = 0;
        let mut seen_digit = false;
        let mut seen_dot = false;

        for (idx, ch) in text.char_indices() {
            match ch {
                '+' | '-' if idx == 0 => {}
                '0'..='9' => seen_digit = true,
                '.' if !seen_dot => seen_dot = true,
                _ => break,
            }
            end = idx + ch.len_utf8();
        }

        if !seen_digit {
            return None;
        }

        text[..end]
            .trim_end_matches('.')
            .parse::<f64>()
            .ok()
            .map(Money::from_decimal)
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the value in major units as a float, for serialization only.
    #[inline]
    pub fn as_decimal(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Plain decimal rendering, used by CSV export and log lines.
///
/// Whole amounts drop the fraction (`120`), others keep two places (`49.90`).
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let major = (self.0 / 100).abs();
        let minor = (self.0 % 100).abs();
        if minor == 0 {
            write!(f, "{}{}", sign, major)
        } else {
            write!(f, "{}{}.{:02}", sign, major, minor)
        }
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Serde (decimal number in major units)
// =============================================================================

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0 % 100 == 0 {
            serializer.serialize_i64(self.0 / 100)
        } else {
            serializer.serialize_f64(self.as_decimal())
        }
    }
}

struct MoneyVisitor;

impl<'de> Visitor<'de> for MoneyVisitor {
    type Value = Money;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a decimal price")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Money, E> {
        Ok(Money::from_cents(v.saturating_mul(100)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Money, E> {
        let v = i64::try_from(v).map_err(|_| E::custom("price out of range"))?;
        self.visit_i64(v)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Money, E> {
        Ok(Money::from_decimal(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Money, E> {
        Money::parse_decimal(v).ok_or_else(|| E::custom(format!("invalid price: {v}")))
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(MoneyVisitor)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
