//! Exact sparse keys for the fractional encoding.
//!
//! Keys are dyadic rationals `mantissa / 2^scale`: integers produced by stepping away
//! from a neighbour, and midpoints between two neighbours. Every dyadic rational has a
//! finite decimal expansion, so keys print as plain decimals (`0`, `0.5`, `-2`,
//! `0.125`) and parse back exactly.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TreeError};

/// Maximum number of binary fraction digits a key may carry.
pub const MAX_KEY_SCALE: u32 = 96;

/// Keys must stay within `±2^MAX_KEY_MAGNITUDE_BITS` so aligned mantissas fit in `i128`.
const MAX_KEY_MAGNITUDE_BITS: u32 = 29;

/// An exact, totally ordered sparse key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SparseKey {
    mantissa: i128,
    scale: u32,
}

impl SparseKey {
    /// The key `0`.
    pub const ZERO: SparseKey = SparseKey {
        mantissa: 0,
        scale: 0,
    };

    /// An integral key.
    pub fn from_int(value: i64) -> Result<Self> {
        Self::checked(i128::from(value), 0)
    }

    /// Adds an integral step.
    pub fn offset(&self, step: i64) -> Result<Self> {
        let shifted = i128::from(step)
            .checked_shl(self.scale)
            .and_then(|s| s.checked_add(self.mantissa))
            .ok_or_else(|| self.out_of_range(step))?;
        Self::checked(shifted, self.scale).map_err(|_| self.out_of_range(step))
    }

    /// The exact midpoint between two distinct keys.
    pub fn midpoint(&self, other: &SparseKey) -> Result<Self> {
        let scale = self.scale.max(other.scale);
        let sum = self.aligned(scale) + other.aligned(scale);
        let candidate = Self::normalized(sum, scale + 1);
        if candidate.scale > MAX_KEY_SCALE || candidate == *self || candidate == *other {
            return Err(TreeError::KeyPrecision {
                low: self.min(other).to_string(),
                high: self.max(other).to_string(),
            });
        }
        Ok(candidate)
    }

    /// Returns `true` when the key has no fractional part.
    pub fn is_integer(&self) -> bool {
        self.scale == 0
    }

    /// Binary digits after the point.
    pub fn scale(&self) -> u32 {
        self.scale
    }

    fn checked(mantissa: i128, scale: u32) -> Result<Self> {
        let key = Self::normalized(mantissa, scale);
        let bound = 1i128 << (MAX_KEY_MAGNITUDE_BITS + key.scale);
        if key.scale > MAX_KEY_SCALE || key.mantissa.abs() >= bound {
            return Err(TreeError::invalid_path(
                key.to_string(),
                "sparse key outside the supported range",
            ));
        }
        Ok(key)
    }

    fn normalized(mut mantissa: i128, mut scale: u32) -> Self {
        if mantissa == 0 {
            return Self::ZERO;
        }
        while scale > 0 && mantissa & 1 == 0 {
            mantissa >>= 1;
            scale -= 1;
        }
        Self { mantissa, scale }
    }

    fn aligned(&self, scale: u32) -> i128 {
        self.mantissa << (scale - self.scale)
    }

    fn out_of_range(&self, step: i64) -> TreeError {
        TreeError::invalid_path(
            format!("{self} + {step}"),
            "sparse key outside the supported range",
        )
    }
}

impl Default for SparseKey {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Ord for SparseKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let scale = self.scale.max(other.scale);
        self.aligned(scale).cmp(&other.aligned(scale))
    }
}

impl PartialOrd for SparseKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SparseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mantissa < 0 {
            f.write_str("-")?;
        }
        let magnitude = self.mantissa.unsigned_abs();
        let integer = magnitude >> self.scale;
        write!(f, "{integer}")?;
        if self.scale == 0 {
            return Ok(());
        }
        f.write_str(".")?;
        let mask = (1u128 << self.scale) - 1;
        let mut fraction = magnitude & mask;
        while fraction != 0 {
            fraction *= 10;
            write!(f, "{}", fraction >> self.scale)?;
            fraction &= mask;
        }
        Ok(())
    }
}

impl FromStr for SparseKey {
    type Err = TreeError;

    fn from_str(text: &str) -> Result<Self> {
        let invalid = |reason: &str| TreeError::invalid_path(text, reason);
        let (negative, unsigned) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (integer, fraction) = match unsigned.split_once('.') {
            Some((integer, fraction)) if !fraction.is_empty() => (integer, fraction),
            Some(_) => return Err(invalid("missing fraction digits")),
            None => (unsigned, ""),
        };
        if integer.is_empty() || !integer.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("expected a decimal number"));
        }
        if !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("expected a decimal number"));
        }
        let integer: i128 = integer
            .parse::<u32>()
            .map(i128::from)
            .map_err(|_| invalid("integer part too large"))?;

        // Convert the decimal fraction to binary digits by repeated doubling.
        let mut digits: Vec<u8> = fraction.bytes().map(|b| b - b'0').collect();
        let mut bits: i128 = 0;
        let mut scale = 0u32;
        while digits.iter().any(|&d| d != 0) {
            if scale == MAX_KEY_SCALE {
                return Err(invalid("too many fraction digits for a sparse key"));
            }
            let mut carry = 0u8;
            for digit in digits.iter_mut().rev() {
                let doubled = *digit * 2 + carry;
                *digit = doubled % 10;
                carry = doubled / 10;
            }
            bits = (bits << 1) | i128::from(carry);
            scale += 1;
        }
        let magnitude = (integer << scale) | bits;
        let mantissa = if negative { -magnitude } else { magnitude };
        Self::checked(mantissa, scale)
    }
}
