//! Short/long bignum split.
//!
//! `Integer` normalizes to an inline `i64` ("short") whenever the magnitude
//! fits, and falls back to an arbitrary-precision `BigInt` ("long")
//! otherwise. Every arithmetic operation renormalizes its result, converting
//! back to `short` whenever the magnitude fits.

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InvalidIntegerError {
    ParseError(String),
}

/// A SETL integer: `short` while it fits in an `i64`, `long` otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integer {
    Short(i64),
    Long(BigInt),
}

impl Integer {
    pub fn from_i64(v: i64) -> Self {
        Integer::Short(v)
    }

    /// Normalizes a `BigInt` to `Short` whenever it fits, else keeps it as
    /// `Long`. Every constructor/arithmetic op routes its result through
    /// this normalization.
    pub fn from_bigint(v: BigInt) -> Self {
        match v.to_i64() {
            Some(n) => Integer::Short(n),
            None => Integer::Long(v),
        }
    }

    pub fn zero() -> Self {
        Integer::Short(0)
    }

    pub fn to_bigint(&self) -> BigInt {
        match self {
            Integer::Short(n) => BigInt::from(*n),
            Integer::Long(b) => b.clone(),
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Integer::Short(n) => *n == 0,
            Integer::Long(b) => b.is_zero(),
        }
    }

    pub fn is_negative(&self) -> bool {
        match self {
            Integer::Short(n) => *n < 0,
            Integer::Long(b) => b.sign() == num_bigint::Sign::Minus,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Integer::Short(n) => Some(*n),
            Integer::Long(b) => b.to_i64(),
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        match self {
            Integer::Short(n) => usize::try_from(*n).ok(),
            Integer::Long(b) => b.to_usize(),
        }
    }

    pub fn from_string_radix(s: &str, radix: u32) -> Result<Self, InvalidIntegerError> {
        let cleaned = s.replace('_', "");
        BigInt::from_str_radix(&cleaned, radix)
            .map(Integer::from_bigint)
            .map_err(|_| InvalidIntegerError::ParseError(s.to_string()))
    }

    pub fn pow(&self, exp: &Integer) -> Self {
        let e = exp.as_i64().unwrap_or(0).max(0) as u64;
        Integer::from_bigint(self.to_bigint().pow(e as u32))
    }

    pub fn checked_div(&self, other: &Integer) -> Option<Self> {
        if other.is_zero() {
            return None;
        }
        if let (Integer::Short(a), Integer::Short(b)) = (self, other) {
            if a % b == 0 {
                return Some(Integer::Short(a / b));
            }
        }
        Some(Integer::from_bigint(self.to_bigint() / other.to_bigint()))
    }

    /// SETL `mod`: result takes the sign of the divisor (floor-division
    /// remainder), unlike Rust's `%` (truncation remainder).
    pub fn checked_mod(&self, other: &Integer) -> Option<Self> {
        if other.is_zero() {
            return None;
        }
        let a = self.to_bigint();
        let b = other.to_bigint();
        let r = &a % &b;
        let r = if !r.is_zero() && (r.sign() != b.sign()) { r + &b } else { r };
        Some(Integer::from_bigint(r))
    }
}

impl Default for Integer {
    fn default() -> Self {
        Integer::zero()
    }
}

impl FromStr for Integer {
    type Err = InvalidIntegerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(n) = s.parse::<i64>() {
            return Ok(Integer::Short(n));
        }
        BigInt::from_str(s)
            .map(Integer::from_bigint)
            .map_err(|_| InvalidIntegerError::ParseError(s.to_string()))
    }
}

impl fmt::Display for Integer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Integer::Short(n) => write!(f, "{n}"),
            Integer::Long(b) => write!(f, "{b}"),
        }
    }
}

impl PartialOrd for Integer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Integer {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Integer::Short(a), Integer::Short(b)) => a.cmp(b),
            _ => self.to_bigint().cmp(&other.to_bigint()),
        }
    }
}

impl std::hash::Hash for Integer {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Hash through the canonical BigInt form so that a `Short` and an
        // equal-valued `Long` (never constructed by this module, but a
        // reasonable defensive invariant) hash identically.
        match self.as_i64() {
            Some(n) => n.hash(state),
            None => self.to_bigint().hash(state),
        }
    }
}

macro_rules! checked_binop {
    ($name:ident, $short_op:ident, $big_op:tt) => {
        pub fn $name(&self, other: &Integer) -> Integer {
            if let (Integer::Short(a), Integer::Short(b)) = (self, other) {
                if let Some(r) = a.$short_op(*b) {
                    return Integer::Short(r);
                }
            }
            Integer::from_bigint(self.to_bigint() $big_op other.to_bigint())
        }
    };
}

impl Integer {
    checked_binop!(checked_add, checked_add, +);
    checked_binop!(checked_sub, checked_sub, -);
    checked_binop!(checked_mul, checked_mul, *);
}

impl Add for Integer {
    type Output = Integer;
    fn add(self, rhs: Integer) -> Integer {
        self.checked_add(&rhs)
    }
}

impl Sub for Integer {
    type Output = Integer;
    fn sub(self, rhs: Integer) -> Integer {
        self.checked_sub(&rhs)
    }
}

impl Mul for Integer {
    type Output = Integer;
    fn mul(self, rhs: Integer) -> Integer {
        self.checked_mul(&rhs)
    }
}

impl Div for Integer {
    type Output = Integer;
    fn div(self, rhs: Integer) -> Integer {
        self.checked_div(&rhs).expect("division by zero")
    }
}

impl Rem for Integer {
    type Output = Integer;
    fn rem(self, rhs: Integer) -> Integer {
        self.checked_mod(&rhs).expect("division by zero")
    }
}

impl Neg for Integer {
    type Output = Integer;
    fn neg(self) -> Integer {
        match self {
            Integer::Short(n) => n.checked_neg().map(Integer::Short).unwrap_or_else(|| Integer::from_bigint(-BigInt::from(n))),
            Integer::Long(b) => Integer::from_bigint(-b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflowing_multiply_promotes_to_long() {
        // 100000000000 * 100000000000 = 1e22.
        let a = Integer::from_str("100000000000").unwrap();
        let b = Integer::from_str("100000000000").unwrap();
        let product = a * b;
        assert_eq!(product.to_string(), "10000000000000000000000");
        assert!(matches!(product, Integer::Long(_)));
    }

    #[test]
    fn renormalizes_back_to_short() {
        let big = Integer::from_bigint(BigInt::from_str("100000000000000000000").unwrap());
        let divided = big.checked_div(&Integer::from_str("100000000000000000000").unwrap()).unwrap();
        assert_eq!(divided, Integer::Short(1));
    }

    #[test]
    fn mod_takes_sign_of_divisor() {
        let a = Integer::from_i64(-7);
        let b = Integer::from_i64(3);
        assert_eq!(a.checked_mod(&b), Some(Integer::Short(2)));
    }

    #[test]
    fn ordering_is_numeric_across_representations() {
        let short = Integer::from_i64(5);
        let long = Integer::from_bigint(BigInt::from_str("100000000000000000000").unwrap());
        assert!(short < long);
    }
}
