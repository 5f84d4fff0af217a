//! Fixed-point decimal arithmetic.
//!
//! Contract state never stores binary floats: fractional amounts travel as
//! `{"__fixed__": "<decimal string>"}` so every node parses and re-encodes
//! them to identical bytes. `Fixed` is the in-memory form: an i128 count of
//! 10^-9 units. Nine fractional digits cover stamp-fee division and currency
//! amounts while keeping multiplication inside i128 range for realistic
//! balances.

use serde_json::{json, Map, Value};
use std::{
    cmp::Ordering,
    fmt,
    ops::{Add, Div, Mul, Neg, Sub},
    str::FromStr,
};
use thiserror::Error;

/// Number of fractional decimal digits carried by [`Fixed`].
pub const FIXED_SCALE: u32 = 9;

const SCALE_FACTOR: i128 = 1_000_000_000;

/// JSON tag wrapping a fixed-point literal.
pub const FIXED_TAG: &str = "__fixed__";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FixedError {
    #[error("Invalid decimal literal: {0}")]
    InvalidLiteral(String),

    #[error("Decimal overflow in {0}")]
    Overflow(&'static str),

    #[error("Division by zero")]
    DivisionByZero,
}

/// Fixed-point decimal with 9 fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Fixed(i128);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);
    pub const ONE: Fixed = Fixed(SCALE_FACTOR);

    /// Raw count of 10^-9 units.
    pub const fn raw(units: i128) -> Self {
        Fixed(units)
    }

    pub const fn from_int(value: i64) -> Self {
        Fixed(value as i128 * SCALE_FACTOR)
    }

    pub const fn units(&self) -> i128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Whole part, truncated toward zero.
    pub fn truncated(&self) -> i128 {
        self.0 / SCALE_FACTOR
    }

    /// True when the value carries no fractional component.
    pub fn is_integral(&self) -> bool {
        self.0 % SCALE_FACTOR == 0
    }

    pub fn checked_add(self, rhs: Fixed) -> Result<Fixed, FixedError> {
        self.0
            .checked_add(rhs.0)
            .map(Fixed)
            .ok_or(FixedError::Overflow("addition"))
    }

    pub fn checked_sub(self, rhs: Fixed) -> Result<Fixed, FixedError> {
        self.0
            .checked_sub(rhs.0)
            .map(Fixed)
            .ok_or(FixedError::Overflow("subtraction"))
    }

    /// Multiply, truncating the result to 9 fractional digits.
    pub fn checked_mul(self, rhs: Fixed) -> Result<Fixed, FixedError> {
        self.0
            .checked_mul(rhs.0)
            .map(|v| Fixed(v / SCALE_FACTOR))
            .ok_or(FixedError::Overflow("multiplication"))
    }

    /// Divide, truncating the result to 9 fractional digits.
    pub fn checked_div(self, rhs: Fixed) -> Result<Fixed, FixedError> {
        if rhs.0 == 0 {
            return Err(FixedError::DivisionByZero);
        }
        self.0
            .checked_mul(SCALE_FACTOR)
            .map(|v| Fixed(v / rhs.0))
            .ok_or(FixedError::Overflow("division"))
    }

    /// Parse the canonical JSON form of a number: a bare integer or a
    /// `{"__fixed__": "..."} ` object. Returns `None` for anything else.
    pub fn from_value(value: &Value) -> Option<Fixed> {
        match value {
            Value::Number(n) => n.as_i64().map(Fixed::from_int),
            Value::Object(map) => {
                if map.len() != 1 {
                    return None;
                }
                let literal = map.get(FIXED_TAG)?.as_str()?;
                Fixed::from_str(literal).ok()
            }
            _ => None,
        }
    }

    /// Canonical JSON form: bare integer when integral, tagged object
    /// otherwise. Integers and their `Fixed` equivalents must hash the
    /// same way, so `5.000000000` encodes as `5`.
    pub fn to_value(&self) -> Value {
        if self.is_integral() {
            json!(self.truncated() as i64)
        } else {
            let mut map = Map::new();
            map.insert(FIXED_TAG.into(), Value::String(self.to_string()));
            Value::Object(map)
        }
    }
}

impl FromStr for Fixed {
    type Err = FixedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FixedError::InvalidLiteral(s.to_string());
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let (whole_str, frac_str) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };

        if whole_str.is_empty() && frac_str.is_empty() {
            return Err(invalid());
        }
        if !whole_str.chars().all(|c| c.is_ascii_digit())
            || !frac_str.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }

        let whole: i128 = if whole_str.is_empty() {
            0
        } else {
            whole_str.parse().map_err(|_| invalid())?
        };

        // Truncate extra fractional digits; pad missing ones
        let mut frac: i128 = 0;
        for (i, c) in frac_str.chars().enumerate() {
            if i as u32 >= FIXED_SCALE {
                break;
            }
            frac = frac * 10 + (c as u8 - b'0') as i128;
        }
        let seen = (frac_str.len() as u32).min(FIXED_SCALE);
        frac *= 10i128.pow(FIXED_SCALE - seen);

        let units = whole
            .checked_mul(SCALE_FACTOR)
            .and_then(|w| w.checked_add(frac))
            .ok_or(FixedError::Overflow("parse"))?;

        Ok(Fixed(if negative { -units } else { units }))
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / SCALE_FACTOR as u128;
        let frac = abs % SCALE_FACTOR as u128;
        if frac == 0 {
            write!(f, "{}{}", sign, whole)
        } else {
            let mut frac_str = format!("{:09}", frac);
            while frac_str.ends_with('0') {
                frac_str.pop();
            }
            write!(f, "{}{}.{}", sign, whole, frac_str)
        }
    }
}

impl Add for Fixed {
    type Output = Fixed;
    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 + rhs.0)
    }
}

impl Sub for Fixed {
    type Output = Fixed;
    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 - rhs.0)
    }
}

impl Mul for Fixed {
    type Output = Fixed;
    fn mul(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 * rhs.0 / SCALE_FACTOR)
    }
}

impl Div for Fixed {
    type Output = Fixed;
    fn div(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 * SCALE_FACTOR / rhs.0)
    }
}

impl Neg for Fixed {
    type Output = Fixed;
    fn neg(self) -> Fixed {
        Fixed(-self.0)
    }
}

impl PartialEq<i64> for Fixed {
    fn eq(&self, other: &i64) -> bool {
        *self == Fixed::from_int(*other)
    }
}

impl PartialOrd<i64> for Fixed {
    fn partial_cmp(&self, other: &i64) -> Option<Ordering> {
        self.partial_cmp(&Fixed::from_int(*other))
    }
}
