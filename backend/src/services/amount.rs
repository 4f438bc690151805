//! # Amount Requests
//!
//! Converts the decimal strings typed by users into integer base units.
//!
//! Conversion is exact: `"1.5"` at 6 decimals is `1_500_000`. Inputs
//! with more fractional digits than the asset supports are rejected
//! rather than rounded, and anything that is not a plain non-negative
//! decimal (signs, exponents, `NaN`, `inf`) is rejected outright.

use alloy_primitives::U256;
use serde::Serialize;
use thiserror::Error;

/// Reasons an amount string is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("Amount is empty")]
    Empty,

    #[error("Amount cannot be negative")]
    Negative,

    #[error("Amount is not a decimal number: {0}")]
    Malformed(String),

    #[error("Amount has more than {decimals} decimal places")]
    TooPrecise { decimals: u8 },

    #[error("Amount is too large")]
    OutOfRange,

    #[error("Amount must be greater than zero")]
    Zero,
}

/// A user-entered amount together with its base-unit value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AmountRequest {
    raw: String,
    decimals: u8,
    base_units: U256,
}

impl AmountRequest {
    /// Parse `raw` at `decimals` precision.
    ///
    /// Accepts `"100"`, `"100.5"`, `"0.000001"`, `".5"` and `"5."`.
    /// Surrounding whitespace is ignored.
    pub fn parse(raw: &str, decimals: u8) -> Result<Self, AmountError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AmountError::Empty);
        }
        if trimmed.starts_with('-') {
            return Err(AmountError::Negative);
        }

        let (whole, fraction) = match trimmed.split_once('.') {
            Some((w, f)) => (w, f),
            None => (trimmed, ""),
        };

        let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && fraction.is_empty()) || !is_digits(whole) || !is_digits(fraction) {
            return Err(AmountError::Malformed(trimmed.to_string()));
        }
        if fraction.len() > decimals as usize {
            return Err(AmountError::TooPrecise { decimals });
        }

        let whole_units = if whole.is_empty() {
            U256::ZERO
        } else {
            U256::from_str_radix(whole, 10).map_err(|_| AmountError::OutOfRange)?
        };

        let padded = format!("{:0<width$}", fraction, width = decimals as usize);
        let fraction_units = if padded.is_empty() {
            U256::ZERO
        } else {
            U256::from_str_radix(&padded, 10).map_err(|_| AmountError::OutOfRange)?
        };

        let scale = U256::from(10u64)
            .checked_pow(U256::from(decimals))
            .ok_or(AmountError::OutOfRange)?;
        let base_units = whole_units
            .checked_mul(scale)
            .and_then(|v| v.checked_add(fraction_units))
            .ok_or(AmountError::OutOfRange)?;

        Ok(Self {
            raw: trimmed.to_string(),
            decimals,
            base_units,
        })
    }

    /// Parse and additionally require a non-zero value.
    pub fn parse_positive(raw: &str, decimals: u8) -> Result<Self, AmountError> {
        let amount = Self::parse(raw, decimals)?;
        if amount.base_units.is_zero() {
            return Err(AmountError::Zero);
        }
        Ok(amount)
    }

    pub fn base_units(&self) -> U256 {
        self.base_units
    }
}
