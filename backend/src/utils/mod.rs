//! # Utilities Module
//!
//! This module contains helper functions and utilities used
//! across the backend service.

use alloy_primitives::U256;

/// Format a base-unit amount as human-readable text.
///
/// Shows two fractional digits (truncated, never rounded up) and
/// thousands separators.
///
/// ## Arguments
///
/// * `amount` - Amount in base units
/// * `decimals` - Asset precision
/// * `symbol` - Ticker appended to the result
///
/// ## Examples
///
/// ```rust,ignore
/// assert_eq!(format_units(U256::from(1_000_000u64), 6, "USDC"), "1.00 USDC");
/// assert_eq!(format_units(U256::from(1_234_567_890u64), 6, "USDC"), "1,234.56 USDC");
/// ```
pub fn format_units(amount: U256, decimals: u8, symbol: &str) -> String {
    let scale = U256::from(10u64).pow(U256::from(decimals));
    let whole = amount / scale;
    let remainder = amount % scale;

    // Keep the two most significant fractional digits
    let cents = if decimals >= 2 {
        remainder / U256::from(10u64).pow(U256::from(decimals - 2))
    } else {
        remainder * U256::from(10u64).pow(U256::from(2 - decimals))
    };

    // Add commas
    let whole_str = whole.to_string();
    let mut result = String::new();
    for (i, c) in whole_str.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    let reversed: String = result.chars().rev().collect();

    format!("{}.{:0>2} {}", reversed, cents.to_string(), symbol)
}

/// Truncate a string to a maximum length.
///
/// Useful for logging long hashes and addresses.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let half = (max_len - 3) / 2;
        format!("{}...{}", &s[..half], &s[s.len() - half..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(U256::from(1_000_000u64), 6, "USDC"), "1.00 USDC");
        assert_eq!(format_units(U256::ZERO, 6, "USDC"), "0.00 USDC");
        assert_eq!(format_units(U256::from(500_000u64), 6, "USDC"), "0.50 USDC");
        assert_eq!(format_units(U256::from(1_234_567_890u64), 6, "USDC"), "1,234.56 USDC");
        assert_eq!(format_units(U256::from(15u64), 1, "X"), "1.50 X");
    }

    #[test]
    fn test_format_units_max_does_not_overflow() {
        let text = format_units(U256::MAX, 6, "USDC");
        assert!(text.ends_with(" USDC"));
        assert!(text.contains(','));
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("abcdefghij", 10), "abcdefghij");
        assert_eq!(truncate_string("abcdefghijklmnop", 10), "abc...nop");
    }
}
