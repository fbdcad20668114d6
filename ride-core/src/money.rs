//! Exact currency arithmetic
//!
//! All monetary values are [`Decimal`]s with two subunits. Nothing here
//! touches binary floating point.

use crate::{Error, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt;
use std::str::FromStr;

/// Currency subunits (centavos per metical)
pub const CURRENCY_SCALE: u32 = 2;

/// ISO 4217 code of the only settlement currency
pub const CURRENCY_CODE: &str = "MZN";

/// Round to two places, midpoint to even
pub fn round2(amount: Decimal) -> Decimal {
    let mut rounded =
        amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(CURRENCY_SCALE);
    rounded
}

/// `amount × rate_percent / 100`, unrounded
pub fn percent_of(amount: Decimal, rate_percent: Decimal) -> Decimal {
    amount * rate_percent / Decimal::ONE_HUNDRED
}

/// True if the amount needs no more than two decimal places
pub fn has_currency_precision(amount: Decimal) -> bool {
    amount.normalize().scale() <= CURRENCY_SCALE
}

/// Canonical two-decimal rendering ("500.00")
pub fn to_fixed2(amount: Decimal) -> String {
    let mut fixed = amount;
    fixed.rescale(CURRENCY_SCALE);
    fixed.to_string()
}

/// Parse a decimal string exactly
pub fn parse_amount(input: &str) -> Result<Decimal> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidAmount("empty amount".to_string()));
    }

    Decimal::from_str_exact(trimmed)
        .or_else(|_| Decimal::from_str(trimmed))
        .map_err(|e| Error::InvalidAmount(format!("{}: {}", trimmed, e)))
}

/// Validate an amount for posting: non-negative, at most two decimals
pub fn ensure_postable(amount: Decimal) -> Result<()> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(Error::InvalidAmount(format!("{} is negative", amount)));
    }

    if !has_currency_precision(amount) {
        return Err(Error::InvalidAmount(format!(
            "{} has more than {} decimal places",
            amount, CURRENCY_SCALE
        )));
    }

    Ok(())
}

/// Display wrapper: "500.00 MZN"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mzn(pub Decimal);

impl fmt::Display for Mzn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", to_fixed2(round2(self.0)), CURRENCY_CODE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round2_bankers() {
        assert_eq!(round2(dec!(0.125)), dec!(0.12));
        assert_eq!(round2(dec!(0.135)), dec!(0.14));
        assert_eq!(round2(dec!(10.005)), dec!(10.00));
        assert_eq!(round2(dec!(-1.555)), dec!(-1.56));
    }

    #[test]
    fn test_round2_pads_scale() {
        assert_eq!(round2(dec!(500)).to_string(), "500.00");
        assert_eq!(round2(dec!(1.5)).to_string(), "1.50");
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(dec!(500), dec!(12)), dec!(60));
        assert_eq!(round2(percent_of(dec!(333.33), dec!(17))), dec!(56.67));
    }

    #[test]
    fn test_currency_precision() {
        assert!(has_currency_precision(dec!(10.50)));
        assert!(has_currency_precision(dec!(10.500)));
        assert!(!has_currency_precision(dec!(10.501)));
    }

    #[test]
    fn test_to_fixed2() {
        assert_eq!(to_fixed2(dec!(60)), "60.00");
        assert_eq!(to_fixed2(dec!(440.1)), "440.10");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("500").unwrap(), dec!(500));
        assert_eq!(parse_amount(" 12.34 ").unwrap(), dec!(12.34));
        assert!(parse_amount("").is_err());
        assert!(parse_amount("abc").is_err());
    }

    #[test]
    fn test_ensure_postable() {
        assert!(ensure_postable(dec!(0)).is_ok());
        assert!(ensure_postable(dec!(50.00)).is_ok());
        assert!(ensure_postable(dec!(-0.01)).is_err());
        assert!(ensure_postable(dec!(1.001)).is_err());
    }

    #[test]
    fn test_mzn_display() {
        assert_eq!(Mzn(dec!(500)).to_string(), "500.00 MZN");
    }
}
