//! Currency codes and amount bounds.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An ISO 4217 alphabetic currency code, stored upper-case.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Parse a currency code, accepting any letter case.
    ///
    /// # Errors
    ///
    /// Returns an error unless the input is exactly three ASCII letters.
    pub fn new(code: impl AsRef<str>) -> Result<Self, InvalidCurrency> {
        let code = code.as_ref().trim();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code.to_ascii_uppercase()))
        } else {
            Err(InvalidCurrency(code.to_string()))
        }
    }

    /// Build from a code already known to be valid.
    pub(crate) fn from_static(code: &'static str) -> Self {
        debug_assert!(code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()));
        Self(code.to_string())
    }

    /// Return the upper-case code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Currency({})", self.0)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Currency {
    type Err = InvalidCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = InvalidCurrency;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

/// The input is not a three-letter currency code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid currency code: {0:?}")]
pub struct InvalidCurrency(pub String);

/// Digits allowed after the decimal point in an amount or price.
pub const AMOUNT_SCALE: u32 = 2;

/// Integer digits allowed in an amount or price.
pub const AMOUNT_INTEGER_DIGITS: u32 = 12;

/// Check that `amount` is non-negative and fits the ledger's `NUMERIC(14, 2)` columns exactly.
///
/// Trailing zeros don't count towards the scale, so `"97.500"` is accepted as `97.5`.
///
/// # Errors
///
/// Returns [`InvalidAmount`] for negative amounts, more than [`AMOUNT_SCALE`] fractional
/// digits, or more than [`AMOUNT_INTEGER_DIGITS`] integer digits.
pub fn checked_amount(amount: Decimal) -> Result<Decimal, InvalidAmount> {
    let amount = amount.normalize();
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(InvalidAmount::Negative(amount));
    }
    if amount.scale() > AMOUNT_SCALE {
        return Err(InvalidAmount::TooPrecise(amount));
    }
    if amount.trunc() >= Decimal::from(10_i64.pow(AMOUNT_INTEGER_DIGITS)) {
        return Err(InvalidAmount::TooLarge(amount));
    }
    Ok(amount.abs())
}

/// An amount the ledger cannot record exactly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidAmount {
    /// Below zero.
    #[error("amount is negative: {0}")]
    Negative(Decimal),
    /// More fractional digits than the ledger keeps.
    #[error("amount has more than {AMOUNT_SCALE} decimal places: {0}")]
    TooPrecise(Decimal),
    /// More integer digits than the ledger keeps.
    #[error("amount exceeds {AMOUNT_INTEGER_DIGITS} integer digits: {0}")]
    TooLarge(Decimal),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn amounts_within_ledger_precision_are_accepted() {
        assert_eq!(checked_amount(dec("97")).unwrap(), dec("97"));
        assert_eq!(checked_amount(dec("96.50")).unwrap(), dec("96.5"));
        assert_eq!(checked_amount(dec("96.990")).unwrap(), dec("96.99"));
        assert_eq!(checked_amount(dec("0")).unwrap(), Decimal::ZERO);
        assert_eq!(
            checked_amount(dec("999999999999.99")).unwrap(),
            dec("999999999999.99")
        );
    }

    #[test]
    fn amounts_the_ledger_would_round_or_overflow_are_rejected() {
        assert!(matches!(
            checked_amount(dec("96.996")),
            Err(InvalidAmount::TooPrecise(_))
        ));
        assert!(matches!(
            checked_amount(dec("1000000000000")),
            Err(InvalidAmount::TooLarge(_))
        ));
        assert!(matches!(
            checked_amount(dec("99999999999999")),
            Err(InvalidAmount::TooLarge(_))
        ));
        assert!(matches!(
            checked_amount(dec("-1")),
            Err(InvalidAmount::Negative(_))
        ));
    }

    #[test]
    fn codes_are_upper_cased() {
        assert_eq!(Currency::new("mwk").unwrap().as_str(), "MWK");
        assert_eq!(Currency::new(" USD ").unwrap().as_str(), "USD");
    }

    #[test]
    fn malformed_codes_are_rejected() {
        for code in ["", "MW", "MWKK", "M1K", "₭AB"] {
            assert!(Currency::new(code).is_err(), "{code}");
        }
    }
}
