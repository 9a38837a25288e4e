//! Monetary types for the IOU ledger.
//!
//! Obligations are denominated in whole base units (e.g. dollars). Cash in the
//! asset sub-ledger is held as an integer number of the currency's minor units
//! (e.g. cents). Converting cash to base units rounds toward zero.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// A cash amount expressed in minor units of its currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Amount {
    /// Quantity in minor units (cents for USD).
    pub quantity: i64,
    /// ISO 4217 currency code.
    pub currency: Currency,
}

impl Amount {
    /// Create a new amount from minor units.
    pub fn new(quantity: i64, currency: Currency) -> Self {
        Self { quantity, currency }
    }

    /// Create an amount from whole base units.
    pub fn from_base_units(units: i64, currency: Currency) -> Self {
        let quantity = units.saturating_mul(currency.minor_units_per_unit());
        Self { quantity, currency }
    }

    /// Convenience constructor for whole US dollars.
    pub fn dollars(units: i64) -> Self {
        Self::from_base_units(units, Currency::usd())
    }

    /// Create a zero amount in the given currency.
    pub fn zero(currency: Currency) -> Self {
        Self {
            quantity: 0,
            currency,
        }
    }

    /// Check if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.quantity > 0
    }

    /// Check if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.quantity == 0
    }

    /// The amount in major units, exact.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.quantity, self.currency.decimal_places())
    }

    /// The amount in whole base units, rounding any fractional remainder toward zero.
    ///
    /// `1050` cents is `10`, `-1050` cents is `-10`.
    pub fn to_base_units(&self) -> i64 {
        let whole = self
            .to_decimal()
            .round_dp_with_strategy(0, RoundingStrategy::ToZero);
        // |quantity / 10^dp| <= |quantity|, so this never leaves the i64 range.
        whole.to_i64().unwrap_or_default()
    }

    /// Sum amounts that must all share `currency`.
    pub fn sum<'a, I>(amounts: I, currency: Currency) -> Result<Amount, CurrencyMismatchError>
    where
        I: IntoIterator<Item = &'a Amount>,
    {
        amounts
            .into_iter()
            .try_fold(Amount::zero(currency), |total, next| total + next.clone())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal(), self.currency)
    }
}

impl Add for Amount {
    type Output = Result<Amount, CurrencyMismatchError>;

    fn add(self, other: Amount) -> Self::Output {
        if self.currency != other.currency {
            return Err(CurrencyMismatchError {
                expected: self.currency,
                actual: other.currency,
            });
        }
        Ok(Amount {
            quantity: self.quantity.saturating_add(other.quantity),
            currency: self.currency,
        })
    }
}

/// Error when attempting operations on different currencies.
#[derive(Debug, Clone)]
pub struct CurrencyMismatchError {
    pub expected: Currency,
    pub actual: Currency,
}

impl fmt::Display for CurrencyMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Currency mismatch: expected {}, got {}",
            self.expected, self.actual
        )
    }
}

impl std::error::Error for CurrencyMismatchError {}

/// ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Get the standard decimal places for this currency.
    pub fn decimal_places(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "VND" => 0,
            "BHD" | "KWD" | "OMR" => 3,
            _ => 2,
        }
    }

    /// Number of minor units in one base unit.
    pub fn minor_units_per_unit(&self) -> i64 {
        10_i64.pow(self.decimal_places())
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn gbp() -> Self {
        Self::new("GBP")
    }

    pub fn jpy() -> Self {
        Self::new("JPY")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_addition() {
        let a = Amount::new(1000, Currency::usd());
        let b = Amount::new(550, Currency::usd());

        let sum = (a + b).unwrap();
        assert_eq!(sum.quantity, 1550);
        assert_eq!(sum.to_string(), "15.50 USD");
    }

    #[test]
    fn test_currency_mismatch() {
        let a = Amount::dollars(100);
        let b = Amount::from_base_units(100, Currency::eur());

        assert!((a + b).is_err());
    }

    #[test]
    fn test_base_units_round_toward_zero() {
        assert_eq!(Amount::new(1050, Currency::usd()).to_base_units(), 10);
        assert_eq!(Amount::new(1099, Currency::usd()).to_base_units(), 10);
        assert_eq!(Amount::new(99, Currency::usd()).to_base_units(), 0);
        assert_eq!(Amount::new(-1050, Currency::usd()).to_base_units(), -10);
        assert_eq!(Amount::new(1000, Currency::usd()).to_base_units(), 10);
    }

    #[test]
    fn test_zero_decimal_currency_is_exact() {
        let yen = Amount::from_base_units(500, Currency::jpy());
        assert_eq!(yen.quantity, 500);
        assert_eq!(yen.to_base_units(), 500);
    }

    #[test]
    fn test_sum_requires_single_currency() {
        let amounts = vec![Amount::dollars(3), Amount::new(250, Currency::usd())];
        let total = Amount::sum(&amounts, Currency::usd()).unwrap();
        assert_eq!(total.quantity, 550);

        let mixed = vec![Amount::dollars(3), Amount::from_base_units(2, Currency::gbp())];
        assert!(Amount::sum(&mixed, Currency::usd()).is_err());
    }

    #[test]
    fn test_currency_decimal_places() {
        assert_eq!(Currency::usd().decimal_places(), 2);
        assert_eq!(Currency::jpy().decimal_places(), 0);
        assert_eq!(Currency::usd().minor_units_per_unit(), 100);
    }
}
