use crate::error::AdmissionError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A strictly positive fee amount in major currency units.
///
/// Wraps `rust_decimal::Decimal` so fee arithmetic never goes through floats and a
/// zero or negative charge cannot be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(pub(crate) Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, AdmissionError> {
        if value > Decimal::ZERO {
            Ok(Self(value.normalize()))
        } else {
            Err(AdmissionError::ValidationError(format!(
                "amount must be positive, got {value}"
            )))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Exact comparison against an amount reported by a third party.
    pub fn matches(&self, reported: Decimal) -> bool {
        self.0 == reported.normalize()
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AdmissionError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// ISO 4217 currency code, stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(pub(crate) String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, AdmissionError> {
        let code = code.trim();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code.to_ascii_uppercase()))
        } else {
            Err(AdmissionError::ValidationError(format!(
                "invalid currency code '{code}'"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, reported: &str) -> bool {
        self.0.eq_ignore_ascii_case(reported.trim())
    }
}

impl TryFrom<String> for Currency {
    type Error = AdmissionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl FromStr for Currency {
    type Err = AdmissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(1.0)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0.0)),
            Err(AdmissionError::ValidationError(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-1.0)),
            Err(AdmissionError::ValidationError(_))
        ));
    }

    #[test]
    fn test_amount_matches_ignores_scale() {
        let fee = Amount::new(dec!(5000.00)).unwrap();
        assert!(fee.matches(dec!(5000)));
        assert!(fee.matches(dec!(5000.0000)));
        assert!(!fee.matches(dec!(4999.99)));
    }

    #[test]
    fn test_amount_rejects_non_positive_on_deserialize() {
        let parsed: Result<Amount, _> = serde_json::from_str("\"0\"");
        assert!(parsed.is_err());
        let parsed: Amount = serde_json::from_str("\"12.50\"").unwrap();
        assert_eq!(parsed.value(), dec!(12.5));
    }

    #[test]
    fn test_currency_normalizes_case() {
        let ngn = Currency::new("ngn").unwrap();
        assert_eq!(ngn.as_str(), "NGN");
        assert!(ngn.matches("NGN"));
        assert!(!ngn.matches("USD"));
        assert!(Currency::new("NAIRA").is_err());
    }
}
