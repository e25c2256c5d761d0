//! Currency codes and fixed-point money rules.
//!
//! Amounts are `rust_decimal::Decimal` values held at [`MONEY_SCALE`] decimal places, which
//! maps one-to-one onto the `NUMERIC(19, 2)` columns of the schema.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Number of decimal places every ledger amount and balance carries.
pub const MONEY_SCALE: u32 = 2;

/// Largest value a `NUMERIC(19, 2)` column can hold (10^17 - 0.01).
pub fn max_money() -> Decimal {
    Decimal::from_i128_with_scale(9_999_999_999_999_999_999, MONEY_SCALE)
}

/// ISO 4217 alphabetic currency code (always three upper-case ASCII letters).
///
/// Parsing accepts lower-case input and normalizes it, so `"try"` and `"TRY"` name the
/// same account currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(try_from = "String", into = "String")]
#[sqlx(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, LedgerError> {
        let code = code.trim();
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(LedgerError::Validation(format!(
                "currency must be a three-letter ISO 4217 code, got '{code}'"
            )));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

impl std::str::FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate a caller-supplied posting amount and bring it to ledger scale.
///
/// The amount must be strictly positive, must not carry more than [`MONEY_SCALE`]
/// significant decimal places (`10.010` is fine, `10.001` is not) and must fit the
/// storage column.
pub fn ledger_amount(amount: Decimal) -> Result<Decimal, LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::Validation(format!(
            "amount must be positive, got {amount}"
        )));
    }

    if amount.normalize().scale() > MONEY_SCALE {
        return Err(LedgerError::Validation(format!(
            "amount {amount} has more than {MONEY_SCALE} decimal places"
        )));
    }

    if amount > max_money() {
        return Err(LedgerError::Validation(format!(
            "amount {amount} exceeds the maximum of {}",
            max_money()
        )));
    }

    let mut scaled = amount;
    scaled.rescale(MONEY_SCALE);
    Ok(scaled)
}

/// Zero at ledger scale (`0.00`).
pub fn zero() -> Decimal {
    Decimal::new(0, MONEY_SCALE)
}
