//! Monetary helpers.
//!
//! Balances and amounts are `Decimal` everywhere. Floating point never
//! touches a monetary value.

use rust_decimal::Decimal;

use crate::error::{LedgerError, Result};

/// Number of fractional digits an amount may carry.
pub const MINOR_UNITS: u32 = 2;

/// Validate a transfer or deposit amount.
///
/// The amount must be strictly positive and must not carry more than
/// [`MINOR_UNITS`] fractional digits. Excess precision is rejected rather
/// than rounded so that debits and credits always cancel exactly.
pub fn validate_amount(amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount {
            amount,
            reason: "amount must be greater than zero".to_string(),
        });
    }

    let normalized = amount.normalize();
    if normalized.scale() > MINOR_UNITS {
        return Err(LedgerError::InvalidAmount {
            amount,
            reason: format!("amount has more than {} decimal places", MINOR_UNITS),
        });
    }

    Ok(normalized)
}

/// Sum amounts, or `None` if the total is not representable.
pub fn checked_sum<I>(values: I) -> Option<Decimal>
where
    I: IntoIterator<Item = Decimal>,
{
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |total, value| total.checked_add(value))
}

/// Parse a decimal string into an amount without validating its sign.
pub fn parse_amount(input: &str) -> std::result::Result<Decimal, rust_decimal::Error> {
    input.trim().parse::<Decimal>()
}

/// Format an amount with exactly [`MINOR_UNITS`] fractional digits.
pub fn format_amount(amount: Decimal) -> String {
    let mut rounded = amount.round_dp(MINOR_UNITS);
    rounded.rescale(MINOR_UNITS);
    rounded.to_string()
}
