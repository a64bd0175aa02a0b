//! Account balance changes.

use paycore_common::{AccountId, LedgerError, Result, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Type of balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceChangeType {
    /// Credit (increase).
    Credit,
    /// Debit (decrease).
    Debit,
}

/// A single applied balance adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceChange {
    /// Account affected.
    pub account_id: AccountId,
    /// Change type.
    pub change_type: BalanceChangeType,
    /// Absolute amount changed.
    pub amount: Decimal,
    /// Balance before change.
    pub balance_before: Decimal,
    /// Balance after change.
    pub balance_after: Decimal,
    /// When the change was staged.
    pub timestamp: Timestamp,
}

impl BalanceChange {
    /// Compute the change of applying `delta` to `balance`.
    ///
    /// Fails with `WouldGoNegative` if the result is below zero, and with
    /// `BalanceOverflow` if it is not representable.
    pub fn compute(account_id: AccountId, balance: Decimal, delta: Decimal) -> Result<Self> {
        let balance_after = balance
            .checked_add(delta)
            .ok_or(LedgerError::BalanceOverflow {
                account_id,
                balance,
                delta,
            })?;
        if balance_after < Decimal::ZERO {
            return Err(LedgerError::WouldGoNegative {
                account_id,
                balance,
                delta,
            });
        }

        Ok(Self {
            account_id,
            change_type: if delta < Decimal::ZERO {
                BalanceChangeType::Debit
            } else {
                BalanceChangeType::Credit
            },
            amount: delta.abs(),
            balance_before: balance,
            balance_after,
            timestamp: paycore_common::now(),
        })
    }

    /// Signed delta (negative for debits).
    pub fn signed_amount(&self) -> Decimal {
        match self.change_type {
            BalanceChangeType::Credit => self.amount,
            BalanceChangeType::Debit => -self.amount,
        }
    }
}
