//! Account definitions for ledger.

use paycore_common::{AccountId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A ledger account with its current balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Holder's display name.
    pub name: String,
    /// Holder's contact email.
    pub email: String,
    /// Current balance, never negative between committed operations.
    pub balance: Decimal,
    /// When the account was created.
    pub created_at: Timestamp,
    /// When the balance was last changed.
    pub updated_at: Timestamp,
}

impl Account {
    /// Identity of the account without its balance.
    pub fn profile(&self) -> AccountProfile {
        AccountProfile {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }

    /// Check if account has sufficient funds for a debit.
    pub fn has_sufficient_funds(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}

/// Public identity of an account holder. Never carries a balance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountProfile {
    pub id: AccountId,
    pub name: String,
    pub email: String,
}
