//! Transaction records and history summaries.

use paycore_common::{AccountId, Timestamp, TransactionId, TransactionStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::AccountProfile;

/// A persisted transfer between two accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Store-assigned, strictly increasing ID.
    pub id: TransactionId,
    /// Account debited by the transfer.
    pub sender_id: AccountId,
    /// Account credited by the transfer.
    pub receiver_id: AccountId,
    /// Amount moved, strictly positive.
    pub amount: Decimal,
    /// Current status.
    pub status: TransactionStatus,
    /// Time the record was written, as the last step of its unit of work.
    pub created_at: Timestamp,
    /// Commit time of the reversal, if any.
    pub reversed_at: Option<Timestamp>,
}

impl Transaction {
    /// Check whether the account took part as sender or receiver.
    pub fn involves(&self, account_id: AccountId) -> bool {
        self.sender_id == account_id || self.receiver_id == account_id
    }

    /// Balance deltas caused by this transaction while in its current status.
    ///
    /// Always sums to zero.
    pub fn balance_deltas(&self) -> [(AccountId, Decimal); 2] {
        match self.status {
            TransactionStatus::Completed => [
                (self.sender_id, -self.amount),
                (self.receiver_id, self.amount),
            ],
            TransactionStatus::Reversed => [
                (self.sender_id, Decimal::ZERO),
                (self.receiver_id, Decimal::ZERO),
            ],
        }
    }
}

/// A transaction about to be written; the store assigns its ID.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    pub amount: Decimal,
    pub status: TransactionStatus,
}

impl NewTransaction {
    /// A completed transfer.
    pub fn completed(sender_id: AccountId, receiver_id: AccountId, amount: Decimal) -> Self {
        Self {
            sender_id,
            receiver_id,
            amount,
            status: TransactionStatus::Completed,
        }
    }

    /// Attach the ID and write time assigned by the store.
    pub fn into_transaction(self, id: TransactionId, created_at: Timestamp) -> Transaction {
        Transaction {
            id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            amount: self.amount,
            status: self.status,
            created_at,
            reversed_at: None,
        }
    }
}

/// Direction of a transaction relative to the queried account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Sent,
    Received,
}

/// A transaction as shown in an account's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub id: TransactionId,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub created_at: Timestamp,
    pub direction: Direction,
    pub sender: AccountProfile,
    pub receiver: AccountProfile,
}

impl TransactionSummary {
    /// Build the summary of `transaction` as seen from `account_id`.
    pub fn new(
        transaction: &Transaction,
        account_id: AccountId,
        sender: AccountProfile,
        receiver: AccountProfile,
    ) -> Self {
        let direction = if transaction.sender_id == account_id {
            Direction::Sent
        } else {
            Direction::Received
        };

        Self {
            id: transaction.id,
            amount: transaction.amount,
            status: transaction.status,
            created_at: transaction.created_at,
            direction,
            sender,
            receiver,
        }
    }

    /// The other party of the transaction.
    pub fn counterparty(&self) -> &AccountProfile {
        match self.direction {
            Direction::Sent => &self.receiver,
            Direction::Received => &self.sender,
        }
    }
}
