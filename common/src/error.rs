//! Error types for ledger operations.

use crate::{AccountId, TransactionId, TransactionStatus};
use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for ledger operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Amount is not strictly positive or carries too much precision.
    #[error("Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: Decimal, reason: String },

    /// Sender and receiver are the same account.
    #[error("Account {0} cannot transact with itself")]
    InvalidParticipants(AccountId),

    /// Sender account does not exist.
    #[error("Sender not found: {0}")]
    SenderNotFound(AccountId),

    /// Receiver account does not exist.
    #[error("Receiver not found: {0}")]
    ReceiverNotFound(AccountId),

    /// Account does not exist.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Transaction does not exist.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// An account with this email is already registered.
    #[error("Account already exists: {0}")]
    DuplicateAccount(String),

    /// Sender cannot cover the transfer.
    #[error("Insufficient balance in account {account_id}: required {required}, available {available}")]
    InsufficientBalance {
        account_id: AccountId,
        required: Decimal,
        available: Decimal,
    },

    /// A balance adjustment would leave the account below zero.
    #[error("Adjusting account {account_id} by {delta} would make its balance negative")]
    WouldGoNegative {
        account_id: AccountId,
        balance: Decimal,
        delta: Decimal,
    },

    /// A credit would exceed the largest representable balance.
    #[error("Adjusting account {account_id} by {delta} would overflow its balance")]
    BalanceOverflow {
        account_id: AccountId,
        balance: Decimal,
        delta: Decimal,
    },

    /// The sum of all balances is not representable.
    #[error("Total balance exceeds the representable range")]
    TotalOverflow,

    /// Transaction is not in a state that allows reversal.
    #[error("Transaction {transaction_id} cannot be reversed from status {status}")]
    NotReversible {
        transaction_id: TransactionId,
        status: TransactionStatus,
    },

    /// Reversing would drive the original receiver negative.
    #[error("Reversing transaction {transaction_id} would make account {account_id} negative")]
    ReversalWouldUnderflow {
        transaction_id: TransactionId,
        account_id: AccountId,
    },

    /// A staged balance was changed by another writer before commit.
    #[error("Account {0} was modified concurrently")]
    ConcurrentModification(AccountId),

    /// Durable store failure. The detail is for logs only.
    #[error("Storage unavailable")]
    Storage { detail: String },

    /// Operation did not complete in time.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller mistake, never retried.
    Validation,
    /// Referenced entity does not exist.
    NotFound,
    /// Business rule violated given current state.
    StateConflict,
    /// Store or runtime failure; nothing was applied.
    Infrastructure,
}

impl LedgerError {
    /// Wrap a store driver error.
    pub fn storage(detail: impl std::fmt::Display) -> Self {
        LedgerError::Storage {
            detail: detail.to_string(),
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidAmount { .. } | LedgerError::InvalidParticipants(_) => {
                ErrorKind::Validation
            }
            LedgerError::SenderNotFound(_)
            | LedgerError::ReceiverNotFound(_)
            | LedgerError::AccountNotFound(_)
            | LedgerError::TransactionNotFound(_) => ErrorKind::NotFound,
            LedgerError::DuplicateAccount(_)
            | LedgerError::InsufficientBalance { .. }
            | LedgerError::WouldGoNegative { .. }
            | LedgerError::BalanceOverflow { .. }
            | LedgerError::NotReversible { .. }
            | LedgerError::ReversalWouldUnderflow { .. } => ErrorKind::StateConflict,
            LedgerError::ConcurrentModification(_)
            | LedgerError::Storage { .. }
            | LedgerError::Timeout(_)
            | LedgerError::TotalOverflow
            | LedgerError::Configuration(_) => ErrorKind::Infrastructure,
        }
    }

    /// HTTP-style status class for caller-facing adapters.
    pub fn status_code(&self) -> u16 {
        match self {
            LedgerError::Configuration(_) | LedgerError::TotalOverflow => 500,
            _ => match self.kind() {
                ErrorKind::Validation | ErrorKind::StateConflict => 400,
                ErrorKind::NotFound => 404,
                ErrorKind::Infrastructure => 503,
            },
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::ConcurrentModification(_)
                | LedgerError::Storage { .. }
                | LedgerError::Timeout(_)
        )
    }

    /// Get suggested retry delay in milliseconds.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            LedgerError::ConcurrentModification(_) => Some(10),
            LedgerError::Storage { .. } => Some(500),
            LedgerError::Timeout(_) => Some(1000),
            _ => None,
        }
    }

    /// Get a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount { .. } => "INVALID_AMOUNT",
            LedgerError::InvalidParticipants(_) => "INVALID_PARTICIPANTS",
            LedgerError::SenderNotFound(_) => "SENDER_NOT_FOUND",
            LedgerError::ReceiverNotFound(_) => "RECEIVER_NOT_FOUND",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            LedgerError::DuplicateAccount(_) => "DUPLICATE_ACCOUNT",
            LedgerError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            LedgerError::WouldGoNegative { .. } => "WOULD_GO_NEGATIVE",
            LedgerError::BalanceOverflow { .. } => "BALANCE_OVERFLOW",
            LedgerError::TotalOverflow => "TOTAL_OVERFLOW",
            LedgerError::NotReversible { .. } => "NOT_REVERSIBLE",
            LedgerError::ReversalWouldUnderflow { .. } => "REVERSAL_WOULD_UNDERFLOW",
            LedgerError::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            LedgerError::Storage { .. } => "STORAGE_UNAVAILABLE",
            LedgerError::Timeout(_) => "TIMEOUT",
            LedgerError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let not_found = LedgerError::SenderNotFound(AccountId::new(1));
        assert_eq!(not_found.kind(), ErrorKind::NotFound);
        assert_eq!(not_found.status_code(), 404);

        let conflict = LedgerError::NotReversible {
            transaction_id: TransactionId::new(1),
            status: TransactionStatus::Reversed,
        };
        assert_eq!(conflict.kind(), ErrorKind::StateConflict);
        assert_eq!(conflict.status_code(), 400);
        assert!(!conflict.is_retryable());
    }

    #[test]
    fn test_storage_detail_not_displayed() {
        let err = LedgerError::storage("database is locked: /var/lib/paycore.db");
        assert_eq!(err.to_string(), "Storage unavailable");
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.retry_after_ms(), Some(500));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            LedgerError::Timeout("unit of work".into()).error_code(),
            "TIMEOUT"
        );
        assert_eq!(
            LedgerError::ReversalWouldUnderflow {
                transaction_id: TransactionId::new(3),
                account_id: AccountId::new(2),
            }
            .error_code(),
            "REVERSAL_WOULD_UNDERFLOW"
        );
    }

    #[test]
    fn test_overflow_classification() {
        let overflow = LedgerError::BalanceOverflow {
            account_id: AccountId::new(1),
            balance: Decimal::MAX,
            delta: Decimal::ONE,
        };
        assert_eq!(overflow.kind(), ErrorKind::StateConflict);
        assert_eq!(overflow.error_code(), "BALANCE_OVERFLOW");
        assert!(!overflow.is_retryable());

        assert_eq!(LedgerError::TotalOverflow.status_code(), 500);
        assert!(!LedgerError::TotalOverflow.is_retryable());
    }
}
