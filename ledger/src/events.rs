//! Audit events emitted on every ledger state transition.
//!
//! The engine does not log business outcomes through a global logger; it
//! hands a [`LedgerEvent`] to the [`EventSink`] it was built with.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use paycore_common::{AccountId, LedgerError, Timestamp, TransactionId};

/// A ledger state transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    TransferCompleted {
        transaction_id: TransactionId,
        sender_id: AccountId,
        receiver_id: AccountId,
        amount: Decimal,
        at: Timestamp,
    },
    TransferFailed {
        sender_id: AccountId,
        receiver_id: AccountId,
        amount: Decimal,
        reason: &'static str,
        at: Timestamp,
    },
    ReversalCompleted {
        transaction_id: TransactionId,
        sender_id: AccountId,
        receiver_id: AccountId,
        amount: Decimal,
        at: Timestamp,
    },
    ReversalFailed {
        transaction_id: TransactionId,
        reason: &'static str,
        at: Timestamp,
    },
    DepositApplied {
        account_id: AccountId,
        amount: Decimal,
        balance_after: Decimal,
        at: Timestamp,
    },
}

impl LedgerEvent {
    /// Transfer failure event carrying the error code as reason.
    pub fn transfer_failed(
        sender_id: AccountId,
        receiver_id: AccountId,
        amount: Decimal,
        error: &LedgerError,
    ) -> Self {
        LedgerEvent::TransferFailed {
            sender_id,
            receiver_id,
            amount,
            reason: error.error_code(),
            at: paycore_common::now(),
        }
    }

    /// Reversal failure event carrying the error code as reason.
    pub fn reversal_failed(transaction_id: TransactionId, error: &LedgerError) -> Self {
        LedgerEvent::ReversalFailed {
            transaction_id,
            reason: error.error_code(),
            at: paycore_common::now(),
        }
    }

    /// Short event name.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::TransferCompleted { .. } => "transfer_completed",
            LedgerEvent::TransferFailed { .. } => "transfer_failed",
            LedgerEvent::ReversalCompleted { .. } => "reversal_completed",
            LedgerEvent::ReversalFailed { .. } => "reversal_failed",
            LedgerEvent::DepositApplied { .. } => "deposit_applied",
        }
    }
}

/// Destination for audit events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &LedgerEvent);
}

/// Writes events as structured `tracing` records under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &LedgerEvent) {
        match event {
            LedgerEvent::TransferCompleted {
                transaction_id,
                sender_id,
                receiver_id,
                amount,
                ..
            } => info!(
                target: "audit",
                event = event.name(),
                transaction_id = %transaction_id,
                sender_id = %sender_id,
                receiver_id = %receiver_id,
                amount = %amount,
                "Transfer completed"
            ),
            LedgerEvent::TransferFailed {
                sender_id,
                receiver_id,
                amount,
                reason,
                ..
            } => warn!(
                target: "audit",
                event = event.name(),
                sender_id = %sender_id,
                receiver_id = %receiver_id,
                amount = %amount,
                reason = reason,
                "Transfer failed"
            ),
            LedgerEvent::ReversalCompleted {
                transaction_id,
                sender_id,
                receiver_id,
                amount,
                ..
            } => info!(
                target: "audit",
                event = event.name(),
                transaction_id = %transaction_id,
                sender_id = %sender_id,
                receiver_id = %receiver_id,
                amount = %amount,
                "Transaction reversed"
            ),
            LedgerEvent::ReversalFailed {
                transaction_id,
                reason,
                ..
            } => warn!(
                target: "audit",
                event = event.name(),
                transaction_id = %transaction_id,
                reason = reason,
                "Reversal failed"
            ),
            LedgerEvent::DepositApplied {
                account_id,
                amount,
                balance_after,
                ..
            } => info!(
                target: "audit",
                event = event.name(),
                account_id = %account_id,
                amount = %amount,
                balance_after = %balance_after,
                "Deposit applied"
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<LedgerEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all events recorded so far.
    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.lock().clone()
    }

    /// Names of all events recorded so far.
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(LedgerEvent::name).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &LedgerEvent) {
        self.events.lock().push(event.clone());
    }
}
