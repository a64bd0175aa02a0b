//! Paycore Ledger Engine
//!
//! Atomic transfers and reversals between accounts, with per-account lock
//! ordering and pluggable durable stores.

pub mod account;
pub mod account_store;
pub mod balance;
pub mod config;
pub mod engine;
pub mod events;
pub mod lock_manager;
pub mod memory;
pub mod metrics;
pub mod sqlite;
pub mod store;
pub mod transaction;

pub use account::{Account, AccountProfile};
pub use account_store::AccountStore;
pub use balance::{BalanceChange, BalanceChangeType};
pub use config::{LedgerConfig, LockConfig};
pub use engine::{IntegrityReport, LedgerEngine};
pub use events::{EventSink, LedgerEvent, RecordingEventSink, TracingEventSink};
pub use lock_manager::{AccountLockGuard, AccountLocks};
pub use memory::{FailPoint, MemoryStore};
pub use metrics::{Metrics, MetricsSnapshot, SharedMetrics};
pub use sqlite::SqliteStore;
pub use store::{AccountDirectory, DurableStore, UnitOfWork};
pub use transaction::{Direction, NewTransaction, Transaction, TransactionSummary};

pub use paycore_common::{
    AccountId, ErrorKind, LedgerError, Result, TransactionId, TransactionStatus,
};
