//! Port traits for the ledger's external collaborators.
//!
//! The engine never touches storage directly. It reads through
//! [`DurableStore`], resolves identities through [`AccountDirectory`], and
//! performs every mutation inside a [`UnitOfWork`], which becomes visible
//! in full on [`UnitOfWork::commit`] or not at all.

use async_trait::async_trait;
use rust_decimal::Decimal;

use paycore_common::{AccountId, Result, TransactionId, TransactionStatus};

use crate::account::{Account, AccountProfile};
use crate::balance::BalanceChange;
use crate::transaction::{NewTransaction, Transaction};

/// Resolves account existence and holder identity.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Register a new account with a zero balance.
    ///
    /// Fails with `DuplicateAccount` if the email is already registered.
    async fn register(&self, name: &str, email: &str) -> Result<AccountProfile>;

    /// Look up the holder identity of an account.
    async fn profile(&self, id: AccountId) -> Result<Option<AccountProfile>>;
}

/// Durable storage for accounts and transactions.
///
/// Reads outside a unit of work observe committed state only.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Start an atomic unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;

    /// Get a committed account.
    async fn account(&self, id: AccountId) -> Result<Option<Account>>;

    /// Get a committed transaction.
    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>>;

    /// All transactions where the account is sender or receiver, ascending by ID.
    async fn transactions_for(&self, account_id: AccountId) -> Result<Vec<Transaction>>;

    /// All accounts, ascending by ID.
    async fn accounts(&self) -> Result<Vec<Account>>;

    /// All transactions, ascending by ID.
    async fn transactions(&self) -> Result<Vec<Transaction>>;

    /// Sum of all committed balances, read as one consistent snapshot.
    async fn total_balance(&self) -> Result<Decimal>;
}

/// An all-or-nothing group of mutations.
///
/// Reads inside a unit see its own staged writes. Dropping a unit without
/// a successful [`commit`](UnitOfWork::commit) discards every staged write.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Get an account including writes staged in this unit.
    async fn account(&mut self, id: AccountId) -> Result<Option<Account>>;

    /// Apply `delta` to an account's balance.
    ///
    /// Fails with `AccountNotFound` or `WouldGoNegative`; on failure the
    /// balance is left as it was.
    async fn adjust_balance(&mut self, id: AccountId, delta: Decimal) -> Result<BalanceChange>;

    /// Write a new transaction record and assign its ID.
    async fn insert_transaction(&mut self, record: NewTransaction) -> Result<Transaction>;

    /// Get a transaction including writes staged in this unit.
    async fn transaction(&mut self, id: TransactionId) -> Result<Option<Transaction>>;

    /// Move a transaction to a new status.
    async fn set_status(
        &mut self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<Transaction>;

    /// Make every staged write visible atomically.
    ///
    /// A failed commit retains nothing. A unit cannot be used after commit.
    async fn commit(&mut self) -> Result<()>;
}
