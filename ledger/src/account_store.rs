//! The account store: the only sanctioned path to account balances.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, instrument};

use paycore_common::{AccountId, LedgerError, Result};

use crate::account::Account;
use crate::balance::BalanceChange;
use crate::config::LockConfig;
use crate::lock_manager::{AccountLockGuard, AccountLocks};
use crate::store::DurableStore;

/// Serialized, atomic access to account balances.
///
/// Balance adjustments on the same account are linearizable: each one runs
/// under that account's lock as a single committed unit of work. No balance
/// is cached between calls.
pub struct AccountStore {
    store: Arc<dyn DurableStore>,
    locks: AccountLocks,
}

impl AccountStore {
    /// Create an account store over a durable store.
    pub fn new(store: Arc<dyn DurableStore>, lock_config: LockConfig) -> Self {
        Self {
            store,
            locks: AccountLocks::new(lock_config),
        }
    }

    /// The underlying durable store.
    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    /// The account lock table.
    pub fn locks(&self) -> &AccountLocks {
        &self.locks
    }

    /// Get an account by ID.
    pub async fn get_account(&self, id: AccountId) -> Result<Account> {
        self.store
            .account(id)
            .await?
            .ok_or(LedgerError::AccountNotFound(id))
    }

    /// Apply `delta` to one account's balance as a single atomic step.
    ///
    /// Fails with `AccountNotFound` or `WouldGoNegative`, leaving the stored
    /// balance unchanged.
    #[instrument(skip(self), fields(account_id = %id, delta = %delta))]
    pub async fn adjust_balance(&self, id: AccountId, delta: Decimal) -> Result<Decimal> {
        let _guard = self.locks.acquire(&[id]).await?;

        let mut unit = self.store.begin().await?;
        let change: BalanceChange = unit.adjust_balance(id, delta).await?;
        unit.commit().await?;

        debug!(
            balance_before = %change.balance_before,
            balance_after = %change.balance_after,
            "Balance adjusted"
        );
        Ok(change.balance_after)
    }

    /// Lock a set of accounts in global order for a multi-account unit of work.
    pub async fn lock(&self, ids: &[AccountId]) -> Result<AccountLockGuard> {
        self.locks.acquire(ids).await
    }
}
