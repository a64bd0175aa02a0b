//! In-memory durable store.
//!
//! Units of work stage their writes privately and publish them in a single
//! critical section on commit. Each staged balance remembers the committed
//! value it was derived from; commit refuses to publish if that value moved.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use paycore_common::{
    checked_sum, AccountId, LedgerError, Result, TransactionId, TransactionStatus,
};

use crate::account::{Account, AccountProfile};
use crate::balance::BalanceChange;
use crate::store::{AccountDirectory, DurableStore, UnitOfWork};
use crate::transaction::{NewTransaction, Transaction};

/// Injectable store failure, triggered once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// Fail the next transaction-record write.
    InsertTransaction,
    /// Fail the next commit.
    Commit,
    /// Stall the next transaction-record write.
    DelayInsertTransaction(Duration),
    /// Stall the next commit before it publishes.
    DelayCommit(Duration),
}

#[derive(Debug, Default)]
struct State {
    accounts: BTreeMap<AccountId, Account>,
    transactions: BTreeMap<TransactionId, Transaction>,
}

#[derive(Debug)]
struct Inner {
    state: RwLock<State>,
    next_account_id: AtomicI64,
    next_transaction_id: AtomicI64,
    fail_point: Mutex<Option<FailPoint>>,
}

impl Inner {
    fn trigger(&self, point: FailPoint) -> Result<()> {
        let mut armed = self.fail_point.lock();
        if *armed == Some(point) {
            *armed = None;
            warn!(fail_point = ?point, "Injected store failure");
            return Err(LedgerError::storage(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    /// Disarm and return the delay if the armed fail point is a matching stall.
    fn take_delay(&self, stall: impl Fn(FailPoint) -> Option<Duration>) -> Option<Duration> {
        let mut armed = self.fail_point.lock();
        let delay = (*armed).and_then(stall)?;
        *armed = None;
        warn!(delay_ms = delay.as_millis() as u64, "Injected store stall");
        Some(delay)
    }
}

/// Shared in-memory store. Clones share the same state.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                next_account_id: AtomicI64::new(1),
                next_transaction_id: AtomicI64::new(1),
                fail_point: Mutex::new(None),
            }),
        }
    }

    /// Arm a one-shot failure.
    pub fn fail_next(&self, point: FailPoint) {
        *self.inner.fail_point.lock() = Some(point);
    }

    /// Disarm any pending failure.
    pub fn clear_failure(&self) {
        *self.inner.fail_point.lock() = None;
    }

    /// Number of committed transactions.
    pub fn transaction_count(&self) -> usize {
        self.inner.state.read().transactions.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountDirectory for MemoryStore {
    async fn register(&self, name: &str, email: &str) -> Result<AccountProfile> {
        let mut state = self.inner.state.write();
        if state.accounts.values().any(|a| a.email == email) {
            return Err(LedgerError::DuplicateAccount(email.to_string()));
        }

        let id = AccountId::new(self.inner.next_account_id.fetch_add(1, Ordering::SeqCst));
        let now = paycore_common::now();
        let account = Account {
            id,
            name: name.to_string(),
            email: email.to_string(),
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };
        let profile = account.profile();
        state.accounts.insert(id, account);

        debug!(account_id = %id, "Account registered");
        Ok(profile)
    }

    async fn profile(&self, id: AccountId) -> Result<Option<AccountProfile>> {
        Ok(self.inner.state.read().accounts.get(&id).map(Account::profile))
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnit {
            inner: self.inner.clone(),
            balances: BTreeMap::new(),
            inserted: Vec::new(),
            statuses: BTreeMap::new(),
            committed: false,
        }))
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.inner.state.read().accounts.get(&id).cloned())
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        Ok(self.inner.state.read().transactions.get(&id).cloned())
    }

    async fn transactions_for(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        Ok(self
            .inner
            .state
            .read()
            .transactions
            .values()
            .filter(|t| t.involves(account_id))
            .cloned()
            .collect())
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self.inner.state.read().accounts.values().cloned().collect())
    }

    async fn transactions(&self) -> Result<Vec<Transaction>> {
        Ok(self.inner.state.read().transactions.values().cloned().collect())
    }

    async fn total_balance(&self) -> Result<Decimal> {
        checked_sum(self.inner.state.read().accounts.values().map(|a| a.balance))
            .ok_or(LedgerError::TotalOverflow)
    }
}

#[derive(Debug, Clone, Copy)]
struct StagedBalance {
    /// Committed balance when first touched by this unit.
    base: Decimal,
    /// Balance after this unit's adjustments.
    current: Decimal,
}

/// Unit of work over a [`MemoryStore`].
pub struct MemoryUnit {
    inner: Arc<Inner>,
    balances: BTreeMap<AccountId, StagedBalance>,
    inserted: Vec<Transaction>,
    statuses: BTreeMap<TransactionId, Transaction>,
    committed: bool,
}

impl MemoryUnit {
    fn ensure_open(&self) -> Result<()> {
        if self.committed {
            return Err(LedgerError::storage("unit of work already committed"));
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.balances.is_empty() && self.inserted.is_empty() && self.statuses.is_empty()
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn account(&mut self, id: AccountId) -> Result<Option<Account>> {
        self.ensure_open()?;
        let state = self.inner.state.read();
        Ok(state.accounts.get(&id).map(|account| {
            let mut account = account.clone();
            if let Some(staged) = self.balances.get(&id) {
                account.balance = staged.current;
            }
            account
        }))
    }

    async fn adjust_balance(&mut self, id: AccountId, delta: Decimal) -> Result<BalanceChange> {
        self.ensure_open()?;
        let staged = match self.balances.get(&id) {
            Some(staged) => *staged,
            None => {
                let state = self.inner.state.read();
                let account = state
                    .accounts
                    .get(&id)
                    .ok_or(LedgerError::AccountNotFound(id))?;
                StagedBalance {
                    base: account.balance,
                    current: account.balance,
                }
            }
        };

        let change = BalanceChange::compute(id, staged.current, delta)?;
        self.balances.insert(
            id,
            StagedBalance {
                base: staged.base,
                current: change.balance_after,
            },
        );
        Ok(change)
    }

    async fn insert_transaction(&mut self, record: NewTransaction) -> Result<Transaction> {
        self.ensure_open()?;
        self.inner.trigger(FailPoint::InsertTransaction)?;
        let delay = self.inner.take_delay(|point| match point {
            FailPoint::DelayInsertTransaction(delay) => Some(delay),
            _ => None,
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        {
            let state = self.inner.state.read();
            for id in [record.sender_id, record.receiver_id] {
                if !state.accounts.contains_key(&id) {
                    return Err(LedgerError::AccountNotFound(id));
                }
            }
        }

        let id = TransactionId::new(self.inner.next_transaction_id.fetch_add(1, Ordering::SeqCst));
        let transaction = record.into_transaction(id, paycore_common::now());
        self.inserted.push(transaction.clone());
        Ok(transaction)
    }

    async fn transaction(&mut self, id: TransactionId) -> Result<Option<Transaction>> {
        self.ensure_open()?;
        if let Some(tx) = self.inserted.iter().find(|t| t.id == id) {
            return Ok(Some(tx.clone()));
        }
        if let Some(tx) = self.statuses.get(&id) {
            return Ok(Some(tx.clone()));
        }
        Ok(self.inner.state.read().transactions.get(&id).cloned())
    }

    async fn set_status(
        &mut self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<Transaction> {
        let mut tx = self
            .transaction(id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(id))?;
        tx.status = status;
        if status == TransactionStatus::Reversed {
            tx.reversed_at = Some(paycore_common::now());
        }

        if let Some(pending) = self.inserted.iter_mut().find(|t| t.id == id) {
            *pending = tx.clone();
        } else {
            self.statuses.insert(id, tx.clone());
        }
        Ok(tx)
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.inner.trigger(FailPoint::Commit)?;
        let delay = self.inner.take_delay(|point| match point {
            FailPoint::DelayCommit(delay) => Some(delay),
            _ => None,
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.inner.state.write();
        for (id, staged) in &self.balances {
            let account = state
                .accounts
                .get(id)
                .ok_or(LedgerError::AccountNotFound(*id))?;
            if account.balance != staged.base {
                return Err(LedgerError::ConcurrentModification(*id));
            }
        }

        let now = paycore_common::now();
        for (id, staged) in &self.balances {
            if let Some(account) = state.accounts.get_mut(id) {
                account.balance = staged.current;
                account.updated_at = now;
            }
        }
        for tx in self.inserted.drain(..) {
            state.transactions.insert(tx.id, tx);
        }
        for (id, tx) in std::mem::take(&mut self.statuses) {
            state.transactions.insert(id, tx);
        }

        self.balances.clear();
        self.committed = true;
        Ok(())
    }
}

impl Drop for MemoryUnit {
    fn drop(&mut self) {
        if !self.committed && !self.is_empty() {
            debug!(
                staged_balances = self.balances.len(),
                staged_transactions = self.inserted.len(),
                "Unit of work rolled back"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn funded_store() -> (MemoryStore, AccountId, AccountId) {
        let store = MemoryStore::new();
        let a = store.register("Ana", "ana@example.com").await.unwrap().id;
        let b = store.register("Bo", "bo@example.com").await.unwrap().id;

        let mut unit = store.begin().await.unwrap();
        unit.adjust_balance(a, Decimal::from(200)).await.unwrap();
        unit.adjust_balance(b, Decimal::from(100)).await.unwrap();
        unit.commit().await.unwrap();

        (store, a, b)
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = MemoryStore::new();
        store.register("Ana", "ana@example.com").await.unwrap();
        let err = store.register("Ana 2", "ana@example.com").await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateAccount(_)));
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let (store, a, b) = funded_store().await;

        {
            let mut unit = store.begin().await.unwrap();
            unit.adjust_balance(a, Decimal::from(-50)).await.unwrap();
            unit.adjust_balance(b, Decimal::from(50)).await.unwrap();
            unit.insert_transaction(NewTransaction::completed(a, b, Decimal::from(50)))
                .await
                .unwrap();

            // The unit sees its own writes, others do not.
            assert_eq!(
                unit.account(a).await.unwrap().unwrap().balance,
                Decimal::from(150)
            );
            assert_eq!(
                store.account(a).await.unwrap().unwrap().balance,
                Decimal::from(200)
            );
        }

        assert_eq!(store.total_balance().await.unwrap(), Decimal::from(300));
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_adjust_rejects_negative() {
        let (store, a, _) = funded_store().await;

        let mut unit = store.begin().await.unwrap();
        let err = unit.adjust_balance(a, Decimal::from(-201)).await.unwrap_err();
        assert!(matches!(err, LedgerError::WouldGoNegative { .. }));
        assert_eq!(
            unit.account(a).await.unwrap().unwrap().balance,
            Decimal::from(200)
        );
    }

    #[tokio::test]
    async fn test_commit_detects_concurrent_modification() {
        let (store, a, _) = funded_store().await;

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.adjust_balance(a, Decimal::from(-150)).await.unwrap();
        second.adjust_balance(a, Decimal::from(-150)).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert_eq!(err, LedgerError::ConcurrentModification(a));
        assert_eq!(
            store.account(a).await.unwrap().unwrap().balance,
            Decimal::from(50)
        );
    }

    #[tokio::test]
    async fn test_fail_point_is_one_shot() {
        let (store, a, b) = funded_store().await;
        store.fail_next(FailPoint::Commit);

        let mut unit = store.begin().await.unwrap();
        unit.adjust_balance(a, Decimal::from(-10)).await.unwrap();
        unit.adjust_balance(b, Decimal::from(10)).await.unwrap();
        assert!(matches!(
            unit.commit().await,
            Err(LedgerError::Storage { .. })
        ));
        drop(unit);
        assert_eq!(
            store.account(a).await.unwrap().unwrap().balance,
            Decimal::from(200)
        );

        let mut unit = store.begin().await.unwrap();
        unit.adjust_balance(a, Decimal::from(-10)).await.unwrap();
        unit.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_transaction_ids_increase() {
        let (store, a, b) = funded_store().await;

        let mut unit = store.begin().await.unwrap();
        let first = unit
            .insert_transaction(NewTransaction::completed(a, b, Decimal::ONE))
            .await
            .unwrap();
        let second = unit
            .insert_transaction(NewTransaction::completed(b, a, Decimal::ONE))
            .await
            .unwrap();
        unit.commit().await.unwrap();

        assert!(second.id > first.id);
        assert_eq!(store.transactions_for(a).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_record_stamped_when_written() {
        let (store, a, b) = funded_store().await;
        let record = NewTransaction::completed(a, b, Decimal::ONE);
        let staged = paycore_common::now();

        store.fail_next(FailPoint::DelayInsertTransaction(Duration::from_millis(5)));
        let mut unit = store.begin().await.unwrap();
        let tx = unit.insert_transaction(record).await.unwrap();
        unit.commit().await.unwrap();

        assert!(tx.created_at >= staged);
        assert_eq!(store.transaction(tx.id).await.unwrap().unwrap().created_at, tx.created_at);
    }

    #[tokio::test]
    async fn test_total_balance_overflow_is_an_error() {
        let store = MemoryStore::new();
        for email in ["ana@example.com", "bo@example.com"] {
            let id = store.register("Holder", email).await.unwrap().id;
            let mut unit = store.begin().await.unwrap();
            unit.adjust_balance(id, Decimal::MAX).await.unwrap();
            unit.commit().await.unwrap();
        }

        assert_eq!(store.total_balance().await.unwrap_err(), LedgerError::TotalOverflow);
    }
}
