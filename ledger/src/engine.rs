//! Core ledger engine implementation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, instrument, warn, Span};

use paycore_common::{
    checked_sum, validate_amount, AccountId, LedgerError, Result, TransactionId,
    TransactionStatus,
};

use crate::account::{Account, AccountProfile};
use crate::account_store::AccountStore;
use crate::config::LedgerConfig;
use crate::events::{EventSink, LedgerEvent, TracingEventSink};
use crate::lock_manager::AccountLockGuard;
use crate::metrics::{Metrics, SharedMetrics};
use crate::store::{AccountDirectory, DurableStore, UnitOfWork};
use crate::transaction::{NewTransaction, Transaction, TransactionSummary};

/// Result of a full ledger consistency check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrityReport {
    pub accounts: usize,
    pub transactions: usize,
    pub total_balance: Decimal,
    pub violations: Vec<String>,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

/// The ledger engine moves value between accounts.
///
/// Every mutation runs as one unit of work under the locks of all accounts
/// it touches. Business checks are evaluated inside the unit against the
/// store's current state, never against a read taken before locking.
pub struct LedgerEngine {
    accounts: AccountStore,
    directory: Arc<dyn AccountDirectory>,
    unit_timeout: Duration,
    events: Arc<dyn EventSink>,
    metrics: SharedMetrics,
}

impl LedgerEngine {
    /// Create a new ledger engine.
    pub fn new(
        store: Arc<dyn DurableStore>,
        directory: Arc<dyn AccountDirectory>,
        config: &LedgerConfig,
    ) -> Self {
        Self {
            accounts: AccountStore::new(store, config.lock_config.clone()),
            directory,
            unit_timeout: config.unit_timeout,
            events: Arc::new(TracingEventSink),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Replace the audit event sink.
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Share a metrics instance with the caller.
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    fn store(&self) -> &Arc<dyn DurableStore> {
        self.accounts.durable()
    }

    async fn lock(&self, ids: &[AccountId]) -> Result<AccountLockGuard> {
        self.accounts.lock(ids).await.map_err(|e| {
            if matches!(e, LedgerError::Timeout(_)) {
                self.metrics.lock_timeout();
            }
            e
        })
    }

    /// Stage a unit of work under the unit timeout, then commit it.
    ///
    /// An expired unit is dropped uncommitted, which discards its staged
    /// writes. The commit itself is never cancelled, so the returned result
    /// always matches what the store holds.
    async fn within_unit_timeout<T, F>(&self, operation: &'static str, stage: F) -> Result<T>
    where
        F: Future<Output = Result<(Box<dyn UnitOfWork>, T)>>,
    {
        match tokio::time::timeout(self.unit_timeout, stage).await {
            Ok(staged) => {
                let (mut unit, value) = staged?;
                unit.commit().await?;
                Ok(value)
            }
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.unit_timeout.as_millis() as u64,
                    "Unit of work timed out"
                );
                Err(LedgerError::Timeout(format!("{} unit of work", operation)))
            }
        }
    }

    /// Register a new account with a zero balance.
    pub async fn open_account(&self, name: &str, email: &str) -> Result<AccountProfile> {
        let profile = self.directory.register(name, email).await?;
        info!(account_id = %profile.id, "Account opened");
        Ok(profile)
    }

    /// Move `amount` from sender to receiver.
    ///
    /// Checks run in this order: amount, distinct parties, sender exists,
    /// receiver exists, sender can cover the amount. The debit, the credit
    /// and the transaction record commit together or not at all.
    #[instrument(skip(self), fields(transaction_id))]
    pub async fn transfer(
        &self,
        sender_id: AccountId,
        receiver_id: AccountId,
        amount: Decimal,
    ) -> Result<Transaction> {
        self.metrics.transfer_started();
        let result = self.execute_transfer(sender_id, receiver_id, amount).await;
        self.metrics.transfer_finished(&result);

        match &result {
            Ok(tx) => {
                Span::current().record("transaction_id", tx.id.value());
                self.events.emit(&LedgerEvent::TransferCompleted {
                    transaction_id: tx.id,
                    sender_id,
                    receiver_id,
                    amount: tx.amount,
                    at: tx.created_at,
                });
            }
            Err(e) => {
                self.events
                    .emit(&LedgerEvent::transfer_failed(sender_id, receiver_id, amount, e));
            }
        }
        result
    }

    async fn execute_transfer(
        &self,
        sender_id: AccountId,
        receiver_id: AccountId,
        amount: Decimal,
    ) -> Result<Transaction> {
        let amount = validate_amount(amount)?;
        if sender_id == receiver_id {
            return Err(LedgerError::InvalidParticipants(sender_id));
        }
        if self.directory.profile(sender_id).await?.is_none() {
            return Err(LedgerError::SenderNotFound(sender_id));
        }
        if self.directory.profile(receiver_id).await?.is_none() {
            return Err(LedgerError::ReceiverNotFound(receiver_id));
        }

        let _guard = self.lock(&[sender_id, receiver_id]).await?;

        let tx = self.within_unit_timeout("transfer", async {
            let mut unit = self.store().begin().await?;

            let sender = unit
                .account(sender_id)
                .await?
                .ok_or(LedgerError::SenderNotFound(sender_id))?;
            if unit.account(receiver_id).await?.is_none() {
                return Err(LedgerError::ReceiverNotFound(receiver_id));
            }
            if !sender.has_sufficient_funds(amount) {
                return Err(LedgerError::InsufficientBalance {
                    account_id: sender_id,
                    required: amount,
                    available: sender.balance,
                });
            }

            unit.adjust_balance(sender_id, -amount)
                .await
                .map_err(|e| match e {
                    LedgerError::WouldGoNegative { balance, .. } => {
                        LedgerError::InsufficientBalance {
                            account_id: sender_id,
                            required: amount,
                            available: balance,
                        }
                    }
                    other => other,
                })?;
            unit.adjust_balance(receiver_id, amount).await?;
            let tx = unit
                .insert_transaction(NewTransaction::completed(sender_id, receiver_id, amount))
                .await?;
            Ok((unit, tx))
        })
        .await?;

        debug!(transaction_id = %tx.id, "Transfer committed");
        Ok(tx)
    }

    /// Undo a completed transfer.
    ///
    /// Credits the original sender, debits the original receiver and marks
    /// the transaction reversed in one unit. The status check happens inside
    /// that unit, so of two concurrent reversals only one can succeed.
    #[instrument(skip(self))]
    pub async fn reverse(&self, transaction_id: TransactionId) -> Result<Transaction> {
        self.metrics.reversal_started();
        let result = self.execute_reversal(transaction_id).await;
        self.metrics.reversal_finished(&result);

        match &result {
            Ok(tx) => self.events.emit(&LedgerEvent::ReversalCompleted {
                transaction_id,
                sender_id: tx.sender_id,
                receiver_id: tx.receiver_id,
                amount: tx.amount,
                at: tx.reversed_at.unwrap_or_else(paycore_common::now),
            }),
            Err(e) => self
                .events
                .emit(&LedgerEvent::reversal_failed(transaction_id, e)),
        }
        result
    }

    async fn execute_reversal(&self, transaction_id: TransactionId) -> Result<Transaction> {
        let original = self
            .store()
            .transaction(transaction_id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(transaction_id))?;
        ensure_reversible(&original)?;

        let _guard = self.lock(&[original.sender_id, original.receiver_id]).await?;

        let reversed = self.within_unit_timeout("reversal", async {
            let mut unit = self.store().begin().await?;

            let tx = unit
                .transaction(transaction_id)
                .await?
                .ok_or(LedgerError::TransactionNotFound(transaction_id))?;
            ensure_reversible(&tx)?;

            unit.adjust_balance(tx.receiver_id, -tx.amount)
                .await
                .map_err(|e| match e {
                    LedgerError::WouldGoNegative { account_id, .. } => {
                        LedgerError::ReversalWouldUnderflow {
                            transaction_id,
                            account_id,
                        }
                    }
                    other => other,
                })?;
            unit.adjust_balance(tx.sender_id, tx.amount).await?;
            let reversed = unit
                .set_status(transaction_id, TransactionStatus::Reversed)
                .await?;
            Ok((unit, reversed))
        })
        .await?;

        debug!(transaction_id = %transaction_id, "Reversal committed");
        Ok(reversed)
    }

    /// Credit an account from outside the ledger.
    #[instrument(skip(self))]
    pub async fn deposit(&self, account_id: AccountId, amount: Decimal) -> Result<Account> {
        let amount = validate_amount(amount)?;
        if self.directory.profile(account_id).await?.is_none() {
            return Err(LedgerError::AccountNotFound(account_id));
        }

        let _guard = self.lock(&[account_id]).await?;

        let account = self
            .within_unit_timeout("deposit", async {
                let mut unit = self.store().begin().await?;
                unit.adjust_balance(account_id, amount).await?;
                let account = unit
                    .account(account_id)
                    .await?
                    .ok_or(LedgerError::AccountNotFound(account_id))?;
                Ok((unit, account))
            })
            .await?;

        self.metrics.deposit_applied();
        self.events.emit(&LedgerEvent::DepositApplied {
            account_id,
            amount,
            balance_after: account.balance,
            at: paycore_common::now(),
        });
        Ok(account)
    }

    /// Current committed balance of an account.
    pub async fn balance(&self, account_id: AccountId) -> Result<Decimal> {
        Ok(self.accounts.get_account(account_id).await?.balance)
    }

    /// Every transaction the account took part in, oldest first.
    #[instrument(skip(self))]
    pub async fn history_for(&self, account_id: AccountId) -> Result<Vec<TransactionSummary>> {
        let owner = self
            .directory
            .profile(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))?;

        let transactions = self.store().transactions_for(account_id).await?;

        let mut profiles = HashMap::new();
        profiles.insert(account_id, owner);

        let mut history = Vec::with_capacity(transactions.len());
        for tx in &transactions {
            let sender = self.resolve_profile(&mut profiles, tx.sender_id).await?;
            let receiver = self.resolve_profile(&mut profiles, tx.receiver_id).await?;
            history.push(TransactionSummary::new(tx, account_id, sender, receiver));
        }

        debug!(entries = history.len(), "History loaded");
        Ok(history)
    }

    async fn resolve_profile(
        &self,
        cache: &mut HashMap<AccountId, AccountProfile>,
        id: AccountId,
    ) -> Result<AccountProfile> {
        if let Some(profile) = cache.get(&id) {
            return Ok(profile.clone());
        }
        let profile = self
            .directory
            .profile(id)
            .await?
            .ok_or(LedgerError::AccountNotFound(id))?;
        cache.insert(id, profile.clone());
        Ok(profile)
    }

    /// Sum of all committed balances.
    pub async fn total_balance(&self) -> Result<Decimal> {
        self.store().total_balance().await
    }

    /// Check every stored account and transaction against the ledger rules.
    pub async fn verify_integrity(&self) -> Result<IntegrityReport> {
        let accounts = self.store().accounts().await?;
        let transactions = self.store().transactions().await?;
        let mut violations = Vec::new();

        for account in &accounts {
            if account.balance < Decimal::ZERO {
                violations.push(format!(
                    "account {} has negative balance {}",
                    account.id, account.balance
                ));
            }
        }

        for tx in &transactions {
            if tx.amount <= Decimal::ZERO {
                violations.push(format!("transaction {} has non-positive amount {}", tx.id, tx.amount));
            }
            if tx.sender_id == tx.receiver_id {
                violations.push(format!("transaction {} has identical parties", tx.id));
            }
            if tx.status == TransactionStatus::Reversed && tx.reversed_at.is_none() {
                violations.push(format!("transaction {} is reversed without a reversal time", tx.id));
            }
        }

        let total_balance =
            checked_sum(accounts.iter().map(|a| a.balance)).ok_or(LedgerError::TotalOverflow)?;
        let report = IntegrityReport {
            accounts: accounts.len(),
            transactions: transactions.len(),
            total_balance,
            violations,
        };

        if report.is_consistent() {
            info!(
                accounts = report.accounts,
                transactions = report.transactions,
                total_balance = %report.total_balance,
                "Ledger integrity verified"
            );
        } else {
            warn!(violations = report.violations.len(), "Ledger integrity violated");
        }
        Ok(report)
    }
}

fn ensure_reversible(tx: &Transaction) -> Result<()> {
    if tx.status.can_transition_to(TransactionStatus::Reversed) {
        Ok(())
    } else {
        Err(LedgerError::NotReversible {
            transaction_id: tx.id,
            status: tx.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEventSink;
    use crate::memory::{FailPoint, MemoryStore};

    struct Fixture {
        engine: LedgerEngine,
        store: MemoryStore,
        events: Arc<RecordingEventSink>,
    }

    async fn fixture(balances: &[i64]) -> (Fixture, Vec<AccountId>) {
        let store = MemoryStore::new();
        let events = Arc::new(RecordingEventSink::new());
        let engine = LedgerEngine::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            &LedgerConfig::default(),
        )
        .with_event_sink(events.clone());

        let mut ids = Vec::new();
        for (i, balance) in balances.iter().enumerate() {
            let id = engine
                .open_account(&format!("Holder {}", i), &format!("holder{}@example.com", i))
                .await
                .unwrap()
                .id;
            if *balance > 0 {
                engine.deposit(id, Decimal::from(*balance)).await.unwrap();
            }
            ids.push(id);
        }
        events.clear();

        (
            Fixture {
                engine,
                store,
                events,
            },
            ids,
        )
    }

    #[tokio::test]
    async fn test_transfer_and_reverse() {
        let (f, ids) = fixture(&[200, 100]).await;
        let (a, b) = (ids[0], ids[1]);

        let tx = f.engine.transfer(a, b, Decimal::from(100)).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(f.engine.balance(a).await.unwrap(), Decimal::from(100));
        assert_eq!(f.engine.balance(b).await.unwrap(), Decimal::from(200));

        let reversed = f.engine.reverse(tx.id).await.unwrap();
        assert_eq!(reversed.status, TransactionStatus::Reversed);
        assert!(reversed.reversed_at.is_some());
        assert_eq!(f.engine.balance(a).await.unwrap(), Decimal::from(200));
        assert_eq!(f.engine.balance(b).await.unwrap(), Decimal::from(100));

        let err = f.engine.reverse(tx.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotReversible { .. }));

        assert_eq!(
            f.events.names(),
            vec!["transfer_completed", "reversal_completed", "reversal_failed"]
        );
    }

    #[tokio::test]
    async fn test_transfer_check_order() {
        let (f, ids) = fixture(&[50, 0]).await;
        let (a, b) = (ids[0], ids[1]);
        let missing = AccountId::new(999);

        assert!(matches!(
            f.engine.transfer(missing, missing, Decimal::ZERO).await,
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert_eq!(
            f.engine.transfer(missing, missing, Decimal::ONE).await.unwrap_err(),
            LedgerError::InvalidParticipants(missing)
        );
        assert_eq!(
            f.engine.transfer(missing, a, Decimal::ONE).await.unwrap_err(),
            LedgerError::SenderNotFound(missing)
        );
        assert_eq!(
            f.engine.transfer(a, missing, Decimal::ONE).await.unwrap_err(),
            LedgerError::ReceiverNotFound(missing)
        );
        assert_eq!(
            f.engine.transfer(a, b, Decimal::from(100)).await.unwrap_err(),
            LedgerError::InsufficientBalance {
                account_id: a,
                required: Decimal::from(100),
                available: Decimal::from(50),
            }
        );

        assert_eq!(f.engine.balance(a).await.unwrap(), Decimal::from(50));
        assert_eq!(f.store.transaction_count(), 0);
        assert_eq!(f.engine.metrics().snapshot().transfers_rejected, 5);
    }

    #[tokio::test]
    async fn test_reversal_underflow_applies_nothing() {
        let (f, ids) = fixture(&[100, 0, 0]).await;
        let (a, b, c) = (ids[0], ids[1], ids[2]);

        let tx = f.engine.transfer(a, b, Decimal::from(100)).await.unwrap();
        f.engine.transfer(b, c, Decimal::from(60)).await.unwrap();

        assert_eq!(
            f.engine.reverse(tx.id).await.unwrap_err(),
            LedgerError::ReversalWouldUnderflow {
                transaction_id: tx.id,
                account_id: b,
            }
        );
        assert_eq!(f.engine.balance(a).await.unwrap(), Decimal::ZERO);
        assert_eq!(f.engine.balance(b).await.unwrap(), Decimal::from(40));

        let history = f.engine.history_for(a).await.unwrap();
        assert_eq!(history[0].status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back() {
        let (f, ids) = fixture(&[100, 0]).await;

        f.store.fail_next(FailPoint::Commit);
        let err = f
            .engine
            .transfer(ids[0], ids[1], Decimal::from(30))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Storage unavailable");

        assert_eq!(f.engine.balance(ids[0]).await.unwrap(), Decimal::from(100));
        assert_eq!(f.engine.balance(ids[1]).await.unwrap(), Decimal::ZERO);
        assert_eq!(f.store.transaction_count(), 0);
        assert_eq!(f.engine.metrics().snapshot().transfers_failed, 1);
    }

    #[tokio::test]
    async fn test_history_for() {
        let (f, ids) = fixture(&[100, 100, 0]).await;
        let (a, b, c) = (ids[0], ids[1], ids[2]);

        f.engine.transfer(a, b, Decimal::from(10)).await.unwrap();
        f.engine.transfer(b, c, Decimal::from(20)).await.unwrap();
        f.engine.transfer(c, a, Decimal::from(5)).await.unwrap();

        let history = f.engine.history_for(a).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].counterparty().id, b);
        assert_eq!(history[1].counterparty().id, c);
        assert_eq!(history[1].amount, Decimal::from(5));

        let json = serde_json::to_value(&history[0]).unwrap();
        assert!(json["receiver"].get("balance").is_none());

        assert_eq!(f.engine.history_for(a).await.unwrap(), history);
        assert_eq!(
            f.engine.history_for(AccountId::new(42)).await.unwrap_err(),
            LedgerError::AccountNotFound(AccountId::new(42))
        );
    }

    #[tokio::test]
    async fn test_deposit_and_integrity() {
        let (f, ids) = fixture(&[0]).await;

        let account = f.engine.deposit(ids[0], Decimal::new(1050, 2)).await.unwrap();
        assert_eq!(account.balance, Decimal::new(105, 1));
        assert!(matches!(
            f.engine.deposit(ids[0], Decimal::new(1, 3)).await,
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert_eq!(
            f.engine.deposit(AccountId::new(7), Decimal::ONE).await.unwrap_err(),
            LedgerError::AccountNotFound(AccountId::new(7))
        );

        let report = f.engine.verify_integrity().await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.total_balance, Decimal::new(105, 1));
        assert_eq!(f.engine.total_balance().await.unwrap(), report.total_balance);
        assert_eq!(f.events.names(), vec!["deposit_applied"]);
    }

    #[tokio::test]
    async fn test_credit_past_max_balance_is_refused() {
        let (f, ids) = fixture(&[0, 0]).await;
        let (a, b) = (ids[0], ids[1]);

        f.engine.deposit(a, Decimal::MAX).await.unwrap();
        assert_eq!(
            f.engine.deposit(a, Decimal::ONE).await.unwrap_err(),
            LedgerError::BalanceOverflow {
                account_id: a,
                balance: Decimal::MAX,
                delta: Decimal::ONE,
            }
        );
        assert_eq!(f.engine.balance(a).await.unwrap(), Decimal::MAX);

        f.engine.deposit(b, Decimal::ONE).await.unwrap();
        assert!(matches!(
            f.engine.transfer(b, a, Decimal::ONE).await,
            Err(LedgerError::BalanceOverflow { .. })
        ));
        assert_eq!(f.engine.balance(b).await.unwrap(), Decimal::ONE);
        assert_eq!(f.store.transaction_count(), 0);

        // Two maximal balances no longer have a representable sum.
        f.engine.transfer(a, b, Decimal::ONE).await.unwrap();
        f.engine.deposit(b, Decimal::MAX - Decimal::from(2)).await.unwrap();
        assert_eq!(f.engine.total_balance().await.unwrap_err(), LedgerError::TotalOverflow);
        assert_eq!(f.engine.verify_integrity().await.unwrap_err(), LedgerError::TotalOverflow);
    }
}
