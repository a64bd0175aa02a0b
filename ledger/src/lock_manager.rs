//! Per-account mutation locks.
//!
//! Every operation that mutates balances first takes the locks of all
//! accounts it touches, in ascending [`AccountId`] order, whatever order the
//! caller named them in. A fixed global order rules out circular waits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{trace, warn};

use paycore_common::{AccountId, LedgerError, Result};

use crate::config::LockConfig;

/// Idle entries are pruned once every this many acquisitions.
const PRUNE_EVERY: u64 = 1024;

/// Held locks for a set of accounts. Released on drop.
pub struct AccountLockGuard {
    accounts: Vec<AccountId>,
    _guards: Vec<OwnedMutexGuard<()>>,
    acquired_at: Instant,
}

impl AccountLockGuard {
    /// Locked accounts in acquisition order.
    pub fn accounts(&self) -> &[AccountId] {
        &self.accounts
    }

    /// How long the locks have been held.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for AccountLockGuard {
    fn drop(&mut self) {
        trace!(
            accounts = ?self.accounts,
            held_us = self.held_for().as_micros() as u64,
            "Account locks released"
        );
    }
}

/// Lock table keyed by account.
pub struct AccountLocks {
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
    acquisitions: AtomicU64,
    config: LockConfig,
}

impl AccountLocks {
    /// Create a new lock table.
    pub fn new(config: LockConfig) -> Self {
        Self {
            locks: DashMap::new(),
            acquisitions: AtomicU64::new(0),
            config,
        }
    }

    /// The order in which locks for `ids` are taken: ascending, without duplicates.
    pub fn lock_order(ids: &[AccountId]) -> Vec<AccountId> {
        let mut order = ids.to_vec();
        order.sort_unstable();
        order.dedup();
        order
    }

    fn lock_for(&self, id: AccountId) -> Arc<Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Lock all `ids` in global order.
    ///
    /// Fails with `Timeout` if the locks cannot all be taken within the
    /// configured acquisition timeout; locks taken so far are released.
    pub async fn acquire(&self, ids: &[AccountId]) -> Result<AccountLockGuard> {
        if self.acquisitions.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            let removed = self.prune_idle();
            trace!(removed, remaining = self.locks.len(), "Idle account locks pruned");
        }

        let order = Self::lock_order(ids);

        let acquire_all = async {
            let mut guards = Vec::with_capacity(order.len());
            for id in &order {
                guards.push(self.lock_for(*id).lock_owned().await);
            }
            guards
        };

        match tokio::time::timeout(self.config.acquisition_timeout, acquire_all).await {
            Ok(guards) => {
                trace!(accounts = ?order, "Account locks acquired");
                Ok(AccountLockGuard {
                    accounts: order,
                    _guards: guards,
                    acquired_at: Instant::now(),
                })
            }
            Err(_) => {
                warn!(
                    accounts = ?order,
                    timeout_ms = self.config.acquisition_timeout.as_millis() as u64,
                    "Account lock acquisition timed out"
                );
                Err(LedgerError::Timeout("account lock acquisition".to_string()))
            }
        }
    }

    /// Check whether an account's lock is currently held.
    pub fn is_locked(&self, id: AccountId) -> bool {
        self.locks
            .get(&id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of accounts with a lock table entry.
    pub fn tracked_accounts(&self) -> usize {
        self.locks.len()
    }

    /// Drop entries that nobody holds or waits on. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        // Holders and waiters keep a clone of the Arc alive.
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }
}

impl Default for AccountLocks {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}
