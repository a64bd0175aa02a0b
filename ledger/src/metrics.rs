//! Metrics collection for ledger monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use paycore_common::{ErrorKind, LedgerError};

/// Ledger metrics.
#[derive(Debug)]
pub struct Metrics {
    /// Total transfers attempted.
    pub transfers_total: AtomicU64,
    /// Transfers committed.
    pub transfers_completed: AtomicU64,
    /// Transfers refused by a business rule or validation.
    pub transfers_rejected: AtomicU64,
    /// Transfers that hit an infrastructure failure.
    pub transfers_failed: AtomicU64,
    /// Total reversals attempted.
    pub reversals_total: AtomicU64,
    /// Reversals committed.
    pub reversals_completed: AtomicU64,
    /// Reversals refused by a business rule.
    pub reversals_rejected: AtomicU64,
    /// Reversals that hit an infrastructure failure.
    pub reversals_failed: AtomicU64,
    /// Deposits committed.
    pub deposits_total: AtomicU64,
    /// Operations currently running.
    pub operations_in_flight: AtomicU64,
    /// Lock acquisitions that timed out.
    pub lock_timeouts: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            transfers_total: AtomicU64::new(0),
            transfers_completed: AtomicU64::new(0),
            transfers_rejected: AtomicU64::new(0),
            transfers_failed: AtomicU64::new(0),
            reversals_total: AtomicU64::new(0),
            reversals_completed: AtomicU64::new(0),
            reversals_rejected: AtomicU64::new(0),
            reversals_failed: AtomicU64::new(0),
            deposits_total: AtomicU64::new(0),
            operations_in_flight: AtomicU64::new(0),
            lock_timeouts: AtomicU64::new(0),
        }
    }

    /// Record a transfer attempt starting.
    pub fn transfer_started(&self) {
        self.transfers_total.fetch_add(1, Ordering::Relaxed);
        self.operations_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transfer outcome.
    pub fn transfer_finished<T>(&self, result: &Result<T, LedgerError>) {
        self.operations_in_flight.fetch_sub(1, Ordering::Relaxed);
        match result {
            Ok(_) => self.transfers_completed.fetch_add(1, Ordering::Relaxed),
            Err(e) if e.kind() == ErrorKind::Infrastructure => {
                self.transfers_failed.fetch_add(1, Ordering::Relaxed)
            }
            Err(_) => self.transfers_rejected.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record a reversal attempt starting.
    pub fn reversal_started(&self) {
        self.reversals_total.fetch_add(1, Ordering::Relaxed);
        self.operations_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reversal outcome.
    pub fn reversal_finished<T>(&self, result: &Result<T, LedgerError>) {
        self.operations_in_flight.fetch_sub(1, Ordering::Relaxed);
        match result {
            Ok(_) => self.reversals_completed.fetch_add(1, Ordering::Relaxed),
            Err(e) if e.kind() == ErrorKind::Infrastructure => {
                self.reversals_failed.fetch_add(1, Ordering::Relaxed)
            }
            Err(_) => self.reversals_rejected.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record a committed deposit.
    pub fn deposit_applied(&self) {
        self.deposits_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record lock timeout.
    pub fn lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transfers_total: self.transfers_total.load(Ordering::Relaxed),
            transfers_completed: self.transfers_completed.load(Ordering::Relaxed),
            transfers_rejected: self.transfers_rejected.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
            reversals_total: self.reversals_total.load(Ordering::Relaxed),
            reversals_completed: self.reversals_completed.load(Ordering::Relaxed),
            reversals_rejected: self.reversals_rejected.load(Ordering::Relaxed),
            reversals_failed: self.reversals_failed.load(Ordering::Relaxed),
            deposits_total: self.deposits_total.load(Ordering::Relaxed),
            operations_in_flight: self.operations_in_flight.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let series: [(&str, &str, &str, u64); 11] = [
            ("paycore_transfers_total", "counter", "Total transfers attempted", s.transfers_total),
            ("paycore_transfers_completed", "counter", "Transfers committed", s.transfers_completed),
            ("paycore_transfers_rejected", "counter", "Transfers refused by validation or business rules", s.transfers_rejected),
            ("paycore_transfers_failed", "counter", "Transfers failed on infrastructure errors", s.transfers_failed),
            ("paycore_reversals_total", "counter", "Total reversals attempted", s.reversals_total),
            ("paycore_reversals_completed", "counter", "Reversals committed", s.reversals_completed),
            ("paycore_reversals_rejected", "counter", "Reversals refused by business rules", s.reversals_rejected),
            ("paycore_reversals_failed", "counter", "Reversals failed on infrastructure errors", s.reversals_failed),
            ("paycore_deposits_total", "counter", "Deposits committed", s.deposits_total),
            ("paycore_operations_in_flight", "gauge", "Ledger operations currently running", s.operations_in_flight),
            ("paycore_lock_timeouts", "counter", "Account lock acquisitions that timed out", s.lock_timeouts),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in series {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n\n"
            ));
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub transfers_total: u64,
    pub transfers_completed: u64,
    pub transfers_rejected: u64,
    pub transfers_failed: u64,
    pub reversals_total: u64,
    pub reversals_completed: u64,
    pub reversals_rejected: u64,
    pub reversals_failed: u64,
    pub deposits_total: u64,
    pub operations_in_flight: u64,
    pub lock_timeouts: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
