//! Simulation metrics.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use paycore_ledger::{ErrorKind, LedgerError};

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Total operations attempted.
    pub total_operations: u64,
    /// Operations that committed.
    pub successful_operations: u64,
    /// Operations refused by validation or a business rule.
    pub rejected_operations: u64,
    /// Operations that hit an infrastructure failure.
    pub failed_operations: u64,
    /// Refusals and failures by error code.
    pub errors_by_code: BTreeMap<&'static str, u64>,
    /// Latency samples (µs).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_operations: 0,
            successful_operations: 0,
            rejected_operations: 0,
            failed_operations: 0,
            errors_by_code: BTreeMap::new(),
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    fn push_latency(&mut self, latency: Duration) {
        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency.as_micros() as u64);
    }

    /// Record a committed operation.
    pub fn record_success(&mut self, latency: Duration) {
        self.total_operations += 1;
        self.successful_operations += 1;
        self.push_latency(latency);
    }

    /// Record an operation that returned an error.
    pub fn record_error(&mut self, error: &LedgerError, latency: Duration) {
        self.total_operations += 1;
        if error.kind() == ErrorKind::Infrastructure {
            self.failed_operations += 1;
        } else {
            self.rejected_operations += 1;
        }
        *self.errors_by_code.entry(error.error_code()).or_insert(0) += 1;
        self.push_latency(latency);
    }

    /// Fold another worker's metrics into these.
    pub fn merge(&mut self, other: SimulationMetrics) {
        self.total_operations += other.total_operations;
        self.successful_operations += other.successful_operations;
        self.rejected_operations += other.rejected_operations;
        self.failed_operations += other.failed_operations;
        for (code, count) in other.errors_by_code {
            *self.errors_by_code.entry(code).or_insert(0) += count;
        }
        for sample in other.latency_samples {
            if self.latency_samples.len() >= self.max_samples {
                self.latency_samples.pop_front();
            }
            self.latency_samples.push_back(sample);
        }
    }

    /// Get average latency in µs.
    pub fn average_latency_us(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p99 latency in µs.
    pub fn p99_latency_us(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }

        self.successful_operations as f64 / self.total_operations as f64
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paycore_ledger::AccountId;

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        metrics.record_success(Duration::from_micros(100));
        metrics.record_success(Duration::from_micros(200));
        metrics.record_success(Duration::from_micros(150));
        metrics.record_error(
            &LedgerError::SenderNotFound(AccountId::new(9)),
            Duration::from_micros(150),
        );

        assert_eq!(metrics.total_operations, 4);
        assert_eq!(metrics.successful_operations, 3);
        assert_eq!(metrics.rejected_operations, 1);
        assert_eq!(metrics.average_latency_us(), 150);
        assert_eq!(metrics.p99_latency_us(), 200);
        assert_eq!(metrics.success_rate(), 0.75);
    }

    #[test]
    fn test_merge() {
        let mut left = SimulationMetrics::new();
        left.record_error(&LedgerError::storage("down"), Duration::from_micros(10));

        let mut right = SimulationMetrics::new();
        right.record_error(&LedgerError::storage("down"), Duration::from_micros(30));
        right.record_success(Duration::from_micros(20));

        left.merge(right);
        assert_eq!(left.total_operations, 3);
        assert_eq!(left.failed_operations, 2);
        assert_eq!(left.errors_by_code["STORAGE_UNAVAILABLE"], 2);
        assert_eq!(left.average_latency_us(), 20);
    }
}
