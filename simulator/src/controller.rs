//! Simulation controller.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, ensure, Context};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use paycore_common::parse_amount;
use paycore_ledger::{
    AccountDirectory, AccountId, FailPoint, IntegrityReport, LedgerConfig, LedgerEngine,
    LedgerError, MemoryStore, SqliteStore, TransactionId,
};

use crate::accounts::AccountFactory;
use crate::metrics::SimulationMetrics;
use crate::scenario::{Expect, FaultType, Scenario, ScenarioStep};

/// Storage backend for a simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    Memory,
    Sqlite,
}

/// Parameters of a random-load run.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub accounts: usize,
    pub initial_balance: Decimal,
    pub operations: usize,
    pub concurrency: usize,
    pub reversal_ratio: f64,
    pub seed: Option<u64>,
}

/// Outcome of a run, after the ledger invariants were checked.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub mode: String,
    pub operations: u64,
    pub successful: u64,
    pub rejected: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub average_latency_us: u64,
    pub p99_latency_us: u64,
    pub errors_by_code: BTreeMap<&'static str, u64>,
    pub accounts: usize,
    pub transactions: usize,
    pub total_balance: Decimal,
    pub total_deposited: Decimal,
    pub prometheus: String,
}

/// Controls the simulation.
pub struct SimulationController {
    engine: Arc<LedgerEngine>,
    /// Present on the memory backend only.
    faults: Option<MemoryStore>,
    metrics: SimulationMetrics,
    total_deposited: Decimal,
}

impl SimulationController {
    /// Create a controller over a fresh ledger.
    pub async fn new(backend: Backend, config: &LedgerConfig) -> anyhow::Result<Self> {
        let (engine, faults) = match backend {
            Backend::Memory => {
                let store = MemoryStore::new();
                let engine =
                    LedgerEngine::new(Arc::new(store.clone()), Arc::new(store.clone()), config);
                (engine, Some(store))
            }
            Backend::Sqlite => {
                let store = Arc::new(SqliteStore::from_config(config).await?);
                let directory: Arc<dyn AccountDirectory> = store.clone();
                (LedgerEngine::new(store, directory, config), None)
            }
        };

        info!(backend = ?backend, "Simulation ledger ready");
        Ok(Self {
            engine: Arc::new(engine),
            faults,
            metrics: SimulationMetrics::new(),
            total_deposited: Decimal::ZERO,
        })
    }

    /// Run random transfers and reversals from concurrent workers.
    pub async fn run_load(&mut self, load: &LoadConfig) -> anyhow::Result<()> {
        ensure!(load.accounts >= 2, "at least two accounts are required");
        ensure!(load.concurrency >= 1, "concurrency must be at least 1");
        ensure!(
            (0.0..=1.0).contains(&load.reversal_ratio),
            "reversal ratio must be within [0, 1]"
        );

        let total_deposited = load
            .initial_balance
            .checked_mul(Decimal::from(load.accounts as u64))
            .and_then(|seeded| self.total_deposited.checked_add(seeded))
            .ok_or_else(|| anyhow!("seeded balances exceed the representable range"))?;

        let accounts =
            AccountFactory::open_many(&self.engine, load.accounts, load.initial_balance).await?;
        self.total_deposited = total_deposited;

        let max_cents = load
            .initial_balance
            .checked_mul(Decimal::from(25))
            .and_then(|cents| cents.trunc().to_i64())
            .unwrap_or(i64::MAX)
            .max(1);
        let seed = load.seed.unwrap_or_else(rand::random);
        info!(
            seed,
            operations = load.operations,
            concurrency = load.concurrency,
            "Starting load run"
        );

        let ids: Arc<Vec<AccountId>> = Arc::new(accounts.iter().map(|a| a.id).collect());
        let handles: Vec<_> = (0..load.concurrency)
            .map(|worker| {
                let operations = (worker..load.operations).step_by(load.concurrency).count();
                let rng = StdRng::seed_from_u64(seed.wrapping_add(worker as u64));
                tokio::spawn(run_worker(
                    self.engine.clone(),
                    ids.clone(),
                    operations,
                    max_cents,
                    load.reversal_ratio,
                    rng,
                ))
            })
            .collect();

        for worker in join_all(handles).await {
            self.metrics.merge(worker?);
        }
        Ok(())
    }

    /// Run a scenario, failing on the first unmet expectation.
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        ensure!(
            self.faults.is_some() || !scenario.injects_faults(),
            "scenario {} injects faults and needs the memory backend",
            scenario.name
        );
        info!(scenario = %scenario.name, description = %scenario.description, "Running scenario");

        let mut labels = HashMap::new();
        for seed in &scenario.accounts {
            let balance = amount(&seed.balance)?;
            let opened = AccountFactory::open(&self.engine, &seed.label, balance).await?;
            self.total_deposited = self
                .total_deposited
                .checked_add(balance)
                .ok_or_else(|| anyhow!("seeded balances exceed the representable range"))?;
            labels.insert(opened.label, opened.id);
        }

        let mut last_transfer = None;
        for (index, step) in scenario.steps.iter().enumerate() {
            debug!(index = index + 1, ?step, "Executing step");
            self.execute_step(step, &labels, &mut last_transfer)
                .await
                .with_context(|| format!("step {} of scenario {}", index + 1, scenario.name))?;
        }
        Ok(())
    }

    async fn execute_step(
        &mut self,
        step: &ScenarioStep,
        labels: &HashMap<String, AccountId>,
        last_transfer: &mut Option<TransactionId>,
    ) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Transfer {
                from,
                to,
                amount: raw,
                expect,
            } => {
                let (from, to) = (account(labels, from)?, account(labels, to)?);
                let started = Instant::now();
                let result = self.engine.transfer(from, to, amount(raw)?).await;
                self.record(&result, started.elapsed());
                if let Ok(tx) = &result {
                    *last_transfer = Some(tx.id);
                }
                check(expect, result.map(|_| ()))
            }
            ScenarioStep::ReverseLast { expect } => {
                let id = last_transfer.ok_or_else(|| anyhow!("no transfer to reverse"))?;
                let started = Instant::now();
                let result = self.engine.reverse(id).await;
                self.record(&result, started.elapsed());
                check(expect, result.map(|_| ()))
            }
            ScenarioStep::Burst {
                from,
                to,
                amount: raw,
                count,
                expect_successes,
            } => {
                let (from, to) = (account(labels, from)?, account(labels, to)?);
                let amount = amount(raw)?;
                let pairs = vec![(from, to); *count];
                let successes = self.fire(pairs, amount).await?;
                ensure!(
                    successes == *expect_successes,
                    "expected {} successful transfers, got {}",
                    expect_successes,
                    successes
                );
                Ok(())
            }
            ScenarioStep::Crossfire {
                a,
                b,
                amount: raw,
                count,
            } => {
                let (a, b) = (account(labels, a)?, account(labels, b)?);
                let pairs = (0..*count)
                    .map(|i| if i % 2 == 0 { (a, b) } else { (b, a) })
                    .collect();
                let successes = self.fire(pairs, amount(raw)?).await?;
                ensure!(
                    successes == *count,
                    "expected all {} transfers to commit, got {}",
                    count,
                    successes
                );
                Ok(())
            }
            ScenarioStep::InjectFault { fault_type } => {
                let store = self
                    .faults
                    .as_ref()
                    .ok_or_else(|| anyhow!("fault injection needs the memory backend"))?;
                warn!(fault = ?fault_type, "Injecting store fault");
                store.fail_next(match fault_type {
                    FaultType::FailNextWrite => FailPoint::InsertTransaction,
                    FaultType::FailNextCommit => FailPoint::Commit,
                });
                Ok(())
            }
            ScenarioStep::AssertBalance {
                account: label,
                amount: raw,
            } => {
                let expected = amount(raw)?;
                let actual = self.engine.balance(account(labels, label)?).await?;
                ensure!(
                    actual == expected,
                    "balance of {} is {}, expected {}",
                    label,
                    actual,
                    expected
                );
                Ok(())
            }
            ScenarioStep::AssertConserved => {
                let total = self.engine.total_balance().await?;
                ensure!(
                    total == self.total_deposited,
                    "total balance {} differs from total deposited {}",
                    total,
                    self.total_deposited
                );
                Ok(())
            }
        }
    }

    /// Run transfers concurrently. Returns how many committed.
    async fn fire(&mut self, pairs: Vec<(AccountId, AccountId)>, amount: Decimal) -> anyhow::Result<usize> {
        let handles: Vec<_> = pairs
            .into_iter()
            .map(|(from, to)| {
                let engine = self.engine.clone();
                tokio::spawn(async move {
                    let started = Instant::now();
                    let result = engine.transfer(from, to, amount).await;
                    (result, started.elapsed())
                })
            })
            .collect();

        let mut successes = 0;
        for joined in join_all(handles).await {
            let (result, latency) = joined?;
            self.record(&result, latency);
            if result.is_ok() {
                successes += 1;
            }
        }
        Ok(successes)
    }

    fn record<T>(&mut self, result: &Result<T, LedgerError>, latency: Duration) {
        match result {
            Ok(_) => self.metrics.record_success(latency),
            Err(e) => self.metrics.record_error(e, latency),
        }
    }

    /// Check the ledger invariants and summarize the run.
    pub async fn report(&self, mode: &str) -> anyhow::Result<SimulationReport> {
        let integrity: IntegrityReport = self.engine.verify_integrity().await?;
        ensure!(
            integrity.is_consistent(),
            "ledger integrity violated: {:?}",
            integrity.violations
        );
        ensure!(
            integrity.total_balance == self.total_deposited,
            "total balance {} differs from total deposited {}",
            integrity.total_balance,
            self.total_deposited
        );

        Ok(SimulationReport {
            mode: mode.to_string(),
            operations: self.metrics.total_operations,
            successful: self.metrics.successful_operations,
            rejected: self.metrics.rejected_operations,
            failed: self.metrics.failed_operations,
            success_rate: self.metrics.success_rate(),
            average_latency_us: self.metrics.average_latency_us(),
            p99_latency_us: self.metrics.p99_latency_us(),
            errors_by_code: self.metrics.errors_by_code.clone(),
            accounts: integrity.accounts,
            transactions: integrity.transactions,
            total_balance: integrity.total_balance,
            total_deposited: self.total_deposited,
            prometheus: self.engine.metrics().to_prometheus(),
        })
    }
}

async fn run_worker(
    engine: Arc<LedgerEngine>,
    ids: Arc<Vec<AccountId>>,
    operations: usize,
    max_cents: i64,
    reversal_ratio: f64,
    mut rng: StdRng,
) -> SimulationMetrics {
    let mut metrics = SimulationMetrics::new();
    let mut completed: Vec<TransactionId> = Vec::new();

    for _ in 0..operations {
        let started = Instant::now();
        let outcome = if !completed.is_empty() && rng.gen_bool(reversal_ratio) {
            let id = completed.swap_remove(rng.gen_range(0..completed.len()));
            engine.reverse(id).await.map(|_| ())
        } else {
            let from = rng.gen_range(0..ids.len());
            let mut to = rng.gen_range(0..ids.len());
            while to == from {
                to = rng.gen_range(0..ids.len());
            }
            let amount = Decimal::new(rng.gen_range(1..=max_cents), 2);
            engine
                .transfer(ids[from], ids[to], amount)
                .await
                .map(|tx| completed.push(tx.id))
        };

        match outcome {
            Ok(()) => metrics.record_success(started.elapsed()),
            Err(e) => metrics.record_error(&e, started.elapsed()),
        }
    }
    metrics
}

fn account(labels: &HashMap<String, AccountId>, label: &str) -> anyhow::Result<AccountId> {
    labels
        .get(label)
        .copied()
        .ok_or_else(|| anyhow!("unknown account label {}", label))
}

fn amount(raw: &str) -> anyhow::Result<Decimal> {
    parse_amount(raw).with_context(|| format!("invalid amount {:?}", raw))
}

fn check(expect: &Expect, outcome: Result<(), LedgerError>) -> anyhow::Result<()> {
    match (expect, outcome) {
        (Expect::Success, Ok(())) => Ok(()),
        (Expect::Error(code), Err(e)) if e.error_code() == code => Ok(()),
        (Expect::Success, Err(e)) => bail!("expected success, got {}: {}", e.error_code(), e),
        (Expect::Error(code), Ok(())) => bail!("expected {}, but the operation committed", code),
        (Expect::Error(code), Err(e)) => bail!("expected {}, got {}: {}", code, e.error_code(), e),
    }
}
