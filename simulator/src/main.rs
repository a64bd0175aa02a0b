//! Paycore Simulator
//!
//! Drives the ledger with named scenarios or random concurrent load, then
//! checks conservation and non-negativity of every balance.

use clap::Parser;
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use paycore_ledger::LedgerConfig;

mod accounts;
mod controller;
mod metrics;
mod scenario;

use controller::{Backend, LoadConfig, SimulationController};
use scenario::Scenario;

/// Paycore Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Paycore ledger scenario and load simulator")]
struct Args {
    /// Number of accounts to open in load mode
    #[arg(short, long, default_value = "10")]
    accounts: usize,

    /// Starting balance of each account in load mode
    #[arg(long, default_value = "1000")]
    initial_balance: Decimal,

    /// Number of operations in load mode
    #[arg(short, long, default_value = "1000")]
    operations: usize,

    /// Number of concurrent workers in load mode
    #[arg(short, long, default_value = "8")]
    concurrency: usize,

    /// Probability that an operation reverses an earlier transfer
    #[arg(long, default_value = "0.1")]
    reversal_ratio: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Storage backend
    #[arg(long, value_enum, default_value = "memory")]
    backend: Backend,

    /// Database URL for the sqlite backend (overrides the environment)
    #[arg(long)]
    database_url: Option<String>,

    /// Scenario to run: a built-in name or a JSON file
    #[arg(short, long)]
    scenario: Option<String>,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

fn init_tracing(config: &LedgerConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = LedgerConfig::from_env();
    if let Some(url) = &args.database_url {
        config.database_url = url.clone();
    }
    config.validate()?;
    init_tracing(&config);

    info!(backend = ?args.backend, "Starting Paycore Simulator");
    let mut controller = SimulationController::new(args.backend, &config).await?;

    let report = match &args.scenario {
        Some(name) => {
            let scenario = Scenario::load(name)?;
            controller.run_scenario(&scenario).await?;
            controller.report(&scenario.name).await?
        }
        None => {
            controller
                .run_load(&LoadConfig {
                    accounts: args.accounts,
                    initial_balance: args.initial_balance,
                    operations: args.operations,
                    concurrency: args.concurrency,
                    reversal_ratio: args.reversal_ratio,
                    seed: args.seed,
                })
                .await?;
            controller.report("load").await?
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        info!(
            mode = %report.mode,
            operations = report.operations,
            successful = report.successful,
            rejected = report.rejected,
            failed = report.failed,
            success_rate = report.success_rate,
            average_latency_us = report.average_latency_us,
            p99_latency_us = report.p99_latency_us,
            total_balance = %report.total_balance,
            "Simulation complete"
        );
        for (code, count) in &report.errors_by_code {
            info!(code, count, "Operation errors");
        }
        print!("{}", report.prometheus);
    }

    Ok(())
}
