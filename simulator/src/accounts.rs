//! Simulated account holders.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::info;

use paycore_ledger::{AccountId, LedgerEngine};

/// An opened account with its scenario label.
#[derive(Debug, Clone)]
pub struct SimulatedAccount {
    pub label: String,
    pub id: AccountId,
}

/// Creates holder identities and opens their accounts.
pub struct AccountFactory;

impl AccountFactory {
    /// Label of the `index`-th account: `A`..`Z`, then `ACC26`, `ACC27`, ...
    pub fn label(index: usize) -> String {
        if index < 26 {
            char::from(b'A' + index as u8).to_string()
        } else {
            format!("ACC{}", index)
        }
    }

    /// Display name and email for a label.
    pub fn holder(label: &str) -> (String, String) {
        (
            format!("Holder {}", label),
            format!("holder.{}@sim.paycore.local", label.to_lowercase()),
        )
    }

    /// Open an account and fund it with `balance`.
    pub async fn open(
        engine: &LedgerEngine,
        label: &str,
        balance: Decimal,
    ) -> anyhow::Result<SimulatedAccount> {
        let (name, email) = Self::holder(label);
        let profile = engine.open_account(&name, &email).await?;
        if balance > Decimal::ZERO {
            engine.deposit(profile.id, balance).await?;
        }

        info!(label, account_id = %profile.id, balance = %balance, "Opened simulated account");
        Ok(SimulatedAccount {
            label: label.to_string(),
            id: profile.id,
        })
    }

    /// Open `count` accounts with the same starting balance.
    pub async fn open_many(
        engine: &LedgerEngine,
        count: usize,
        balance: Decimal,
    ) -> anyhow::Result<Vec<SimulatedAccount>> {
        let mut accounts = Vec::with_capacity(count);
        for index in 0..count {
            accounts.push(Self::open(engine, &Self::label(index), balance).await?);
        }
        Ok(accounts)
    }

    /// Index accounts by label.
    pub fn by_label(accounts: &[SimulatedAccount]) -> HashMap<String, AccountId> {
        accounts
            .iter()
            .map(|a| (a.label.clone(), a.id))
            .collect()
    }
}
