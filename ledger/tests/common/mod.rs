// Shared by several test binaries; not every helper is used by each.
#![allow(dead_code)]

use std::sync::Arc;

use paycore_ledger::{
    AccountId, LedgerConfig, LedgerEngine, MemoryStore, RecordingEventSink,
};
use rust_decimal::Decimal;

/// Engine over a fresh in-memory store, with recorded events.
pub struct TestLedger {
    pub engine: Arc<LedgerEngine>,
    pub store: MemoryStore,
    pub events: Arc<RecordingEventSink>,
}

pub fn test_ledger() -> TestLedger {
    test_ledger_with(LedgerConfig::default())
}

pub fn test_ledger_with(config: LedgerConfig) -> TestLedger {
    let store = MemoryStore::new();
    let events = Arc::new(RecordingEventSink::new());
    let engine = LedgerEngine::new(Arc::new(store.clone()), Arc::new(store.clone()), &config)
        .with_event_sink(events.clone());

    TestLedger {
        engine: Arc::new(engine),
        store,
        events,
    }
}

impl TestLedger {
    /// Open one account per balance, funding each by deposit.
    pub async fn open_accounts(&self, balances: &[i64]) -> Vec<AccountId> {
        let mut ids = Vec::with_capacity(balances.len());
        for (i, balance) in balances.iter().enumerate() {
            let profile = self
                .engine
                .open_account(&format!("Holder {}", i), &format!("holder{}@example.com", i))
                .await
                .unwrap();
            if *balance > 0 {
                self.engine
                    .deposit(profile.id, Decimal::from(*balance))
                    .await
                    .unwrap();
            }
            ids.push(profile.id);
        }
        self.events.clear();
        ids
    }

    pub async fn balance(&self, id: AccountId) -> Decimal {
        self.engine.balance(id).await.unwrap()
    }
}
