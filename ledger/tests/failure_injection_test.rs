mod common;

use std::time::Duration;

use common::{test_ledger, test_ledger_with};
use paycore_ledger::{ErrorKind, FailPoint, LedgerConfig, LedgerError, LockConfig, TransactionStatus};
use rust_decimal::Decimal;

#[tokio::test]
async fn test_record_write_failure_rolls_back_debit() {
    let ledger = test_ledger();
    let ids = ledger.open_accounts(&[100, 20]).await;

    ledger.store.fail_next(FailPoint::InsertTransaction);
    let err = ledger
        .engine
        .transfer(ids[0], ids[1], Decimal::from(40))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Infrastructure);
    assert!(!err.to_string().contains("injected"));
    assert_eq!(ledger.balance(ids[0]).await, Decimal::from(100));
    assert_eq!(ledger.balance(ids[1]).await, Decimal::from(20));
    assert_eq!(ledger.store.transaction_count(), 0);

    // The fail point is one-shot; a retry creates the transfer.
    ledger
        .engine
        .transfer(ids[0], ids[1], Decimal::from(40))
        .await
        .unwrap();
    assert_eq!(ledger.balance(ids[0]).await, Decimal::from(60));
}

#[tokio::test]
async fn test_reversal_commit_failure_keeps_transaction_completed() {
    let ledger = test_ledger();
    let ids = ledger.open_accounts(&[100, 0]).await;
    let tx = ledger
        .engine
        .transfer(ids[0], ids[1], Decimal::from(75))
        .await
        .unwrap();

    ledger.store.fail_next(FailPoint::Commit);
    let err = ledger.engine.reverse(tx.id).await.unwrap_err();
    assert!(err.is_retryable());

    let history = ledger.engine.history_for(ids[0]).await.unwrap();
    assert_eq!(history[0].status, TransactionStatus::Completed);
    assert_eq!(ledger.balance(ids[0]).await, Decimal::from(25));
    assert_eq!(ledger.balance(ids[1]).await, Decimal::from(75));

    ledger.engine.reverse(tx.id).await.unwrap();
    assert_eq!(ledger.balance(ids[0]).await, Decimal::from(100));

    let snapshot = ledger.engine.metrics().snapshot();
    assert_eq!(snapshot.reversals_failed, 1);
    assert_eq!(snapshot.reversals_completed, 1);
}

#[tokio::test]
async fn test_lock_timeout_surfaces_as_timeout() {
    let ledger = test_ledger_with(LedgerConfig {
        lock_config: LockConfig {
            acquisition_timeout: Duration::from_millis(25),
        },
        ..LedgerConfig::default()
    });
    let ids = ledger.open_accounts(&[100, 0]).await;

    let held = ledger.engine.accounts().lock(&[ids[1]]).await.unwrap();
    let err = ledger
        .engine
        .transfer(ids[0], ids[1], Decimal::from(10))
        .await
        .unwrap_err();
    drop(held);

    assert!(matches!(err, LedgerError::Timeout(_)));
    assert_eq!(err.status_code(), 503);
    assert_eq!(ledger.engine.metrics().snapshot().lock_timeouts, 1);
    assert_eq!(ledger.balance(ids[0]).await, Decimal::from(100));

    ledger
        .engine
        .transfer(ids[0], ids[1], Decimal::from(10))
        .await
        .unwrap();
}

fn short_unit_timeout() -> LedgerConfig {
    LedgerConfig {
        unit_timeout: Duration::from_millis(20),
        ..LedgerConfig::default()
    }
}

#[tokio::test]
async fn test_unit_timeout_rolls_back_staged_transfer() {
    let ledger = test_ledger_with(short_unit_timeout());
    let ids = ledger.open_accounts(&[100, 0]).await;

    ledger
        .store
        .fail_next(FailPoint::DelayInsertTransaction(Duration::from_millis(500)));
    let err = ledger
        .engine
        .transfer(ids[0], ids[1], Decimal::from(30))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::Timeout(_)));
    assert!(err.is_retryable());
    assert_eq!(ledger.balance(ids[0]).await, Decimal::from(100));
    assert_eq!(ledger.balance(ids[1]).await, Decimal::ZERO);
    assert_eq!(ledger.store.transaction_count(), 0);
    assert_eq!(ledger.engine.metrics().snapshot().transfers_failed, 1);
    assert_eq!(ledger.events.names(), vec!["transfer_failed"]);

    // The dropped unit left nothing behind; the retry applies exactly once.
    ledger
        .engine
        .transfer(ids[0], ids[1], Decimal::from(30))
        .await
        .unwrap();
    assert_eq!(ledger.balance(ids[0]).await, Decimal::from(70));
    assert_eq!(ledger.store.transaction_count(), 1);
}

#[tokio::test]
async fn test_slow_commit_reports_its_own_outcome() {
    let ledger = test_ledger_with(short_unit_timeout());
    let ids = ledger.open_accounts(&[100, 0]).await;

    ledger
        .store
        .fail_next(FailPoint::DelayCommit(Duration::from_millis(100)));
    let tx = ledger
        .engine
        .transfer(ids[0], ids[1], Decimal::from(30))
        .await
        .unwrap();

    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(ledger.balance(ids[0]).await, Decimal::from(70));
    assert_eq!(ledger.balance(ids[1]).await, Decimal::from(30));
    assert_eq!(ledger.store.transaction_count(), 1);
}
