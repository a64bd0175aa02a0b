mod common;

use common::test_ledger;
use paycore_ledger::{Direction, LedgerError, LedgerEvent, TransactionStatus};
use rust_decimal::Decimal;

#[tokio::test]
async fn test_transfer_then_reverse_twice() {
    let ledger = test_ledger();
    let ids = ledger.open_accounts(&[200, 100]).await;
    let (a, b) = (ids[0], ids[1]);

    let tx = ledger.engine.transfer(a, b, Decimal::from(100)).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(ledger.balance(a).await, Decimal::from(100));
    assert_eq!(ledger.balance(b).await, Decimal::from(200));
    assert_eq!(ledger.store.transaction_count(), 1);

    let reversed = ledger.engine.reverse(tx.id).await.unwrap();
    assert_eq!(reversed.id, tx.id);
    assert_eq!(reversed.status, TransactionStatus::Reversed);
    assert_eq!(ledger.balance(a).await, Decimal::from(200));
    assert_eq!(ledger.balance(b).await, Decimal::from(100));

    let err = ledger.engine.reverse(tx.id).await.unwrap_err();
    assert_eq!(
        err,
        LedgerError::NotReversible {
            transaction_id: tx.id,
            status: TransactionStatus::Reversed,
        }
    );
    assert_eq!(err.status_code(), 400);
    assert_eq!(ledger.balance(a).await, Decimal::from(200));
}

#[tokio::test]
async fn test_insufficient_balance_changes_nothing() {
    let ledger = test_ledger();
    let ids = ledger.open_accounts(&[50, 0]).await;

    let err = ledger
        .engine
        .transfer(ids[0], ids[1], Decimal::from(100))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    assert!(!err.is_retryable());

    assert_eq!(ledger.balance(ids[0]).await, Decimal::from(50));
    assert_eq!(ledger.balance(ids[1]).await, Decimal::ZERO);
    assert_eq!(ledger.store.transaction_count(), 0);

    match &ledger.events.events()[..] {
        [LedgerEvent::TransferFailed { reason, .. }] => {
            assert_eq!(*reason, "INSUFFICIENT_BALANCE")
        }
        other => panic!("unexpected events: {:?}", other),
    }
}

#[tokio::test]
async fn test_zero_and_negative_amounts_rejected() {
    let ledger = test_ledger();
    let ids = ledger.open_accounts(&[100, 100]).await;

    for amount in [Decimal::ZERO, Decimal::from(-5), Decimal::new(1, 3)] {
        let err = ledger.engine.transfer(ids[0], ids[1], amount).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount { .. }), "{:?}", err);
    }

    assert_eq!(ledger.balance(ids[0]).await, Decimal::from(100));
    assert_eq!(ledger.balance(ids[1]).await, Decimal::from(100));
    assert_eq!(ledger.store.transaction_count(), 0);
}

#[tokio::test]
async fn test_unknown_transaction() {
    let ledger = test_ledger();
    let err = ledger
        .engine
        .reverse(paycore_ledger::TransactionId::new(77))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::TransactionNotFound(_)));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_history_shows_both_directions() {
    let ledger = test_ledger();
    let ids = ledger.open_accounts(&[100, 100]).await;
    let (a, b) = (ids[0], ids[1]);

    let first = ledger.engine.transfer(a, b, Decimal::new(1250, 2)).await.unwrap();
    ledger.engine.transfer(b, a, Decimal::from(3)).await.unwrap();
    ledger.engine.reverse(first.id).await.unwrap();

    let history = ledger.engine.history_for(a).await.unwrap();
    assert_eq!(history.len(), 2);

    assert_eq!(history[0].id, first.id);
    assert_eq!(history[0].direction, Direction::Sent);
    assert_eq!(history[0].status, TransactionStatus::Reversed);
    assert_eq!(history[0].counterparty().email, "holder1@example.com");

    assert_eq!(history[1].direction, Direction::Received);
    assert_eq!(history[1].amount, Decimal::from(3));

    let other_side = ledger.engine.history_for(b).await.unwrap();
    assert_eq!(other_side.len(), 2);
    assert_eq!(other_side[0].direction, Direction::Received);
}
