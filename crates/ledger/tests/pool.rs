mod common;

use std::time::Duration;

use chrono::Utc;

use common::{fund, ledger_with_db, ledger_with_file_db};
use ledger::{Currency, LedgerError, Money, RecordTransactionCmd, StopSignal, TransactionType};

#[tokio::test]
async fn pool_stats_track_acquisitions() {
    let (ledger, _db) = ledger_with_db().await;
    let before = ledger.pool_stats();
    assert_eq!(before.acquired_total, 0);
    assert!(!before.closing);

    fund(&ledger, "uma", 1_00).await;
    fund(&ledger, "uma", 1_00).await;

    let after = ledger.pool_stats();
    assert_eq!(after.acquired_total, 2);
    assert_eq!(after.in_flight, 0);
    assert_eq!(after.waiting, 0);
    assert_eq!(after.timeouts_total, 0);
    assert!(after.max_acquire_us >= after.last_acquire_us);
}

#[tokio::test]
async fn shutdown_refuses_new_work() {
    let (ledger, _db, _dir) = ledger_with_file_db(2).await;
    fund(&ledger, "vic", 5_00).await;

    let remaining = ledger.shutdown(Duration::from_secs(1)).await.unwrap();
    assert_eq!(remaining, 0);
    assert!(ledger.is_shutting_down());
    assert!(ledger.pool_stats().closing);

    let err = ledger
        .record_transaction(RecordTransactionCmd::credit(
            "vic",
            Money::new(1_00),
            Currency::Eur,
            TransactionType::Payment,
        ))
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::ShuttingDown);
    assert!(err.is_retryable());

    let err = ledger.balance("vic", Currency::Eur).await.unwrap_err();
    assert_eq!(err, LedgerError::ShuttingDown);

    let err = ledger
        .reconcile_sweep(Utc::now(), &StopSignal::never())
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::ShuttingDown);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_waits_for_in_flight_work() {
    let (ledger, _db, _dir) = ledger_with_file_db(4).await;
    fund(&ledger, "wes", 100_00).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .record_transaction(RecordTransactionCmd::debit(
                    "wes",
                    Money::new(1_00),
                    Currency::Eur,
                    TransactionType::Charge,
                ))
                .await
        }));
    }
    tokio::task::yield_now().await;
    let remaining = ledger.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(remaining, 0);

    let mut applied = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => applied += 1,
            Err(err) => assert_eq!(err, LedgerError::ShuttingDown),
        }
    }
    assert!(applied <= 10);
}
