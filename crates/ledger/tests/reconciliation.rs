mod common;

use std::time::Duration;

use chrono::{TimeDelta, Utc};

use common::{count_rows, debit, eur, fund, insert_raw_entry, ledger_with_db, tamper_available};
use ledger::{
    AuditReason, Currency, EntryStatus, Money, ReconcileTrigger, RecordTransactionCmd,
    StopSignal, TransactionType, spawn_periodic_reconciliation,
};

#[tokio::test]
async fn entries_written_behind_the_cache_are_reconciled() {
    let (ledger, db) = ledger_with_db().await;
    insert_raw_entry(&db, "ana", "EUR", 50_00, "payment", "completed").await;
    insert_raw_entry(&db, "ana", "EUR", -20_00, "booking_charge", "completed").await;
    insert_raw_entry(&db, "ana", "EUR", 5_00, "payment", "pending").await;

    let before = ledger.account_overview("ana", Currency::Eur).await.unwrap();
    assert!(!before.in_sync);
    assert_eq!(before.balance.available, Money::ZERO);

    let outcome = ledger
        .reconcile_user("ana", ReconcileTrigger::Targeted("test".to_string()))
        .await
        .unwrap();
    assert!(outcome.corrected());
    assert_eq!(outcome.currencies.len(), 1);
    assert_eq!(outcome.currencies[0].previous_balance, Money::ZERO);
    assert_eq!(outcome.currencies[0].computed_balance, eur(30_00));

    let balance = ledger.balance("ana", Currency::Eur).await.unwrap();
    assert_eq!(balance.available, eur(30_00));
    assert_eq!(balance.pending, eur(5_00));
    assert_eq!(balance.total_spent, eur(50_00));
    assert_eq!(balance.total_debits, eur(20_00));

    let audits = ledger.balance_audits("ana").await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].reason, AuditReason::Reconciliation);
    assert_eq!(audits[0].triggered_by, "targeted:test");
    assert_eq!(audits[0].diff, eur(30_00));

    let again = ledger
        .reconcile_user("ana", ReconcileTrigger::Sweep)
        .await
        .unwrap();
    assert!(!again.corrected());
    assert_eq!(count_rows(&db, "balance_audits").await, 1);
}

#[tokio::test]
async fn recorder_output_is_already_consistent() {
    let (ledger, db) = ledger_with_db().await;
    fund(&ledger, "ben", 80_00).await;
    debit(&ledger, "ben", 30_00, TransactionType::PackagePurchase)
        .await
        .unwrap();
    ledger
        .record_transaction(
            RecordTransactionCmd::credit("ben", eur(10_00), Currency::Eur, TransactionType::Payment)
                .status(EntryStatus::Pending),
        )
        .await
        .unwrap();

    let outcome = ledger
        .reconcile_user("ben", ReconcileTrigger::Sweep)
        .await
        .unwrap();
    assert!(!outcome.corrected());
    assert_eq!(count_rows(&db, "balance_audits").await, 0);
}

#[tokio::test]
async fn drift_within_tolerance_is_left_alone() {
    let (ledger, db) = ledger_with_db().await;
    fund(&ledger, "cleo", 10_00).await;

    tamper_available(&db, "cleo", 10_01).await;
    let outcome = ledger
        .reconcile_user("cleo", ReconcileTrigger::Sweep)
        .await
        .unwrap();
    assert!(!outcome.corrected());
    assert_eq!(
        ledger.balance("cleo", Currency::Eur).await.unwrap().available,
        eur(10_01)
    );

    tamper_available(&db, "cleo", 10_05).await;
    let outcome = ledger
        .reconcile_user("cleo", ReconcileTrigger::Sweep)
        .await
        .unwrap();
    assert!(outcome.corrected());
    assert_eq!(
        ledger.balance("cleo", Currency::Eur).await.unwrap().available,
        eur(10_00)
    );
}

#[tokio::test]
async fn sweep_counts_corrections_and_failures() {
    let (ledger, db) = ledger_with_db().await;
    fund(&ledger, "dan", 10_00).await;
    insert_raw_entry(&db, "eve", "EUR", 12_00, "payment", "completed").await;
    insert_raw_entry(&db, "fay", "XXX", 1_00, "payment", "completed").await;

    let report = ledger
        .reconcile_sweep(Utc::now() - TimeDelta::hours(1), &StopSignal::never())
        .await
        .unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.corrected, 1);
    assert_eq!(report.errored, 1);
    assert!(!report.stopped);

    assert_eq!(
        ledger.balance("eve", Currency::Eur).await.unwrap().available,
        eur(12_00)
    );
}

#[tokio::test]
async fn sweep_skips_users_without_recent_activity() {
    let (ledger, db) = ledger_with_db().await;
    insert_raw_entry(&db, "gus", "EUR", 12_00, "payment", "completed").await;

    let report = ledger
        .reconcile_sweep(Utc::now() + TimeDelta::hours(1), &StopSignal::never())
        .await
        .unwrap();
    assert_eq!(report.checked, 0);
    assert_eq!(
        ledger.balance("gus", Currency::Eur).await.unwrap().available,
        Money::ZERO
    );
}

#[tokio::test]
async fn raised_stop_signal_ends_the_sweep_early() {
    let (ledger, db) = ledger_with_db().await;
    insert_raw_entry(&db, "hal", "EUR", 1_00, "payment", "completed").await;

    let (handle, signal) = StopSignal::new();
    handle.stop();
    assert!(signal.is_stopped());

    let report = ledger
        .reconcile_sweep(Utc::now() - TimeDelta::hours(1), &signal)
        .await
        .unwrap();
    assert!(report.stopped);
    assert_eq!(report.checked, 0);
}

#[tokio::test]
async fn periodic_reconciliation_corrects_and_stops() {
    let (ledger, db) = ledger_with_db().await;
    insert_raw_entry(&db, "ida", "EUR", 9_00, "payment", "completed").await;

    let (handle, signal) = StopSignal::new();
    let task = spawn_periodic_reconciliation(
        ledger.clone(),
        Duration::from_millis(20),
        Duration::from_secs(3600),
        signal,
    );

    let mut corrected = false;
    for _ in 0..100 {
        if ledger.balance("ida", Currency::Eur).await.unwrap().available == eur(9_00) {
            corrected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(corrected);

    handle.stop();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn zero_interval_is_raised_instead_of_panicking() {
    let (ledger, db) = ledger_with_db().await;
    insert_raw_entry(&db, "jay", "EUR", 4_00, "payment", "completed").await;

    let (handle, signal) = StopSignal::new();
    let task = spawn_periodic_reconciliation(
        ledger.clone(),
        Duration::ZERO,
        Duration::from_secs(3600),
        signal,
    );

    let mut corrected = false;
    for _ in 0..100 {
        if ledger.balance("jay", Currency::Eur).await.unwrap().available == eur(4_00) {
            corrected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(corrected);

    handle.stop();
    // A panic inside the task would surface as a JoinError here.
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn reconciling_a_blank_user_is_a_validation_error() {
    let (ledger, _db) = ledger_with_db().await;
    let err = ledger
        .reconcile_user(" ", ReconcileTrigger::Sweep)
        .await
        .unwrap_err();
    assert!(err.is_validation());
}
