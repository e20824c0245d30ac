#![allow(dead_code)]

use std::sync::Arc;

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement, Value};

use ledger::{
    CommissionSettings, Currency, CurrencyConverter, DatabaseSettings, Ledger, LedgerConfig,
    Money, RecordTransactionCmd, Recorded, TransactionType,
};
use migration::MigratorTrait;

pub async fn ledger_with_db() -> (Ledger, DatabaseConnection) {
    ledger_with(LedgerConfig::default(), CommissionSettings::default(), None).await
}

pub async fn ledger_with(
    config: LedgerConfig,
    commission: CommissionSettings,
    converter: Option<Arc<dyn CurrencyConverter>>,
) -> (Ledger, DatabaseConnection) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let mut builder = Ledger::builder()
        .database(db.clone())
        .config(config)
        .commission(commission);
    if let Some(converter) = converter {
        builder = builder.converter(converter);
    }
    (builder.build().await.unwrap(), db)
}

/// File database behind a real multi-connection pool.
pub async fn ledger_with_file_db(
    max_connections: u32,
) -> (Ledger, DatabaseConnection, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("ledger.db").display());
    let db = ledger::connect(&DatabaseSettings {
        url,
        max_connections,
        min_connections: 1,
        ..DatabaseSettings::default()
    })
    .await
    .unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let ledger = Ledger::builder().database(db.clone()).build().await.unwrap();
    (ledger, db, dir)
}

pub fn eur(minor: i64) -> Money {
    Money::new(minor)
}

pub async fn fund(ledger: &Ledger, user_id: &str, minor: i64) -> Recorded {
    ledger
        .record_transaction(RecordTransactionCmd::credit(
            user_id,
            Money::new(minor),
            Currency::Eur,
            TransactionType::Payment,
        ))
        .await
        .unwrap()
}

pub async fn debit(
    ledger: &Ledger,
    user_id: &str,
    minor: i64,
    kind: TransactionType,
) -> Result<Recorded, ledger::LedgerError> {
    ledger
        .record_transaction(RecordTransactionCmd::debit(
            user_id,
            Money::new(minor),
            Currency::Eur,
            kind,
        ))
        .await
}

/// Writes a completed ledger row straight into the table, bypassing the
/// recorder and the balance cache.
pub async fn insert_raw_entry(
    db: &DatabaseConnection,
    user_id: &str,
    currency: &str,
    amount_minor: i64,
    kind: &str,
    status: &str,
) {
    let backend = db.get_database_backend();
    db.execute(Statement::from_sql_and_values(
        backend,
        "INSERT INTO wallet_transactions \
         (id, user_id, currency, amount_minor, transaction_type, status, created_at, created_by) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        vec![
            uuid::Uuid::now_v7().to_string().into(),
            user_id.into(),
            currency.into(),
            amount_minor.into(),
            kind.into(),
            status.into(),
            Value::from(chrono::Utc::now()),
            "script".into(),
        ],
    ))
    .await
    .unwrap();
}

/// Overwrites the cached available amount, simulating drift.
pub async fn tamper_available(db: &DatabaseConnection, user_id: &str, available_minor: i64) {
    let backend = db.get_database_backend();
    db.execute(Statement::from_sql_and_values(
        backend,
        "UPDATE wallet_balances SET available_minor = ? WHERE user_id = ? AND currency = 'EUR'",
        vec![available_minor.into(), user_id.into()],
    ))
    .await
    .unwrap();
}

pub async fn count_rows(db: &DatabaseConnection, table: &str) -> i64 {
    let backend = db.get_database_backend();
    let row = db
        .query_one(Statement::from_string(
            backend,
            format!("SELECT COUNT(*) AS n FROM {table}"),
        ))
        .await
        .unwrap()
        .unwrap();
    row.try_get::<i64>("", "n").unwrap()
}
