use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement, Value as DbValue};
use serde_json::{Value, json};
use tower::ServiceExt;

use ledger::{AuditReason, Currency, Ledger};
use migration::MigratorTrait;

async fn app() -> (Router, Ledger, DatabaseConnection) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let ledger = Ledger::builder().database(db.clone()).build().await.unwrap();
    (server::router(ledger.clone()), ledger, db)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn payment(id: &str, status: &str) -> Value {
    json!({
        "payment_id": id,
        "user_id": "alice",
        "amount": "49.90",
        "currency": "EUR",
        "status": status,
        "method": "card",
        "raw": { "provider": "acme-pay" }
    })
}

#[tokio::test]
async fn webhook_redelivery_is_idempotent() {
    let (app, ledger, _db) = app().await;

    let (status, body) = send(&app, Method::POST, "/webhooks/payments", Some(payment("pi_1", "succeeded"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["replayed"], json!(false));
    assert_eq!(body["available_minor"], json!(4990));

    let (status, body) = send(&app, Method::POST, "/webhooks/payments", Some(payment("pi_1", "succeeded"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["replayed"], json!(true));
    assert_eq!(body["available_minor"], json!(4990));

    let entries = ledger
        .ledger_entries("alice", ledger::Currency::Eur, None)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn webhook_failure_for_unknown_payment_is_404() {
    let (app, _ledger, _db) = app().await;
    let (status, body) = send(&app, Method::POST, "/webhooks/payments", Some(payment("pi_2", "failed"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], json!("not_found"));
}

#[tokio::test]
async fn deposit_then_overview() {
    let (app, _ledger, _db) = app().await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/wallets/bob/deposits",
        Some(json!({
            "amount_minor": 2500,
            "currency": "EUR",
            "created_by": "admin",
            "idempotency_key": "dep-1"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], json!("completed"));

    let (status, body) = send(&app, Method::GET, "/wallets/bob/EUR", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available_minor"], json!(2500));
    assert_eq!(body["ledger_balance_minor"], json!(2500));
    assert_eq!(body["in_sync"], json!(true));

    let (status, body) = send(&app, Method::GET, "/wallets/bob/XYZ", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], json!("invalid_currency"));
}

/// Appends a completed entry without touching the cached balance.
async fn insert_behind_cache(db: &DatabaseConnection, user_id: &str, amount_minor: i64) {
    db.execute(Statement::from_sql_and_values(
        db.get_database_backend(),
        "INSERT INTO wallet_transactions \
         (id, user_id, currency, amount_minor, transaction_type, status, created_at, created_by) \
         VALUES (?, ?, 'EUR', ?, 'payment', 'completed', ?, 'script')",
        vec![
            format!("raw-{user_id}").into(),
            user_id.into(),
            amount_minor.into(),
            DbValue::from(chrono::Utc::now()),
        ],
    ))
    .await
    .unwrap();
}

#[tokio::test]
async fn deposit_is_followed_by_a_targeted_reconciliation() {
    let (app, ledger, db) = app().await;
    let deposit = |key: &str, minor: i64| {
        json!({
            "amount_minor": minor,
            "currency": "EUR",
            "created_by": "admin",
            "idempotency_key": key
        })
    };

    let (status, _) = send(&app, Method::POST, "/wallets/gus/deposits", Some(deposit("dep-g1", 5000))).await;
    assert_eq!(status, StatusCode::CREATED);
    // Let the reconciliation of the first deposit finish before drifting.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    insert_behind_cache(&db, "gus", 2000).await;
    assert!(!ledger.account_overview("gus", Currency::Eur).await.unwrap().in_sync);

    let (status, body) = send(&app, Method::POST, "/wallets/gus/deposits", Some(deposit("dep-g2", 1000))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["available_minor"], json!(6000));

    let mut overview = ledger.account_overview("gus", Currency::Eur).await.unwrap();
    for _ in 0..100 {
        if overview.in_sync {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        overview = ledger.account_overview("gus", Currency::Eur).await.unwrap();
    }
    assert!(overview.in_sync);
    assert_eq!(overview.balance.available.minor(), 8000);

    let audits = ledger.balance_audits("gus").await.unwrap();
    let correction = audits
        .iter()
        .find(|a| a.reason == AuditReason::Reconciliation)
        .unwrap();
    assert_eq!(correction.triggered_by, "targeted:deposit");
    assert_eq!(correction.new_balance.minor(), 8000);
}

#[tokio::test]
async fn reconcile_reports_each_currency() {
    let (app, ledger, _db) = app().await;
    ledger
        .deposit(ledger::DepositCmd::new(
            "carol",
            ledger::Money::new(10_00),
            ledger::Currency::Eur,
            "admin",
        ))
        .await
        .unwrap();

    let (status, body) = send(&app, Method::POST, "/wallets/carol/reconcile", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], json!("carol"));
    assert_eq!(body["currencies"][0]["currency"], json!("EUR"));
    assert_eq!(body["currencies"][0]["corrected"], json!(false));

    let (status, _) = send(
        &app,
        Method::POST,
        "/wallets/carol/reconcile",
        Some(json!({ "source": "support" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn booking_commission_is_recorded_once() {
    let (app, _ledger, _db) = app().await;
    let event = json!({
        "booking_id": "bk-1",
        "instructor_id": "ines",
        "amount_minor": 4000,
        "currency": "EUR",
        "duration_hours": "2",
        "completed_at": "2026-03-14T10:00:00+01:00"
    });

    let (status, body) = send(&app, Method::POST, "/commissions/bookings", Some(event.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["computed_amount_minor"], json!(2000));
    assert_eq!(body["rate_source"], json!("system_default"));
    assert_eq!(body["period"], json!("2026-03"));
    assert_eq!(body["created"], json!(true));

    let (status, body) = send(&app, Method::POST, "/commissions/bookings", Some(event)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], json!(false));

    let (status, body) = send(&app, Method::POST, "/commissions/booking/bk-1/cancel", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("cancelled"));

    let (status, _) = send(&app, Method::POST, "/commissions/booking/bk-1/cancel", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rental_commission_with_invalid_override_is_422() {
    let (app, _ledger, _db) = app().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/commissions/rentals",
        Some(json!({
            "rental_id": "rt-1",
            "owner_id": "olga",
            "amount_minor": 6000,
            "currency": "EUR",
            "rate_override": { "rate_type": "percentage", "value": "150" },
            "completed_at": "2026-04-02T16:30:00Z"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], json!("invalid_rate"));
}

#[tokio::test]
async fn unknown_source_type_is_422() {
    let (app, _ledger, _db) = app().await;
    let (status, _) = send(&app, Method::POST, "/commissions/lesson/x/cancel", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn pool_health_and_shutdown() {
    let (app, ledger, _db) = app().await;
    send(&app, Method::POST, "/webhooks/payments", Some(payment("pi_3", "pending"))).await;

    let (status, body) = send(&app, Method::GET, "/health/pool", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["closing"], json!(false));
    assert!(body["acquired_total"].as_u64().unwrap() >= 1);

    ledger.shutdown(std::time::Duration::from_secs(1)).await.unwrap();
    let (status, body) = send(&app, Method::GET, "/wallets/alice/EUR", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], json!("shutting_down"));

    let (_, body) = send(&app, Method::GET, "/health/pool", None).await;
    assert_eq!(body["closing"], json!(true));
}
