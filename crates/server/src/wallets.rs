//! Wallet API endpoints

use api_types::wallet::{
    CurrencyReconciliation, DepositNew, ReconcileRequest, Reconciliation, Recorded, WalletView,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use ledger::{Currency, DepositCmd, Money, ReconcileTrigger};

use crate::{
    ServerError, currency_in, currency_out,
    server::{ServerState, spawn_targeted_reconcile},
};

pub(crate) fn recorded_view(recorded: &ledger::Recorded) -> Recorded {
    Recorded {
        transaction_id: recorded.transaction.id,
        status: recorded.transaction.status.as_str().to_string(),
        amount_minor: recorded.transaction.amount.minor(),
        replayed: recorded.replayed,
        available_minor: recorded.balance.available.minor(),
        pending_minor: recorded.balance.pending.minor(),
    }
}

/// Admin top-up. A new deposit is followed by a targeted reconciliation.
pub async fn deposit(
    State(state): State<ServerState>,
    Path(user_id): Path<String>,
    Json(payload): Json<DepositNew>,
) -> Result<(StatusCode, Json<Recorded>), ServerError> {
    let mut cmd = DepositCmd::new(
        user_id,
        Money::new(payload.amount_minor),
        currency_in(payload.currency),
        payload.created_by,
    );
    if let Some(method) = payload.method {
        cmd = cmd.method(method);
    }
    if !payload.auto_complete.unwrap_or(true) {
        cmd = cmd.pending();
    }
    if let Some(note) = payload.note {
        cmd = cmd.note(note);
    }
    if let Some(key) = payload.idempotency_key {
        cmd = cmd.idempotency_key(key);
    }

    let recorded = state.ledger.deposit(cmd).await?;
    let status = if recorded.replayed {
        StatusCode::OK
    } else {
        spawn_targeted_reconcile(&state.ledger, recorded.transaction.user_id.clone(), "deposit");
        StatusCode::CREATED
    };
    Ok((status, Json(recorded_view(&recorded))))
}

pub async fn overview(
    State(state): State<ServerState>,
    Path((user_id, currency)): Path<(String, String)>,
) -> Result<Json<WalletView>, ServerError> {
    let currency = Currency::try_from(currency.as_str())?;
    let overview = state.ledger.account_overview(&user_id, currency).await?;
    let balance = overview.balance;

    Ok(Json(WalletView {
        withdrawable_minor: balance.withdrawable().minor(),
        user_id: balance.user_id,
        currency: currency_out(balance.currency),
        available_minor: balance.available.minor(),
        pending_minor: balance.pending.minor(),
        non_withdrawable_minor: balance.non_withdrawable.minor(),
        total_spent_minor: balance.total_spent.minor(),
        last_payment_at: balance.last_payment_at,
        ledger_balance_minor: overview.aggregates.balance.minor(),
        in_sync: overview.in_sync,
    }))
}

pub async fn reconcile(
    State(state): State<ServerState>,
    Path(user_id): Path<String>,
    body: Bytes,
) -> Result<Json<Reconciliation>, ServerError> {
    // The body is optional.
    let request: ReconcileRequest = if body.is_empty() {
        ReconcileRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|err| ServerError::Generic(err.to_string()))?
    };
    let source = request.source.unwrap_or_else(|| "api".to_string());
    let outcome = state
        .ledger
        .reconcile_user(&user_id, ReconcileTrigger::Targeted(source))
        .await?;

    Ok(Json(Reconciliation {
        user_id: outcome.user_id,
        currencies: outcome
            .currencies
            .into_iter()
            .map(|c| CurrencyReconciliation {
                currency: currency_out(c.currency),
                previous_minor: c.previous_balance.minor(),
                computed_minor: c.computed_balance.minor(),
                corrected: c.corrected,
            })
            .collect(),
    }))
}
