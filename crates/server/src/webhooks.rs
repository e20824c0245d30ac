//! Payment-gateway webhooks

use api_types::{
    payment::{GatewayPayment, PaymentStatus},
    wallet::Recorded,
};
use axum::{Json, extract::State};
use ledger::{GatewayCallback, GatewayStatus};

use crate::{
    ServerError, currency_in,
    server::{ServerState, spawn_targeted_reconcile},
    wallets::recorded_view,
};

fn map_status(status: PaymentStatus) -> GatewayStatus {
    match status {
        PaymentStatus::Pending => GatewayStatus::Pending,
        PaymentStatus::Succeeded => GatewayStatus::Succeeded,
        PaymentStatus::Failed => GatewayStatus::Failed,
        PaymentStatus::Cancelled => GatewayStatus::Cancelled,
    }
}

/// Applies a gateway callback. Redeliveries answer with the original entry.
///
/// A targeted reconciliation of the user runs in the background afterwards.
pub async fn payment(
    State(state): State<ServerState>,
    Json(payload): Json<GatewayPayment>,
) -> Result<Json<Recorded>, ServerError> {
    let recorded = state
        .ledger
        .record_gateway_callback(GatewayCallback {
            gateway_payment_id: payload.payment_id,
            user_id: payload.user_id,
            amount: payload.amount,
            currency: currency_in(payload.currency),
            status: map_status(payload.status),
            method: payload.method,
            raw: payload.raw,
        })
        .await?;

    if !recorded.replayed {
        spawn_targeted_reconcile(
            &state.ledger,
            recorded.transaction.user_id.clone(),
            "gateway_callback",
        );
    }

    Ok(Json(recorded_view(&recorded)))
}
