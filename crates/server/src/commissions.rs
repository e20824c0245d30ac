//! Completion events from the booking and rental subsystems

use api_types::commission::{
    BookingCompleted, Commission, PackageUsage, Rate, RateKind, RentalCompleted,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use ledger::{CommissionOutcome, CommissionRate, LedgerError, Money, RateType, SourceType};

use crate::{
    ServerError, currency_in, currency_out,
    server::{ServerState, spawn_targeted_reconcile},
};

fn rate_in(rate: Rate) -> Result<CommissionRate, LedgerError> {
    let rate_type = match rate.rate_type {
        RateKind::Fixed => RateType::Fixed,
        RateKind::Percentage => RateType::Percentage,
    };
    CommissionRate::new(rate_type, rate.value)
}

fn rate_out(rate: CommissionRate) -> Rate {
    Rate {
        rate_type: match rate.rate_type {
            RateType::Fixed => RateKind::Fixed,
            RateType::Percentage => RateKind::Percentage,
        },
        value: rate.value,
    }
}

fn package_in(package: PackageUsage) -> ledger::PackageUsage {
    ledger::PackageUsage {
        package_id: package.package_id,
        purchase_price: Money::new(package.purchase_price_minor),
        currency: currency_in(package.currency),
        total_hours: package.total_hours,
        total_sessions: package.total_sessions,
    }
}

fn commission_view(commission: &ledger::Commission, created: bool) -> Commission {
    Commission {
        id: commission.id,
        beneficiary_id: commission.beneficiary_id.clone(),
        source_type: commission.source_type.as_str().to_string(),
        source_id: commission.source_id.clone(),
        source_amount_minor: commission.source_amount.minor(),
        source_currency: currency_out(commission.source_currency),
        rate: rate_out(commission.rate),
        rate_source: commission.rate_source.as_str().to_string(),
        computed_amount_minor: commission.computed_amount.minor(),
        computed_currency: currency_out(commission.computed_currency),
        period: commission.period.clone(),
        status: commission.status.as_str().to_string(),
        created,
    }
}

fn outcome_response(outcome: &CommissionOutcome) -> (StatusCode, Json<Commission>) {
    let status = if outcome.is_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(commission_view(outcome.commission(), outcome.is_created())),
    )
}

pub async fn booking_completed(
    State(state): State<ServerState>,
    Json(payload): Json<BookingCompleted>,
) -> Result<(StatusCode, Json<Commission>), ServerError> {
    let event = ledger::BookingCompleted {
        booking_id: payload.booking_id,
        beneficiary_id: payload.instructor_id,
        service_id: payload.service_id,
        amount: Money::new(payload.amount_minor),
        currency: currency_in(payload.currency),
        duration_hours: payload.duration_hours,
        package: payload.package.map(package_in),
        rate_override: payload.rate_override.map(rate_in).transpose()?,
        completed_at: payload.completed_at.with_timezone(&Utc),
    };
    let outcome = state.ledger.record_booking_commission(event).await?;
    Ok(outcome_response(&outcome))
}

pub async fn rental_completed(
    State(state): State<ServerState>,
    Json(payload): Json<RentalCompleted>,
) -> Result<(StatusCode, Json<Commission>), ServerError> {
    let event = ledger::RentalCompleted {
        rental_id: payload.rental_id,
        beneficiary_id: payload.owner_id,
        service_id: payload.service_id,
        amount: Money::new(payload.amount_minor),
        currency: currency_in(payload.currency),
        duration_hours: payload.duration_hours,
        rate_override: payload.rate_override.map(rate_in).transpose()?,
        completed_at: payload.completed_at.with_timezone(&Utc),
    };
    let outcome = state.ledger.record_rental_commission(event).await?;
    Ok(outcome_response(&outcome))
}

/// The source was voided: cancel its commission, reversing a payout.
pub async fn cancel(
    State(state): State<ServerState>,
    Path((source_type, source_id)): Path<(String, String)>,
) -> Result<Json<Commission>, ServerError> {
    let source_type = SourceType::try_from(source_type.as_str())?;
    let cancelled = state
        .ledger
        .cancel_commission(source_type, &source_id)
        .await?
        .ok_or_else(|| {
            LedgerError::KeyNotFound(format!(
                "commission for {}/{source_id}",
                source_type.as_str()
            ))
        })?;
    // Cancelling a paid commission reverses the payout on the wallet.
    spawn_targeted_reconcile(
        &state.ledger,
        cancelled.beneficiary_id.clone(),
        "commission_cancel",
    );
    Ok(Json(commission_view(&cancelled, false)))
}
