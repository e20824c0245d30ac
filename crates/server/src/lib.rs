use axum::{Json, http::StatusCode, response::IntoResponse};
use ledger::LedgerError;

use serde::Serialize;
pub use server::{ServerState, router, run_with_listener, spawn_with_listener};

mod commissions;
mod health;
mod server;
mod wallets;
mod webhooks;

pub mod types {
    pub mod payment {
        pub use api_types::payment::{GatewayPayment, PaymentStatus};
    }

    pub mod wallet {
        pub use api_types::wallet::{
            CurrencyReconciliation, DepositNew, ReconcileRequest, Reconciliation, Recorded,
            WalletView,
        };
    }

    pub mod commission {
        pub use api_types::commission::{
            BookingCompleted, Commission, PackageUsage, Rate, RateKind, RentalCompleted,
        };
    }

    pub mod health {
        pub use api_types::health::PoolHealth;
    }
}

pub enum ServerError {
    Ledger(LedgerError),
    Generic(String),
}

#[derive(Serialize)]
struct Error {
    error: String,
    kind: &'static str,
}

fn status_for_ledger_error(err: &LedgerError) -> StatusCode {
    if err.is_retryable() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    match err {
        LedgerError::KeyNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::InsufficientFunds(_)
        | LedgerError::DuplicateIdempotencyKey(_)
        | LedgerError::CurrencyMismatch(_) => StatusCode::CONFLICT,
        LedgerError::Conversion(_) => StatusCode::BAD_GATEWAY,
        LedgerError::Database { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn message_for_ledger_error(err: LedgerError) -> String {
    match err {
        LedgerError::Database { .. } => {
            tracing::error!("database error: {err}");
            "internal server error".to_string()
        }
        other => other.to_string(),
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let (status, kind, error) = match self {
            ServerError::Ledger(err) => (
                status_for_ledger_error(&err),
                err.kind(),
                message_for_ledger_error(err),
            ),
            ServerError::Generic(err) => (StatusCode::BAD_REQUEST, "bad_request", err),
        };

        (status, Json(Error { error, kind })).into_response()
    }
}

impl From<LedgerError> for ServerError {
    fn from(value: LedgerError) -> Self {
        Self::Ledger(value)
    }
}

pub(crate) fn currency_in(currency: api_types::Currency) -> ledger::Currency {
    match currency {
        api_types::Currency::Eur => ledger::Currency::Eur,
        api_types::Currency::Usd => ledger::Currency::Usd,
        api_types::Currency::Gbp => ledger::Currency::Gbp,
        api_types::Currency::Try => ledger::Currency::Try,
        api_types::Currency::Chf => ledger::Currency::Chf,
    }
}

pub(crate) fn currency_out(currency: ledger::Currency) -> api_types::Currency {
    match currency {
        ledger::Currency::Eur => api_types::Currency::Eur,
        ledger::Currency::Usd => api_types::Currency::Usd,
        ledger::Currency::Gbp => api_types::Currency::Gbp,
        ledger::Currency::Try => api_types::Currency::Try,
        ledger::Currency::Chf => api_types::Currency::Chf,
    }
}
