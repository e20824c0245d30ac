use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Eur,
    Usd,
    Gbp,
    Try,
    Chf,
}

pub mod payment {
    use super::*;

    /// Payment status as reported by the gateway.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum PaymentStatus {
        Pending,
        Succeeded,
        Failed,
        Cancelled,
    }

    /// Gateway webhook body. Delivered at least once.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct GatewayPayment {
        /// Gateway payment id; also the idempotency key of the ledger entry.
        pub payment_id: String,
        pub user_id: String,
        /// Major units, e.g. `"49.90"`.
        pub amount: Decimal,
        pub currency: Currency,
        pub status: PaymentStatus,
        pub method: Option<String>,
        /// Untouched gateway payload, kept with the ledger entry.
        #[serde(default)]
        pub raw: serde_json::Map<String, serde_json::Value>,
    }
}

pub mod wallet {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    pub struct DepositNew {
        pub amount_minor: i64,
        pub currency: Currency,
        pub method: Option<String>,
        /// Defaults to `true`; `false` leaves the deposit pending.
        pub auto_complete: Option<bool>,
        pub note: Option<String>,
        pub idempotency_key: Option<String>,
        pub created_by: String,
    }

    /// Outcome of a recorder call.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct Recorded {
        pub transaction_id: Uuid,
        pub status: String,
        pub amount_minor: i64,
        pub replayed: bool,
        pub available_minor: i64,
        pub pending_minor: i64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct WalletView {
        pub user_id: String,
        pub currency: Currency,
        pub available_minor: i64,
        pub pending_minor: i64,
        pub non_withdrawable_minor: i64,
        pub withdrawable_minor: i64,
        pub total_spent_minor: i64,
        pub last_payment_at: Option<DateTime<Utc>>,
        /// Balance derived from the ledger, independent of the cache.
        pub ledger_balance_minor: i64,
        pub in_sync: bool,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct ReconcileRequest {
        /// Recorded in the audit trail as `targeted:<source>`.
        pub source: Option<String>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct CurrencyReconciliation {
        pub currency: Currency,
        pub previous_minor: i64,
        pub computed_minor: i64,
        pub corrected: bool,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct Reconciliation {
        pub user_id: String,
        pub currencies: Vec<CurrencyReconciliation>,
    }
}

pub mod commission {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum RateKind {
        Fixed,
        Percentage,
    }

    #[derive(Clone, Copy, Debug, Serialize, Deserialize)]
    pub struct Rate {
        pub rate_type: RateKind,
        pub value: Decimal,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct PackageUsage {
        pub package_id: String,
        pub purchase_price_minor: i64,
        pub currency: Currency,
        pub total_hours: Option<Decimal>,
        pub total_sessions: Option<u32>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct BookingCompleted {
        pub booking_id: String,
        pub instructor_id: String,
        pub service_id: Option<String>,
        /// Zero for package-funded bookings.
        #[serde(default)]
        pub amount_minor: i64,
        pub currency: Currency,
        pub duration_hours: Option<Decimal>,
        pub package: Option<PackageUsage>,
        pub rate_override: Option<Rate>,
        pub completed_at: DateTime<FixedOffset>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct RentalCompleted {
        pub rental_id: String,
        pub owner_id: String,
        pub service_id: Option<String>,
        pub amount_minor: i64,
        pub currency: Currency,
        pub duration_hours: Option<Decimal>,
        pub rate_override: Option<Rate>,
        pub completed_at: DateTime<FixedOffset>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct Commission {
        pub id: Uuid,
        pub beneficiary_id: String,
        pub source_type: String,
        pub source_id: String,
        pub source_amount_minor: i64,
        pub source_currency: Currency,
        pub rate: Rate,
        pub rate_source: String,
        pub computed_amount_minor: i64,
        pub computed_currency: Currency,
        pub period: String,
        pub status: String,
        /// `false` when the event had already produced this commission.
        pub created: bool,
    }
}

pub mod health {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    pub struct PoolHealth {
        pub waiting: usize,
        pub in_flight: usize,
        pub acquired_total: u64,
        pub timeouts_total: u64,
        pub last_acquire_us: u64,
        pub max_acquire_us: u64,
        pub closing: bool,
    }
}
