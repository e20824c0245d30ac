//! Command structs for ledger operations.
//!
//! These types group parameters for write operations (record, settle,
//! deposit, commission events), keeping call sites readable and avoiding
//! long argument lists.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CommissionRate, Currency, Direction, EntryStatus, Money, TransactionType, TxMetadata};

/// Record one monetary movement.
#[derive(Clone, Debug)]
pub struct RecordTransactionCmd {
    pub user_id: String,
    /// Strictly positive; the sign comes from `direction`.
    pub amount: Money,
    pub currency: Currency,
    pub transaction_type: TransactionType,
    pub direction: Direction,
    pub idempotency_key: Option<String>,
    pub reference_number: Option<String>,
    pub metadata: TxMetadata,
    /// `Pending` or `Completed`.
    pub status: EntryStatus,
    /// Credits flagged here also grow the non-withdrawable bucket.
    pub non_withdrawable: bool,
    pub created_by: String,
}

impl RecordTransactionCmd {
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        amount: Money,
        currency: Currency,
        transaction_type: TransactionType,
        direction: Direction,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            created_by: user_id.clone(),
            user_id,
            amount,
            currency,
            transaction_type,
            direction,
            idempotency_key: None,
            reference_number: None,
            metadata: TxMetadata::None,
            status: EntryStatus::Completed,
            non_withdrawable: false,
        }
    }

    #[must_use]
    pub fn credit(
        user_id: impl Into<String>,
        amount: Money,
        currency: Currency,
        transaction_type: TransactionType,
    ) -> Self {
        Self::new(user_id, amount, currency, transaction_type, Direction::Credit)
    }

    #[must_use]
    pub fn debit(
        user_id: impl Into<String>,
        amount: Money,
        currency: Currency,
        transaction_type: TransactionType,
    ) -> Self {
        Self::new(user_id, amount, currency, transaction_type, Direction::Debit)
    }

    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn reference_number(mut self, reference: impl Into<String>) -> Self {
        self.reference_number = Some(reference.into());
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: TxMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn status(mut self, status: EntryStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn non_withdrawable(mut self) -> Self {
        self.non_withdrawable = true;
        self
    }

    #[must_use]
    pub fn created_by(mut self, actor: impl Into<String>) -> Self {
        self.created_by = actor.into();
        self
    }
}

/// Move a pending entry to a terminal status.
#[derive(Clone, Debug)]
pub struct SettleCmd {
    pub transaction_id: Uuid,
    pub status: EntryStatus,
    pub settled_by: String,
}

impl SettleCmd {
    #[must_use]
    pub fn new(transaction_id: Uuid, status: EntryStatus, settled_by: impl Into<String>) -> Self {
        Self {
            transaction_id,
            status,
            settled_by: settled_by.into(),
        }
    }
}

/// Status reported by the payment gateway for a payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

/// Payment-gateway callback, delivered at least once.
#[derive(Clone, Debug)]
pub struct GatewayCallback {
    pub gateway_payment_id: String,
    pub user_id: String,
    /// Major units as sent by the gateway; rounded once to 2 places.
    pub amount: Decimal,
    pub currency: Currency,
    pub status: GatewayStatus,
    pub method: Option<String>,
    pub raw: serde_json::Map<String, serde_json::Value>,
}

/// Administrative top-up.
#[derive(Clone, Debug)]
pub struct DepositCmd {
    pub user_id: String,
    pub amount: Money,
    pub currency: Currency,
    pub method: String,
    /// Completed immediately when `true`, otherwise left pending.
    pub auto_complete: bool,
    pub note: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_by: String,
}

impl DepositCmd {
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        amount: Money,
        currency: Currency,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            amount,
            currency,
            method: "cash".to_string(),
            auto_complete: true,
            note: None,
            idempotency_key: None,
            created_by: created_by.into(),
        }
    }

    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    #[must_use]
    pub fn pending(mut self) -> Self {
        self.auto_complete = false;
        self
    }

    #[must_use]
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// How a package-funded booking consumed its package.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackageUsage {
    pub package_id: String,
    pub purchase_price: Money,
    pub currency: Currency,
    pub total_hours: Option<Decimal>,
    pub total_sessions: Option<u32>,
}

/// A booking reached its terminal completed state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookingCompleted {
    pub booking_id: String,
    pub beneficiary_id: String,
    pub service_id: Option<String>,
    /// Direct charge of the booking; zero for package-funded bookings.
    pub amount: Money,
    pub currency: Currency,
    pub duration_hours: Option<Decimal>,
    pub package: Option<PackageUsage>,
    pub rate_override: Option<CommissionRate>,
    pub completed_at: DateTime<Utc>,
}

/// A rental reached its terminal completed state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RentalCompleted {
    pub rental_id: String,
    pub beneficiary_id: String,
    pub service_id: Option<String>,
    pub amount: Money,
    pub currency: Currency,
    pub duration_hours: Option<Decimal>,
    pub rate_override: Option<CommissionRate>,
    pub completed_at: DateTime<Utc>,
}
