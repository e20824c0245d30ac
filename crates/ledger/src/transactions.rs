//! Ledger entries.
//!
//! A `LedgerEntry` is an immutable record of one monetary movement for a
//! `(user, currency)` pair. Only `status` may change after insert, and only
//! out of `pending`.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    Currency, LedgerError, Money, ResultLedger, TxMetadata,
    util::{model_currency, parse_uuid},
};

/// Taxonomy of monetary movements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Payment,
    Credit,
    Charge,
    Debit,
    Refund,
    PackagePurchase,
    PackageRefund,
    BookingCharge,
    BookingDeletedRefund,
    ServicePayment,
    RentalPayment,
    RentalCharge,
    BookingRestoreAdjustment,
    CommissionPayout,
    CommissionReversal,
    ManualAdjustment,
}

impl TransactionType {
    pub const ALL: [TransactionType; 16] = [
        Self::Payment,
        Self::Credit,
        Self::Charge,
        Self::Debit,
        Self::Refund,
        Self::PackagePurchase,
        Self::PackageRefund,
        Self::BookingCharge,
        Self::BookingDeletedRefund,
        Self::ServicePayment,
        Self::RentalPayment,
        Self::RentalCharge,
        Self::BookingRestoreAdjustment,
        Self::CommissionPayout,
        Self::CommissionReversal,
        Self::ManualAdjustment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Credit => "credit",
            Self::Charge => "charge",
            Self::Debit => "debit",
            Self::Refund => "refund",
            Self::PackagePurchase => "package_purchase",
            Self::PackageRefund => "package_refund",
            Self::BookingCharge => "booking_charge",
            Self::BookingDeletedRefund => "booking_deleted_refund",
            Self::ServicePayment => "service_payment",
            Self::RentalPayment => "rental_payment",
            Self::RentalCharge => "rental_charge",
            Self::BookingRestoreAdjustment => "booking_restore_adjustment",
            Self::CommissionPayout => "commission_payout",
            Self::CommissionReversal => "commission_reversal",
            Self::ManualAdjustment => "manual_adjustment",
        }
    }
}

impl TryFrom<&str> for TransactionType {
    type Error = LedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| LedgerError::InvalidType(format!("unknown transaction type: {value}")))
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Carries the sign of a recorded amount; amounts themselves are always > 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub(crate) fn apply(self, amount: Money) -> Money {
        match self {
            Self::Credit => amount,
            Self::Debit => -amount,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    #[default]
    Completed,
    Failed,
    Cancelled,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// `pending` is the only non-terminal status.
    pub fn can_transition_to(self, next: EntryStatus) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::Completed | Self::Failed | Self::Cancelled
            )
        )
    }
}

impl TryFrom<&str> for EntryStatus {
    type Error = LedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(LedgerError::InvalidStatus(format!(
                "invalid entry status: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: String,
    pub currency: Currency,
    /// Signed amount: credits positive, debits negative.
    pub amount: Money,
    pub transaction_type: TransactionType,
    pub status: EntryStatus,
    pub idempotency_key: Option<String>,
    pub reference_number: Option<String>,
    pub metadata: TxMetadata,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "wallet_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: String,
    pub currency: String,
    pub amount_minor: i64,
    pub transaction_type: String,
    pub status: String,
    pub idempotency_key: Option<String>,
    pub reference_number: Option<String>,
    pub metadata: Option<String>,
    pub created_at: DateTimeUtc,
    pub created_by: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl LedgerEntry {
    pub(crate) fn to_active_model(&self) -> ResultLedger<ActiveModel> {
        Ok(ActiveModel {
            id: ActiveValue::Set(self.id.to_string()),
            user_id: ActiveValue::Set(self.user_id.clone()),
            currency: ActiveValue::Set(self.currency.code().to_string()),
            amount_minor: ActiveValue::Set(self.amount.minor()),
            transaction_type: ActiveValue::Set(self.transaction_type.as_str().to_string()),
            status: ActiveValue::Set(self.status.as_str().to_string()),
            idempotency_key: ActiveValue::Set(self.idempotency_key.clone()),
            reference_number: ActiveValue::Set(self.reference_number.clone()),
            metadata: ActiveValue::Set(self.metadata.to_json()?),
            created_at: ActiveValue::Set(self.created_at),
            created_by: ActiveValue::Set(self.created_by.clone()),
        })
    }
}

impl TryFrom<Model> for LedgerEntry {
    type Error = LedgerError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "transaction")?,
            currency: model_currency(&model.currency)?,
            amount: Money::new(model.amount_minor),
            transaction_type: TransactionType::try_from(model.transaction_type.as_str())?,
            status: EntryStatus::try_from(model.status.as_str())?,
            metadata: TxMetadata::from_json(model.metadata.as_deref()),
            user_id: model.user_id,
            idempotency_key: model.idempotency_key,
            reference_number: model.reference_number,
            created_at: model.created_at,
            created_by: model.created_by,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_strings_round_trip() {
        for kind in TransactionType::ALL {
            assert_eq!(TransactionType::try_from(kind.as_str()).unwrap(), kind);
        }
        assert!(TransactionType::try_from("bonus").is_err());
    }

    #[test]
    fn only_pending_transitions() {
        assert!(EntryStatus::Pending.can_transition_to(EntryStatus::Completed));
        assert!(EntryStatus::Pending.can_transition_to(EntryStatus::Failed));
        assert!(!EntryStatus::Completed.can_transition_to(EntryStatus::Cancelled));
        assert!(!EntryStatus::Failed.can_transition_to(EntryStatus::Completed));
        assert!(!EntryStatus::Pending.can_transition_to(EntryStatus::Pending));
    }

    #[test]
    fn direction_carries_sign() {
        assert_eq!(Direction::Credit.apply(Money::new(500)), Money::new(500));
        assert_eq!(Direction::Debit.apply(Money::new(500)), Money::new(-500));
    }
}
