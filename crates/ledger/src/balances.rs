//! The module contains the `WalletBalance` cache row and its entity.
//!
//! One row per `(user_id, currency)`. Only the recorder and the
//! reconciliation service write it, always under the row lock.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};

use crate::{
    AggregateSnapshot, Currency, LedgerError, Money, RunningTotals, util::model_currency,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub user_id: String,
    pub currency: Currency,
    pub available: Money,
    pub pending: Money,
    /// Part of `available` that cannot be withdrawn (promotional credit).
    pub non_withdrawable: Money,
    pub total_credits: Money,
    pub total_debits: Money,
    pub total_spent: Money,
    pub last_payment_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl WalletBalance {
    /// Zero snapshot used for users without a cache row yet.
    pub fn empty(user_id: impl Into<String>, currency: Currency, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            currency,
            available: Money::ZERO,
            pending: Money::ZERO,
            non_withdrawable: Money::ZERO,
            total_credits: Money::ZERO,
            total_debits: Money::ZERO,
            total_spent: Money::ZERO,
            last_payment_at: None,
            updated_at: now,
        }
    }

    /// `available` minus the non-withdrawable portion, never negative.
    pub fn withdrawable(&self) -> Money {
        let free = self.available - self.non_withdrawable;
        if free.is_negative() { Money::ZERO } else { free }
    }

    pub fn is_zero(&self) -> bool {
        self.available.is_zero() && self.pending.is_zero()
    }

    /// Class sums carried by the row: `total_spent` holds payments,
    /// `total_credits` payments plus refunds, `total_debits` charges.
    pub(crate) fn running_totals(&self) -> RunningTotals {
        let payments = i128::from(self.total_spent.minor());
        RunningTotals {
            payments,
            charges: i128::from(self.total_debits.minor()),
            refunds: i128::from(self.total_credits.minor()) - payments,
            last_payment_at: self.last_payment_at,
        }
    }

    /// Overwrites the completed-side fields with a calculator snapshot.
    pub(crate) fn apply_snapshot(&mut self, snapshot: &AggregateSnapshot) {
        self.available = snapshot.balance;
        self.total_spent = snapshot.total_spent;
        self.total_credits = snapshot.payments + snapshot.refunds;
        self.total_debits = snapshot.charges;
        self.last_payment_at = snapshot.last_payment_at;
        self.clamp_non_withdrawable();
    }

    /// Keeps `0 <= non_withdrawable <= max(available, 0)`.
    pub(crate) fn clamp_non_withdrawable(&mut self) {
        let ceiling = if self.available.is_negative() {
            Money::ZERO
        } else {
            self.available
        };
        if self.non_withdrawable > ceiling {
            self.non_withdrawable = ceiling;
        }
        if self.non_withdrawable.is_negative() {
            self.non_withdrawable = Money::ZERO;
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "wallet_balances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub currency: String,
    pub available_minor: i64,
    pub pending_minor: i64,
    pub non_withdrawable_minor: i64,
    pub total_credits_minor: i64,
    pub total_debits_minor: i64,
    pub total_spent_minor: i64,
    pub last_payment_at: Option<DateTimeUtc>,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&WalletBalance> for ActiveModel {
    fn from(value: &WalletBalance) -> Self {
        Self {
            user_id: ActiveValue::Set(value.user_id.clone()),
            currency: ActiveValue::Set(value.currency.code().to_string()),
            available_minor: ActiveValue::Set(value.available.minor()),
            pending_minor: ActiveValue::Set(value.pending.minor()),
            non_withdrawable_minor: ActiveValue::Set(value.non_withdrawable.minor()),
            total_credits_minor: ActiveValue::Set(value.total_credits.minor()),
            total_debits_minor: ActiveValue::Set(value.total_debits.minor()),
            total_spent_minor: ActiveValue::Set(value.total_spent.minor()),
            last_payment_at: ActiveValue::Set(value.last_payment_at),
            updated_at: ActiveValue::Set(value.updated_at),
        }
    }
}

impl TryFrom<Model> for WalletBalance {
    type Error = LedgerError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            currency: model_currency(&model.currency)?,
            user_id: model.user_id,
            available: Money::new(model.available_minor),
            pending: Money::new(model.pending_minor),
            non_withdrawable: Money::new(model.non_withdrawable_minor),
            total_credits: Money::new(model.total_credits_minor),
            total_debits: Money::new(model.total_debits_minor),
            total_spent: Money::new(model.total_spent_minor),
            last_payment_at: model.last_payment_at,
            updated_at: model.updated_at,
        })
    }
}
