//! Balance audit trail.
//!
//! One row per recorder mutation (when enabled) and per reconciliation
//! correction, written in the same database transaction as the change.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    Currency, LedgerError, Money,
    util::{model_currency, parse_uuid},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditReason {
    Mutation,
    Settlement,
    Reconciliation,
}

impl AuditReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mutation => "mutation",
            Self::Settlement => "settlement",
            Self::Reconciliation => "reconciliation",
        }
    }
}

impl TryFrom<&str> for AuditReason {
    type Error = LedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "mutation" => Ok(Self::Mutation),
            "settlement" => Ok(Self::Settlement),
            "reconciliation" => Ok(Self::Reconciliation),
            other => Err(LedgerError::InvalidStatus(format!(
                "invalid audit reason: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAudit {
    pub id: Uuid,
    pub user_id: String,
    pub currency: Currency,
    pub previous_balance: Money,
    pub new_balance: Money,
    pub diff: Money,
    pub reason: AuditReason,
    pub triggered_by: String,
    pub transaction_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl BalanceAudit {
    pub(crate) fn new(
        user_id: &str,
        currency: Currency,
        previous_balance: Money,
        new_balance: Money,
        reason: AuditReason,
        triggered_by: impl Into<String>,
        transaction_id: Option<Uuid>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            currency,
            previous_balance,
            new_balance,
            diff: new_balance - previous_balance,
            reason,
            triggered_by: triggered_by.into(),
            transaction_id,
            created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "balance_audits")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: String,
    pub currency: String,
    pub previous_balance_minor: i64,
    pub new_balance_minor: i64,
    pub diff_minor: i64,
    pub reason: String,
    pub triggered_by: String,
    pub transaction_id: Option<String>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&BalanceAudit> for ActiveModel {
    fn from(value: &BalanceAudit) -> Self {
        Self {
            id: ActiveValue::Set(value.id.to_string()),
            user_id: ActiveValue::Set(value.user_id.clone()),
            currency: ActiveValue::Set(value.currency.code().to_string()),
            previous_balance_minor: ActiveValue::Set(value.previous_balance.minor()),
            new_balance_minor: ActiveValue::Set(value.new_balance.minor()),
            diff_minor: ActiveValue::Set(value.diff.minor()),
            reason: ActiveValue::Set(value.reason.as_str().to_string()),
            triggered_by: ActiveValue::Set(value.triggered_by.clone()),
            transaction_id: ActiveValue::Set(value.transaction_id.map(|id| id.to_string())),
            created_at: ActiveValue::Set(value.created_at),
        }
    }
}

impl TryFrom<Model> for BalanceAudit {
    type Error = LedgerError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "audit")?,
            currency: model_currency(&model.currency)?,
            previous_balance: Money::new(model.previous_balance_minor),
            new_balance: Money::new(model.new_balance_minor),
            diff: Money::new(model.diff_minor),
            reason: AuditReason::try_from(model.reason.as_str())?,
            transaction_id: model
                .transaction_id
                .as_deref()
                .map(|id| parse_uuid(id, "transaction"))
                .transpose()?,
            user_id: model.user_id,
            triggered_by: model.triggered_by,
            created_at: model.created_at,
        })
    }
}
