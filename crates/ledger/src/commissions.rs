//! Commission primitives.
//!
//! A `Commission` is a computed-once entitlement of a beneficiary
//! (instructor, manager) tied to one completed booking or rental. At most one
//! non-cancelled commission exists per `(source_type, source_id)`; voiding
//! the source moves the row to `cancelled`, it is never deleted.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    Currency, LedgerError, Money, ResultLedger,
    util::{model_currency, parse_uuid},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Booking,
    Rental,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Booking => "booking",
            Self::Rental => "rental",
        }
    }
}

impl TryFrom<&str> for SourceType {
    type Error = LedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "booking" => Ok(Self::Booking),
            "rental" => Ok(Self::Rental),
            other => Err(LedgerError::InvalidType(format!(
                "invalid commission source: {other}"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateType {
    /// Amount in the canonical currency per hour of service (flat when the
    /// source has no duration).
    Fixed,
    /// Percentage of the source amount, `0..=100`.
    Percentage,
}

impl RateType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Percentage => "percentage",
        }
    }
}

impl TryFrom<&str> for RateType {
    type Error = LedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "fixed" => Ok(Self::Fixed),
            "percentage" => Ok(Self::Percentage),
            other => Err(LedgerError::InvalidRate(format!("invalid rate type: {other}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRate {
    pub rate_type: RateType,
    pub value: Decimal,
}

impl CommissionRate {
    pub fn percentage(value: Decimal) -> ResultLedger<Self> {
        Self::new(RateType::Percentage, value)
    }

    pub fn fixed(value: Decimal) -> ResultLedger<Self> {
        Self::new(RateType::Fixed, value)
    }

    pub fn new(rate_type: RateType, value: Decimal) -> ResultLedger<Self> {
        let rate = Self { rate_type, value };
        rate.validate()?;
        Ok(rate)
    }

    pub fn validate(&self) -> ResultLedger<()> {
        if self.value.is_sign_negative() {
            return Err(LedgerError::InvalidRate("rate must be >= 0".to_string()));
        }
        if self.rate_type == RateType::Percentage && self.value > Decimal::ONE_HUNDRED {
            return Err(LedgerError::InvalidRate(
                "percentage rate must be <= 100".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies the rate at full precision; the caller rounds once.
    pub fn apply(&self, amount: Decimal, hours: Option<Decimal>) -> ResultLedger<Decimal> {
        let computed = match self.rate_type {
            RateType::Percentage => amount
                .checked_mul(self.value)
                .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED)),
            RateType::Fixed => match hours {
                Some(hours) if hours > Decimal::ZERO => self.value.checked_mul(hours),
                _ => Some(self.value),
            },
        };
        computed.ok_or_else(|| LedgerError::InvalidAmount("commission amount overflow".to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Pending,
    Paid,
    Cancelled,
}

impl CommissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }
}

impl TryFrom<&str> for CommissionStatus {
    type Error = LedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(LedgerError::InvalidStatus(format!(
                "invalid commission status: {other}"
            ))),
        }
    }
}

/// Which step of the rate resolution produced the applied rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    SourceOverride,
    ServiceOverride,
    BeneficiaryDefault,
    SystemDefault,
}

impl RateSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SourceOverride => "source_override",
            Self::ServiceOverride => "service_override",
            Self::BeneficiaryDefault => "beneficiary_default",
            Self::SystemDefault => "system_default",
        }
    }
}

impl TryFrom<&str> for RateSource {
    type Error = LedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "source_override" => Ok(Self::SourceOverride),
            "service_override" => Ok(Self::ServiceOverride),
            "beneficiary_default" => Ok(Self::BeneficiaryDefault),
            "system_default" => Ok(Self::SystemDefault),
            other => Err(LedgerError::InvalidRate(format!("invalid rate source: {other}"))),
        }
    }
}

/// Reporting period of a commission: `YYYY-MM` of the completion date.
pub fn period_of(at: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", at.year(), at.month())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Commission {
    pub id: Uuid,
    pub beneficiary_id: String,
    pub source_type: SourceType,
    pub source_id: String,
    pub source_amount: Money,
    pub source_currency: Currency,
    pub rate: CommissionRate,
    pub rate_source: RateSource,
    pub computed_amount: Money,
    /// Canonical reporting currency, or the source currency when conversion
    /// was unavailable.
    pub computed_currency: Currency,
    pub period: String,
    pub status: CommissionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "commissions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub beneficiary_id: String,
    pub source_type: String,
    pub source_id: String,
    pub source_amount_minor: i64,
    pub source_currency: String,
    pub rate: String,
    pub rate_type: String,
    pub rate_source: String,
    pub computed_amount_minor: i64,
    pub computed_currency: String,
    pub period: String,
    pub status: String,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Commission> for ActiveModel {
    fn from(value: &Commission) -> Self {
        Self {
            id: ActiveValue::Set(value.id.to_string()),
            beneficiary_id: ActiveValue::Set(value.beneficiary_id.clone()),
            source_type: ActiveValue::Set(value.source_type.as_str().to_string()),
            source_id: ActiveValue::Set(value.source_id.clone()),
            source_amount_minor: ActiveValue::Set(value.source_amount.minor()),
            source_currency: ActiveValue::Set(value.source_currency.code().to_string()),
            rate: ActiveValue::Set(value.rate.value.to_string()),
            rate_type: ActiveValue::Set(value.rate.rate_type.as_str().to_string()),
            rate_source: ActiveValue::Set(value.rate_source.as_str().to_string()),
            computed_amount_minor: ActiveValue::Set(value.computed_amount.minor()),
            computed_currency: ActiveValue::Set(value.computed_currency.code().to_string()),
            period: ActiveValue::Set(value.period.clone()),
            status: ActiveValue::Set(value.status.as_str().to_string()),
            created_at: ActiveValue::Set(value.created_at),
            updated_at: ActiveValue::Set(value.updated_at),
        }
    }
}

impl TryFrom<Model> for Commission {
    type Error = LedgerError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let value = Decimal::from_str(&model.rate)
            .map_err(|_| LedgerError::InvalidRate(format!("invalid stored rate: {}", model.rate)))?;
        Ok(Self {
            id: parse_uuid(&model.id, "commission")?,
            source_type: SourceType::try_from(model.source_type.as_str())?,
            source_amount: Money::new(model.source_amount_minor),
            source_currency: model_currency(&model.source_currency)?,
            rate: CommissionRate {
                rate_type: RateType::try_from(model.rate_type.as_str())?,
                value,
            },
            rate_source: RateSource::try_from(model.rate_source.as_str())?,
            computed_amount: Money::new(model.computed_amount_minor),
            computed_currency: model_currency(&model.computed_currency)?,
            status: CommissionStatus::try_from(model.status.as_str())?,
            beneficiary_id: model.beneficiary_id,
            source_id: model.source_id,
            period: model.period,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}
