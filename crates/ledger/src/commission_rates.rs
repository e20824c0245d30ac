//! Stored commission rate overrides.
//!
//! A row with `service_id = NULL` is the beneficiary's default; a row with a
//! service id overrides it for that service only.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};

use crate::{CommissionRate, LedgerError, RateType};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateOverride {
    pub beneficiary_id: String,
    pub service_id: Option<String>,
    pub rate: CommissionRate,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "commission_rates")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub beneficiary_id: String,
    pub service_id: Option<String>,
    pub rate_type: String,
    pub rate: String,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Row id derived from the override scope, so an upsert replaces the
/// previous value for the same `(beneficiary, service)`.
pub(crate) fn scope_id(beneficiary_id: &str, service_id: Option<&str>) -> String {
    match service_id {
        Some(service) => format!("{beneficiary_id}/{service}"),
        None => format!("{beneficiary_id}/*"),
    }
}

pub(crate) fn active_model(value: &RateOverride, now: DateTime<Utc>) -> ActiveModel {
    ActiveModel {
        id: ActiveValue::Set(scope_id(&value.beneficiary_id, value.service_id.as_deref())),
        beneficiary_id: ActiveValue::Set(value.beneficiary_id.clone()),
        service_id: ActiveValue::Set(value.service_id.clone()),
        rate_type: ActiveValue::Set(value.rate.rate_type.as_str().to_string()),
        rate: ActiveValue::Set(value.rate.value.to_string()),
        updated_at: ActiveValue::Set(now),
    }
}

impl TryFrom<Model> for RateOverride {
    type Error = LedgerError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let value = Decimal::from_str(&model.rate)
            .map_err(|_| LedgerError::InvalidRate(format!("invalid stored rate: {}", model.rate)))?;
        Ok(Self {
            rate: CommissionRate::new(RateType::try_from(model.rate_type.as_str())?, value)?,
            beneficiary_id: model.beneficiary_id,
            service_id: model.service_id,
        })
    }
}
