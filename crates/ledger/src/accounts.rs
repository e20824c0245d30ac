//! Per-account wallet policy.
//!
//! Whether an account may go negative, and whether it may hold balances in
//! more than one currency, is configuration of that account. Accounts
//! without a row get [`AccountPolicy::default`].

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPolicy {
    pub allow_overdraft: bool,
    pub multi_currency: bool,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "wallet_accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,
    pub allow_overdraft: bool,
    pub multi_currency: bool,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for AccountPolicy {
    fn from(model: Model) -> Self {
        Self {
            allow_overdraft: model.allow_overdraft,
            multi_currency: model.multi_currency,
        }
    }
}

pub(crate) fn active_model(user_id: &str, policy: AccountPolicy, now: DateTime<Utc>) -> ActiveModel {
    ActiveModel {
        user_id: ActiveValue::Set(user_id.to_string()),
        allow_overdraft: ActiveValue::Set(policy.allow_overdraft),
        multi_currency: ActiveValue::Set(policy.multi_currency),
        updated_at: ActiveValue::Set(now),
    }
}
