use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, sea_query::OnConflict,
};
use serde::{Deserialize, Serialize};

use crate::{
    AccountPolicy, AggregateSnapshot, BalanceAudit, Currency, EntryStatus, LedgerEntry,
    LedgerError, LedgerLine, ResultLedger, WalletBalance, accounts, audits, balances,
    compute_aggregates, transactions,
    util::normalize_required,
};

use super::{Ledger, with_tx};

/// Read model of one `(user, currency)` account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOverview {
    /// Cached row (zero snapshot when the user has no activity yet).
    pub balance: WalletBalance,
    /// Derived from the completed ledger, independent of the cache.
    pub aggregates: AggregateSnapshot,
    /// `true` when the cache matches the derived balance within tolerance.
    pub in_sync: bool,
}

impl Ledger {
    /// Cached balance for `(user_id, currency)`, or a zero snapshot.
    pub async fn balance(&self, user_id: &str, currency: Currency) -> ResultLedger<WalletBalance> {
        let user_id = normalize_required(user_id, "user_id")?;
        let model = balances::Entity::find_by_id((user_id.clone(), currency.code().to_string()))
            .one(self.reader()?)
            .await
            .map_err(|err| LedgerError::db(format!("balance user={user_id}"), err))?;
        match model {
            Some(model) => WalletBalance::try_from(model),
            None => Ok(WalletBalance::empty(user_id, currency, Utc::now())),
        }
    }

    /// Ledger entries in insertion order, optionally restricted to one status.
    pub async fn ledger_entries(
        &self,
        user_id: &str,
        currency: Currency,
        status: Option<EntryStatus>,
    ) -> ResultLedger<Vec<LedgerEntry>> {
        let user_id = normalize_required(user_id, "user_id")?;
        load_entries(self.reader()?, &user_id, currency, status).await
    }

    /// Cached balance next to the aggregates derived from the ledger.
    pub async fn account_overview(
        &self,
        user_id: &str,
        currency: Currency,
    ) -> ResultLedger<AccountOverview> {
        let balance = self.balance(user_id, currency).await?;
        let entries = load_entries(
            self.reader()?,
            &balance.user_id,
            currency,
            Some(EntryStatus::Completed),
        )
        .await?;
        let lines: Vec<LedgerLine> = entries.iter().map(LedgerLine::from).collect();
        let aggregates = compute_aggregates(&lines);
        let drift = (balance.available - aggregates.balance).abs();
        Ok(AccountOverview {
            in_sync: drift.minor() <= self.config.drift_tolerance_minor,
            balance,
            aggregates,
        })
    }

    /// Audit trail of a user, oldest first.
    pub async fn balance_audits(&self, user_id: &str) -> ResultLedger<Vec<BalanceAudit>> {
        let user_id = normalize_required(user_id, "user_id")?;
        audits::Entity::find()
            .filter(audits::Column::UserId.eq(user_id.as_str()))
            .order_by_asc(audits::Column::CreatedAt)
            .order_by_asc(audits::Column::Id)
            .all(self.reader()?)
            .await
            .map_err(|err| LedgerError::db(format!("balance_audits user={user_id}"), err))?
            .into_iter()
            .map(BalanceAudit::try_from)
            .collect()
    }

    /// Per-account overdraft and multi-currency flags.
    pub async fn account_policy(&self, user_id: &str) -> ResultLedger<AccountPolicy> {
        let user_id = normalize_required(user_id, "user_id")?;
        load_policy(self.reader()?, &user_id).await
    }

    pub async fn set_account_policy(
        &self,
        user_id: &str,
        policy: AccountPolicy,
    ) -> ResultLedger<AccountPolicy> {
        let user_id = normalize_required(user_id, "user_id")?;
        with_tx!(self, "set_account_policy", |db_tx| {
            accounts::Entity::insert(accounts::active_model(&user_id, policy, Utc::now()))
                .on_conflict(
                    OnConflict::column(accounts::Column::UserId)
                        .update_columns([
                            accounts::Column::AllowOverdraft,
                            accounts::Column::MultiCurrency,
                            accounts::Column::UpdatedAt,
                        ])
                        .to_owned(),
                )
                .exec_without_returning(&*db_tx)
                .await
                .map_err(|err| LedgerError::db(format!("set_account_policy user={user_id}"), err))?;
            tracing::info!(
                user_id = %user_id,
                allow_overdraft = policy.allow_overdraft,
                multi_currency = policy.multi_currency,
                "account policy updated"
            );
            Ok(policy)
        })
    }

    /// Takes the row lock on `(user_id, currency)`, creating a zero row if
    /// absent, and returns the locked row.
    ///
    /// The insert comes first: on SQLite it takes the database write lock,
    /// elsewhere it guarantees `FOR UPDATE` has a row to lock.
    pub(super) async fn lock_balance(
        &self,
        db_tx: &DatabaseTransaction,
        user_id: &str,
        currency: Currency,
        now: DateTime<Utc>,
    ) -> ResultLedger<WalletBalance> {
        let context = || format!("lock balance user={user_id} currency={currency}");
        let empty = WalletBalance::empty(user_id, currency, now);
        balances::Entity::insert(balances::ActiveModel::from(&empty))
            .on_conflict(
                OnConflict::columns([balances::Column::UserId, balances::Column::Currency])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(db_tx)
            .await
            .map_err(|err| LedgerError::db(context(), err))?;

        let model = balances::Entity::find_by_id((user_id.to_string(), currency.code().to_string()))
            .lock_exclusive()
            .one(db_tx)
            .await
            .map_err(|err| LedgerError::db(context(), err))?
            .ok_or_else(|| LedgerError::KeyNotFound(format!("balance {user_id}/{currency}")))?;
        WalletBalance::try_from(model)
    }

    pub(super) async fn save_balance(
        &self,
        db_tx: &DatabaseTransaction,
        balance: &WalletBalance,
    ) -> ResultLedger<()> {
        balances::ActiveModel::from(balance)
            .update(db_tx)
            .await
            .map_err(|err| {
                LedgerError::db(
                    format!("save balance user={} currency={}", balance.user_id, balance.currency),
                    err,
                )
            })?;
        Ok(())
    }

    pub(super) async fn write_audit(
        &self,
        db_tx: &DatabaseTransaction,
        audit: &BalanceAudit,
    ) -> ResultLedger<()> {
        audits::ActiveModel::from(audit)
            .insert(db_tx)
            .await
            .map_err(|err| LedgerError::db(format!("audit user={}", audit.user_id), err))?;
        Ok(())
    }

    /// Rejects `currency` when a single-currency account already holds a
    /// nonzero balance in another one.
    pub(super) async fn ensure_currency_allowed(
        &self,
        db_tx: &DatabaseTransaction,
        user_id: &str,
        currency: Currency,
        policy: AccountPolicy,
    ) -> ResultLedger<()> {
        if policy.multi_currency {
            return Ok(());
        }
        let other = balances::Entity::find()
            .filter(balances::Column::UserId.eq(user_id))
            .filter(balances::Column::Currency.ne(currency.code()))
            .filter(
                balances::Column::AvailableMinor
                    .ne(0)
                    .or(balances::Column::PendingMinor.ne(0)),
            )
            .one(db_tx)
            .await
            .map_err(|err| LedgerError::db(format!("currency check user={user_id}"), err))?;
        match other {
            Some(row) => Err(LedgerError::CurrencyMismatch(format!(
                "account holds a {} balance, got {currency}",
                row.currency
            ))),
            None => Ok(()),
        }
    }
}

pub(super) async fn load_policy<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
) -> ResultLedger<AccountPolicy> {
    let model = accounts::Entity::find_by_id(user_id.to_string())
        .one(db)
        .await
        .map_err(|err| LedgerError::db(format!("account policy user={user_id}"), err))?;
    Ok(model.map(AccountPolicy::from).unwrap_or_default())
}

pub(super) async fn load_entries<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
    currency: Currency,
    status: Option<EntryStatus>,
) -> ResultLedger<Vec<LedgerEntry>> {
    let mut query = transactions::Entity::find()
        .filter(transactions::Column::UserId.eq(user_id))
        .filter(transactions::Column::Currency.eq(currency.code()));
    if let Some(status) = status {
        query = query.filter(transactions::Column::Status.eq(status.as_str()));
    }
    let models = query
        .order_by_asc(transactions::Column::CreatedAt)
        .order_by_asc(transactions::Column::Id)
        .all(db)
        .await
        .map_err(|err| LedgerError::db(format!("ledger entries user={user_id}"), err))?;
    models.into_iter().map(LedgerEntry::try_from).collect()
}
