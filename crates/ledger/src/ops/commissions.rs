//! Commission engine.
//!
//! A completed booking or rental yields at most one non-cancelled
//! commission. Rate lookups and currency conversion happen before the
//! database transaction; the existence check and insert happen inside it,
//! backed by a partial unique index on `(source_type, source_id)`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    QueryOrder, sea_query::OnConflict,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    BookingCompleted, Commission, CommissionRate, CommissionStatus, Currency, LedgerError, Money,
    PackageUsage, RateOverride, RateSource, RecordTransactionCmd, RentalCompleted, ResultLedger,
    RateType, SourceType, TransactionType, TxMetadata, commission_rates, commissions, period_of,
    util::{normalize_optional_text, normalize_required},
};

use super::{Ledger, with_tx};

const ENGINE_ACTOR: &str = "commission-engine";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "commission", rename_all = "snake_case")]
pub enum CommissionOutcome {
    Created(Commission),
    /// A non-cancelled commission already existed for the source.
    AlreadyRecorded(Commission),
}

impl CommissionOutcome {
    pub fn commission(&self) -> &Commission {
        match self {
            Self::Created(c) | Self::AlreadyRecorded(c) => c,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionTotals {
    pub pending: Money,
    pub paid: Money,
    pub count: usize,
    pub cancelled: usize,
}

/// Per-currency totals of one beneficiary, optionally for one period.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionSummary {
    pub beneficiary_id: String,
    pub period: Option<String>,
    pub totals: BTreeMap<Currency, CommissionTotals>,
}

/// Normalized completion event.
struct CommissionSource {
    source_type: SourceType,
    source_id: String,
    beneficiary_id: String,
    service_id: Option<String>,
    /// Billable amount at full precision; pro-rated slices are not rounded
    /// before the rate is applied.
    amount: Decimal,
    currency: Currency,
    hours: Option<Decimal>,
    rate_override: Option<CommissionRate>,
    completed_at: DateTime<Utc>,
}

impl Ledger {
    pub async fn record_booking_commission(
        &self,
        event: BookingCompleted,
    ) -> ResultLedger<CommissionOutcome> {
        let (amount, currency) = booking_billable_amount(&event)?;
        self.record_commission(CommissionSource {
            source_type: SourceType::Booking,
            source_id: event.booking_id,
            beneficiary_id: event.beneficiary_id,
            service_id: event.service_id,
            amount,
            currency,
            hours: event.duration_hours,
            rate_override: event.rate_override,
            completed_at: event.completed_at,
        })
        .await
    }

    pub async fn record_rental_commission(
        &self,
        event: RentalCompleted,
    ) -> ResultLedger<CommissionOutcome> {
        self.record_commission(CommissionSource {
            source_type: SourceType::Rental,
            source_id: event.rental_id,
            beneficiary_id: event.beneficiary_id,
            service_id: event.service_id,
            amount: event.amount.to_decimal(),
            currency: event.currency,
            hours: event.duration_hours,
            rate_override: event.rate_override,
            completed_at: event.completed_at,
        })
        .await
    }

    /// Cancels the live commission of a voided source.
    ///
    /// A paid commission is first reversed on the beneficiary's wallet.
    /// Returns `None` when the source has no live commission.
    pub async fn cancel_commission(
        &self,
        source_type: SourceType,
        source_id: &str,
    ) -> ResultLedger<Option<Commission>> {
        let source_id = normalize_required(source_id, "source_id")?;
        with_tx!(self, "cancel_commission", |db_tx| {
            let Some(mut commission) = find_live(&*db_tx, source_type, &source_id).await? else {
                return Ok(None);
            };
            if commission.status == CommissionStatus::Paid && commission.computed_amount.is_positive()
            {
                let reversal = RecordTransactionCmd::debit(
                    commission.beneficiary_id.clone(),
                    commission.computed_amount,
                    commission.computed_currency,
                    TransactionType::CommissionReversal,
                )
                .idempotency_key(format!("commission-reversal:{}", commission.id))
                .metadata(TxMetadata::Commission {
                    commission_id: commission.id.to_string(),
                })
                .created_by(ENGINE_ACTOR);
                self.record_in_tx(&db_tx, reversal).await?;
            }
            commission.status = CommissionStatus::Cancelled;
            commission.updated_at = Utc::now();
            update_status(&db_tx, &commission).await?;
            tracing::info!(
                commission_id = %commission.id,
                source_type = source_type.as_str(),
                source_id = %source_id,
                beneficiary_id = %commission.beneficiary_id,
                "commission cancelled"
            );
            Ok(Some(commission))
        })
    }

    /// Pays a pending commission into the beneficiary's wallet.
    pub async fn mark_commission_paid(&self, commission_id: Uuid) -> ResultLedger<Commission> {
        with_tx!(self, "mark_commission_paid", |db_tx| {
            let model = commissions::Entity::find_by_id(commission_id.to_string())
                .one(&*db_tx)
                .await
                .map_err(|err| {
                    LedgerError::db(format!("mark_commission_paid id={commission_id}"), err)
                })?
                .ok_or_else(|| LedgerError::KeyNotFound(format!("commission {commission_id}")))?;
            let mut commission = Commission::try_from(model)?;
            match commission.status {
                CommissionStatus::Paid => return Ok(commission),
                CommissionStatus::Cancelled => {
                    return Err(LedgerError::InvalidStatus(format!(
                        "commission {commission_id} is cancelled"
                    )));
                }
                CommissionStatus::Pending => {}
            }
            if commission.computed_amount.is_positive() {
                let payout = RecordTransactionCmd::credit(
                    commission.beneficiary_id.clone(),
                    commission.computed_amount,
                    commission.computed_currency,
                    TransactionType::CommissionPayout,
                )
                .idempotency_key(format!("commission-payout:{}", commission.id))
                .metadata(TxMetadata::Commission {
                    commission_id: commission.id.to_string(),
                })
                .created_by(ENGINE_ACTOR);
                self.record_in_tx(&db_tx, payout).await?;
            }
            commission.status = CommissionStatus::Paid;
            commission.updated_at = Utc::now();
            update_status(&db_tx, &commission).await?;
            tracing::info!(
                commission_id = %commission.id,
                beneficiary_id = %commission.beneficiary_id,
                amount = %commission.computed_amount,
                currency = %commission.computed_currency,
                "commission paid"
            );
            Ok(commission)
        })
    }

    /// Stores a beneficiary default (`service_id = None`) or a per-service
    /// override, replacing any previous value for the same scope.
    pub async fn set_commission_rate(&self, value: RateOverride) -> ResultLedger<RateOverride> {
        value.rate.validate()?;
        let value = RateOverride {
            beneficiary_id: normalize_required(&value.beneficiary_id, "beneficiary_id")?,
            service_id: normalize_optional_text(value.service_id.as_deref()),
            rate: value.rate,
        };
        with_tx!(self, "set_commission_rate", |db_tx| {
            commission_rates::Entity::insert(commission_rates::active_model(&value, Utc::now()))
                .on_conflict(
                    OnConflict::column(commission_rates::Column::Id)
                        .update_columns([
                            commission_rates::Column::RateType,
                            commission_rates::Column::Rate,
                            commission_rates::Column::UpdatedAt,
                        ])
                        .to_owned(),
                )
                .exec_without_returning(&*db_tx)
                .await
                .map_err(|err| {
                    LedgerError::db(
                        format!("set_commission_rate beneficiary={}", value.beneficiary_id),
                        err,
                    )
                })?;
            Ok(value.clone())
        })
    }

    /// First match wins: source override, per-service override,
    /// beneficiary default, system default.
    pub async fn resolve_commission_rate(
        &self,
        beneficiary_id: &str,
        service_id: Option<&str>,
        source_override: Option<CommissionRate>,
    ) -> ResultLedger<(CommissionRate, RateSource)> {
        if let Some(rate) = source_override {
            rate.validate()?;
            return Ok((rate, RateSource::SourceOverride));
        }
        if let Some(service_id) = service_id
            && let Some(found) = self.stored_rate(beneficiary_id, Some(service_id)).await?
        {
            return Ok((found.rate, RateSource::ServiceOverride));
        }
        if let Some(found) = self.stored_rate(beneficiary_id, None).await? {
            return Ok((found.rate, RateSource::BeneficiaryDefault));
        }
        Ok((self.commission.default_rate, RateSource::SystemDefault))
    }

    /// Commissions of a beneficiary, oldest first.
    pub async fn commissions_for(
        &self,
        beneficiary_id: &str,
        period: Option<&str>,
    ) -> ResultLedger<Vec<Commission>> {
        let beneficiary_id = normalize_required(beneficiary_id, "beneficiary_id")?;
        let mut query = commissions::Entity::find()
            .filter(commissions::Column::BeneficiaryId.eq(beneficiary_id.as_str()));
        if let Some(period) = period {
            query = query.filter(commissions::Column::Period.eq(period));
        }
        query
            .order_by_asc(commissions::Column::CreatedAt)
            .order_by_asc(commissions::Column::Id)
            .all(self.reader()?)
            .await
            .map_err(|err| {
                LedgerError::db(format!("commissions_for beneficiary={beneficiary_id}"), err)
            })?
            .into_iter()
            .map(Commission::try_from)
            .collect()
    }

    pub async fn commission_summary(
        &self,
        beneficiary_id: &str,
        period: Option<&str>,
    ) -> ResultLedger<CommissionSummary> {
        let rows = self.commissions_for(beneficiary_id, period).await?;
        let mut totals: BTreeMap<Currency, CommissionTotals> = BTreeMap::new();
        for commission in &rows {
            let entry = totals.entry(commission.computed_currency).or_default();
            match commission.status {
                CommissionStatus::Pending => {
                    entry.pending += commission.computed_amount;
                    entry.count += 1;
                }
                CommissionStatus::Paid => {
                    entry.paid += commission.computed_amount;
                    entry.count += 1;
                }
                CommissionStatus::Cancelled => entry.cancelled += 1,
            }
        }
        Ok(CommissionSummary {
            beneficiary_id: beneficiary_id.trim().to_string(),
            period: period.map(ToString::to_string),
            totals,
        })
    }

    async fn stored_rate(
        &self,
        beneficiary_id: &str,
        service_id: Option<&str>,
    ) -> ResultLedger<Option<RateOverride>> {
        let id = commission_rates::scope_id(beneficiary_id, service_id);
        commission_rates::Entity::find_by_id(id)
            .one(self.reader()?)
            .await
            .map_err(|err| {
                LedgerError::db(format!("commission rate beneficiary={beneficiary_id}"), err)
            })?
            .map(RateOverride::try_from)
            .transpose()
    }

    /// Base amount and currency the rate applies to.
    ///
    /// A fixed rate is an amount in the canonical currency and ignores the
    /// source amount. A percentage applies to the source amount converted to
    /// the canonical currency; on conversion failure it keeps the original
    /// amount and currency so bookkeeping is never blocked on rates.
    async fn canonicalize(
        &self,
        source: &CommissionSource,
        rate: &CommissionRate,
    ) -> (Decimal, Currency) {
        let canonical = self.commission.canonical_currency;
        let amount = source.amount;
        if source.currency == canonical || rate.rate_type == RateType::Fixed {
            return (amount, canonical);
        }
        match self.converter.convert(amount, source.currency, canonical).await {
            Ok(converted) => (converted, canonical),
            Err(err) => {
                tracing::warn!(
                    source_type = source.source_type.as_str(),
                    source_id = %source.source_id,
                    from = %source.currency,
                    to = %canonical,
                    error = %err,
                    "currency conversion failed, keeping source currency"
                );
                (amount, source.currency)
            }
        }
    }

    async fn record_commission(&self, source: CommissionSource) -> ResultLedger<CommissionOutcome> {
        let source = CommissionSource {
            source_id: normalize_required(&source.source_id, "source_id")?,
            beneficiary_id: normalize_required(&source.beneficiary_id, "beneficiary_id")?,
            service_id: normalize_optional_text(source.service_id.as_deref()),
            ..source
        };
        if source.amount.is_sign_negative() {
            return Err(LedgerError::InvalidAmount(
                "source amount must be >= 0".to_string(),
            ));
        }
        if let Some(hours) = source.hours
            && hours.is_sign_negative()
        {
            return Err(LedgerError::InvalidAmount("duration must be >= 0".to_string()));
        }

        let (rate, rate_source) = self
            .resolve_commission_rate(
                &source.beneficiary_id,
                source.service_id.as_deref(),
                source.rate_override,
            )
            .await?;
        let (base, computed_currency) = self.canonicalize(&source, &rate).await;
        let computed_amount = Money::from_decimal(rate.apply(base, source.hours)?)?;

        let now = Utc::now();
        let commission = Commission {
            id: Uuid::now_v7(),
            beneficiary_id: source.beneficiary_id.clone(),
            source_type: source.source_type,
            source_id: source.source_id.clone(),
            source_amount: Money::from_decimal(source.amount)?,
            source_currency: source.currency,
            rate,
            rate_source,
            computed_amount,
            computed_currency,
            period: period_of(source.completed_at),
            status: CommissionStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        // Insert first: the conflict on the live-source index decides the
        // race, and on SQLite the write lock is taken by the first statement.
        let outcome = with_tx!(self, "record_commission", |db_tx| {
            let context = || {
                format!(
                    "record_commission source={}/{}",
                    source.source_type.as_str(),
                    source.source_id
                )
            };
            let inserted = commissions::Entity::insert(commissions::ActiveModel::from(&commission))
                .on_conflict(OnConflict::new().do_nothing().to_owned())
                .exec_without_returning(&*db_tx)
                .await
                .map_err(|err| LedgerError::db(context(), err))?;
            if inserted > 0 {
                Ok(CommissionOutcome::Created(commission.clone()))
            } else {
                find_live(&*db_tx, source.source_type, &source.source_id)
                    .await?
                    .map(CommissionOutcome::AlreadyRecorded)
                    .ok_or_else(|| LedgerError::DuplicateIdempotencyKey(commission.id.to_string()))
            }
        })?;

        match &outcome {
            CommissionOutcome::Created(c) => tracing::info!(
                commission_id = %c.id,
                source_type = c.source_type.as_str(),
                source_id = %c.source_id,
                beneficiary_id = %c.beneficiary_id,
                source_amount = %c.source_amount,
                source_currency = %c.source_currency,
                rate_type = c.rate.rate_type.as_str(),
                rate = %c.rate.value,
                rate_source = c.rate_source.as_str(),
                computed_amount = %c.computed_amount,
                computed_currency = %c.computed_currency,
                "commission computed"
            ),
            CommissionOutcome::AlreadyRecorded(c) => tracing::debug!(
                commission_id = %c.id,
                source_type = c.source_type.as_str(),
                source_id = %c.source_id,
                "commission already recorded"
            ),
        }
        Ok(outcome)
    }
}

/// Billable amount of a booking. Package-funded bookings carry no price of
/// their own: they get a pro-rated slice of the package purchase price,
/// falling back to the booking's direct amount when the package data is
/// incomplete.
fn booking_billable_amount(event: &BookingCompleted) -> ResultLedger<(Decimal, Currency)> {
    let slice = match event.package.as_ref() {
        Some(package) => package_slice(package, event.duration_hours)?,
        None => None,
    };
    Ok(slice.unwrap_or_else(|| (event.amount.to_decimal(), event.currency)))
}

fn package_slice(
    package: &PackageUsage,
    hours: Option<Decimal>,
) -> ResultLedger<Option<(Decimal, Currency)>> {
    let price = package.purchase_price.to_decimal();
    let slice = match (package.total_hours, hours) {
        (Some(total), Some(used)) if total > Decimal::ZERO && used > Decimal::ZERO => {
            price.checked_mul(used).and_then(|v| v.checked_div(total))
        }
        _ => match package.total_sessions {
            Some(sessions) if sessions > 0 => price.checked_div(Decimal::from(sessions)),
            _ => return Ok(None),
        },
    };
    let slice = slice
        .ok_or_else(|| LedgerError::InvalidAmount("package slice overflow".to_string()))?;
    Ok(Some((slice, package.currency)))
}

async fn find_live<C: sea_orm::ConnectionTrait>(
    db: &C,
    source_type: SourceType,
    source_id: &str,
) -> ResultLedger<Option<Commission>> {
    commissions::Entity::find()
        .filter(commissions::Column::SourceType.eq(source_type.as_str()))
        .filter(commissions::Column::SourceId.eq(source_id))
        .filter(commissions::Column::Status.ne(CommissionStatus::Cancelled.as_str()))
        .one(db)
        .await
        .map_err(|err| {
            LedgerError::db(
                format!("find commission source={}/{source_id}", source_type.as_str()),
                err,
            )
        })?
        .map(Commission::try_from)
        .transpose()
}

async fn update_status(db_tx: &DatabaseTransaction, commission: &Commission) -> ResultLedger<()> {
    commissions::ActiveModel {
        id: ActiveValue::Set(commission.id.to_string()),
        status: ActiveValue::Set(commission.status.as_str().to_string()),
        updated_at: ActiveValue::Set(commission.updated_at),
        ..Default::default()
    }
    .update(db_tx)
    .await
    .map_err(|err| LedgerError::db(format!("update commission id={}", commission.id), err))?;
    Ok(())
}
