//! Reconciliation service.
//!
//! Recomputes each `(user, currency)` row from the ledger through the
//! calculator and overwrites the cache when it drifted. The corrective write
//! holds the same row lock as the recorder, and the ledger is read under that
//! lock, so a sweep racing a live mutation can never lose an update.

use std::{collections::BTreeSet, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use sea_orm::{ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};

use crate::{
    AuditReason, BalanceAudit, Currency, EntryStatus, LedgerError, LedgerLine, Money,
    ResultLedger, WalletBalance, balances, compute_aggregates, transactions,
    util::normalize_required,
};

use super::{Ledger, balances::load_entries, with_tx};

/// Who asked for a reconciliation; recorded in the audit trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "source")]
pub enum ReconcileTrigger {
    Sweep,
    /// Right after a financial-affecting call, named by the caller.
    Targeted(String),
}

impl ReconcileTrigger {
    pub fn label(&self) -> String {
        match self {
            Self::Sweep => "sweep".to_string(),
            Self::Targeted(source) => format!("targeted:{source}"),
        }
    }
}

/// Result for one currency of one user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyReconciliation {
    pub currency: Currency,
    pub previous_balance: Money,
    pub computed_balance: Money,
    pub corrected: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserReconciliation {
    pub user_id: String,
    pub currencies: Vec<CurrencyReconciliation>,
}

impl UserReconciliation {
    pub fn corrected(&self) -> bool {
        self.currencies.iter().any(|c| c.corrected)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub checked: usize,
    pub corrected: usize,
    pub errored: usize,
    /// The sweep ended early on a stop request.
    pub stopped: bool,
}

/// Cooperative stop flag, checked between users.
#[derive(Clone, Debug)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

/// Sending half of a [`StopSignal`].
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopSignal {
    pub fn new() -> (StopHandle, StopSignal) {
        let (tx, rx) = watch::channel(false);
        (StopHandle { tx }, StopSignal { rx })
    }

    /// A signal nobody can raise.
    pub fn never() -> StopSignal {
        Self::new().1
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once stop is requested; pends forever if it never can be.
    pub async fn stopped(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

impl Ledger {
    /// Reconciles every currency the user has a ledger or cache row in.
    pub async fn reconcile_user(
        &self,
        user_id: &str,
        trigger: ReconcileTrigger,
    ) -> ResultLedger<UserReconciliation> {
        let user_id = normalize_required(user_id, "user_id")?;
        let mut currencies = Vec::new();
        for currency in self.user_currencies(&user_id).await? {
            let outcome = with_tx!(self, "reconcile_user", |db_tx| {
                self.reconcile_currency(&db_tx, &user_id, currency, &trigger)
                    .await
            })?;
            currencies.push(outcome);
        }
        Ok(UserReconciliation {
            user_id,
            currencies,
        })
    }

    /// Reconciles every user with ledger activity since `since`.
    ///
    /// A failing user is logged and counted; the sweep goes on. `stop` is
    /// checked between users, never inside a database transaction.
    pub async fn reconcile_sweep(
        &self,
        since: DateTime<Utc>,
        stop: &StopSignal,
    ) -> ResultLedger<SweepReport> {
        let users: Vec<String> = transactions::Entity::find()
            .select_only()
            .column(transactions::Column::UserId)
            .distinct()
            .filter(transactions::Column::CreatedAt.gte(since))
            .order_by_asc(transactions::Column::UserId)
            .into_tuple()
            .all(self.reader()?)
            .await
            .map_err(|err| LedgerError::db("reconcile_sweep: list users", err))?;

        let mut report = SweepReport::default();
        for user_id in users {
            if stop.is_stopped() || self.is_shutting_down() {
                report.stopped = true;
                break;
            }
            match self.reconcile_user(&user_id, ReconcileTrigger::Sweep).await {
                Ok(outcome) => {
                    report.checked += 1;
                    if outcome.corrected() {
                        report.corrected += 1;
                    }
                }
                Err(LedgerError::ShuttingDown) => {
                    report.stopped = true;
                    break;
                }
                Err(err) => {
                    report.errored += 1;
                    tracing::error!(user_id = %user_id, error = %err, "reconciliation failed");
                }
            }
        }

        tracing::info!(
            checked = report.checked,
            corrected = report.corrected,
            errored = report.errored,
            stopped = report.stopped,
            "reconciliation sweep finished"
        );
        Ok(report)
    }

    async fn user_currencies(&self, user_id: &str) -> ResultLedger<BTreeSet<Currency>> {
        let db = self.reader()?;
        let context = || format!("reconcile_user user={user_id}");
        let mut codes: Vec<String> = transactions::Entity::find()
            .select_only()
            .column(transactions::Column::Currency)
            .distinct()
            .filter(transactions::Column::UserId.eq(user_id))
            .into_tuple()
            .all(db)
            .await
            .map_err(|err| LedgerError::db(context(), err))?;
        let cached: Vec<String> = balances::Entity::find()
            .select_only()
            .column(balances::Column::Currency)
            .filter(balances::Column::UserId.eq(user_id))
            .into_tuple()
            .all(db)
            .await
            .map_err(|err| LedgerError::db(context(), err))?;
        codes.extend(cached);
        codes
            .iter()
            .map(|code| crate::util::model_currency(code))
            .collect()
    }

    async fn reconcile_currency(
        &self,
        db_tx: &DatabaseTransaction,
        user_id: &str,
        currency: Currency,
        trigger: &ReconcileTrigger,
    ) -> ResultLedger<CurrencyReconciliation> {
        let now = Utc::now();
        let mut balance = self.lock_balance(db_tx, user_id, currency, now).await?;
        let entries = load_entries(db_tx, user_id, currency, None).await?;

        let completed: Vec<LedgerLine> = entries
            .iter()
            .filter(|entry| entry.status == EntryStatus::Completed)
            .map(LedgerLine::from)
            .collect();
        let snapshot = compute_aggregates(&completed);
        let pending: Money = entries
            .iter()
            .filter(|entry| entry.status == EntryStatus::Pending)
            .map(|entry| entry.amount)
            .sum();

        let mut expected = balance.clone();
        expected.apply_snapshot(&snapshot);
        expected.pending = pending;

        let previous = balance.available;
        let drift = (previous - snapshot.balance).abs();
        let corrected = drift.minor() > self.config.drift_tolerance_minor
            || !same_derived_fields(&balance, &expected);

        if corrected {
            balance = WalletBalance {
                updated_at: now,
                ..expected
            };
            self.save_balance(db_tx, &balance).await?;
            let audit = BalanceAudit::new(
                user_id,
                currency,
                previous,
                balance.available,
                AuditReason::Reconciliation,
                trigger.label(),
                None,
                now,
            );
            self.write_audit(db_tx, &audit).await?;
            tracing::warn!(
                user_id = %user_id,
                currency = %currency,
                previous_balance = %previous,
                corrected_balance = %balance.available,
                diff = %audit.diff,
                triggered_by = %audit.triggered_by,
                "balance cache corrected"
            );
        }

        Ok(CurrencyReconciliation {
            currency,
            previous_balance: previous,
            computed_balance: snapshot.balance,
            corrected,
        })
    }
}

/// Everything but `available` must match exactly.
fn same_derived_fields(cached: &WalletBalance, expected: &WalletBalance) -> bool {
    cached.pending == expected.pending
        && cached.total_spent == expected.total_spent
        && cached.total_credits == expected.total_credits
        && cached.total_debits == expected.total_debits
        && cached.last_payment_at == expected.last_payment_at
        && cached.non_withdrawable == expected.non_withdrawable
}

/// Shortest accepted sweep period; a zero interval would spin.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Runs [`Ledger::reconcile_sweep`] every `interval` over users active in
/// the last `lookback`, until `stop` is raised or the ledger shuts down.
///
/// Intervals below 10ms are raised to 10ms.
pub fn spawn_periodic_reconciliation(
    ledger: Ledger,
    interval: Duration,
    lookback: Duration,
    mut stop: StopSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let lookback = TimeDelta::from_std(lookback).unwrap_or(TimeDelta::hours(24));
        let mut ticker = tokio::time::interval(interval.max(MIN_SWEEP_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.stopped() => break,
            }
            if ledger.is_shutting_down() {
                break;
            }
            match ledger.reconcile_sweep(Utc::now() - lookback, &stop).await {
                Ok(report) if report.stopped => break,
                Ok(_) => {}
                Err(LedgerError::ShuttingDown) => break,
                Err(err) => tracing::error!(error = %err, "reconciliation sweep failed"),
            }
        }
        tracing::info!("periodic reconciliation stopped");
    })
}
