//! Transaction recorder.
//!
//! Every balance mutation goes through [`Ledger::record_in_tx`] or
//! [`Ledger::settle_in_tx`]: lock the balance row, append or settle exactly
//! one ledger entry, update the row, all inside the caller's database
//! transaction. The lock is released at commit, never held across calls.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, SqlErr,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    AuditReason, BalanceAudit, DepositCmd, Direction, EntryStatus, GatewayCallback,
    GatewayStatus, LedgerEntry, LedgerError, LedgerLine, Money, RecordTransactionCmd,
    ResultLedger, SettleCmd, TransactionType, TxMetadata, WalletBalance, transactions,
    util::{ensure_positive, normalize_optional_text, normalize_required},
};

use super::{Ledger, balances::load_policy, with_tx};

/// Outcome of a recorder call: the entry and the balance right after it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recorded {
    pub transaction: LedgerEntry,
    pub balance: WalletBalance,
    /// `true` when an idempotency key matched and nothing was applied.
    pub replayed: bool,
}

impl Ledger {
    /// Records one monetary movement atomically.
    ///
    /// With an idempotency key, a retry of an already applied call returns
    /// the original entry with `replayed = true`; a retry carrying
    /// `Completed` for an entry still `Pending` settles it once.
    pub async fn record_transaction(&self, cmd: RecordTransactionCmd) -> ResultLedger<Recorded> {
        with_tx!(self, "record_transaction", |db_tx| {
            self.record_in_tx(&db_tx, cmd).await
        })
    }

    /// Moves a pending entry to `completed`, `failed` or `cancelled`.
    pub async fn settle_transaction(&self, cmd: SettleCmd) -> ResultLedger<Recorded> {
        with_tx!(self, "settle_transaction", |db_tx| {
            self.settle_in_tx(&db_tx, cmd.transaction_id, cmd.status, &cmd.settled_by)
                .await
        })
    }

    /// Applies a payment-gateway callback, keyed by the gateway payment id.
    ///
    /// `failed`/`cancelled` settle the pending entry recorded for the same
    /// payment; there is nothing to fail when no entry exists.
    pub async fn record_gateway_callback(&self, callback: GatewayCallback) -> ResultLedger<Recorded> {
        let amount = Money::from_decimal(callback.amount)?;
        let key = normalize_required(&callback.gateway_payment_id, "gateway_payment_id")?;
        let metadata = TxMetadata::Gateway {
            gateway_payment_id: key.clone(),
            method: normalize_optional_text(callback.method.as_deref()),
            raw: callback.raw,
        };
        let cmd = RecordTransactionCmd::credit(
            callback.user_id,
            amount,
            callback.currency,
            TransactionType::Payment,
        )
        .idempotency_key(key.clone())
        .metadata(metadata)
        .created_by("gateway");

        match callback.status {
            GatewayStatus::Pending => {
                self.record_transaction(cmd.status(EntryStatus::Pending)).await
            }
            GatewayStatus::Succeeded => {
                self.record_transaction(cmd.status(EntryStatus::Completed))
                    .await
            }
            GatewayStatus::Failed | GatewayStatus::Cancelled => {
                let target = if callback.status == GatewayStatus::Failed {
                    EntryStatus::Failed
                } else {
                    EntryStatus::Cancelled
                };
                with_tx!(self, "record_gateway_callback", |db_tx| {
                    let existing = find_by_key(&db_tx, &key).await?.ok_or_else(|| {
                        LedgerError::KeyNotFound(format!("gateway payment {key}"))
                    })?;
                    ensure_same_operation(&existing, &cmd)?;
                    self.settle_in_tx(&db_tx, existing.id, target, "gateway").await
                })
            }
        }
    }

    /// Administrative top-up, completed immediately or left pending.
    pub async fn deposit(&self, cmd: DepositCmd) -> ResultLedger<Recorded> {
        let method = normalize_required(&cmd.method, "method")?;
        let status = if cmd.auto_complete {
            EntryStatus::Completed
        } else {
            EntryStatus::Pending
        };
        let mut record = RecordTransactionCmd::credit(
            cmd.user_id,
            cmd.amount,
            cmd.currency,
            TransactionType::Credit,
        )
        .metadata(TxMetadata::Deposit {
            method,
            note: normalize_optional_text(cmd.note.as_deref()),
        })
        .status(status)
        .created_by(cmd.created_by);
        if let Some(key) = cmd.idempotency_key {
            record = record.idempotency_key(key);
        }
        self.record_transaction(record).await
    }

    pub(super) async fn record_in_tx(
        &self,
        db_tx: &DatabaseTransaction,
        cmd: RecordTransactionCmd,
    ) -> ResultLedger<Recorded> {
        ensure_positive(cmd.amount)?;
        let user_id = normalize_required(&cmd.user_id, "user_id")?;
        if !matches!(cmd.status, EntryStatus::Pending | EntryStatus::Completed) {
            return Err(LedgerError::InvalidStatus(format!(
                "new entries are pending or completed, got {}",
                cmd.status.as_str()
            )));
        }
        let key = normalize_optional_text(cmd.idempotency_key.as_deref());
        let now = Utc::now();

        let mut balance = self.lock_balance(db_tx, &user_id, cmd.currency, now).await?;

        if let Some(key) = key.as_deref()
            && let Some(existing) = find_by_key(db_tx, key).await?
        {
            ensure_same_operation(&existing, &cmd)?;
            if existing.status == EntryStatus::Pending && cmd.status == EntryStatus::Completed {
                return self
                    .settle_in_tx(db_tx, existing.id, EntryStatus::Completed, &cmd.created_by)
                    .await;
            }
            tracing::debug!(
                user_id = %user_id,
                idempotency_key = key,
                transaction_id = %existing.id,
                "idempotent replay"
            );
            return Ok(Recorded {
                transaction: existing,
                balance,
                replayed: true,
            });
        }

        let policy = load_policy(db_tx, &user_id).await?;
        self.ensure_currency_allowed(db_tx, &user_id, cmd.currency, policy)
            .await?;

        let entry = LedgerEntry {
            id: Uuid::now_v7(),
            user_id: user_id.clone(),
            currency: cmd.currency,
            amount: cmd.direction.apply(cmd.amount),
            transaction_type: cmd.transaction_type,
            status: cmd.status,
            idempotency_key: key.clone(),
            reference_number: normalize_optional_text(cmd.reference_number.as_deref()),
            metadata: cmd.metadata,
            created_at: now,
            created_by: cmd.created_by,
        };

        let previous = balance.available;
        match entry.status {
            EntryStatus::Pending => {
                balance.pending = balance
                    .pending
                    .checked_add(entry.amount)
                    .ok_or_else(|| LedgerError::InvalidAmount("pending overflow".to_string()))?;
            }
            _ => {
                apply_completed(&mut balance, &entry, policy.allow_overdraft)?;
                if cmd.non_withdrawable && cmd.direction == Direction::Credit {
                    balance.non_withdrawable += cmd.amount;
                    balance.clamp_non_withdrawable();
                }
            }
        }
        balance.updated_at = now;

        let context = || {
            format!(
                "record_transaction user={user_id} type={} amount={}",
                entry.transaction_type, entry.amount
            )
        };
        if let Err(err) = entry.to_active_model()?.insert(db_tx).await {
            if let Some(key) = key.as_deref()
                && is_unique_violation(&err)
            {
                return Err(LedgerError::DuplicateIdempotencyKey(key.to_string()));
            }
            return Err(LedgerError::db(context(), err));
        }
        self.save_balance(db_tx, &balance).await?;
        if self.config.audit_mutations {
            let audit = BalanceAudit::new(
                &user_id,
                entry.currency,
                previous,
                balance.available,
                AuditReason::Mutation,
                entry.created_by.clone(),
                Some(entry.id),
                now,
            );
            self.write_audit(db_tx, &audit).await?;
        }

        tracing::info!(
            user_id = %user_id,
            currency = %entry.currency,
            transaction_id = %entry.id,
            transaction_type = %entry.transaction_type,
            amount = %entry.amount,
            status = entry.status.as_str(),
            available = %balance.available,
            "ledger entry recorded"
        );
        Ok(Recorded {
            transaction: entry,
            balance,
            replayed: false,
        })
    }

    pub(super) async fn settle_in_tx(
        &self,
        db_tx: &DatabaseTransaction,
        transaction_id: Uuid,
        status: EntryStatus,
        settled_by: &str,
    ) -> ResultLedger<Recorded> {
        let entry = find_by_id(db_tx, transaction_id).await?;
        let now = Utc::now();
        let mut balance = self
            .lock_balance(db_tx, &entry.user_id, entry.currency, now)
            .await?;
        // Re-read under the lock: a concurrent settlement may have won.
        let mut entry = find_by_id(db_tx, transaction_id).await?;

        if entry.status == status {
            return Ok(Recorded {
                transaction: entry,
                balance,
                replayed: true,
            });
        }
        if !entry.status.can_transition_to(status) {
            return Err(LedgerError::InvalidStatus(format!(
                "cannot move {} entry {} to {}",
                entry.status.as_str(),
                entry.id,
                status.as_str()
            )));
        }

        let previous = balance.available;
        balance.pending -= entry.amount;
        entry.status = status;
        if status == EntryStatus::Completed {
            let policy = load_policy(db_tx, &entry.user_id).await?;
            apply_completed(&mut balance, &entry, policy.allow_overdraft)?;
        }
        balance.updated_at = now;

        transactions::ActiveModel {
            id: ActiveValue::Set(entry.id.to_string()),
            status: ActiveValue::Set(status.as_str().to_string()),
            ..Default::default()
        }
        .update(db_tx)
        .await
        .map_err(|err| LedgerError::db(format!("settle_transaction id={}", entry.id), err))?;
        self.save_balance(db_tx, &balance).await?;
        if self.config.audit_mutations {
            let audit = BalanceAudit::new(
                &entry.user_id,
                entry.currency,
                previous,
                balance.available,
                AuditReason::Settlement,
                settled_by,
                Some(entry.id),
                now,
            );
            self.write_audit(db_tx, &audit).await?;
        }

        tracing::info!(
            user_id = %entry.user_id,
            currency = %entry.currency,
            transaction_id = %entry.id,
            status = status.as_str(),
            available = %balance.available,
            pending = %balance.pending,
            "ledger entry settled"
        );
        Ok(Recorded {
            transaction: entry,
            balance,
            replayed: false,
        })
    }
}

/// Folds a completed entry into the row through the calculator, rejecting
/// any entry that lowers a non-overdraft account below zero. Charge types
/// reduce the balance whatever their sign, so the guard looks at the effect.
fn apply_completed(
    balance: &mut WalletBalance,
    entry: &LedgerEntry,
    allow_overdraft: bool,
) -> ResultLedger<()> {
    let mut totals = balance.running_totals();
    totals.apply(&LedgerLine::from(entry));
    let snapshot = totals.snapshot();
    let lowers = snapshot.balance < balance.available;
    if lowers && !allow_overdraft && snapshot.balance.is_negative() {
        return Err(LedgerError::InsufficientFunds(format!(
            "available {} {}, requested {}",
            balance.available,
            balance.currency,
            entry.amount.abs()
        )));
    }
    balance.apply_snapshot(&snapshot);
    Ok(())
}

/// A key is bound to the operation that first used it.
fn ensure_same_operation(existing: &LedgerEntry, cmd: &RecordTransactionCmd) -> ResultLedger<()> {
    let same = existing.user_id == cmd.user_id.trim()
        && existing.currency == cmd.currency
        && existing.amount == cmd.direction.apply(cmd.amount)
        && existing.transaction_type == cmd.transaction_type;
    if same {
        return Ok(());
    }
    Err(LedgerError::DuplicateIdempotencyKey(
        existing.idempotency_key.clone().unwrap_or_default(),
    ))
}

async fn find_by_key(db_tx: &DatabaseTransaction, key: &str) -> ResultLedger<Option<LedgerEntry>> {
    transactions::Entity::find()
        .filter(transactions::Column::IdempotencyKey.eq(key))
        .one(db_tx)
        .await
        .map_err(|err| LedgerError::db(format!("idempotency lookup key={key}"), err))?
        .map(LedgerEntry::try_from)
        .transpose()
}

async fn find_by_id(db_tx: &DatabaseTransaction, id: Uuid) -> ResultLedger<LedgerEntry> {
    let model = transactions::Entity::find_by_id(id.to_string())
        .one(db_tx)
        .await
        .map_err(|err| LedgerError::db(format!("find transaction id={id}"), err))?
        .ok_or_else(|| LedgerError::KeyNotFound(format!("transaction {id}")))?;
    LedgerEntry::try_from(model)
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
