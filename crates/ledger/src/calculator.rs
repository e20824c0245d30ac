//! Aggregate calculator.
//!
//! The one place where a balance is derived from ledger entries. Everything
//! else (recorder bookkeeping, reconciliation, overviews, reporting) goes
//! through [`classify`] and [`compute_aggregates`].
//!
//! Rules:
//!
//! - PAYMENT: `payment`/`credit` with a positive amount;
//! - REFUND: `refund`/`package_refund`/`booking_deleted_refund` with a
//!   positive amount;
//! - CHARGE: any negative amount, or a charge-family type;
//! - any other positive amount counts as PAYMENT.
//!
//! With `P`, `C`, `R` the sums of payments, charges (absolute) and refunds:
//! `effective_refunds = min(R, C)`, `net_charges = max(0, C - effective_refunds)`
//! and `balance = P - net_charges`. Hence `balance <= P` and
//! `net_charges >= 0` for every input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{LedgerEntry, Money, TransactionType};

/// What a single entry contributes to the aggregates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryClass {
    Payment,
    Refund,
    Charge,
    /// Zero-amount entries of non-charge types.
    Neutral,
}

/// Minimal projection of a ledger entry consumed by the calculator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedgerLine {
    pub amount: Money,
    pub transaction_type: TransactionType,
    pub created_at: DateTime<Utc>,
}

impl From<&LedgerEntry> for LedgerLine {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            amount: entry.amount,
            transaction_type: entry.transaction_type,
            created_at: entry.created_at,
        }
    }
}

/// Deterministic output of [`compute_aggregates`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub balance: Money,
    pub total_spent: Money,
    pub last_payment_at: Option<DateTime<Utc>>,
    pub payments: Money,
    pub charges: Money,
    pub refunds: Money,
    pub effective_refunds: Money,
    pub net_charges: Money,
}

fn is_charge_type(kind: TransactionType) -> bool {
    matches!(
        kind,
        TransactionType::Charge
            | TransactionType::Debit
            | TransactionType::PackagePurchase
            | TransactionType::BookingCharge
            | TransactionType::ServicePayment
            | TransactionType::RentalPayment
            | TransactionType::RentalCharge
            | TransactionType::BookingRestoreAdjustment
    )
}

/// Classifies one entry. Order matters: payment and refund types only count
/// as such when positive.
pub fn classify(kind: TransactionType, amount: Money) -> EntryClass {
    let positive = amount.is_positive();
    match kind {
        TransactionType::Payment | TransactionType::Credit if positive => EntryClass::Payment,
        TransactionType::Refund
        | TransactionType::PackageRefund
        | TransactionType::BookingDeletedRefund
            if positive =>
        {
            EntryClass::Refund
        }
        _ if amount.is_negative() || is_charge_type(kind) => EntryClass::Charge,
        _ if positive => EntryClass::Payment,
        _ => EntryClass::Neutral,
    }
}

/// Running class sums. Folding lines into it and taking a [`snapshot`]
/// is exactly [`compute_aggregates`]; the recorder keeps one per balance row
/// so the cache follows the same netting rules incrementally.
///
/// [`snapshot`]: RunningTotals::snapshot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunningTotals {
    pub payments: i128,
    pub charges: i128,
    pub refunds: i128,
    pub last_payment_at: Option<DateTime<Utc>>,
}

impl RunningTotals {
    pub fn apply(&mut self, line: &LedgerLine) {
        let amount = i128::from(line.amount.minor());
        match classify(line.transaction_type, line.amount) {
            EntryClass::Payment => {
                self.payments += amount;
                self.last_payment_at = latest(self.last_payment_at, line.created_at);
            }
            EntryClass::Refund => {
                self.refunds += amount;
                self.last_payment_at = latest(self.last_payment_at, line.created_at);
            }
            EntryClass::Charge => self.charges += amount.abs(),
            EntryClass::Neutral => {}
        }
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        let effective_refunds = self.refunds.min(self.charges);
        let net_charges = (self.charges - effective_refunds).max(0);
        let balance = self.payments - net_charges;

        AggregateSnapshot {
            balance: saturate(balance),
            total_spent: saturate(self.payments),
            last_payment_at: self.last_payment_at,
            payments: saturate(self.payments),
            charges: saturate(self.charges),
            refunds: saturate(self.refunds),
            effective_refunds: saturate(effective_refunds),
            net_charges: saturate(net_charges),
        }
    }
}

/// Derives balance, total spent and last payment time from an ordered list
/// of completed entries.
pub fn compute_aggregates<'a, I>(lines: I) -> AggregateSnapshot
where
    I: IntoIterator<Item = &'a LedgerLine>,
{
    let mut totals = RunningTotals::default();
    for line in lines {
        totals.apply(line);
    }
    totals.snapshot()
}

/// Same as [`compute_aggregates`] for full ledger entries.
pub fn aggregate_entries(entries: &[LedgerEntry]) -> AggregateSnapshot {
    let lines: Vec<LedgerLine> = entries.iter().map(LedgerLine::from).collect();
    compute_aggregates(&lines)
}

fn latest(current: Option<DateTime<Utc>>, candidate: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match current {
        Some(current) if current >= candidate => Some(current),
        _ => Some(candidate),
    }
}

fn saturate(value: i128) -> Money {
    Money::new(value.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64)
}
