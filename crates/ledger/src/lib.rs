pub use accounts::AccountPolicy;
pub use audits::{AuditReason, BalanceAudit};
pub use balances::WalletBalance;
pub use calculator::{
    AggregateSnapshot, EntryClass, LedgerLine, RunningTotals, aggregate_entries, classify,
    compute_aggregates,
};
pub use commands::{
    BookingCompleted, DepositCmd, GatewayCallback, GatewayStatus, PackageUsage,
    RecordTransactionCmd, RentalCompleted, SettleCmd,
};
pub use commission_rates::RateOverride;
pub use commissions::{
    Commission, CommissionRate, CommissionStatus, RateSource, RateType, SourceType, period_of,
};
pub use currency::Currency;
pub use error::LedgerError;
pub use fx::{CurrencyConverter, StaticRateConverter};
pub use metadata::TxMetadata;
pub use money::Money;
pub use ops::{
    AccountOverview, CommissionOutcome, CommissionSettings, CommissionSummary, CommissionTotals,
    CurrencyReconciliation, Ledger, LedgerBuilder, LedgerConfig, ReconcileTrigger, Recorded,
    StopHandle, StopSignal, SweepReport, UserReconciliation, spawn_periodic_reconciliation,
};
pub use pool::{DatabaseSettings, PoolStats, connect};
pub use transactions::{Direction, EntryStatus, LedgerEntry, TransactionType};

mod accounts;
mod audits;
mod balances;
mod calculator;
mod commands;
mod commission_rates;
mod commissions;
mod currency;
mod error;
mod fx;
mod metadata;
mod money;
mod ops;
mod pool;
mod transactions;
mod util;

type ResultLedger<T> = Result<T, LedgerError>;
