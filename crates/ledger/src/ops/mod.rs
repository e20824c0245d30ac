use std::{fmt, sync::Arc, time::Duration};

use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};

use crate::{
    CommissionRate, Currency, CurrencyConverter, LedgerError, PoolStats, ResultLedger,
    StaticRateConverter,
    pool::{LedgerTx, PoolMonitor},
};

mod balances;
mod commissions;
mod reconcile;
mod recorder;

pub use balances::AccountOverview;
pub use commissions::{CommissionOutcome, CommissionSummary, CommissionTotals};
pub use reconcile::{
    CurrencyReconciliation, ReconcileTrigger, StopHandle, StopSignal, SweepReport,
    UserReconciliation, spawn_periodic_reconciliation,
};
pub use recorder::Recorded;

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, $operation:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.begin($operation).await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit($operation).await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

pub(crate) use with_tx;

/// Recorder and reconciliation tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Write a before/after audit row on every recorder mutation.
    pub audit_mutations: bool,
    /// Cache/ledger differences at or below this many minor units are not
    /// corrected.
    pub drift_tolerance_minor: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            audit_mutations: false,
            drift_tolerance_minor: 1,
        }
    }
}

/// System-level commission defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommissionSettings {
    /// Reporting currency every commission is computed in.
    pub canonical_currency: Currency,
    /// Last step of the rate resolution.
    pub default_rate: CommissionRate,
}

impl Default for CommissionSettings {
    fn default() -> Self {
        Self {
            canonical_currency: Currency::Eur,
            default_rate: CommissionRate {
                rate_type: crate::RateType::Percentage,
                value: rust_decimal::Decimal::from(50),
            },
        }
    }
}

/// The wallet ledger: recorder, read side, reconciliation and commissions
/// over one injected connection pool.
#[derive(Clone)]
pub struct Ledger {
    database: DatabaseConnection,
    config: LedgerConfig,
    commission: CommissionSettings,
    converter: Arc<dyn CurrencyConverter>,
    monitor: Arc<PoolMonitor>,
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("config", &self.config)
            .field("commission", &self.commission)
            .field("converter", &self.converter)
            .field("pool", &self.monitor.stats())
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Return a builder for `Ledger`. Help to build the struct.
    pub fn builder() -> LedgerBuilder {
        LedgerBuilder::default()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn commission_settings(&self) -> &CommissionSettings {
        &self.commission
    }

    /// Queue depth and acquisition latency of the pool as seen by the ledger.
    pub fn pool_stats(&self) -> PoolStats {
        self.monitor.stats()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.monitor.is_closing()
    }

    /// Refuses new operations, waits up to `grace` for in-flight database
    /// transactions, then closes the pool.
    ///
    /// Returns the number of transactions still running when the grace
    /// period ran out; those are rolled back by the driver on close.
    pub async fn shutdown(&self, grace: Duration) -> ResultLedger<usize> {
        let remaining = self.monitor.drain(grace).await;
        if remaining > 0 {
            tracing::warn!(remaining, "closing pool with transactions still in flight");
        } else {
            tracing::info!("ledger drained");
        }
        self.database
            .clone()
            .close()
            .await
            .map_err(|err| LedgerError::db("shutdown", err))?;
        Ok(remaining)
    }

    async fn begin(&self, operation: &str) -> ResultLedger<LedgerTx> {
        PoolMonitor::begin(&self.monitor, &self.database, operation).await
    }

    /// Connection for lock-free reads; refuses work once shutdown started.
    fn reader(&self) -> ResultLedger<&DatabaseConnection> {
        if self.monitor.is_closing() {
            return Err(LedgerError::ShuttingDown);
        }
        Ok(&self.database)
    }
}

/// The builder for `Ledger`
#[derive(Default)]
pub struct LedgerBuilder {
    database: DatabaseConnection,
    config: LedgerConfig,
    commission: CommissionSettings,
    converter: Option<Arc<dyn CurrencyConverter>>,
}

impl LedgerBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> LedgerBuilder {
        self.database = db;
        self
    }

    pub fn config(mut self, config: LedgerConfig) -> LedgerBuilder {
        self.config = config;
        self
    }

    pub fn commission(mut self, settings: CommissionSettings) -> LedgerBuilder {
        self.commission = settings;
        self
    }

    /// Currency service used to canonicalize commission amounts. Defaults to
    /// an empty static table, which only converts a currency to itself.
    pub fn converter(mut self, converter: Arc<dyn CurrencyConverter>) -> LedgerBuilder {
        self.converter = Some(converter);
        self
    }

    /// Construct `Ledger`
    pub async fn build(self) -> ResultLedger<Ledger> {
        if self.config.drift_tolerance_minor < 0 {
            return Err(LedgerError::InvalidAmount(
                "drift tolerance must be >= 0".to_string(),
            ));
        }
        self.commission.default_rate.validate()?;
        let converter = self.converter.unwrap_or_else(|| {
            Arc::new(StaticRateConverter::new(self.commission.canonical_currency))
        });
        Ok(Ledger {
            database: self.database,
            config: self.config,
            commission: self.commission,
            converter,
            monitor: Arc::new(PoolMonitor::default()),
        })
    }
}
