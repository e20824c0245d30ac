//! Connection pool handle: construction, saturation metrics and drain.
//!
//! The pool is created once by the binary with [`connect`] and injected into
//! the ledger. Every ledger operation acquires its connection through
//! `Ledger::begin`, which records how long the acquisition waited and how
//! many callers are queued, so saturation shows up in [`PoolStats`] before
//! it turns into timeouts.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DatabaseTransaction};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::{LedgerError, ResultLedger};

/// Pool construction parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Bounded wait for a free connection; callers fail fast past it.
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite:./walletd.db?mode=rwc".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// Opens the pool described by `settings`.
pub async fn connect(settings: &DatabaseSettings) -> ResultLedger<DatabaseConnection> {
    let mut options = ConnectOptions::new(settings.url.clone());
    options
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .sqlx_logging(false);
    if let Some(idle) = settings.idle_timeout {
        options.idle_timeout(idle);
    }
    Database::connect(options)
        .await
        .map_err(|err| LedgerError::db("connect", err))
}

/// Point-in-time view of pool pressure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Callers currently queued for a connection.
    pub waiting: usize,
    /// Ledger transactions currently holding a connection.
    pub in_flight: usize,
    pub acquired_total: u64,
    pub timeouts_total: u64,
    pub last_acquire_us: u64,
    pub max_acquire_us: u64,
    pub closing: bool,
}

#[derive(Debug, Default)]
pub(crate) struct PoolMonitor {
    waiting: AtomicUsize,
    in_flight: AtomicUsize,
    acquired_total: AtomicU64,
    timeouts_total: AtomicU64,
    last_acquire_us: AtomicU64,
    max_acquire_us: AtomicU64,
    closing: AtomicBool,
    drained: Notify,
}

impl PoolMonitor {
    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            waiting: self.waiting.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            acquired_total: self.acquired_total.load(Ordering::Relaxed),
            timeouts_total: self.timeouts_total.load(Ordering::Relaxed),
            last_acquire_us: self.last_acquire_us.load(Ordering::Relaxed),
            max_acquire_us: self.max_acquire_us.load(Ordering::Relaxed),
            closing: self.closing.load(Ordering::Acquire),
        }
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Opens a database transaction, measuring the wait for a connection.
    pub(crate) async fn begin(
        monitor: &Arc<PoolMonitor>,
        database: &DatabaseConnection,
        operation: &str,
    ) -> ResultLedger<LedgerTx> {
        // Enter before checking the flag: either drain sees this slot or we
        // see `closing`. Queued callers are waited for too.
        let slot = InFlight::enter(Arc::clone(monitor));
        if monitor.is_closing() {
            return Err(LedgerError::ShuttingDown);
        }
        let this = monitor.as_ref();

        this.waiting.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let result = sea_orm::TransactionTrait::begin(database).await;
        this.waiting.fetch_sub(1, Ordering::Relaxed);

        let waited = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        this.last_acquire_us.store(waited, Ordering::Relaxed);
        this.max_acquire_us.fetch_max(waited, Ordering::Relaxed);

        match result {
            Ok(tx) => {
                this.acquired_total.fetch_add(1, Ordering::Relaxed);
                Ok(LedgerTx { tx, _slot: slot })
            }
            Err(err) => {
                let err = LedgerError::db(operation, err);
                if matches!(err, LedgerError::PoolTimeout(_)) {
                    this.timeouts_total.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(operation, waited_us = waited, "connection acquisition timed out");
                }
                Err(err)
            }
        }
    }

    /// Stops admitting work and waits up to `grace` for in-flight
    /// transactions. Returns the number still running when it gave up.
    pub(crate) async fn drain(&self, grace: Duration) -> usize {
        self.closing.store(true, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let notified = self.drained.notified();
            let remaining = self.in_flight.load(Ordering::SeqCst);
            if remaining == 0 {
                return 0;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.in_flight.load(Ordering::SeqCst);
            }
        }
    }
}

/// Holds a slot in `in_flight` until dropped.
#[derive(Debug)]
struct InFlight(Arc<PoolMonitor>);

impl InFlight {
    fn enter(monitor: Arc<PoolMonitor>) -> Self {
        monitor.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(monitor)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 && self.0.is_closing() {
            self.0.drained.notify_waiters();
        }
    }
}

/// A database transaction counted as in-flight until committed or dropped.
///
/// Dropping without [`LedgerTx::commit`] rolls back.
#[derive(Debug)]
pub(crate) struct LedgerTx {
    tx: DatabaseTransaction,
    _slot: InFlight,
}

impl LedgerTx {
    pub(crate) async fn commit(self, operation: &str) -> ResultLedger<()> {
        self.tx
            .commit()
            .await
            .map_err(|err| LedgerError::db(format!("{operation}: commit"), err))
    }
}

impl std::ops::Deref for LedgerTx {
    type Target = DatabaseTransaction;

    fn deref(&self) -> &Self::Target {
        &self.tx
    }
}
