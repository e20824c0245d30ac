//! Handles settings for the application. Configuration is read from an
//! optional `settings.toml`, overlaid with `WALLETD__*` environment
//! variables (`WALLETD__DATABASE__URL`, `WALLETD__SERVER__PORT`, ...).
//!
//! See `settings.toml` for the configuration.
use std::{collections::HashMap, time::Duration};

use config::{Config, ConfigError, Environment, File};
use ledger::{
    CommissionRate, CommissionSettings, Currency, DatabaseSettings, LedgerConfig, LedgerError,
    RateType, StaticRateConverter,
};
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct App {
    pub level: String,
    /// How long shutdown waits for in-flight ledger transactions.
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct Server {
    pub bind: Option<String>,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct Reconciliation {
    pub enabled: bool,
    pub interval_secs: u64,
    pub lookback_hours: u64,
    pub drift_tolerance_minor: i64,
}

#[derive(Debug, Deserialize)]
pub struct Commission {
    pub canonical_currency: String,
    pub default_rate_type: String,
    pub default_rate: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct Ledger {
    pub audit_mutations: bool,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub app: App,
    pub database: Database,
    pub server: Option<Server>,
    pub reconciliation: Reconciliation,
    pub commission: Commission,
    pub ledger: Ledger,
    /// Value of one unit of each currency in the canonical currency.
    #[serde(default)]
    pub fx: HashMap<String, Decimal>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("app.level", "info")?
            .set_default("app.shutdown_grace_secs", 10)?
            .set_default("database.url", "sqlite:./walletd.db?mode=rwc")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .set_default("database.acquire_timeout_secs", 10)?
            .set_default("database.idle_timeout_secs", 300)?
            .set_default("reconciliation.enabled", true)?
            .set_default("reconciliation.interval_secs", 300)?
            .set_default("reconciliation.lookback_hours", 24)?
            .set_default("reconciliation.drift_tolerance_minor", 1)?
            .set_default("commission.canonical_currency", "EUR")?
            .set_default("commission.default_rate_type", "percentage")?
            .set_default("commission.default_rate", "50")?
            .set_default("ledger.audit_mutations", false)?
            .add_source(File::with_name("settings").required(false))
            .add_source(
                Environment::with_prefix("WALLETD")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }

    pub fn database_settings(&self) -> DatabaseSettings {
        DatabaseSettings {
            url: self.database.url.clone(),
            max_connections: self.database.max_connections,
            min_connections: self.database.min_connections,
            acquire_timeout: Duration::from_secs(self.database.acquire_timeout_secs),
            idle_timeout: self.database.idle_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            audit_mutations: self.ledger.audit_mutations,
            drift_tolerance_minor: self.reconciliation.drift_tolerance_minor,
        }
    }

    pub fn commission_settings(&self) -> Result<CommissionSettings, LedgerError> {
        let rate_type = RateType::try_from(self.commission.default_rate_type.as_str())?;
        Ok(CommissionSettings {
            canonical_currency: Currency::try_from(self.commission.canonical_currency.as_str())?,
            default_rate: CommissionRate::new(rate_type, self.commission.default_rate)?,
        })
    }

    pub fn converter(&self) -> Result<StaticRateConverter, LedgerError> {
        let canonical = Currency::try_from(self.commission.canonical_currency.as_str())?;
        self.fx
            .iter()
            .try_fold(StaticRateConverter::new(canonical), |fx, (code, rate)| {
                Ok(fx.rate(Currency::try_from(code.as_str())?, *rate))
            })
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconciliation.interval_secs.max(1))
    }

    pub fn reconcile_lookback(&self) -> Duration {
        Duration::from_secs(self.reconciliation.lookback_hours * 3600)
    }
}
