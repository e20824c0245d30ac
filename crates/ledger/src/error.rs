//! The module contains the errors the ledger can return.
//!
//! Errors fall in four families:
//!
//! - validation: [`InvalidAmount`], [`InvalidCurrency`], [`InvalidType`],
//!   [`InvalidStatus`], [`InvalidRate`], [`InvalidMetadata`], [`KeyNotFound`];
//! - business rules: [`InsufficientFunds`], [`CurrencyMismatch`],
//!   [`DuplicateIdempotencyKey`];
//! - resources: [`PoolTimeout`], [`ShuttingDown`] (both retryable);
//! - storage: [`Database`], always carrying the operation context.
//!
//!  [`InvalidAmount`]: LedgerError::InvalidAmount
//!  [`InvalidCurrency`]: LedgerError::InvalidCurrency
//!  [`InvalidType`]: LedgerError::InvalidType
//!  [`InvalidStatus`]: LedgerError::InvalidStatus
//!  [`InvalidRate`]: LedgerError::InvalidRate
//!  [`InvalidMetadata`]: LedgerError::InvalidMetadata
//!  [`KeyNotFound`]: LedgerError::KeyNotFound
//!  [`InsufficientFunds`]: LedgerError::InsufficientFunds
//!  [`CurrencyMismatch`]: LedgerError::CurrencyMismatch
//!  [`DuplicateIdempotencyKey`]: LedgerError::DuplicateIdempotencyKey
//!  [`PoolTimeout`]: LedgerError::PoolTimeout
//!  [`ShuttingDown`]: LedgerError::ShuttingDown
//!  [`Database`]: LedgerError::Database
use sea_orm::{DbErr, RuntimeErr};
use thiserror::Error;

/// Ledger custom errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),
    #[error("Invalid transaction type: {0}")]
    InvalidType(String),
    #[error("Invalid status: {0}")]
    InvalidStatus(String),
    #[error("Invalid rate: {0}")]
    InvalidRate(String),
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("Currency mismatch: {0}")]
    CurrencyMismatch(String),
    #[error("Duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(String),
    #[error("Connection pool timeout: {0}")]
    PoolTimeout(String),
    #[error("Ledger is shutting down")]
    ShuttingDown,
    #[error("Currency conversion failed: {0}")]
    Conversion(String),
    #[error("{context}: {source}")]
    Database {
        context: String,
        #[source]
        source: DbErr,
    },
}

impl LedgerError {
    /// Stable category string for callers outside the crate.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "invalid_amount",
            Self::InvalidCurrency(_) => "invalid_currency",
            Self::InvalidType(_) => "invalid_type",
            Self::InvalidStatus(_) => "invalid_status",
            Self::InvalidRate(_) => "invalid_rate",
            Self::InvalidMetadata(_) => "invalid_metadata",
            Self::KeyNotFound(_) => "not_found",
            Self::InsufficientFunds(_) => "insufficient_funds",
            Self::CurrencyMismatch(_) => "currency_mismatch",
            Self::DuplicateIdempotencyKey(_) => "duplicate_idempotency_key",
            Self::PoolTimeout(_) => "pool_timeout",
            Self::ShuttingDown => "shutting_down",
            Self::Conversion(_) => "conversion",
            Self::Database { .. } => "database",
        }
    }

    /// Returns `true` when the caller may safely retry the whole operation.
    ///
    /// The ledger never retries a mutation on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PoolTimeout(_) | Self::ShuttingDown => true,
            Self::Database { source, .. } => is_lock_contention(source),
            _ => false,
        }
    }

    /// Returns `true` for caller mistakes rejected before touching state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidAmount(_)
                | Self::InvalidCurrency(_)
                | Self::InvalidType(_)
                | Self::InvalidStatus(_)
                | Self::InvalidRate(_)
                | Self::InvalidMetadata(_)
        )
    }

    /// Wraps a driver error with the operation that produced it.
    pub(crate) fn db(context: impl Into<String>, source: DbErr) -> Self {
        match source {
            DbErr::ConnectionAcquire(err) => Self::PoolTimeout(format!("{}: {err}", context.into())),
            source => Self::Database {
                context: context.into(),
                source,
            },
        }
    }
}

/// Lock-wait and busy errors are transient: another transaction holds the row.
fn is_lock_contention(err: &DbErr) -> bool {
    let message = match err {
        DbErr::Exec(RuntimeErr::SqlxError(e)) | DbErr::Query(RuntimeErr::SqlxError(e)) => {
            e.to_string()
        }
        DbErr::Conn(RuntimeErr::SqlxError(e)) => e.to_string(),
        _ => return false,
    };
    let message = message.to_ascii_lowercase();
    message.contains("database is locked")
        || message.contains("lock timeout")
        || message.contains("could not obtain lock")
        || message.contains("deadlock detected")
}

impl From<serde_json::Error> for LedgerError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidMetadata(value.to_string())
    }
}

impl From<DbErr> for LedgerError {
    fn from(value: DbErr) -> Self {
        Self::db("database", value)
    }
}

impl PartialEq for LedgerError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::InvalidAmount(a), Self::InvalidAmount(b)) => a == b,
            (Self::InvalidCurrency(a), Self::InvalidCurrency(b)) => a == b,
            (Self::InvalidType(a), Self::InvalidType(b)) => a == b,
            (Self::InvalidStatus(a), Self::InvalidStatus(b)) => a == b,
            (Self::InvalidRate(a), Self::InvalidRate(b)) => a == b,
            (Self::InvalidMetadata(a), Self::InvalidMetadata(b)) => a == b,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::InsufficientFunds(a), Self::InsufficientFunds(b)) => a == b,
            (Self::CurrencyMismatch(a), Self::CurrencyMismatch(b)) => a == b,
            (Self::DuplicateIdempotencyKey(a), Self::DuplicateIdempotencyKey(b)) => a == b,
            (Self::PoolTimeout(a), Self::PoolTimeout(b)) => a == b,
            (Self::ShuttingDown, Self::ShuttingDown) => true,
            (Self::Conversion(a), Self::Conversion(b)) => a == b,
            (
                Self::Database {
                    context: a,
                    source: sa,
                },
                Self::Database {
                    context: b,
                    source: sb,
                },
            ) => a == b && sa.to_string() == sb.to_string(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_is_retryable() {
        let err = LedgerError::db(
            "record_transaction user=u1",
            DbErr::ConnectionAcquire(sea_orm::ConnAcquireErr::Timeout),
        );
        assert_eq!(err.kind(), "pool_timeout");
        assert!(err.is_retryable());
    }

    #[test]
    fn business_errors_are_not_retryable() {
        assert!(!LedgerError::InsufficientFunds("x".to_string()).is_retryable());
        assert!(!LedgerError::DuplicateIdempotencyKey("x".to_string()).is_retryable());
        assert!(LedgerError::ShuttingDown.is_retryable());
    }

    #[test]
    fn metadata_errors_are_validation_errors() {
        let err = LedgerError::from(serde_json::from_str::<serde_json::Value>("{").unwrap_err());
        assert_eq!(err.kind(), "invalid_metadata");
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn database_errors_keep_context() {
        let err = LedgerError::db("settle_transaction id=42", DbErr::Custom("boom".to_string()));
        assert_eq!(err.kind(), "database");
        assert!(err.to_string().starts_with("settle_transaction id=42"));
    }
}
