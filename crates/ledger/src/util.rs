//! Internal helpers for model validation and conversion.
//!
//! These utilities are **not** part of the public API. They centralize
//! validation and mapping logic so every operation enforces the same rules.

use uuid::Uuid;

use crate::{Currency, LedgerError, Money, ResultLedger};

/// Parse a UUID from storage and return a labeled error on failure.
pub(crate) fn parse_uuid(value: &str, label: &str) -> ResultLedger<Uuid> {
    Uuid::parse_str(value).map_err(|_| LedgerError::KeyNotFound(format!("invalid {label} id")))
}

/// Parse a currency code stored in the DB into a strongly typed `Currency`.
pub(crate) fn model_currency(value: &str) -> ResultLedger<Currency> {
    Currency::try_from(value)
        .map_err(|_| LedgerError::InvalidCurrency(format!("invalid stored currency: {value}")))
}

/// Amounts handed to the recorder carry no sign; `Direction` does.
pub(crate) fn ensure_positive(amount: Money) -> ResultLedger<()> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidAmount("amount must be > 0".to_string()));
    }
    Ok(())
}

pub(crate) fn normalize_required(value: &str, label: &str) -> ResultLedger<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::InvalidAmount(format!("{label} must not be empty")));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn normalize_optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}
