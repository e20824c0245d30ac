//! Currency conversion seam.
//!
//! Rate fetching lives outside the ledger. The commission engine only needs
//! "convert this amount to that currency", expressed by [`CurrencyConverter`].

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::{Currency, LedgerError, ResultLedger};

#[async_trait]
pub trait CurrencyConverter: Send + Sync + std::fmt::Debug {
    /// Converts `amount` from `from` into `to` at full precision.
    async fn convert(&self, amount: Decimal, from: Currency, to: Currency) -> ResultLedger<Decimal>;
}

/// Converter backed by a fixed table of rates against one base currency.
///
/// `rates[c]` is the value of one unit of `c` expressed in `base`.
#[derive(Clone, Debug)]
pub struct StaticRateConverter {
    base: Currency,
    rates: HashMap<Currency, Decimal>,
}

impl StaticRateConverter {
    pub fn new(base: Currency) -> Self {
        Self {
            base,
            rates: HashMap::new(),
        }
    }

    #[must_use]
    pub fn rate(mut self, currency: Currency, in_base: Decimal) -> Self {
        self.rates.insert(currency, in_base);
        self
    }

    fn to_base(&self, currency: Currency) -> ResultLedger<Decimal> {
        if currency == self.base {
            return Ok(Decimal::ONE);
        }
        match self.rates.get(&currency) {
            Some(rate) if *rate > Decimal::ZERO => Ok(*rate),
            _ => Err(LedgerError::Conversion(format!(
                "no rate for {currency} in {}",
                self.base
            ))),
        }
    }
}

#[async_trait]
impl CurrencyConverter for StaticRateConverter {
    async fn convert(&self, amount: Decimal, from: Currency, to: Currency) -> ResultLedger<Decimal> {
        if from == to {
            return Ok(amount);
        }
        let in_base = amount * self.to_base(from)?;
        Ok(in_base / self.to_base(to)?)
    }
}
