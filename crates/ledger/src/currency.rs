use serde::{Deserialize, Serialize};

use crate::LedgerError;

/// ISO currency code of a wallet balance, ledger entry or commission.
///
/// The set is closed: a code outside it is a validation error, never a
/// silent default.
///
/// ## Minor units
///
/// Every supported currency uses 2 minor units, which is what the storage
/// contract (`i64` minor units, see `Money`) relies on. `10.50 EUR` ⇄ `1050`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Eur,
    Usd,
    Gbp,
    Try,
    Chf,
}

impl Currency {
    pub const ALL: [Currency; 5] = [
        Currency::Eur,
        Currency::Usd,
        Currency::Gbp,
        Currency::Try,
        Currency::Chf,
    ];

    /// Canonical currency code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
            Currency::Gbp => "GBP",
            Currency::Try => "TRY",
            Currency::Chf => "CHF",
        }
    }

    #[must_use]
    pub const fn minor_units(self) -> u8 {
        2
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl TryFrom<&str> for Currency {
    type Error = LedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_uppercase().as_str() {
            "EUR" => Ok(Currency::Eur),
            "USD" => Ok(Currency::Usd),
            "GBP" => Ok(Currency::Gbp),
            "TRY" => Ok(Currency::Try),
            "CHF" => Ok(Currency::Chf),
            other => Err(LedgerError::InvalidCurrency(format!(
                "unsupported currency: {other}"
            ))),
        }
    }
}

impl std::str::FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::try_from(s)
    }
}
