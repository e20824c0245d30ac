//! Typed metadata attached to ledger entries.
//!
//! Fields read by the ledger itself (booking/rental/package/commission ids)
//! are modelled explicitly. Gateway payloads that nothing interprets travel
//! in a plain JSON map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ResultLedger;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxMetadata {
    #[default]
    None,
    Gateway {
        gateway_payment_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        raw: Map<String, Value>,
    },
    Deposit {
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    Booking {
        booking_id: String,
    },
    Rental {
        rental_id: String,
    },
    Package {
        package_id: String,
    },
    Commission {
        commission_id: String,
    },
    Generic {
        #[serde(default)]
        fields: Map<String, Value>,
    },
}

impl TxMetadata {
    pub(crate) fn to_json(&self) -> ResultLedger<Option<String>> {
        if matches!(self, Self::None) {
            return Ok(None);
        }
        Ok(Some(serde_json::to_string(self)?))
    }

    /// Unknown or malformed stored metadata degrades to a generic map so a
    /// legacy row never makes its ledger unreadable.
    pub(crate) fn from_json(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::None;
        };
        match serde_json::from_str::<TxMetadata>(raw) {
            Ok(meta) => meta,
            Err(_) => match serde_json::from_str::<Map<String, Value>>(raw) {
                Ok(fields) => Self::Generic { fields },
                Err(_) => Self::None,
            },
        }
    }
}
