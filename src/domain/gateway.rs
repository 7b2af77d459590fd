//! Billing gateway identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::foundation::ValidationError;

/// The billing providers a subscription can live on.
///
/// Each provider follows a different protocol family: store receipts
/// (apple), mobile billing with pub/sub notifications (google), redirect
/// checkout (paypal), and API-managed recurring plans (xendit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gateway {
    Apple,
    Google,
    Paypal,
    Xendit,
}

impl Gateway {
    /// All known gateways.
    pub const ALL: [Gateway; 4] = [
        Gateway::Apple,
        Gateway::Google,
        Gateway::Paypal,
        Gateway::Xendit,
    ];

    /// The canonical lowercase name stored in records and config keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Gateway::Apple => "apple",
            Gateway::Google => "google",
            Gateway::Paypal => "paypal",
            Gateway::Xendit => "xendit",
        }
    }
}

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Gateway {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "apple" => Ok(Gateway::Apple),
            "google" => Ok(Gateway::Google),
            "paypal" => Ok(Gateway::Paypal),
            "xendit" => Ok(Gateway::Xendit),
            other => Err(ValidationError::invalid_format(
                "gateway",
                format!("unknown gateway '{}'", other),
            )),
        }
    }
}
