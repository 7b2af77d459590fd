//! Billing interval arithmetic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{Timestamp, ValidationError};

/// The unit of a plan's billing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl BillingInterval {
    /// Advances a timestamp by `count` intervals.
    ///
    /// Month and year steps use calendar arithmetic with day-of-month
    /// clamping, so Jan 31 + 1 month lands on the last day of February.
    pub fn advance(&self, from: Timestamp, count: u32) -> Timestamp {
        match self {
            BillingInterval::Hour => from.plus_hours(count as i64),
            BillingInterval::Day => from.plus_days(count as i64),
            BillingInterval::Week => from.plus_weeks(count as i64),
            BillingInterval::Month => from.plus_months(count),
            BillingInterval::Year => from.plus_years(count),
        }
    }

    /// The canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Hour => "hour",
            BillingInterval::Day => "day",
            BillingInterval::Week => "week",
            BillingInterval::Month => "month",
            BillingInterval::Year => "year",
        }
    }
}

impl fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BillingInterval {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(BillingInterval::Hour),
            "day" => Ok(BillingInterval::Day),
            "week" => Ok(BillingInterval::Week),
            "month" => Ok(BillingInterval::Month),
            "year" => Ok(BillingInterval::Year),
            other => Err(ValidationError::invalid_format(
                "interval",
                format!("unknown interval '{}'", other),
            )),
        }
    }
}
