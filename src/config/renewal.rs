//! Renewal sweep configuration.

use serde::Deserialize;

use super::error::ValidationError;

fn default_batch_size() -> u32 {
    100
}

/// Settings for the background renewal sweep.
#[derive(Debug, Clone, Deserialize)]
pub struct RenewalConfig {
    /// How many due subscriptions one sweep pass processes.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Cancel instead of renewing once a subscription reaches this many
    /// renewals. `None` renews indefinitely.
    #[serde(default)]
    pub max_renewals: Option<u32>,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_renewals: None,
        }
    }
}

impl RenewalConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ValidationError::InvalidRenewalBatchSize);
        }
        Ok(())
    }
}
