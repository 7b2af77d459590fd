//! Normalized provider notifications.
//!
//! Adapters decode and authenticate provider payloads, then reduce them to
//! one of three internal signals before the state machine sees them.
//! Unknown provider codes never reach this type; adapters log and ignore
//! them.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::Timestamp;
use crate::domain::Gateway;

/// What a provider notification means for the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// The provider renewed the subscription for another period.
    Renewed,
    /// The provider canceled or expired the subscription.
    CanceledOrExpired,
    /// Billing recovered after a failure; access is restored.
    BillingRecovered,
}

/// An authenticated, normalized notification ready to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderNotification {
    pub gateway: Gateway,
    pub signal: Signal,
    /// The provider's own code, kept for logging and audit metadata.
    pub event_type: String,
    /// Provider-assigned subscription id (purchase token, billing
    /// agreement id, recurring plan id) used to locate the local record.
    pub gateway_id: Option<String>,
    /// Obfuscated account token for first-purchase identity binding.
    pub account_token: Option<String>,
    /// Provider-side plan/product identifier for plan matching.
    pub provider_plan_id: Option<String>,
    /// Provider-asserted period end, when the payload carries one.
    pub expires_at: Option<Timestamp>,
}

impl ProviderNotification {
    pub fn new(gateway: Gateway, signal: Signal, event_type: impl Into<String>) -> Self {
        Self {
            gateway,
            signal,
            event_type: event_type.into(),
            gateway_id: None,
            account_token: None,
            provider_plan_id: None,
            expires_at: None,
        }
    }

    pub fn with_gateway_id(mut self, id: impl Into<String>) -> Self {
        self.gateway_id = Some(id.into());
        self
    }

    pub fn with_account_token(mut self, token: impl Into<String>) -> Self {
        self.account_token = Some(token.into());
        self
    }

    pub fn with_provider_plan_id(mut self, id: impl Into<String>) -> Self {
        self.provider_plan_id = Some(id.into());
        self
    }

    pub fn with_expires_at(mut self, at: Timestamp) -> Self {
        self.expires_at = Some(at);
        self
    }
}
