//! Gateway port: the normalized contract every billing provider implements.
//!
//! Providers differ along two axes: who initiates renewal (server-side with
//! webhook notification, or user repurchase), and who can cancel or resume
//! server-side. The contract keeps the full surface and lets each capability
//! fail with a typed `UnsupportedOperation` instead of forcing a lowest
//! common denominator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::{DomainError, ErrorCode};
use crate::domain::plan::Plan;
use crate::domain::subscription::Subscription;
use crate::domain::Gateway;

use super::webhook::WebhookRequest;

/// Port for billing provider integrations.
///
/// All mutations go through the store inside the adapter (via its shared
/// core), so local state only changes after the provider call succeeds and
/// always alongside the transaction that justifies it.
#[async_trait]
pub trait SubscriptionGateway: Send + Sync {
    /// Which provider this adapter speaks to.
    fn gateway(&self) -> Gateway;

    /// Validates the provider-specific proof of purchase (receipt, purchase
    /// token) or starts a redirect flow, activates the subscription, and
    /// records the initial transaction.
    async fn create_subscription(
        &self,
        subscription: &Subscription,
        plan: &Plan,
        options: CreateOptions,
    ) -> Result<Subscription, GatewayError>;

    /// Calls the provider's cancel API where one exists, then applies the
    /// local cancel. The local cancel always happens.
    async fn cancel_subscription(
        &self,
        subscription: &Subscription,
        immediate: bool,
    ) -> Result<Subscription, GatewayError>;

    /// Reactivates a pending-cancel subscription.
    ///
    /// Fails with `UnsupportedOperation` for providers with no reactivation
    /// path (store-receipt, recurring-plan).
    async fn resume_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<Subscription, GatewayError>;

    /// Moves the subscription to a different plan.
    ///
    /// Fails with `UnsupportedOperation` where the provider requires a new
    /// purchase (store-receipt, mobile-billing).
    async fn swap_plan(
        &self,
        subscription: &Subscription,
        new_plan: &Plan,
    ) -> Result<Subscription, GatewayError>;

    /// Authenticates and applies one inbound provider notification.
    ///
    /// Callers acknowledge the provider regardless of the result; errors
    /// from this method are logged and the event dropped, never retried
    /// synchronously.
    async fn handle_webhook(&self, request: &WebhookRequest)
        -> Result<WebhookOutcome, GatewayError>;

    /// Approval URL the subscriber must visit, for redirect-based
    /// providers. `None` for in-app and receipt providers.
    async fn redirect_target(
        &self,
        subscription: &Subscription,
    ) -> Result<Option<String>, GatewayError>;
}

/// Provider-specific inputs to subscription creation.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Proof of purchase: signed transaction payload (store-receipt) or
    /// purchase token (mobile-billing).
    pub proof: Option<String>,

    /// Where the provider sends the subscriber after approval.
    pub return_url: Option<String>,

    /// Where the provider sends the subscriber after aborting.
    pub cancel_url: Option<String>,

    /// Subscriber email, for providers that require one on the mandate.
    pub customer_email: Option<String>,
}

/// What became of an authenticated webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The event was applied to a subscription.
    Processed { event_type: String },

    /// The event was understood but deliberately not applied (unknown
    /// notification code, test ping, no matching record after logging).
    Ignored { event_type: String, reason: String },
}

/// Category of a gateway failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorCode {
    /// Bad or missing proof of purchase, malformed input.
    Validation,
    /// The provider rejected or failed the call.
    Provider,
    /// The provider cannot perform the requested action.
    UnsupportedOperation,
    /// Webhook failed authenticity verification.
    Authentication,
    /// The outbound call never completed.
    Network,
    /// No matching local record.
    NotFound,
}

/// Typed gateway failure with a retry hint.
#[derive(Debug, Clone)]
pub struct GatewayError {
    pub code: GatewayErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl GatewayError {
    pub fn new(code: GatewayErrorCode, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            retryable,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::Validation, message, false)
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::Provider, message, true)
    }

    pub fn unsupported(gateway: Gateway, operation: &str) -> Self {
        Self::new(
            GatewayErrorCode::UnsupportedOperation,
            format!("{} does not support {}", gateway, operation),
            false,
        )
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::Authentication, message, false)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::NotFound, message, false)
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for GatewayError {}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(
            GatewayErrorCode::Network,
            format!("provider call failed: {}", err),
            true,
        )
    }
}

impl From<DomainError> for GatewayError {
    fn from(err: DomainError) -> Self {
        let code = match err.code {
            ErrorCode::ValidationFailed
            | ErrorCode::EmptyField
            | ErrorCode::OutOfRange
            | ErrorCode::InvalidFormat => GatewayErrorCode::Validation,
            ErrorCode::SubscriptionNotFound | ErrorCode::PlanNotFound => GatewayErrorCode::NotFound,
            ErrorCode::UnsupportedOperation => GatewayErrorCode::UnsupportedOperation,
            ErrorCode::AuthenticationFailed => GatewayErrorCode::Authentication,
            _ => GatewayErrorCode::Provider,
        };
        Self::new(code, err.message, false)
    }
}

impl From<GatewayError> for DomainError {
    fn from(err: GatewayError) -> Self {
        let code = match err.code {
            GatewayErrorCode::Validation => ErrorCode::ValidationFailed,
            GatewayErrorCode::UnsupportedOperation => ErrorCode::UnsupportedOperation,
            GatewayErrorCode::Authentication => ErrorCode::AuthenticationFailed,
            GatewayErrorCode::NotFound => ErrorCode::SubscriptionNotFound,
            GatewayErrorCode::Provider | GatewayErrorCode::Network => ErrorCode::ProviderError,
        };
        DomainError::new(code, err.message).with_detail("retryable", err.retryable.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn SubscriptionGateway) {}

    #[test]
    fn unsupported_names_gateway_and_operation() {
        let err = GatewayError::unsupported(Gateway::Apple, "resume");
        assert_eq!(err.code, GatewayErrorCode::UnsupportedOperation);
        assert!(!err.retryable);
        assert!(err.message.contains("apple"));
        assert!(err.message.contains("resume"));
    }

    #[test]
    fn provider_errors_are_retryable() {
        assert!(GatewayError::provider("500 from upstream").retryable);
        assert!(!GatewayError::validation("bad receipt").retryable);
    }

    #[test]
    fn converts_to_domain_error_with_retry_detail() {
        let err: DomainError = GatewayError::provider("boom").into();
        assert_eq!(err.code, ErrorCode::ProviderError);
        assert_eq!(err.details.get("retryable"), Some(&"true".to_string()));
    }
}
