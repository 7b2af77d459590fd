//! Domain events published after subscription state changes.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{Currency, Money, PlanId, SubscriptionId, Timestamp};
use crate::domain::Gateway;

/// Events emitted through the `EventPublisher` port.
///
/// Events carry identifiers and the minimum facts a consumer needs;
/// subscribers load current state through the store when they need more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionEvent {
    Created {
        subscription_id: SubscriptionId,
        plan_id: PlanId,
        gateway: Gateway,
    },
    Renewed {
        subscription_id: SubscriptionId,
        new_ends_at: Timestamp,
        renewal_count: u32,
    },
    Canceled {
        subscription_id: SubscriptionId,
        immediate: bool,
    },
    Resumed {
        subscription_id: SubscriptionId,
    },
    Swapped {
        subscription_id: SubscriptionId,
        old_plan_id: PlanId,
        new_plan_id: PlanId,
    },
    PaymentSucceeded {
        subscription_id: SubscriptionId,
        amount: Money,
        currency: Currency,
        gateway_transaction_id: Option<String>,
    },
    PaymentFailed {
        subscription_id: SubscriptionId,
        amount: Money,
        currency: Currency,
        gateway_transaction_id: Option<String>,
    },
    FeatureUsed {
        subscription_id: SubscriptionId,
        feature_slug: String,
        used: u64,
    },
    FeatureLimitExceeded {
        subscription_id: SubscriptionId,
        feature_slug: String,
        requested: u64,
        remaining: u64,
    },
    WebhookReceived {
        gateway: Gateway,
        event_type: String,
    },
}

impl SubscriptionEvent {
    /// Stable event name for logging and routing.
    pub fn name(&self) -> &'static str {
        match self {
            SubscriptionEvent::Created { .. } => "subscription.created",
            SubscriptionEvent::Renewed { .. } => "subscription.renewed",
            SubscriptionEvent::Canceled { .. } => "subscription.canceled",
            SubscriptionEvent::Resumed { .. } => "subscription.resumed",
            SubscriptionEvent::Swapped { .. } => "subscription.swapped",
            SubscriptionEvent::PaymentSucceeded { .. } => "payment.succeeded",
            SubscriptionEvent::PaymentFailed { .. } => "payment.failed",
            SubscriptionEvent::FeatureUsed { .. } => "feature.used",
            SubscriptionEvent::FeatureLimitExceeded { .. } => "feature.limit_exceeded",
            SubscriptionEvent::WebhookReceived { .. } => "webhook.received",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_stable() {
        let e = SubscriptionEvent::Resumed {
            subscription_id: SubscriptionId::new(),
        };
        assert_eq!(e.name(), "subscription.resumed");
    }

    #[test]
    fn serializes_with_type_tag() {
        let e = SubscriptionEvent::WebhookReceived {
            gateway: Gateway::Google,
            event_type: "SUBSCRIPTION_RENEWED".into(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "webhook_received");
        assert_eq!(json["gateway"], "google");
    }
}
