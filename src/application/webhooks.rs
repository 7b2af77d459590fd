//! Webhook intake use case.
//!
//! Providers retry on non-2xx responses, and a retried event we cannot
//! process will fail the same way every time. The service therefore always
//! produces an acknowledgeable disposition: failures are logged with full
//! context and the event is dropped, never bounced back to the provider.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::adapters::gateways::GatewayRegistry;
use crate::domain::subscription::SubscriptionEvent;
use crate::domain::Gateway;
use crate::ports::{EventPublisher, WebhookOutcome, WebhookRequest};

/// What the intake did with a delivery. Every variant is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// Applied to a subscription.
    Processed { event_type: String },

    /// Understood but deliberately not applied.
    Ignored { event_type: String, reason: String },

    /// Authentication or processing failed; the event was logged and
    /// dropped.
    Dropped { error: String },
}

pub struct WebhookService {
    gateways: Arc<GatewayRegistry>,
    events: Arc<dyn EventPublisher>,
}

impl WebhookService {
    pub fn new(gateways: Arc<GatewayRegistry>, events: Arc<dyn EventPublisher>) -> Self {
        Self { gateways, events }
    }

    /// Handles one inbound delivery for a gateway.
    pub async fn handle(&self, gateway: Gateway, request: &WebhookRequest) -> WebhookDisposition {
        let adapter = match self.gateways.get(gateway) {
            Ok(adapter) => adapter,
            Err(e) => {
                error!(gateway = %gateway, error = %e, "webhook for unconfigured gateway");
                return WebhookDisposition::Dropped {
                    error: e.to_string(),
                };
            }
        };

        match adapter.handle_webhook(request).await {
            Ok(WebhookOutcome::Processed { event_type }) => {
                self.publish_received(gateway, &event_type).await;
                info!(gateway = %gateway, event_type = %event_type, "webhook processed");
                WebhookDisposition::Processed { event_type }
            }
            Ok(WebhookOutcome::Ignored { event_type, reason }) => {
                self.publish_received(gateway, &event_type).await;
                info!(
                    gateway = %gateway,
                    event_type = %event_type,
                    reason = %reason,
                    "webhook ignored"
                );
                WebhookDisposition::Ignored { event_type, reason }
            }
            Err(e) => {
                error!(
                    gateway = %gateway,
                    code = ?e.code,
                    error = %e.message,
                    "webhook dropped"
                );
                WebhookDisposition::Dropped {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn publish_received(&self, gateway: Gateway, event_type: &str) {
        let event = SubscriptionEvent::WebhookReceived {
            gateway,
            event_type: event_type.to_string(),
        };
        if let Err(e) = self.events.publish(event).await {
            warn!(gateway = %gateway, error = %e, "failed to publish webhook event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryEventPublisher;

    #[tokio::test]
    async fn unconfigured_gateway_is_dropped_not_panicked() {
        let registry = Arc::new(GatewayRegistry::from_adapters(std::iter::empty()));
        let events = Arc::new(InMemoryEventPublisher::new());
        let service = WebhookService::new(registry, events.clone());

        let request = WebhookRequest::from_body(b"{}".to_vec());
        let disposition = service.handle(Gateway::Paypal, &request).await;

        assert!(matches!(disposition, WebhookDisposition::Dropped { .. }));
        assert!(events.events().is_empty());
    }
}
