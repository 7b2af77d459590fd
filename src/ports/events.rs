//! EventPublisher port - interface for publishing domain events.
//!
//! The domain publishes events without knowing the transport (in-memory,
//! message bus, outbox table).

use async_trait::async_trait;

use crate::domain::foundation::DomainError;
use crate::domain::subscription::SubscriptionEvent;

/// Port for publishing domain events.
///
/// Delivery is at-least-once; handlers must tolerate duplicates.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a single event.
    async fn publish(&self, event: SubscriptionEvent) -> Result<(), DomainError>;

    /// Publish multiple events in order.
    ///
    /// Adapters without atomic batching publish sequentially with
    /// best-effort delivery.
    async fn publish_all(&self, events: Vec<SubscriptionEvent>) -> Result<(), DomainError> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn EventPublisher) {}
}
