//! In-memory event publisher that records published events.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::domain::foundation::DomainError;
use crate::domain::subscription::SubscriptionEvent;
use crate::ports::EventPublisher;

/// Records events in publication order. Tests assert on `events()`.
#[derive(Debug, Default)]
pub struct InMemoryEventPublisher {
    events: Mutex<Vec<SubscriptionEvent>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events published so far.
    pub fn events(&self) -> Vec<SubscriptionEvent> {
        self.events.lock().expect("publisher lock poisoned").clone()
    }

    /// Events matching a stable name (e.g. "subscription.renewed").
    pub fn events_named(&self, name: &str) -> Vec<SubscriptionEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.name() == name)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: SubscriptionEvent) -> Result<(), DomainError> {
        self.events
            .lock()
            .expect("publisher lock poisoned")
            .push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::SubscriptionId;

    #[tokio::test]
    async fn records_events_in_order() {
        let publisher = InMemoryEventPublisher::new();
        let id = SubscriptionId::new();

        publisher
            .publish(SubscriptionEvent::Resumed {
                subscription_id: id,
            })
            .await
            .unwrap();
        publisher
            .publish(SubscriptionEvent::Canceled {
                subscription_id: id,
                immediate: false,
            })
            .await
            .unwrap();

        let events = publisher.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name(), "subscription.resumed");
        assert_eq!(publisher.events_named("subscription.canceled").len(), 1);
    }
}
