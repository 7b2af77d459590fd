//! Ports: interfaces the domain needs from the outside world.
//!
//! Adapters implement these traits; the application layer depends only on
//! the traits, never on concrete providers or storage.

pub mod events;
pub mod gateway;
pub mod store;
pub mod webhook;

pub use events::EventPublisher;
pub use gateway::{
    CreateOptions, GatewayError, GatewayErrorCode, SubscriptionGateway, WebhookOutcome,
};
pub use store::{PlanCatalog, RenewalOutcome, SubscriptionStore, UsageOutcome};
pub use webhook::WebhookRequest;
