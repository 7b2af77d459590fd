//! In-memory adapters for tests and local development.

mod event_publisher;
mod plan_catalog;
mod subscription_store;

pub use event_publisher::InMemoryEventPublisher;
pub use plan_catalog::InMemoryPlanCatalog;
pub use subscription_store::InMemorySubscriptionStore;
