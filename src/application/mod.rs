//! Application services: the use-case surface consumers call.
//!
//! Services orchestrate ports and gateway adapters; all state mutation
//! still happens inside the adapters' shared core so the services stay
//! thin.

mod renewals;
mod subscriptions;
mod webhooks;

pub use renewals::{RenewalService, RenewalSweep};
pub use subscriptions::SubscriptionService;
pub use webhooks::{WebhookDisposition, WebhookService};
