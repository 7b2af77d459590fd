//! The canonical subscription record and its lifecycle.

pub mod aggregate;
pub mod events;
pub mod signal;
pub mod transaction;
pub mod usage;

pub use aggregate::Subscription;
pub use events::SubscriptionEvent;
pub use signal::{ProviderNotification, Signal};
pub use transaction::{SubscriptionTransaction, TransactionStatus, TransactionType};
pub use usage::UsageRecord;
