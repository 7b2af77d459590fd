//! Shared kernel value objects used across the domain.

pub mod account_token;
pub mod errors;
pub mod ids;
pub mod money;
pub mod timestamp;

pub use account_token::AccountTokenCodec;
pub use errors::{DomainError, ErrorCode, ValidationError};
pub use ids::{PlanId, SubscriberRef, SubscriptionId, TransactionId};
pub use money::{Currency, Money};
pub use timestamp::Timestamp;
