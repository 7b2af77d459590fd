//! Persistence ports for subscriptions and plans.
//!
//! Webhook delivery is at-least-once and concurrent, so every mutating
//! operation here is a single atomic update scoped to one subscription row,
//! never read-modify-write. Renewal takes the expected current period end
//! as a compare-and-set guard; usage recording is an atomic check-and-append
//! per (subscription, feature).

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, PlanId, SubscriberRef, SubscriptionId, Timestamp};
use crate::domain::plan::Plan;
use crate::domain::subscription::{Subscription, SubscriptionTransaction};
use crate::domain::Gateway;

/// Result of a compare-and-set renewal.
#[derive(Debug, Clone, PartialEq)]
pub enum RenewalOutcome {
    /// The period advanced and the renewal counter incremented.
    Applied(Subscription),

    /// The row's period end no longer matched the expectation: another
    /// delivery of the same renewal already applied it. Carries current
    /// state so duplicate deliveries converge without a second mutation.
    AlreadyApplied(Subscription),
}

/// Result of an atomic usage check-and-append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageOutcome {
    /// The record was appended; carries the new period total.
    Recorded { total_used: u64 },

    /// The quota would have been exceeded; nothing was appended. Carries
    /// the remaining allowance.
    Rejected { remaining: u64 },
}

/// Port for durable subscription state with atomic per-row mutations.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Inserts a new subscription.
    ///
    /// Fails with `DUPLICATE_SUBSCRIPTION` when a record already exists for
    /// the same (subscriber, gateway, gateway_id).
    async fn insert(&self, subscription: Subscription) -> Result<(), DomainError>;

    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError>;

    /// Looks up a subscription by the provider's own id.
    async fn find_by_gateway_id(
        &self,
        gateway: Gateway,
        gateway_id: &str,
    ) -> Result<Option<Subscription>, DomainError>;

    async fn list_for_subscriber(
        &self,
        subscriber: &SubscriberRef,
    ) -> Result<Vec<Subscription>, DomainError>;

    /// Removes a subscription together with its transactions and usage.
    /// Rolls back a creation whose gateway confirmation failed.
    async fn delete(&self, id: SubscriptionId) -> Result<(), DomainError>;

    /// Marks a subscription confirmed by its gateway: assigns the provider
    /// id and response, sets the paid period end, in one update.
    async fn confirm(
        &self,
        id: SubscriptionId,
        gateway_id: Option<String>,
        ends_at: Option<Timestamp>,
        grace_days: u32,
        gateway_response: Option<serde_json::Value>,
    ) -> Result<Subscription, DomainError>;

    /// Advances the paid period, guarded by the expected current period end.
    ///
    /// When the stored `ends_at` does not match `expected_ends_at` the
    /// renewal was already applied by a concurrent delivery; the store
    /// returns `AlreadyApplied` and changes nothing.
    async fn advance_period(
        &self,
        id: SubscriptionId,
        expected_ends_at: Option<Timestamp>,
        new_ends_at: Timestamp,
        grace_days: u32,
    ) -> Result<RenewalOutcome, DomainError>;

    /// Applies a cancel. Idempotent: an already-canceled row is returned
    /// unchanged.
    async fn cancel(
        &self,
        id: SubscriptionId,
        immediate: bool,
    ) -> Result<Subscription, DomainError>;

    /// Clears a pending cancellation. No-op when not canceled.
    async fn resume(&self, id: SubscriptionId) -> Result<Subscription, DomainError>;

    /// Reassigns the plan and deletes all usage records in one atomic
    /// operation. Quota resets on plan change by policy.
    async fn swap_plan(
        &self,
        id: SubscriptionId,
        new_plan_id: PlanId,
    ) -> Result<Subscription, DomainError>;

    /// Appends an immutable transaction record.
    async fn record_transaction(
        &self,
        transaction: SubscriptionTransaction,
    ) -> Result<(), DomainError>;

    async fn transactions_for(
        &self,
        id: SubscriptionId,
    ) -> Result<Vec<SubscriptionTransaction>, DomainError>;

    /// Atomically checks the quota and appends a usage record.
    ///
    /// `quota` of `None` means the feature is unmetered for the plan; the
    /// record is always appended.
    async fn try_record_usage(
        &self,
        id: SubscriptionId,
        feature_slug: &str,
        quantity: u64,
        quota: Option<u64>,
    ) -> Result<UsageOutcome, DomainError>;

    /// Summed usage for one feature on one subscription.
    async fn used_for_feature(
        &self,
        id: SubscriptionId,
        feature_slug: &str,
    ) -> Result<u64, DomainError>;

    /// Subscriptions whose period end has passed and that are not canceled,
    /// for the renewal sweep.
    async fn due_for_renewal(&self, limit: u32) -> Result<Vec<Subscription>, DomainError>;
}

/// Port for plan lookup. Pure reads; plan CRUD lives outside the core.
#[async_trait]
pub trait PlanCatalog: Send + Sync {
    async fn get(&self, id: PlanId) -> Result<Option<Plan>, DomainError>;

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Plan>, DomainError>;

    /// Matches a plan by any of its provider-side identifiers on one
    /// gateway (plan id, offer id, product id).
    async fn find_by_provider_id(
        &self,
        gateway: Gateway,
        provider_id: &str,
    ) -> Result<Option<Plan>, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn SubscriptionStore, _: &dyn PlanCatalog) {}
}
