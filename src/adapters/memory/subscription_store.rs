//! In-memory subscription store.
//!
//! A single `RwLock` over the whole state makes every mutating operation
//! atomic, which is exactly the contract the port demands. Suitable for
//! tests and local development only.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::foundation::{
    DomainError, ErrorCode, PlanId, SubscriberRef, SubscriptionId, Timestamp,
};
use crate::domain::subscription::{Subscription, SubscriptionTransaction, UsageRecord};
use crate::domain::Gateway;
use crate::ports::store::{RenewalOutcome, SubscriptionStore, UsageOutcome};

#[derive(Debug, Default)]
struct State {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    transactions: Vec<SubscriptionTransaction>,
    usage: Vec<UsageRecord>,
}

/// Subscription store backed by process memory.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    state: RwLock<State>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Usage records for one subscription, for test assertions.
    pub async fn usage_records(&self, id: SubscriptionId) -> Vec<UsageRecord> {
        self.state
            .read()
            .await
            .usage
            .iter()
            .filter(|u| u.subscription_id == id)
            .cloned()
            .collect()
    }
}

fn not_found(id: SubscriptionId) -> DomainError {
    DomainError::new(
        ErrorCode::SubscriptionNotFound,
        format!("Subscription {} not found", id),
    )
}

fn sum_usage(state: &State, id: SubscriptionId, feature_slug: &str) -> u64 {
    state
        .usage
        .iter()
        .filter(|u| u.subscription_id == id && u.feature_slug == feature_slug)
        .map(|u| u.used)
        .sum()
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn insert(&self, subscription: Subscription) -> Result<(), DomainError> {
        let mut state = self.state.write().await;

        if let Some(gateway_id) = &subscription.gateway_id {
            let duplicate = state.subscriptions.values().any(|s| {
                s.subscriber == subscription.subscriber
                    && s.gateway == subscription.gateway
                    && s.gateway_id.as_deref() == Some(gateway_id)
            });
            if duplicate {
                return Err(DomainError::new(
                    ErrorCode::DuplicateSubscription,
                    "Subscription already exists for this subscriber, gateway, and gateway id",
                )
                .with_detail("gateway", subscription.gateway.to_string())
                .with_detail("gateway_id", gateway_id.clone()));
            }
        }

        state.subscriptions.insert(subscription.id, subscription);
        Ok(())
    }

    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        Ok(self.state.read().await.subscriptions.get(&id).cloned())
    }

    async fn find_by_gateway_id(
        &self,
        gateway: Gateway,
        gateway_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .values()
            .find(|s| s.gateway == gateway && s.gateway_id.as_deref() == Some(gateway_id))
            .cloned())
    }

    async fn list_for_subscriber(
        &self,
        subscriber: &SubscriberRef,
    ) -> Result<Vec<Subscription>, DomainError> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .values()
            .filter(|s| &s.subscriber == subscriber)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: SubscriptionId) -> Result<(), DomainError> {
        let mut state = self.state.write().await;
        if state.subscriptions.remove(&id).is_none() {
            return Err(not_found(id));
        }
        state.transactions.retain(|t| t.subscription_id != id);
        state.usage.retain(|u| u.subscription_id != id);
        Ok(())
    }

    async fn confirm(
        &self,
        id: SubscriptionId,
        gateway_id: Option<String>,
        ends_at: Option<Timestamp>,
        grace_days: u32,
        gateway_response: Option<serde_json::Value>,
    ) -> Result<Subscription, DomainError> {
        let mut state = self.state.write().await;
        let sub = state.subscriptions.get_mut(&id).ok_or_else(|| not_found(id))?;

        sub.mark_confirmed(gateway_id, gateway_response);
        if let Some(ends_at) = ends_at {
            sub.set_period_end(ends_at, grace_days);
        }
        Ok(sub.clone())
    }

    async fn advance_period(
        &self,
        id: SubscriptionId,
        expected_ends_at: Option<Timestamp>,
        new_ends_at: Timestamp,
        grace_days: u32,
    ) -> Result<RenewalOutcome, DomainError> {
        let mut state = self.state.write().await;
        let sub = state.subscriptions.get_mut(&id).ok_or_else(|| not_found(id))?;

        if sub.ends_at != expected_ends_at {
            return Ok(RenewalOutcome::AlreadyApplied(sub.clone()));
        }
        sub.apply_renewal(new_ends_at, grace_days);
        Ok(RenewalOutcome::Applied(sub.clone()))
    }

    async fn cancel(
        &self,
        id: SubscriptionId,
        immediate: bool,
    ) -> Result<Subscription, DomainError> {
        let mut state = self.state.write().await;
        let sub = state.subscriptions.get_mut(&id).ok_or_else(|| not_found(id))?;

        sub.apply_cancel(immediate);
        Ok(sub.clone())
    }

    async fn resume(&self, id: SubscriptionId) -> Result<Subscription, DomainError> {
        let mut state = self.state.write().await;
        let sub = state.subscriptions.get_mut(&id).ok_or_else(|| not_found(id))?;

        sub.apply_resume();
        Ok(sub.clone())
    }

    async fn swap_plan(
        &self,
        id: SubscriptionId,
        new_plan_id: PlanId,
    ) -> Result<Subscription, DomainError> {
        let mut state = self.state.write().await;
        let sub = state.subscriptions.get_mut(&id).ok_or_else(|| not_found(id))?;

        sub.apply_swap(new_plan_id);
        let result = sub.clone();
        state.usage.retain(|u| u.subscription_id != id);
        Ok(result)
    }

    async fn record_transaction(
        &self,
        transaction: SubscriptionTransaction,
    ) -> Result<(), DomainError> {
        let mut state = self.state.write().await;
        if !state.subscriptions.contains_key(&transaction.subscription_id) {
            return Err(not_found(transaction.subscription_id));
        }
        state.transactions.push(transaction);
        Ok(())
    }

    async fn transactions_for(
        &self,
        id: SubscriptionId,
    ) -> Result<Vec<SubscriptionTransaction>, DomainError> {
        Ok(self
            .state
            .read()
            .await
            .transactions
            .iter()
            .filter(|t| t.subscription_id == id)
            .cloned()
            .collect())
    }

    async fn try_record_usage(
        &self,
        id: SubscriptionId,
        feature_slug: &str,
        quantity: u64,
        quota: Option<u64>,
    ) -> Result<UsageOutcome, DomainError> {
        let mut state = self.state.write().await;
        if !state.subscriptions.contains_key(&id) {
            return Err(not_found(id));
        }

        let used = sum_usage(&state, id, feature_slug);
        if let Some(quota) = quota {
            if used + quantity > quota {
                return Ok(UsageOutcome::Rejected {
                    remaining: quota.saturating_sub(used),
                });
            }
        }

        state
            .usage
            .push(UsageRecord::new(id, feature_slug, quantity));
        Ok(UsageOutcome::Recorded {
            total_used: used + quantity,
        })
    }

    async fn used_for_feature(
        &self,
        id: SubscriptionId,
        feature_slug: &str,
    ) -> Result<u64, DomainError> {
        Ok(sum_usage(&*self.state.read().await, id, feature_slug))
    }

    async fn due_for_renewal(&self, limit: u32) -> Result<Vec<Subscription>, DomainError> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .values()
            .filter(|s| s.canceled_at.is_none() && s.ends_at.is_some_and(|e| e.is_past()))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{Currency, Money};
    use crate::domain::plan::{BillingInterval, Plan};

    fn plan() -> Plan {
        Plan::new(
            "Premium",
            "premium",
            Money::from_minor_units(999),
            Currency::USD,
            BillingInterval::Month,
            1,
        )
        .unwrap()
    }

    fn subscriber() -> SubscriberRef {
        SubscriberRef::new("user", "7").unwrap()
    }

    async fn seeded_store() -> (InMemorySubscriptionStore, Subscription) {
        let store = InMemorySubscriptionStore::new();
        let mut sub = Subscription::new(subscriber(), &plan(), Gateway::Xendit);
        sub.gateway_id = Some("xnd-rp-1".into());
        sub.set_period_end(Timestamp::now().plus_days(30), 0);
        store.insert(sub.clone()).await.unwrap();
        (store, sub)
    }

    #[tokio::test]
    async fn rejects_duplicate_gateway_id_for_same_subscriber() {
        let (store, sub) = seeded_store().await;

        let mut dup = Subscription::new(subscriber(), &plan(), Gateway::Xendit);
        dup.gateway_id = sub.gateway_id.clone();

        let err = store.insert(dup).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::DuplicateSubscription);
    }

    #[tokio::test]
    async fn advance_period_applies_once_under_duplicate_delivery() {
        let (store, sub) = seeded_store().await;
        let expected = sub.ends_at;
        let target = sub.ends_at.unwrap().plus_months(1);

        let first = store
            .advance_period(sub.id, expected, target, 0)
            .await
            .unwrap();
        let second = store
            .advance_period(sub.id, expected, target, 0)
            .await
            .unwrap();

        let RenewalOutcome::Applied(after_first) = first else {
            panic!("first delivery must apply");
        };
        assert_eq!(after_first.renewal_count, 1);

        let RenewalOutcome::AlreadyApplied(after_second) = second else {
            panic!("second delivery must converge");
        };
        assert_eq!(after_second.ends_at, Some(target));
        assert_eq!(after_second.renewal_count, 1);
    }

    #[tokio::test]
    async fn concurrent_renewals_increment_once() {
        let (store, sub) = seeded_store().await;
        let store = std::sync::Arc::new(store);
        let expected = sub.ends_at;
        let target = sub.ends_at.unwrap().plus_months(1);

        let a = {
            let store = store.clone();
            tokio::spawn(async move { store.advance_period(sub.id, expected, target, 0).await })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { store.advance_period(sub.id, expected, target, 0).await })
        };

        let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
        let applied = outcomes
            .iter()
            .filter(|o| matches!(o, RenewalOutcome::Applied(_)))
            .count();
        assert_eq!(applied, 1);

        let current = store.get(sub.id).await.unwrap().unwrap();
        assert_eq!(current.renewal_count, 1);
        assert_eq!(current.ends_at, Some(target));
    }

    #[tokio::test]
    async fn usage_quota_is_checked_atomically() {
        let (store, sub) = seeded_store().await;

        let first = store
            .try_record_usage(sub.id, "api-calls", 60, Some(100))
            .await
            .unwrap();
        assert_eq!(first, UsageOutcome::Recorded { total_used: 60 });

        let second = store
            .try_record_usage(sub.id, "api-calls", 50, Some(100))
            .await
            .unwrap();
        assert_eq!(second, UsageOutcome::Rejected { remaining: 40 });

        // rejected call appended nothing
        assert_eq!(store.used_for_feature(sub.id, "api-calls").await.unwrap(), 60);
    }

    #[tokio::test]
    async fn unmetered_feature_always_records() {
        let (store, sub) = seeded_store().await;
        let outcome = store
            .try_record_usage(sub.id, "anything", 1_000_000, None)
            .await
            .unwrap();
        assert!(matches!(outcome, UsageOutcome::Recorded { .. }));
    }

    #[tokio::test]
    async fn swap_plan_deletes_usage() {
        let (store, sub) = seeded_store().await;
        store
            .try_record_usage(sub.id, "api-calls", 60, Some(100))
            .await
            .unwrap();

        let new_plan = plan();
        store.swap_plan(sub.id, new_plan.id()).await.unwrap();

        assert!(store.usage_records(sub.id).await.is_empty());
        let swapped = store.get(sub.id).await.unwrap().unwrap();
        assert_eq!(swapped.plan_id, new_plan.id());
    }

    #[tokio::test]
    async fn due_for_renewal_skips_canceled_and_current() {
        let store = InMemorySubscriptionStore::new();

        let mut due = Subscription::new(subscriber(), &plan(), Gateway::Google);
        due.set_period_end(Timestamp::now().minus_days(1), 0);

        let mut current = Subscription::new(SubscriberRef::new("user", "8").unwrap(), &plan(), Gateway::Google);
        current.set_period_end(Timestamp::now().plus_days(10), 0);

        let mut canceled = Subscription::new(SubscriberRef::new("user", "9").unwrap(), &plan(), Gateway::Google);
        canceled.set_period_end(Timestamp::now().minus_days(1), 0);
        canceled.apply_cancel(false);

        store.insert(due.clone()).await.unwrap();
        store.insert(current).await.unwrap();
        store.insert(canceled).await.unwrap();

        let found = store.due_for_renewal(10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
    }
}
