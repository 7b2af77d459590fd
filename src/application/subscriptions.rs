//! Subscription lifecycle and feature usage use cases.

use std::sync::Arc;

use tracing::{info, warn};

use crate::adapters::gateways::GatewayRegistry;
use crate::domain::foundation::{DomainError, ErrorCode, SubscriberRef, SubscriptionId};
use crate::domain::plan::Plan;
use crate::domain::subscription::{Subscription, SubscriptionEvent, SubscriptionTransaction};
use crate::domain::Gateway;
use crate::ports::store::UsageOutcome;
use crate::ports::{CreateOptions, EventPublisher, PlanCatalog, SubscriptionStore};

/// The lifecycle surface: subscribe, cancel, resume, swap, and metered
/// feature usage.
pub struct SubscriptionService {
    store: Arc<dyn SubscriptionStore>,
    plans: Arc<dyn PlanCatalog>,
    events: Arc<dyn EventPublisher>,
    gateways: Arc<GatewayRegistry>,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        plans: Arc<dyn PlanCatalog>,
        events: Arc<dyn EventPublisher>,
        gateways: Arc<GatewayRegistry>,
    ) -> Self {
        Self {
            store,
            plans,
            events,
            gateways,
        }
    }

    /// Subscribes a subscriber to a plan through a gateway.
    ///
    /// The local record is created first, pending; the gateway adapter then
    /// verifies proof of purchase or opens a redirect flow and confirms it.
    /// When the adapter rejects, the pending record is removed again.
    pub async fn subscribe(
        &self,
        subscriber: SubscriberRef,
        plan_slug: &str,
        gateway: Gateway,
        options: CreateOptions,
    ) -> Result<Subscription, DomainError> {
        let plan = self.plan_by_slug(plan_slug).await?;
        if !plan.is_active() {
            return Err(DomainError::new(
                ErrorCode::ValidationFailed,
                format!("Plan '{}' is no longer offered", plan_slug),
            ));
        }

        let subscription = Subscription::new(subscriber, &plan, gateway);
        self.store.insert(subscription.clone()).await?;

        let adapter = self.gateways.get(gateway)?;
        let confirmed = match adapter
            .create_subscription(&subscription, &plan, options)
            .await
        {
            Ok(confirmed) => confirmed,
            // The pending record must not survive a rejected purchase; it
            // would grant access with no provider backing it.
            Err(e) => {
                if let Err(cleanup) = self.store.delete(subscription.id).await {
                    warn!(
                        subscription_id = %subscription.id,
                        error = %cleanup,
                        "failed to roll back rejected subscription"
                    );
                }
                return Err(e.into());
            }
        };

        info!(
            subscription_id = %confirmed.id,
            plan = plan_slug,
            gateway = %gateway,
            "subscription created"
        );
        Ok(confirmed)
    }

    /// Cancels a subscription, immediately or at period end.
    pub async fn cancel(
        &self,
        id: SubscriptionId,
        immediate: bool,
    ) -> Result<Subscription, DomainError> {
        let subscription = self.required(id).await?;
        let adapter = self.gateways.get(subscription.gateway)?;
        Ok(adapter.cancel_subscription(&subscription, immediate).await?)
    }

    /// Clears a pending cancellation, where the provider supports it.
    pub async fn resume(&self, id: SubscriptionId) -> Result<Subscription, DomainError> {
        let subscription = self.required(id).await?;
        let adapter = self.gateways.get(subscription.gateway)?;
        Ok(adapter.resume_subscription(&subscription).await?)
    }

    /// Moves the subscription to a different plan, where the provider
    /// supports it. Usage resets.
    pub async fn swap(
        &self,
        id: SubscriptionId,
        new_plan_slug: &str,
    ) -> Result<Subscription, DomainError> {
        let subscription = self.required(id).await?;
        let new_plan = self.plan_by_slug(new_plan_slug).await?;
        if new_plan.id() == subscription.plan_id {
            return Ok(subscription);
        }

        let adapter = self.gateways.get(subscription.gateway)?;
        Ok(adapter.swap_plan(&subscription, &new_plan).await?)
    }

    /// Approval URL for a redirect-based subscription awaiting payer
    /// action, `None` otherwise.
    pub async fn redirect_target(
        &self,
        id: SubscriptionId,
    ) -> Result<Option<String>, DomainError> {
        let subscription = self.required(id).await?;
        let adapter = self.gateways.get(subscription.gateway)?;
        Ok(adapter.redirect_target(&subscription).await?)
    }

    pub async fn subscription(
        &self,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, DomainError> {
        self.store.get(id).await
    }

    pub async fn subscriptions_for(
        &self,
        subscriber: &SubscriberRef,
    ) -> Result<Vec<Subscription>, DomainError> {
        self.store.list_for_subscriber(subscriber).await
    }

    pub async fn transactions(
        &self,
        id: SubscriptionId,
    ) -> Result<Vec<SubscriptionTransaction>, DomainError> {
        self.store.transactions_for(id).await
    }

    /// Whether the subscriber could consume `quantity` of a feature right
    /// now. Does not record anything.
    pub async fn can_use_feature(
        &self,
        id: SubscriptionId,
        feature_slug: &str,
        quantity: u64,
    ) -> Result<bool, DomainError> {
        let subscription = self.required(id).await?;
        if !subscription.is_active() {
            return Ok(false);
        }

        let plan = self.plan_for(&subscription).await?;
        match plan.quota_for(feature_slug) {
            // Undeclared features are unmetered.
            None => Ok(true),
            Some(quota) => {
                let used = self.store.used_for_feature(id, feature_slug).await?;
                Ok(used + quantity <= quota)
            }
        }
    }

    /// Records feature consumption against the plan quota.
    ///
    /// The check and the append are one atomic store operation, so two
    /// concurrent calls cannot both squeeze under the quota.
    ///
    /// # Errors
    ///
    /// `SUBSCRIPTION_INACTIVE` when access has lapsed; `QUOTA_EXCEEDED`
    /// when the quantity does not fit, with the remaining allowance in the
    /// error details.
    pub async fn record_usage(
        &self,
        id: SubscriptionId,
        feature_slug: &str,
        quantity: u64,
    ) -> Result<u64, DomainError> {
        let subscription = self.required(id).await?;
        if !subscription.is_active() {
            return Err(DomainError::new(
                ErrorCode::SubscriptionInactive,
                format!("Subscription {} is not active", id),
            ));
        }

        let plan = self.plan_for(&subscription).await?;
        let quota = plan.quota_for(feature_slug);

        match self
            .store
            .try_record_usage(id, feature_slug, quantity, quota)
            .await?
        {
            UsageOutcome::Recorded { total_used } => {
                self.events
                    .publish(SubscriptionEvent::FeatureUsed {
                        subscription_id: id,
                        feature_slug: feature_slug.to_string(),
                        used: quantity,
                    })
                    .await?;
                Ok(total_used)
            }
            UsageOutcome::Rejected { remaining } => {
                self.events
                    .publish(SubscriptionEvent::FeatureLimitExceeded {
                        subscription_id: id,
                        feature_slug: feature_slug.to_string(),
                        requested: quantity,
                        remaining,
                    })
                    .await?;
                Err(DomainError::quota_exceeded(feature_slug)
                    .with_detail("remaining", remaining.to_string()))
            }
        }
    }

    /// Remaining allowance for a feature. `None` means unmetered.
    pub async fn remaining_usage(
        &self,
        id: SubscriptionId,
        feature_slug: &str,
    ) -> Result<Option<u64>, DomainError> {
        let subscription = self.required(id).await?;
        let plan = self.plan_for(&subscription).await?;
        match plan.quota_for(feature_slug) {
            None => Ok(None),
            Some(quota) => {
                let used = self.store.used_for_feature(id, feature_slug).await?;
                Ok(Some(quota.saturating_sub(used)))
            }
        }
    }

    async fn required(&self, id: SubscriptionId) -> Result<Subscription, DomainError> {
        self.store.get(id).await?.ok_or_else(|| {
            DomainError::new(
                ErrorCode::SubscriptionNotFound,
                format!("Subscription {} not found", id),
            )
        })
    }

    async fn plan_by_slug(&self, slug: &str) -> Result<Plan, DomainError> {
        self.plans.find_by_slug(slug).await?.ok_or_else(|| {
            DomainError::new(ErrorCode::PlanNotFound, format!("Plan '{}' not found", slug))
        })
    }

    async fn plan_for(&self, subscription: &Subscription) -> Result<Plan, DomainError> {
        self.plans.get(subscription.plan_id).await?.ok_or_else(|| {
            DomainError::new(
                ErrorCode::PlanNotFound,
                format!("Plan {} not found", subscription.plan_id),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::adapters::memory::{
        InMemoryEventPublisher, InMemoryPlanCatalog, InMemorySubscriptionStore,
    };
    use crate::domain::foundation::{Currency, Money};
    use crate::domain::plan::BillingInterval;
    use crate::ports::{GatewayError, SubscriptionGateway, WebhookOutcome, WebhookRequest};

    /// Adapter that rejects every purchase, as a provider would for a bad
    /// receipt or declined mandate.
    struct RejectingGateway {
        error: GatewayError,
    }

    #[async_trait]
    impl SubscriptionGateway for RejectingGateway {
        fn gateway(&self) -> Gateway {
            Gateway::Paypal
        }

        async fn create_subscription(
            &self,
            _subscription: &Subscription,
            _plan: &Plan,
            _options: CreateOptions,
        ) -> Result<Subscription, GatewayError> {
            Err(self.error.clone())
        }

        async fn cancel_subscription(
            &self,
            _subscription: &Subscription,
            _immediate: bool,
        ) -> Result<Subscription, GatewayError> {
            unimplemented!()
        }

        async fn resume_subscription(
            &self,
            _subscription: &Subscription,
        ) -> Result<Subscription, GatewayError> {
            unimplemented!()
        }

        async fn swap_plan(
            &self,
            _subscription: &Subscription,
            _new_plan: &Plan,
        ) -> Result<Subscription, GatewayError> {
            unimplemented!()
        }

        async fn handle_webhook(
            &self,
            _request: &WebhookRequest,
        ) -> Result<WebhookOutcome, GatewayError> {
            unimplemented!()
        }

        async fn redirect_target(
            &self,
            _subscription: &Subscription,
        ) -> Result<Option<String>, GatewayError> {
            Ok(None)
        }
    }

    async fn service_with(
        error: GatewayError,
    ) -> (SubscriptionService, Arc<InMemorySubscriptionStore>) {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let plans = Arc::new(InMemoryPlanCatalog::new());
        let events = Arc::new(InMemoryEventPublisher::new());

        let plan = Plan::new(
            "Premium",
            "premium",
            Money::from_minor_units(1999),
            Currency::USD,
            BillingInterval::Month,
            1,
        )
        .unwrap();
        plans.insert(plan).await;

        let registry = Arc::new(crate::adapters::gateways::GatewayRegistry::from_adapters([
            Arc::new(RejectingGateway { error }) as Arc<dyn SubscriptionGateway>,
        ]));
        let service = SubscriptionService::new(store.clone(), plans, events, registry);
        (service, store)
    }

    #[tokio::test]
    async fn rejected_purchase_leaves_no_subscription_behind() {
        let (service, store) = service_with(GatewayError::validation("bad receipt")).await;
        let subscriber = SubscriberRef::new("user", "42").unwrap();

        let err = service
            .subscribe(
                subscriber.clone(),
                "premium",
                Gateway::Paypal,
                CreateOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);

        let remaining = store.list_for_subscriber(&subscriber).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn failed_provider_call_leaves_no_local_state() {
        let (service, store) = service_with(GatewayError::provider("upstream 500")).await;
        let subscriber = SubscriberRef::new("user", "7").unwrap();

        let err = service
            .subscribe(
                subscriber.clone(),
                "premium",
                Gateway::Paypal,
                CreateOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ProviderError);

        assert!(store.list_for_subscriber(&subscriber).await.unwrap().is_empty());
    }
}
