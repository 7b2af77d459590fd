//! End-to-end lifecycle tests over the in-memory stack.
//!
//! A local gateway adapter built on the shared core stands in for a real
//! provider, so the full subscribe / renew / cancel / resume / swap path
//! and the metered usage rules run without any network.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use unisub::adapters::gateways::{ChargeFacts, GatewayCore, GatewayRegistry};
use unisub::adapters::memory::{
    InMemoryEventPublisher, InMemoryPlanCatalog, InMemorySubscriptionStore,
};
use unisub::application::{SubscriptionService, WebhookDisposition, WebhookService};
use unisub::config::RenewalConfig;
use unisub::domain::foundation::{
    AccountTokenCodec, Currency, ErrorCode, Money, SubscriberRef, Timestamp,
};
use unisub::domain::plan::{BillingInterval, Plan, PlanFeature};
use unisub::domain::subscription::{
    ProviderNotification, Signal, Subscription, TransactionType,
};
use unisub::domain::Gateway;
use unisub::ports::{
    CreateOptions, GatewayError, PlanCatalog, SubscriptionGateway, SubscriptionStore,
    WebhookOutcome,
    WebhookRequest,
};

/// Provider stand-in: activates immediately and replays normalized
/// notifications posted as JSON webhook bodies.
struct StubGateway {
    core: GatewayCore,
}

#[async_trait]
impl SubscriptionGateway for StubGateway {
    fn gateway(&self) -> Gateway {
        Gateway::Paypal
    }

    async fn create_subscription(
        &self,
        subscription: &Subscription,
        plan: &Plan,
        _options: CreateOptions,
    ) -> Result<Subscription, GatewayError> {
        let ends_at = subscription.next_period_end(plan);
        self.core
            .mark_active(
                subscription,
                plan,
                Some(format!("prov-{}", subscription.id)),
                Some(ends_at),
                None,
                ChargeFacts::default(),
                TransactionType::Payment,
            )
            .await
    }

    async fn cancel_subscription(
        &self,
        subscription: &Subscription,
        immediate: bool,
    ) -> Result<Subscription, GatewayError> {
        self.core.mark_canceled(subscription, immediate).await
    }

    async fn resume_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<Subscription, GatewayError> {
        self.core.mark_resumed(subscription).await
    }

    async fn swap_plan(
        &self,
        subscription: &Subscription,
        new_plan: &Plan,
    ) -> Result<Subscription, GatewayError> {
        self.core.mark_swapped(subscription, new_plan).await
    }

    async fn handle_webhook(
        &self,
        request: &WebhookRequest,
    ) -> Result<WebhookOutcome, GatewayError> {
        let notification: ProviderNotification = request
            .json()
            .map_err(|_| GatewayError::validation("bad notification body"))?;
        self.core
            .apply_notification(&notification, ChargeFacts::default())
            .await
    }

    async fn redirect_target(
        &self,
        _subscription: &Subscription,
    ) -> Result<Option<String>, GatewayError> {
        Ok(None)
    }
}

struct Stack {
    store: Arc<InMemorySubscriptionStore>,
    plans: Arc<InMemoryPlanCatalog>,
    events: Arc<InMemoryEventPublisher>,
    subscriptions: SubscriptionService,
    webhooks: WebhookService,
}

async fn stack() -> Stack {
    let store = Arc::new(InMemorySubscriptionStore::new());
    let plans = Arc::new(InMemoryPlanCatalog::new());
    let events = Arc::new(InMemoryEventPublisher::new());
    let codec = Arc::new(AccountTokenCodec::new(SecretString::new(
        "integration-test-salt".into(),
    )));

    let core = GatewayCore::new(
        Gateway::Paypal,
        store.clone(),
        plans.clone(),
        events.clone(),
        codec,
    );
    let registry = Arc::new(GatewayRegistry::from_adapters([Arc::new(StubGateway {
        core,
    }) as Arc<dyn SubscriptionGateway>]));

    let subscriptions = SubscriptionService::new(
        store.clone(),
        plans.clone(),
        events.clone(),
        registry.clone(),
    );
    let webhooks = WebhookService::new(registry, events.clone());

    Stack {
        store,
        plans,
        events,
        subscriptions,
        webhooks,
    }
}

fn premium() -> Plan {
    Plan::new(
        "Premium",
        "premium",
        Money::from_minor_units(1999),
        Currency::USD,
        BillingInterval::Month,
        1,
    )
    .unwrap()
    .with_grace_days(3)
    .with_feature(PlanFeature::new("api-calls", 100).unwrap())
}

fn pro() -> Plan {
    Plan::new(
        "Pro",
        "pro",
        Money::from_minor_units(4999),
        Currency::USD,
        BillingInterval::Month,
        1,
    )
    .unwrap()
    .with_feature(PlanFeature::new("api-calls", 1000).unwrap())
}

fn renewal_webhook(sub: &Subscription, expires_at: Timestamp) -> WebhookRequest {
    let notification =
        ProviderNotification::new(Gateway::Paypal, Signal::Renewed, "PAYMENT.SALE.COMPLETED")
            .with_gateway_id(sub.gateway_id.clone().unwrap())
            .with_expires_at(expires_at);
    WebhookRequest::from_body(serde_json::to_vec(&notification).unwrap())
}

#[tokio::test]
async fn subscribe_renew_cancel_resume_swap() {
    let s = stack().await;
    s.plans.insert(premium()).await;
    s.plans.insert(pro()).await;

    // subscribe
    let sub = s
        .subscriptions
        .subscribe(
            SubscriberRef::new("user", "42").unwrap(),
            "premium",
            Gateway::Paypal,
            CreateOptions::default(),
        )
        .await
        .unwrap();
    assert!(sub.is_active());
    assert!(sub.gateway_id.is_some());
    assert!(sub.ends_at.unwrap().is_future());
    assert_eq!(s.events.events_named("subscription.created").len(), 1);
    assert_eq!(s.events.events_named("payment.succeeded").len(), 1);

    // renew through a provider notification
    let new_end = sub.ends_at.unwrap().plus_months(1);
    let disposition = s
        .webhooks
        .handle(Gateway::Paypal, &renewal_webhook(&sub, new_end))
        .await;
    assert!(matches!(disposition, WebhookDisposition::Processed { .. }));

    let renewed = s.store.get(sub.id).await.unwrap().unwrap();
    assert_eq!(renewed.renewal_count, 1);
    assert_eq!(renewed.ends_at, Some(new_end));
    assert_eq!(renewed.grace_ends_at, Some(new_end.plus_days(3)));

    // duplicate delivery converges without a second renewal
    s.webhooks
        .handle(Gateway::Paypal, &renewal_webhook(&sub, new_end))
        .await;
    let converged = s.store.get(sub.id).await.unwrap().unwrap();
    assert_eq!(converged.renewal_count, 1);
    assert_eq!(s.events.events_named("subscription.renewed").len(), 1);

    // cancel at period end keeps the paid period but revokes access
    let canceled = s.subscriptions.cancel(sub.id, false).await.unwrap();
    assert!(canceled.is_canceled());
    assert!(!canceled.is_active());
    assert_eq!(canceled.ends_at, Some(new_end));

    // resume restores access for the remaining period
    let resumed = s.subscriptions.resume(sub.id).await.unwrap();
    assert!(!resumed.is_canceled());
    assert!(resumed.is_active());

    // swap moves plans and resets usage
    s.subscriptions.record_usage(sub.id, "api-calls", 10).await.unwrap();
    let swapped = s.subscriptions.swap(sub.id, "pro").await.unwrap();
    assert_eq!(swapped.plan_id, pro_plan_id(&s).await);
    assert!(s.store.usage_records(sub.id).await.is_empty());
    assert_eq!(s.events.events_named("subscription.swapped").len(), 1);

    let txns = s.subscriptions.transactions(sub.id).await.unwrap();
    assert!(txns
        .iter()
        .any(|t| t.transaction_type == TransactionType::PlanSwap));
}

async fn pro_plan_id(s: &Stack) -> unisub::domain::foundation::PlanId {
    s.plans.find_by_slug("pro").await.unwrap().unwrap().id()
}

#[tokio::test]
async fn metered_usage_enforces_the_plan_quota() {
    let s = stack().await;
    s.plans.insert(premium()).await;

    let sub = s
        .subscriptions
        .subscribe(
            SubscriberRef::new("user", "7").unwrap(),
            "premium",
            Gateway::Paypal,
            CreateOptions::default(),
        )
        .await
        .unwrap();

    // 60 of 100 fits
    assert_eq!(
        s.subscriptions.record_usage(sub.id, "api-calls", 60).await.unwrap(),
        60
    );
    assert_eq!(s.events.events_named("feature.used").len(), 1);

    // 50 more does not; nothing is recorded
    let err = s
        .subscriptions
        .record_usage(sub.id, "api-calls", 50)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::QuotaExceeded);
    assert_eq!(err.details.get("remaining"), Some(&"40".to_string()));
    assert_eq!(s.events.events_named("feature.limit_exceeded").len(), 1);
    assert_eq!(
        s.subscriptions
            .remaining_usage(sub.id, "api-calls")
            .await
            .unwrap(),
        Some(40)
    );

    // 40 exactly fills the quota
    assert!(s
        .subscriptions
        .can_use_feature(sub.id, "api-calls", 40)
        .await
        .unwrap());
    s.subscriptions.record_usage(sub.id, "api-calls", 40).await.unwrap();
    assert!(!s
        .subscriptions
        .can_use_feature(sub.id, "api-calls", 1)
        .await
        .unwrap());

    // undeclared features are unmetered
    assert_eq!(
        s.subscriptions
            .remaining_usage(sub.id, "exports")
            .await
            .unwrap(),
        None
    );
    s.subscriptions
        .record_usage(sub.id, "exports", 1_000_000)
        .await
        .unwrap();
}

#[tokio::test]
async fn lapsed_subscription_cannot_record_usage() {
    let s = stack().await;
    s.plans.insert(premium()).await;

    let sub = s
        .subscriptions
        .subscribe(
            SubscriberRef::new("user", "9").unwrap(),
            "premium",
            Gateway::Paypal,
            CreateOptions::default(),
        )
        .await
        .unwrap();
    s.subscriptions.cancel(sub.id, true).await.unwrap();

    let err = s
        .subscriptions
        .record_usage(sub.id, "api-calls", 1)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::SubscriptionInactive);
    assert!(!s
        .subscriptions
        .can_use_feature(sub.id, "api-calls", 1)
        .await
        .unwrap());
}

#[tokio::test]
async fn provider_cancel_notification_revokes_access() {
    let s = stack().await;
    s.plans.insert(premium()).await;

    let sub = s
        .subscriptions
        .subscribe(
            SubscriberRef::new("user", "11").unwrap(),
            "premium",
            Gateway::Paypal,
            CreateOptions::default(),
        )
        .await
        .unwrap();

    let notification = ProviderNotification::new(
        Gateway::Paypal,
        Signal::CanceledOrExpired,
        "BILLING.SUBSCRIPTION.CANCELLED",
    )
    .with_gateway_id(sub.gateway_id.clone().unwrap());
    let request = WebhookRequest::from_body(serde_json::to_vec(&notification).unwrap());

    let disposition = s.webhooks.handle(Gateway::Paypal, &request).await;
    assert!(matches!(disposition, WebhookDisposition::Processed { .. }));

    let after = s.store.get(sub.id).await.unwrap().unwrap();
    assert!(after.is_canceled());
    assert!(!after.is_active());
    assert_eq!(s.events.events_named("webhook.received").len(), 1);
}

#[tokio::test]
async fn notification_for_unknown_subscription_is_ignored_and_acked() {
    let s = stack().await;
    s.plans.insert(premium()).await;

    let notification = ProviderNotification::new(
        Gateway::Paypal,
        Signal::Renewed,
        "PAYMENT.SALE.COMPLETED",
    )
    .with_gateway_id("prov-unknown");
    let request = WebhookRequest::from_body(serde_json::to_vec(&notification).unwrap());

    let disposition = s.webhooks.handle(Gateway::Paypal, &request).await;
    assert!(matches!(disposition, WebhookDisposition::Ignored { .. }));
}

#[tokio::test]
async fn renewal_sweep_and_webhooks_converge_on_one_renewal() {
    use unisub::application::RenewalService;

    let s = stack().await;
    s.plans.insert(premium()).await;

    let sub = s
        .subscriptions
        .subscribe(
            SubscriberRef::new("user", "13").unwrap(),
            "premium",
            Gateway::Paypal,
            CreateOptions::default(),
        )
        .await
        .unwrap();

    // force the period into the past so the sweep picks it up
    let expired_end = Timestamp::now().minus_days(1);
    s.store
        .confirm(sub.id, None, Some(expired_end), 0, None)
        .await
        .unwrap();

    let renewals = RenewalService::new(
        s.store.clone(),
        s.plans.clone(),
        s.events.clone(),
        RenewalConfig::default(),
    );
    let sweep = renewals.process_due_renewals().await.unwrap();
    assert_eq!(sweep.renewed, 1);

    // a late duplicate webhook for the already-replaced period end converges
    let request = renewal_webhook(
        &s.store.get(sub.id).await.unwrap().unwrap(),
        s.store.get(sub.id).await.unwrap().unwrap().ends_at.unwrap(),
    );
    s.webhooks.handle(Gateway::Paypal, &request).await;

    let current = s.store.get(sub.id).await.unwrap().unwrap();
    assert_eq!(current.renewal_count, 1);
}
