//! Shared gateway core: the one mutation path every adapter uses.
//!
//! Adapters authenticate and decode provider payloads; everything that
//! touches subscription state funnels through here so transactions are
//! always recorded alongside the mutation they justify and events are
//! published consistently.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::foundation::{
    AccountTokenCodec, Currency, Money, Timestamp,
};
use crate::domain::plan::Plan;
use crate::domain::subscription::{
    ProviderNotification, Signal, Subscription, SubscriptionEvent, SubscriptionTransaction,
    TransactionStatus, TransactionType,
};
use crate::domain::Gateway;
use crate::ports::store::RenewalOutcome;
use crate::ports::{EventPublisher, GatewayError, PlanCatalog, SubscriptionStore, WebhookOutcome};

/// Monetary facts extracted from a provider payload, overriding the
/// plan-resolved price when present.
#[derive(Debug, Clone, Default)]
pub struct ChargeFacts {
    pub amount: Option<Money>,
    pub currency: Option<Currency>,
    pub provider_txn_id: Option<String>,
    pub metadata: serde_json::Value,
}

/// Store, catalog, publisher, and identity codec bundled for one gateway.
pub struct GatewayCore {
    gateway: Gateway,
    store: Arc<dyn SubscriptionStore>,
    plans: Arc<dyn PlanCatalog>,
    events: Arc<dyn EventPublisher>,
    codec: Arc<AccountTokenCodec>,
}

impl GatewayCore {
    pub fn new(
        gateway: Gateway,
        store: Arc<dyn SubscriptionStore>,
        plans: Arc<dyn PlanCatalog>,
        events: Arc<dyn EventPublisher>,
        codec: Arc<AccountTokenCodec>,
    ) -> Self {
        Self {
            gateway,
            store,
            plans,
            events,
            codec,
        }
    }

    pub fn gateway(&self) -> Gateway {
        self.gateway
    }

    pub fn store(&self) -> &dyn SubscriptionStore {
        self.store.as_ref()
    }

    pub fn plans(&self) -> &dyn PlanCatalog {
        self.plans.as_ref()
    }

    /// The subscription's plan, or a typed not-found failure.
    pub async fn plan_for(&self, subscription: &Subscription) -> Result<Plan, GatewayError> {
        self.plans
            .get(subscription.plan_id)
            .await?
            .ok_or_else(|| {
                GatewayError::not_found(format!("plan {} not found", subscription.plan_id))
            })
    }

    /// Assigns the provider id and response without activating. Used by
    /// redirect providers whose subscriptions stay pending until approval.
    pub async fn attach_gateway_id(
        &self,
        subscription: &Subscription,
        gateway_id: String,
        gateway_response: Option<serde_json::Value>,
    ) -> Result<Subscription, GatewayError> {
        Ok(self
            .store
            .confirm(subscription.id, Some(gateway_id), None, 0, gateway_response)
            .await?)
    }

    /// Activates a confirmed subscription: sets the provider id and period
    /// end, records the initial transaction, publishes Created.
    pub async fn mark_active(
        &self,
        subscription: &Subscription,
        plan: &Plan,
        gateway_id: Option<String>,
        ends_at: Option<Timestamp>,
        gateway_response: Option<serde_json::Value>,
        initial_charge: ChargeFacts,
        charge_type: TransactionType,
    ) -> Result<Subscription, GatewayError> {
        let updated = self
            .store
            .confirm(
                subscription.id,
                gateway_id,
                ends_at,
                plan.grace_days(),
                gateway_response,
            )
            .await?;

        self.events
            .publish(SubscriptionEvent::Created {
                subscription_id: updated.id,
                plan_id: plan.id(),
                gateway: self.gateway,
            })
            .await?;

        self.record_charge(&updated, plan, charge_type, TransactionStatus::Completed, initial_charge)
            .await?;

        info!(
            gateway = %self.gateway,
            subscription_id = %updated.id,
            ends_at = ?updated.ends_at,
            "subscription activated"
        );
        Ok(updated)
    }

    /// Advances the paid period by one renewal, compare-and-set guarded.
    ///
    /// Canceled subscriptions are left untouched; a duplicate delivery for
    /// the same target date converges without a second transaction or
    /// event.
    pub async fn mark_renewed(
        &self,
        subscription: &Subscription,
        plan: &Plan,
        provider_ends_at: Option<Timestamp>,
        charge: ChargeFacts,
    ) -> Result<Subscription, GatewayError> {
        if subscription.is_canceled() {
            debug!(
                gateway = %self.gateway,
                subscription_id = %subscription.id,
                "renewal skipped: subscription is canceled"
            );
            return Ok(subscription.clone());
        }

        let target = provider_ends_at.unwrap_or_else(|| subscription.next_period_end(plan));
        if subscription.ends_at == Some(target) {
            debug!(
                gateway = %self.gateway,
                subscription_id = %subscription.id,
                "renewal already at target period end"
            );
            return Ok(subscription.clone());
        }
        let outcome = self
            .store
            .advance_period(subscription.id, subscription.ends_at, target, plan.grace_days())
            .await?;

        match outcome {
            RenewalOutcome::Applied(updated) => {
                self.record_charge(
                    &updated,
                    plan,
                    TransactionType::Renewal,
                    TransactionStatus::Completed,
                    charge,
                )
                .await?;

                self.events
                    .publish(SubscriptionEvent::Renewed {
                        subscription_id: updated.id,
                        new_ends_at: target,
                        renewal_count: updated.renewal_count,
                    })
                    .await?;

                info!(
                    gateway = %self.gateway,
                    subscription_id = %updated.id,
                    new_ends_at = %target,
                    renewal_count = updated.renewal_count,
                    "subscription renewed"
                );
                Ok(updated)
            }
            RenewalOutcome::AlreadyApplied(current) => {
                debug!(
                    gateway = %self.gateway,
                    subscription_id = %current.id,
                    "duplicate renewal delivery converged"
                );
                Ok(current)
            }
        }
    }

    /// Applies a cancel and publishes the event. Idempotent.
    pub async fn mark_canceled(
        &self,
        subscription: &Subscription,
        immediate: bool,
    ) -> Result<Subscription, GatewayError> {
        if subscription.is_canceled() {
            return Ok(subscription.clone());
        }

        let updated = self.store.cancel(subscription.id, immediate).await?;
        self.events
            .publish(SubscriptionEvent::Canceled {
                subscription_id: updated.id,
                immediate,
            })
            .await?;

        info!(
            gateway = %self.gateway,
            subscription_id = %updated.id,
            immediate,
            "subscription canceled"
        );
        Ok(updated)
    }

    /// Clears a pending cancellation and publishes the event. No-op when
    /// not canceled.
    pub async fn mark_resumed(
        &self,
        subscription: &Subscription,
    ) -> Result<Subscription, GatewayError> {
        if !subscription.is_canceled() {
            return Ok(subscription.clone());
        }

        let updated = self.store.resume(subscription.id).await?;
        self.events
            .publish(SubscriptionEvent::Resumed {
                subscription_id: updated.id,
            })
            .await?;

        info!(
            gateway = %self.gateway,
            subscription_id = %updated.id,
            "subscription resumed"
        );
        Ok(updated)
    }

    /// Reassigns the plan, resets usage, records the swap transaction, and
    /// publishes Swapped.
    pub async fn mark_swapped(
        &self,
        subscription: &Subscription,
        new_plan: &Plan,
    ) -> Result<Subscription, GatewayError> {
        let old_plan_id = subscription.plan_id;
        let updated = self.store.swap_plan(subscription.id, new_plan.id()).await?;

        let transaction = SubscriptionTransaction::new(
            updated.id,
            TransactionType::PlanSwap,
            new_plan.price_for(self.gateway),
            new_plan.currency_for(self.gateway),
            TransactionStatus::Completed,
        )
        .with_metadata(serde_json::json!({
            "old_plan_id": old_plan_id.to_string(),
            "new_plan_id": new_plan.id().to_string(),
        }));
        self.store.record_transaction(transaction).await?;

        self.events
            .publish(SubscriptionEvent::Swapped {
                subscription_id: updated.id,
                old_plan_id,
                new_plan_id: new_plan.id(),
            })
            .await?;

        info!(
            gateway = %self.gateway,
            subscription_id = %updated.id,
            old_plan_id = %old_plan_id,
            new_plan_id = %new_plan.id(),
            "subscription swapped plans"
        );
        Ok(updated)
    }

    /// Appends a transaction and publishes the matching payment event.
    ///
    /// This is the single ingestion point: completed payment/renewal
    /// charges publish PaymentSucceeded, failed status publishes
    /// PaymentFailed.
    pub async fn record_charge(
        &self,
        subscription: &Subscription,
        plan: &Plan,
        transaction_type: TransactionType,
        status: TransactionStatus,
        facts: ChargeFacts,
    ) -> Result<SubscriptionTransaction, GatewayError> {
        let amount = facts.amount.unwrap_or_else(|| plan.price_for(self.gateway));
        let currency = facts
            .currency
            .unwrap_or_else(|| plan.currency_for(self.gateway));

        let mut transaction = SubscriptionTransaction::new(
            subscription.id,
            transaction_type,
            amount,
            currency,
            status,
        )
        .with_metadata(facts.metadata);
        if let Some(id) = facts.provider_txn_id {
            transaction = transaction.with_gateway_transaction_id(id);
        }

        self.store.record_transaction(transaction.clone()).await?;

        if transaction.is_successful_charge() {
            self.events
                .publish(SubscriptionEvent::PaymentSucceeded {
                    subscription_id: subscription.id,
                    amount,
                    currency,
                    gateway_transaction_id: transaction.gateway_transaction_id.clone(),
                })
                .await?;
        } else if transaction.is_failed_charge() {
            self.events
                .publish(SubscriptionEvent::PaymentFailed {
                    subscription_id: subscription.id,
                    amount,
                    currency,
                    gateway_transaction_id: transaction.gateway_transaction_id.clone(),
                })
                .await?;
        }

        Ok(transaction)
    }

    /// Applies an authenticated, normalized notification.
    ///
    /// When no local subscription matches and the payload carries an
    /// account token plus a provider plan id, the subscriber is resolved
    /// through the identity codec and the subscription is created first
    /// (first-purchase notifications arrive before any local record).
    /// Unmatched events are logged with full context, never silently
    /// dropped.
    pub async fn apply_notification(
        &self,
        notification: &ProviderNotification,
        charge: ChargeFacts,
    ) -> Result<WebhookOutcome, GatewayError> {
        let Some(gateway_id) = notification.gateway_id.as_deref() else {
            warn!(
                gateway = %self.gateway,
                event_type = %notification.event_type,
                "notification carries no provider subscription id"
            );
            return Ok(WebhookOutcome::Ignored {
                event_type: notification.event_type.clone(),
                reason: "missing provider subscription id".into(),
            });
        };

        let subscription = match self.store.find_by_gateway_id(self.gateway, gateway_id).await? {
            Some(sub) => sub,
            None => match self.bind_identity(notification, gateway_id).await? {
                Some(sub) => return self.after_binding(notification, sub).await,
                None => {
                    warn!(
                        gateway = %self.gateway,
                        event_type = %notification.event_type,
                        gateway_id,
                        account_token = ?notification.account_token,
                        provider_plan_id = ?notification.provider_plan_id,
                        "notification did not match any subscription"
                    );
                    return Ok(WebhookOutcome::Ignored {
                        event_type: notification.event_type.clone(),
                        reason: "no matching subscription".into(),
                    });
                }
            },
        };

        let plan = self.plan_for(&subscription).await?;
        match notification.signal {
            Signal::Renewed => {
                self.mark_renewed(&subscription, &plan, notification.expires_at, charge)
                    .await?;
            }
            Signal::CanceledOrExpired => {
                self.mark_canceled(&subscription, true).await?;
            }
            Signal::BillingRecovered => {
                self.mark_resumed(&subscription).await?;
            }
        }

        Ok(WebhookOutcome::Processed {
            event_type: notification.event_type.clone(),
        })
    }

    /// Resolves a first-purchase notification to a new subscription via
    /// the obfuscated account token and the provider plan id.
    async fn bind_identity(
        &self,
        notification: &ProviderNotification,
        gateway_id: &str,
    ) -> Result<Option<Subscription>, GatewayError> {
        let (Some(token), Some(provider_plan_id)) = (
            notification.account_token.as_deref(),
            notification.provider_plan_id.as_deref(),
        ) else {
            return Ok(None);
        };

        let Some(subscriber) = self.codec.decode(token) else {
            warn!(
                gateway = %self.gateway,
                event_type = %notification.event_type,
                "invalid or tampered account token in notification"
            );
            return Ok(None);
        };

        let Some(plan) = self
            .plans
            .find_by_provider_id(self.gateway, provider_plan_id)
            .await?
        else {
            warn!(
                gateway = %self.gateway,
                provider_plan_id,
                "no plan matches the provider plan id"
            );
            return Ok(None);
        };

        let mut subscription = Subscription::new(subscriber, &plan, self.gateway);
        subscription.gateway_id = Some(gateway_id.to_string());
        self.store.insert(subscription.clone()).await?;

        info!(
            gateway = %self.gateway,
            subscription_id = %subscription.id,
            plan_id = %plan.id(),
            "subscription created from first-purchase notification"
        );
        Ok(Some(subscription))
    }

    async fn after_binding(
        &self,
        notification: &ProviderNotification,
        subscription: Subscription,
    ) -> Result<WebhookOutcome, GatewayError> {
        let plan = self.plan_for(&subscription).await?;
        self.mark_active(
            &subscription,
            &plan,
            None,
            notification.expires_at,
            None,
            ChargeFacts {
                provider_txn_id: notification.gateway_id.clone(),
                ..ChargeFacts::default()
            },
            TransactionType::Payment,
        )
        .await?;

        Ok(WebhookOutcome::Processed {
            event_type: notification.event_type.clone(),
        })
    }
}
