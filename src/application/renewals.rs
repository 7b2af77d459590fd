//! Background renewal sweep.
//!
//! Local renewal applies to gateways whose providers do not push renewal
//! webhooks, and recovers subscriptions whose webhook was missed. Each
//! renewal is guarded by the same compare-and-set the webhook path uses,
//! so a sweep racing a late webhook converges on one renewal.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::RenewalConfig;
use crate::domain::foundation::{DomainError, Money};
use crate::domain::plan::Plan;
use crate::domain::subscription::{
    Subscription, SubscriptionEvent, SubscriptionTransaction, TransactionStatus, TransactionType,
};
use crate::ports::store::RenewalOutcome;
use crate::ports::{EventPublisher, PlanCatalog, SubscriptionStore};

/// Tally of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenewalSweep {
    pub renewed: usize,
    pub canceled: usize,
    pub skipped: usize,
}

pub struct RenewalService {
    store: Arc<dyn SubscriptionStore>,
    plans: Arc<dyn PlanCatalog>,
    events: Arc<dyn EventPublisher>,
    config: RenewalConfig,
}

impl RenewalService {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        plans: Arc<dyn PlanCatalog>,
        events: Arc<dyn EventPublisher>,
        config: RenewalConfig,
    ) -> Self {
        Self {
            store,
            plans,
            events,
            config,
        }
    }

    /// Processes one batch of subscriptions whose period end has passed.
    pub async fn process_due_renewals(&self) -> Result<RenewalSweep, DomainError> {
        let due = self.store.due_for_renewal(self.config.batch_size).await?;
        let mut sweep = RenewalSweep::default();

        for subscription in due {
            match self.process_one(&subscription).await {
                Ok(Outcome::Renewed) => sweep.renewed += 1,
                Ok(Outcome::Canceled) => sweep.canceled += 1,
                Ok(Outcome::Skipped) => sweep.skipped += 1,
                Err(e) => {
                    warn!(
                        subscription_id = %subscription.id,
                        error = %e,
                        "renewal failed, will retry next sweep"
                    );
                    sweep.skipped += 1;
                }
            }
        }

        info!(
            renewed = sweep.renewed,
            canceled = sweep.canceled,
            skipped = sweep.skipped,
            "renewal sweep finished"
        );
        Ok(sweep)
    }

    async fn process_one(&self, subscription: &Subscription) -> Result<Outcome, DomainError> {
        let Some(plan) = self.plans.get(subscription.plan_id).await? else {
            warn!(
                subscription_id = %subscription.id,
                plan_id = %subscription.plan_id,
                "due subscription references a missing plan"
            );
            return Ok(Outcome::Skipped);
        };

        if let Some(max) = self.config.max_renewals {
            if subscription.renewal_count >= max {
                return self.expire(subscription, &plan).await;
            }
        }

        let target = subscription.next_period_end(&plan);
        let outcome = self
            .store
            .advance_period(subscription.id, subscription.ends_at, target, plan.grace_days())
            .await?;

        match outcome {
            RenewalOutcome::Applied(updated) => {
                let transaction = SubscriptionTransaction::new(
                    updated.id,
                    TransactionType::Renewal,
                    plan.price_for(updated.gateway),
                    plan.currency_for(updated.gateway),
                    TransactionStatus::Completed,
                );
                self.store.record_transaction(transaction).await?;

                self.events
                    .publish(SubscriptionEvent::Renewed {
                        subscription_id: updated.id,
                        new_ends_at: target,
                        renewal_count: updated.renewal_count,
                    })
                    .await?;
                Ok(Outcome::Renewed)
            }
            // A webhook renewed it between the listing and the update.
            RenewalOutcome::AlreadyApplied(_) => Ok(Outcome::Skipped),
        }
    }

    /// Ends a subscription that hit the renewal cap.
    async fn expire(
        &self,
        subscription: &Subscription,
        plan: &Plan,
    ) -> Result<Outcome, DomainError> {
        let updated = self.store.cancel(subscription.id, true).await?;

        let transaction = SubscriptionTransaction::new(
            updated.id,
            TransactionType::Expiry,
            Money::ZERO,
            plan.currency_for(updated.gateway),
            TransactionStatus::Completed,
        );
        self.store.record_transaction(transaction).await?;

        self.events
            .publish(SubscriptionEvent::Canceled {
                subscription_id: updated.id,
                immediate: true,
            })
            .await?;

        info!(
            subscription_id = %updated.id,
            renewal_count = updated.renewal_count,
            "subscription reached renewal cap and ended"
        );
        Ok(Outcome::Canceled)
    }
}

enum Outcome {
    Renewed,
    Canceled,
    Skipped,
}
