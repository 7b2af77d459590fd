//! The Subscription aggregate and its lifecycle rules.
//!
//! Lifecycle states are derived from timestamps, never stored as an enum:
//! trialing, active, grace, canceled, expired. All transition helpers here
//! are pure with respect to I/O; the store applies them inside a single
//! atomic operation per subscription.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{PlanId, SubscriberRef, SubscriptionId, Timestamp};
use crate::domain::plan::Plan;
use crate::domain::Gateway;

/// The canonical subscription record one subscriber holds on one gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub subscriber: SubscriberRef,
    pub plan_id: PlanId,
    pub gateway: Gateway,
    /// Provider-assigned id. Unique per (subscriber, gateway, gateway_id).
    pub gateway_id: Option<String>,
    pub starts_at: Timestamp,
    pub ends_at: Option<Timestamp>,
    pub trial_ends_at: Option<Timestamp>,
    pub grace_ends_at: Option<Timestamp>,
    pub canceled_at: Option<Timestamp>,
    pub renewal_count: u32,
    /// Last raw provider response, kept opaque for reconciliation.
    pub gateway_response: Option<serde_json::Value>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Subscription {
    /// Creates a pending subscription starting now.
    ///
    /// The trial window opens immediately when the plan grants trial days.
    /// `ends_at` stays unset until a gateway adapter confirms payment.
    pub fn new(subscriber: SubscriberRef, plan: &Plan, gateway: Gateway) -> Self {
        let now = Timestamp::now();
        let trial_ends_at = plan.trial_days().map(|d| now.plus_days(d as i64));

        Self {
            id: SubscriptionId::new(),
            subscriber,
            plan_id: plan.id(),
            gateway,
            gateway_id: None,
            starts_at: now,
            ends_at: None,
            trial_ends_at,
            grace_ends_at: None,
            canceled_at: None,
            renewal_count: 0,
            gateway_response: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the trial window is open (and cancellation has not closed it).
    pub fn on_trial(&self) -> bool {
        self.canceled_at.is_none() && self.trial_ends_at.is_some_and(|t| t.is_future())
    }

    /// Whether the subscriber currently has access.
    ///
    /// Cancellation revokes access as soon as `canceled_at` is set, also
    /// for a cancel scheduled at period end; `resume` restores it while
    /// `ends_at` has not passed. Outside cancellation, an open trial
    /// window always grants access, even past an elapsed `ends_at`: the
    /// trial is the authoritative access window until it ends. After
    /// trial, access follows `ends_at`, and a subscription with no period
    /// end yet is active.
    pub fn is_active(&self) -> bool {
        if self.canceled_at.is_some() {
            return false;
        }
        if self.on_trial() {
            return true;
        }
        match self.ends_at {
            Some(ends_at) => ends_at.is_future(),
            None => true,
        }
    }

    /// Whether the paid period elapsed but the grace window is still open.
    pub fn on_grace_period(&self) -> bool {
        self.ends_at.is_some_and(|e| e.is_past())
            && self.grace_ends_at.is_some_and(|g| g.is_future())
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled_at.is_some()
    }

    /// Whether the paid period ran out without a cancellation.
    pub fn is_expired(&self) -> bool {
        self.canceled_at.is_none() && self.ends_at.is_some_and(|e| e.is_past())
    }

    /// The end date one renewal would advance to: one plan interval past
    /// the later of `ends_at`, `starts_at`, and now.
    pub fn next_period_end(&self, plan: &Plan) -> Timestamp {
        let now = Timestamp::now();
        let mut base = self.ends_at.unwrap_or(self.starts_at);
        if self.starts_at.is_after(&base) {
            base = self.starts_at;
        }
        if now.is_after(&base) {
            base = now;
        }
        plan.period_end_from(base)
    }

    /// Sets the paid period end and the grace window derived from it.
    pub fn set_period_end(&mut self, ends_at: Timestamp, grace_days: u32) {
        self.ends_at = Some(ends_at);
        self.grace_ends_at = if grace_days > 0 {
            Some(ends_at.plus_days(grace_days as i64))
        } else {
            None
        };
        self.touch();
    }

    /// Marks the subscription confirmed by its gateway.
    pub fn mark_confirmed(
        &mut self,
        gateway_id: Option<String>,
        response: Option<serde_json::Value>,
    ) {
        if gateway_id.is_some() {
            self.gateway_id = gateway_id;
        }
        if response.is_some() {
            self.gateway_response = response;
        }
        self.touch();
    }

    /// Applies a renewal to the given period end.
    ///
    /// Callers guard this with a compare-and-set on the current `ends_at`
    /// so a duplicate delivery targeting the same end date converges.
    pub fn apply_renewal(&mut self, new_ends_at: Timestamp, grace_days: u32) {
        self.set_period_end(new_ends_at, grace_days);
        self.renewal_count += 1;
    }

    /// Applies a cancellation. Idempotent: already-canceled is a no-op.
    ///
    /// Returns whether anything changed.
    pub fn apply_cancel(&mut self, immediate: bool) -> bool {
        if self.canceled_at.is_some() {
            return false;
        }
        let now = Timestamp::now();
        self.canceled_at = Some(now);
        if immediate {
            self.ends_at = Some(now);
            self.grace_ends_at = None;
        }
        self.touch();
        true
    }

    /// Clears a pending cancellation. No-op when not canceled.
    ///
    /// Does not restore `ends_at`: a resumed subscription still expires per
    /// its last computed period end unless a renewal follows.
    ///
    /// Returns whether anything changed.
    pub fn apply_resume(&mut self) -> bool {
        if self.canceled_at.is_none() {
            return false;
        }
        self.canceled_at = None;
        self.touch();
        true
    }

    /// Reassigns the plan. Usage deletion happens at the store, in the same
    /// atomic operation.
    pub fn apply_swap(&mut self, new_plan_id: PlanId) {
        self.plan_id = new_plan_id;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Timestamp::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{Currency, Money};
    use crate::domain::plan::BillingInterval;

    fn plan() -> Plan {
        Plan::new(
            "Premium",
            "premium-monthly",
            Money::from_minor_units(1999),
            Currency::USD,
            BillingInterval::Month,
            1,
        )
        .unwrap()
    }

    fn subscriber() -> SubscriberRef {
        SubscriberRef::new("user", "42").unwrap()
    }

    fn active_subscription() -> Subscription {
        let mut sub = Subscription::new(subscriber(), &plan(), Gateway::Paypal);
        sub.set_period_end(Timestamp::now().plus_days(30), 0);
        sub
    }

    #[test]
    fn pending_subscription_without_trial_is_active_until_canceled() {
        let sub = Subscription::new(subscriber(), &plan(), Gateway::Paypal);
        assert!(sub.is_active());
        assert!(!sub.on_trial());
    }

    #[test]
    fn trial_plan_opens_trial_window_of_plan_trial_days() {
        let plan = plan().with_trial_days(7);
        let sub = Subscription::new(subscriber(), &plan, Gateway::Paypal);

        let trial_end = sub.trial_ends_at.unwrap();
        let expected = Timestamp::now().plus_days(7);
        let delta = (expected.as_unix_secs() - trial_end.as_unix_secs()).abs();
        assert!(delta < 5);

        assert!(sub.is_active());
        assert!(sub.on_trial());
        assert!(!sub.on_grace_period());
    }

    #[test]
    fn open_trial_overrides_elapsed_period_end() {
        let plan = plan().with_trial_days(7);
        let mut sub = Subscription::new(subscriber(), &plan, Gateway::Apple);
        sub.ends_at = Some(Timestamp::now().minus_days(1));

        assert!(sub.is_active());
    }

    #[test]
    fn elapsed_period_end_without_trial_means_expired() {
        let mut sub = Subscription::new(subscriber(), &plan(), Gateway::Google);
        sub.ends_at = Some(Timestamp::now().minus_days(1));

        assert!(!sub.is_active());
        assert!(sub.is_expired());
    }

    #[test]
    fn immediate_cancel_revokes_access_now() {
        let mut sub = active_subscription();
        assert!(sub.apply_cancel(true));

        assert!(sub.canceled_at.is_some());
        assert_eq!(sub.ends_at, sub.canceled_at);
        assert!(!sub.is_active());
    }

    #[test]
    fn period_end_cancel_revokes_access_but_keeps_the_period() {
        let mut sub = active_subscription();
        let original_end = sub.ends_at;
        assert!(sub.apply_cancel(false));

        assert_eq!(sub.ends_at, original_end);
        assert!(sub.is_canceled());
        assert!(!sub.is_active());
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut sub = active_subscription();
        assert!(sub.apply_cancel(false));
        let first_canceled_at = sub.canceled_at;
        let end = sub.ends_at;

        assert!(!sub.apply_cancel(true));
        assert_eq!(sub.canceled_at, first_canceled_at);
        assert_eq!(sub.ends_at, end); // second immediate cancel changed nothing
    }

    #[test]
    fn resume_clears_cancellation_and_restores_access() {
        let mut sub = active_subscription();
        sub.apply_cancel(false);
        let end = sub.ends_at;
        assert!(!sub.is_active());

        assert!(sub.apply_resume());
        assert!(sub.canceled_at.is_none());
        assert_eq!(sub.ends_at, end);
        assert!(sub.is_active());

        assert!(!sub.apply_resume());
    }

    #[test]
    fn resume_after_period_end_does_not_restore_access() {
        let mut sub = active_subscription();
        sub.apply_cancel(false);
        sub.ends_at = Some(Timestamp::now().minus_days(1));

        assert!(sub.apply_resume());
        assert!(!sub.is_active());
        assert!(sub.is_expired());
    }

    #[test]
    fn cancel_during_trial_closes_the_trial_window() {
        let plan = plan().with_trial_days(7);
        let mut sub = Subscription::new(subscriber(), &plan, Gateway::Xendit);
        sub.apply_cancel(true);

        assert!(!sub.on_trial());
        assert!(!sub.is_active());
    }

    #[test]
    fn renewal_advances_period_and_counter() {
        let mut sub = active_subscription();
        let target = sub.next_period_end(&plan());
        sub.apply_renewal(target, 3);

        assert_eq!(sub.ends_at, Some(target));
        assert_eq!(sub.grace_ends_at, Some(target.plus_days(3)));
        assert_eq!(sub.renewal_count, 1);
    }

    #[test]
    fn next_period_end_advances_from_future_period_end() {
        let sub = active_subscription();
        let current_end = sub.ends_at.unwrap();
        assert_eq!(sub.next_period_end(&plan()), current_end.plus_months(1));
    }

    #[test]
    fn next_period_end_advances_from_now_when_expired() {
        let mut sub = active_subscription();
        sub.ends_at = Some(Timestamp::now().minus_days(90));

        let next = sub.next_period_end(&plan());
        let expected = Timestamp::now().plus_months(1);
        let delta = (expected.as_unix_secs() - next.as_unix_secs()).abs();
        assert!(delta < 5);
    }

    #[test]
    fn grace_predicate_requires_elapsed_end_and_open_grace_window() {
        let mut sub = active_subscription();
        assert!(!sub.on_grace_period());

        sub.ends_at = Some(Timestamp::now().minus_days(1));
        sub.grace_ends_at = Some(Timestamp::now().plus_days(2));
        assert!(sub.on_grace_period());
        assert!(!sub.is_active());

        sub.grace_ends_at = Some(Timestamp::now().minus_days(1));
        assert!(!sub.on_grace_period());
    }
}
