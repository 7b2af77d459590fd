//! The Plan aggregate.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{Currency, Money, PlanId, Timestamp, ValidationError};
use crate::domain::Gateway;

use super::{BillingInterval, PlanFeature, PlanGatewayPrice};

/// A commercial subscription plan.
///
/// Pricing resolution: each gateway may carry its own listing with an
/// override price and currency; subscriptions billed through a gateway
/// without a listing fall back to the plan defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    id: PlanId,
    name: String,
    slug: String,
    description: Option<String>,
    price: Money,
    currency: Currency,
    interval: BillingInterval,
    interval_count: u32,
    trial_days: Option<u32>,
    grace_days: u32,
    active: bool,
    features: Vec<PlanFeature>,
    gateway_prices: Vec<PlanGatewayPrice>,
}

impl Plan {
    /// Creates an active plan with no features or gateway listings.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for an empty name or slug, or a zero
    /// interval count.
    pub fn new(
        name: impl Into<String>,
        slug: impl Into<String>,
        price: Money,
        currency: Currency,
        interval: BillingInterval,
        interval_count: u32,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        let slug = slug.into();

        if name.trim().is_empty() {
            return Err(ValidationError::empty_field("name"));
        }
        if slug.trim().is_empty() {
            return Err(ValidationError::empty_field("slug"));
        }
        if interval_count == 0 {
            return Err(ValidationError::out_of_range("interval_count", 1, 365, 0));
        }

        Ok(Self {
            id: PlanId::new(),
            name,
            slug,
            description: None,
            price,
            currency,
            interval,
            interval_count,
            trial_days: None,
            grace_days: 0,
            active: true,
            features: Vec::new(),
            gateway_prices: Vec::new(),
        })
    }

    pub fn with_id(mut self, id: PlanId) -> Self {
        self.id = id;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_trial_days(mut self, days: u32) -> Self {
        self.trial_days = Some(days);
        self
    }

    pub fn with_grace_days(mut self, days: u32) -> Self {
        self.grace_days = days;
        self
    }

    pub fn with_feature(mut self, feature: PlanFeature) -> Self {
        self.features.push(feature);
        self
    }

    pub fn with_gateway_price(mut self, price: PlanGatewayPrice) -> Self {
        self.gateway_prices.push(price);
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn id(&self) -> PlanId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The default price, before any gateway listing override.
    pub fn price(&self) -> Money {
        self.price
    }

    /// The default currency, before any gateway listing override.
    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn interval(&self) -> BillingInterval {
        self.interval
    }

    pub fn interval_count(&self) -> u32 {
        self.interval_count
    }

    pub fn trial_days(&self) -> Option<u32> {
        self.trial_days
    }

    pub fn grace_days(&self) -> u32 {
        self.grace_days
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn features(&self) -> &[PlanFeature] {
        &self.features
    }

    pub fn gateway_prices(&self) -> &[PlanGatewayPrice] {
        &self.gateway_prices
    }

    /// The gateway listing for `gateway`, if one exists.
    pub fn gateway_listing(&self, gateway: Gateway) -> Option<&PlanGatewayPrice> {
        self.gateway_prices.iter().find(|p| p.gateway == gateway)
    }

    /// The price a subscriber pays through `gateway`.
    pub fn price_for(&self, gateway: Gateway) -> Money {
        self.gateway_listing(gateway)
            .map(|p| p.price)
            .unwrap_or(self.price)
    }

    /// The currency billed through `gateway`.
    pub fn currency_for(&self, gateway: Gateway) -> Currency {
        self.gateway_listing(gateway)
            .map(|p| p.currency)
            .unwrap_or(self.currency)
    }

    /// The quota for a feature slug. `None` means the plan does not meter
    /// the feature, i.e. unlimited.
    pub fn quota_for(&self, feature_slug: &str) -> Option<u64> {
        self.features
            .iter()
            .find(|f| f.slug() == feature_slug)
            .map(|f| f.quota())
    }

    /// The end of one billing period starting at `from`.
    pub fn period_end_from(&self, from: Timestamp) -> Timestamp {
        self.interval.advance(from, self.interval_count)
    }
}
