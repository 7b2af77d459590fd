//! Per-gateway plan pricing and identifier overrides.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{Currency, Money};
use crate::domain::Gateway;

/// A plan's listing on one gateway.
///
/// Providers each identify the same commercial plan differently: a plan id
/// (paypal, xendit), a product id plus offer id (google, apple). Any subset
/// may be present. Price and currency override the plan defaults for
/// subscribers billed through this gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanGatewayPrice {
    pub gateway: Gateway,
    pub gateway_plan_id: Option<String>,
    pub gateway_offer_id: Option<String>,
    pub gateway_product_id: Option<String>,
    pub price: Money,
    pub currency: Currency,
}

impl PlanGatewayPrice {
    /// Creates a gateway price with no provider identifiers.
    pub fn new(gateway: Gateway, price: Money, currency: Currency) -> Self {
        Self {
            gateway,
            gateway_plan_id: None,
            gateway_offer_id: None,
            gateway_product_id: None,
            price,
            currency,
        }
    }

    /// Sets the provider-side plan id.
    pub fn with_plan_id(mut self, id: impl Into<String>) -> Self {
        self.gateway_plan_id = Some(id.into());
        self
    }

    /// Sets the provider-side offer id.
    pub fn with_offer_id(mut self, id: impl Into<String>) -> Self {
        self.gateway_offer_id = Some(id.into());
        self
    }

    /// Sets the provider-side product id.
    pub fn with_product_id(mut self, id: impl Into<String>) -> Self {
        self.gateway_product_id = Some(id.into());
        self
    }

    /// Whether any of the provider identifiers equals `id`.
    pub fn matches_provider_id(&self, id: &str) -> bool {
        [
            &self.gateway_plan_id,
            &self.gateway_offer_id,
            &self.gateway_product_id,
        ]
        .iter()
        .any(|field| field.as_deref() == Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_any_provider_identifier() {
        let price = PlanGatewayPrice::new(Gateway::Google, Money::from_minor_units(999), Currency::USD)
            .with_product_id("premium_monthly")
            .with_offer_id("intro-offer");

        assert!(price.matches_provider_id("premium_monthly"));
        assert!(price.matches_provider_id("intro-offer"));
        assert!(!price.matches_provider_id("other"));
    }
}
