//! Plans: what a subscriber pays for and what they get.

pub mod feature;
pub mod gateway_price;
pub mod interval;
#[allow(clippy::module_inception)]
pub mod plan;

pub use feature::PlanFeature;
pub use gateway_price::PlanGatewayPrice;
pub use interval::BillingInterval;
pub use plan::Plan;
