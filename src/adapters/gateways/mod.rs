//! Billing provider adapters.
//!
//! One adapter per provider, each built around a shared [`GatewayCore`]
//! so all of them mutate subscription state through the same path. The
//! [`GatewayRegistry`] wires the full set from configuration and hands
//! the application layer the right adapter for a subscription's gateway.

mod apple;
mod common;
mod google;
mod paypal;
mod signed_payload;
mod xendit;

pub use apple::AppleGateway;
pub use common::{ChargeFacts, GatewayCore};
pub use google::GoogleGateway;
pub use paypal::PaypalGateway;
pub use signed_payload::SignedPayloadVerifier;
pub use xendit::XenditGateway;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::domain::foundation::AccountTokenCodec;
use crate::domain::Gateway;
use crate::ports::{
    EventPublisher, GatewayError, GatewayErrorCode, PlanCatalog, SubscriptionGateway,
    SubscriptionStore,
};

/// Adapter lookup by gateway.
pub struct GatewayRegistry {
    gateways: HashMap<Gateway, Arc<dyn SubscriptionGateway>>,
}

impl GatewayRegistry {
    /// Builds all four adapters from configuration, sharing one store,
    /// catalog, publisher, identity codec, and HTTP client.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn SubscriptionStore>,
        plans: Arc<dyn PlanCatalog>,
        events: Arc<dyn EventPublisher>,
    ) -> Result<Self, GatewayError> {
        let codec = Arc::new(AccountTokenCodec::new(
            config.identity.account_token_salt.clone(),
        ));
        let http = reqwest::Client::new();
        let core = |gateway| {
            GatewayCore::new(
                gateway,
                store.clone(),
                plans.clone(),
                events.clone(),
                codec.clone(),
            )
        };

        let mut gateways: HashMap<Gateway, Arc<dyn SubscriptionGateway>> = HashMap::new();
        gateways.insert(
            Gateway::Apple,
            Arc::new(AppleGateway::new(core(Gateway::Apple), &config.apple)?),
        );
        gateways.insert(
            Gateway::Google,
            Arc::new(GoogleGateway::new(
                core(Gateway::Google),
                &config.google,
                http.clone(),
            )),
        );
        gateways.insert(
            Gateway::Paypal,
            Arc::new(PaypalGateway::new(
                core(Gateway::Paypal),
                &config.paypal,
                http.clone(),
            )),
        );
        gateways.insert(
            Gateway::Xendit,
            Arc::new(XenditGateway::new(core(Gateway::Xendit), &config.xendit, http)),
        );

        let registry = Self { gateways };
        tracing::info!(gateways = ?registry.available(), "gateway adapters configured");
        Ok(registry)
    }

    /// Builds a registry from explicit adapters. Used by tests that wire a
    /// partial set.
    pub fn from_adapters(
        adapters: impl IntoIterator<Item = Arc<dyn SubscriptionGateway>>,
    ) -> Self {
        Self {
            gateways: adapters.into_iter().map(|a| (a.gateway(), a)).collect(),
        }
    }

    /// The adapter for `gateway`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` when the registry has no adapter for
    /// the gateway.
    pub fn get(&self, gateway: Gateway) -> Result<&dyn SubscriptionGateway, GatewayError> {
        self.gateways.get(&gateway).map(Arc::as_ref).ok_or_else(|| {
            GatewayError::new(
                GatewayErrorCode::UnsupportedOperation,
                format!("no adapter configured for gateway {}", gateway),
                false,
            )
        })
    }

    /// Gateways this registry can serve.
    pub fn available(&self) -> Vec<Gateway> {
        let mut list: Vec<_> = self.gateways.keys().copied().collect();
        list.sort_by_key(|g| g.as_str());
        list
    }
}
