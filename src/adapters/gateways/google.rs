//! Mobile-billing gateway adapter.
//!
//! Notifications arrive through a pub/sub push envelope and carry no
//! signature of their own. Authenticity is established server-to-server:
//! every purchase token is verified against the publisher read API before
//! any webhook-asserted state is trusted, and the current expiry is taken
//! from that response rather than from the notification.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::GoogleConfig;
use crate::domain::foundation::Timestamp;
use crate::domain::plan::Plan;
use crate::domain::subscription::{ProviderNotification, Signal, Subscription};
use crate::domain::Gateway;
use crate::ports::{
    CreateOptions, GatewayError, SubscriptionGateway, WebhookOutcome, WebhookRequest,
};

use super::common::{ChargeFacts, GatewayCore};

/// Renewal notification codes.
const NOTIFICATION_RENEWED: i64 = 3;
const NOTIFICATION_PURCHASED: i64 = 4;
/// Termination notification codes.
const NOTIFICATION_CANCELED: i64 = 7;
const NOTIFICATION_EXPIRED: i64 = 8;

pub struct GoogleGateway {
    core: GatewayCore,
    package_name: String,
    access_token: SecretString,
    api_base: String,
    http: reqwest::Client,
}

/// Distilled state of a purchase token at the provider.
#[derive(Debug, Clone)]
struct PurchaseState {
    expires_at: Option<Timestamp>,
    product_id: Option<String>,
    account_token: Option<String>,
    raw: serde_json::Value,
}

impl GoogleGateway {
    pub fn new(core: GatewayCore, config: &GoogleConfig, http: reqwest::Client) -> Self {
        Self {
            core,
            package_name: config.package_name.clone(),
            access_token: config.access_token.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            http,
        }
    }

    /// Verifies a purchase token against the publisher read API and
    /// returns the provider's current view of the subscription.
    async fn verify_purchase(&self, token: &str) -> Result<PurchaseState, GatewayError> {
        let url = format!(
            "{}/androidpublisher/v3/applications/{}/purchases/subscriptionsv2/tokens/{}",
            self.api_base, self.package_name, token
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::validation(format!(
                "purchase token rejected by publisher API [{}]: {}",
                status, body
            )));
        }

        let raw: serde_json::Value = response.json().await?;

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct LineItem {
            #[serde(default)]
            expiry_time: Option<String>,
            #[serde(default)]
            product_id: Option<String>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct AccountIdentifiers {
            #[serde(default)]
            obfuscated_external_account_id: Option<String>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct PurchaseResponse {
            #[serde(default)]
            line_items: Vec<LineItem>,
            #[serde(default)]
            external_account_identifiers: Option<AccountIdentifiers>,
        }

        let parsed: PurchaseResponse = serde_json::from_value(raw.clone())
            .map_err(|_| GatewayError::provider("publisher API response is malformed"))?;

        // the latest expiry across line items wins
        let expires_at = parsed
            .line_items
            .iter()
            .filter_map(|li| li.expiry_time.as_deref())
            .filter_map(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
            .map(|dt| Timestamp::from_datetime(dt.with_timezone(&chrono::Utc)))
            .max();
        let product_id = parsed.line_items.iter().find_map(|li| li.product_id.clone());
        let account_token = parsed
            .external_account_identifiers
            .and_then(|a| a.obfuscated_external_account_id);

        Ok(PurchaseState {
            expires_at,
            product_id,
            account_token,
            raw,
        })
    }
}

#[async_trait]
impl SubscriptionGateway for GoogleGateway {
    fn gateway(&self) -> Gateway {
        Gateway::Google
    }

    async fn create_subscription(
        &self,
        subscription: &Subscription,
        plan: &Plan,
        options: CreateOptions,
    ) -> Result<Subscription, GatewayError> {
        let token = options
            .proof
            .ok_or_else(|| GatewayError::validation("purchase token is required"))?;

        let state = self.verify_purchase(&token).await?;

        self.core
            .mark_active(
                subscription,
                plan,
                Some(token.clone()),
                state.expires_at,
                Some(state.raw.clone()),
                ChargeFacts {
                    provider_txn_id: Some(token),
                    metadata: state.raw,
                    ..ChargeFacts::default()
                },
                crate::domain::subscription::TransactionType::Payment,
            )
            .await
    }

    async fn cancel_subscription(
        &self,
        subscription: &Subscription,
        immediate: bool,
    ) -> Result<Subscription, GatewayError> {
        let token = subscription
            .gateway_id
            .as_deref()
            .ok_or_else(|| GatewayError::validation("subscription has no purchase token"))?;

        let url = format!(
            "{}/androidpublisher/v3/applications/{}/purchases/subscriptionsv2/tokens/{}:cancel",
            self.api_base, self.package_name, token
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.access_token.expose_secret())
            .json(&serde_json::json!({}))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::provider(format!(
                "cancel rejected by publisher API [{}]",
                response.status()
            )));
        }

        self.core.mark_canceled(subscription, immediate).await
    }

    async fn resume_subscription(
        &self,
        _subscription: &Subscription,
    ) -> Result<Subscription, GatewayError> {
        // No server-side reactivation path; the user must repurchase.
        Err(GatewayError::unsupported(Gateway::Google, "resume"))
    }

    async fn swap_plan(
        &self,
        _subscription: &Subscription,
        _new_plan: &Plan,
    ) -> Result<Subscription, GatewayError> {
        // Upgrades and downgrades are a new client-side purchase.
        Err(GatewayError::unsupported(Gateway::Google, "plan swap"))
    }

    async fn handle_webhook(
        &self,
        request: &WebhookRequest,
    ) -> Result<WebhookOutcome, GatewayError> {
        #[derive(Deserialize)]
        struct PubSubMessage {
            #[serde(default)]
            data: Option<String>,
        }
        #[derive(Deserialize)]
        struct Envelope {
            #[serde(default)]
            message: Option<PubSubMessage>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct SubscriptionNotification {
            #[serde(default)]
            notification_type: Option<i64>,
            #[serde(default)]
            purchase_token: Option<String>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Rtdn {
            #[serde(default)]
            subscription_notification: Option<SubscriptionNotification>,
        }

        // pub/sub envelope with base64 data, or a raw test payload
        let envelope: Envelope = request.json().unwrap_or(Envelope { message: None });
        let payload: serde_json::Value = match envelope.message.and_then(|m| m.data) {
            Some(data) => {
                let decoded = STANDARD
                    .decode(&data)
                    .map_err(|_| GatewayError::validation("pub/sub data is not valid base64"))?;
                serde_json::from_slice(&decoded)
                    .map_err(|_| GatewayError::validation("pub/sub data is not valid JSON"))?
            }
            None => request
                .json()
                .map_err(|_| GatewayError::validation("webhook body is not valid JSON"))?,
        };

        let rtdn: Rtdn = serde_json::from_value(payload.clone())
            .map_err(|_| GatewayError::validation("notification payload is malformed"))?;
        let Some(notification) = rtdn.subscription_notification else {
            debug!("notification carries no subscription change");
            return Ok(WebhookOutcome::Ignored {
                event_type: "unknown".into(),
                reason: "no subscriptionNotification".into(),
            });
        };

        let notification_type = notification.notification_type.unwrap_or(0);
        let event_type = format!("SUBSCRIPTION_NOTIFICATION_{}", notification_type);
        let Some(token) = notification.purchase_token else {
            warn!(notification_type, "notification carries no purchase token");
            return Ok(WebhookOutcome::Ignored {
                event_type,
                reason: "missing purchase token".into(),
            });
        };

        let signal = match notification_type {
            NOTIFICATION_RENEWED | NOTIFICATION_PURCHASED => Signal::Renewed,
            NOTIFICATION_CANCELED | NOTIFICATION_EXPIRED => Signal::CanceledOrExpired,
            other => {
                info!(notification_type = other, "unhandled notification type");
                return Ok(WebhookOutcome::Ignored {
                    event_type,
                    reason: "unhandled notification type".into(),
                });
            }
        };

        // The notification itself proves nothing. Fetch the authoritative
        // state; if the provider call fails the renewal falls back to the
        // plan interval and identity binding is unavailable.
        let state = match self.verify_purchase(&token).await {
            Ok(state) => Some(state),
            Err(err) => {
                warn!(error = %err, "publisher API lookup failed during webhook");
                None
            }
        };

        let mut provider =
            ProviderNotification::new(Gateway::Google, signal, event_type).with_gateway_id(token);
        let mut facts = ChargeFacts {
            metadata: payload,
            ..ChargeFacts::default()
        };
        if let Some(state) = state {
            if let Some(expires) = state.expires_at {
                provider = provider.with_expires_at(expires);
            }
            if let Some(account_token) = state.account_token {
                provider = provider.with_account_token(account_token);
            }
            if let Some(product_id) = state.product_id {
                provider = provider.with_provider_plan_id(product_id);
            }
            facts.metadata = state.raw;
        }

        self.core.apply_notification(&provider, facts).await
    }

    async fn redirect_target(
        &self,
        _subscription: &Subscription,
    ) -> Result<Option<String>, GatewayError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        InMemoryEventPublisher, InMemoryPlanCatalog, InMemorySubscriptionStore,
    };
    use crate::domain::foundation::AccountTokenCodec;
    use crate::ports::GatewayErrorCode;
    use secrecy::SecretString;
    use std::sync::Arc;

    fn gateway() -> GoogleGateway {
        let core = GatewayCore::new(
            Gateway::Google,
            Arc::new(InMemorySubscriptionStore::new()),
            Arc::new(InMemoryPlanCatalog::new()),
            Arc::new(InMemoryEventPublisher::new()),
            Arc::new(AccountTokenCodec::new(SecretString::new(
                "test-salt-test-salt".into(),
            ))),
        );
        let config = GoogleConfig {
            package_name: "com.example.app".into(),
            access_token: SecretString::new("token".into()),
            api_base: "https://androidpublisher.invalid".into(),
        };
        GoogleGateway::new(core, &config, reqwest::Client::new())
    }

    #[tokio::test]
    async fn webhook_without_subscription_notification_is_ignored() {
        let outcome = gateway()
            .handle_webhook(&WebhookRequest::from_body(r#"{"testNotification":{}}"#))
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn webhook_rejects_garbled_pubsub_data() {
        let body = r#"{"message":{"data":"%%% not base64 %%%"}}"#;
        let err = gateway()
            .handle_webhook(&WebhookRequest::from_body(body))
            .await
            .unwrap_err();
        assert_eq!(err.code, GatewayErrorCode::Validation);
    }

    #[tokio::test]
    async fn webhook_ignores_unhandled_notification_types() {
        // 13 is not one of the handled codes
        let rtdn = serde_json::json!({
            "subscriptionNotification": {
                "notificationType": 13,
                "purchaseToken": "tok-1",
            }
        });
        let body = serde_json::json!({
            "message": { "data": STANDARD.encode(rtdn.to_string()) }
        });

        let outcome = gateway()
            .handle_webhook(&WebhookRequest::from_body(body.to_string()))
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
    }
}
