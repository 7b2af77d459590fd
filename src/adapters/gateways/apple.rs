//! Store-receipt gateway adapter.
//!
//! Creation validates a signed transaction the app obtained from the
//! store; lifecycle changes arrive exclusively through server
//! notifications (the store renews on user repurchase and never exposes
//! cancel, resume, or plan-change APIs). Both the notification envelope
//! and the nested transaction are JWS payloads verified against the
//! pinned root.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::AppleConfig;
use crate::domain::foundation::{Money, Timestamp};
use crate::domain::plan::Plan;
use crate::domain::subscription::{
    ProviderNotification, Signal, Subscription, TransactionStatus, TransactionType,
};
use crate::domain::Gateway;
use crate::ports::{
    CreateOptions, GatewayError, SubscriptionGateway, WebhookOutcome, WebhookRequest,
};

use super::common::{ChargeFacts, GatewayCore};
use super::signed_payload::SignedPayloadVerifier;

pub struct AppleGateway {
    core: GatewayCore,
    bundle_id: String,
    verifier: SignedPayloadVerifier,
}

/// Claims of a verified signed transaction.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionClaims {
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    original_transaction_id: Option<String>,
    #[serde(default)]
    product_id: Option<String>,
    #[serde(default)]
    bundle_id: Option<String>,
    /// Expiry in epoch milliseconds.
    #[serde(default)]
    expires_date: Option<i64>,
    /// Price in milliunits of the currency.
    #[serde(default)]
    price: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
}

impl AppleGateway {
    pub fn new(core: GatewayCore, config: &AppleConfig) -> Result<Self, GatewayError> {
        let root_der = config
            .root_certificate_der()
            .map_err(|e| GatewayError::validation(e.to_string()))?;
        Ok(Self {
            core,
            bundle_id: config.bundle_id.clone(),
            verifier: SignedPayloadVerifier::new(root_der),
        })
    }

    /// Verifies a signed transaction and returns its claims, typed and raw.
    fn decode_transaction(
        &self,
        jws: &str,
    ) -> Result<(TransactionClaims, serde_json::Value), GatewayError> {
        let claims = self.verifier.verify(jws)?;
        let transaction: TransactionClaims = serde_json::from_value(claims.clone())
            .map_err(|_| GatewayError::authentication("transaction claims are malformed"))?;

        if let Some(bundle_id) = &transaction.bundle_id {
            if bundle_id != &self.bundle_id {
                return Err(GatewayError::authentication(format!(
                    "transaction bundle id '{}' does not match",
                    bundle_id
                )));
            }
        }
        Ok((transaction, claims))
    }

    fn charge_facts(transaction: &TransactionClaims, claims_json: serde_json::Value) -> ChargeFacts {
        ChargeFacts {
            // the store reports price in milliunits
            amount: transaction.price.map(|p| Money::from_minor_units(p / 10)),
            currency: transaction
                .currency
                .as_deref()
                .and_then(|c| c.parse().ok()),
            provider_txn_id: transaction.transaction_id.clone(),
            metadata: claims_json,
        }
    }
}

#[async_trait]
impl SubscriptionGateway for AppleGateway {
    fn gateway(&self) -> Gateway {
        Gateway::Apple
    }

    async fn create_subscription(
        &self,
        subscription: &Subscription,
        plan: &Plan,
        options: CreateOptions,
    ) -> Result<Subscription, GatewayError> {
        let proof = options
            .proof
            .ok_or_else(|| GatewayError::validation("signed transaction is required"))?;

        let (transaction, claims_json) = self.decode_transaction(&proof)?;

        let gateway_id = transaction
            .original_transaction_id
            .clone()
            .or_else(|| transaction.transaction_id.clone())
            .ok_or_else(|| GatewayError::validation("transaction carries no transaction id"))?;
        let ends_at = transaction.expires_date.and_then(Timestamp::from_unix_millis);

        self.core
            .mark_active(
                subscription,
                plan,
                Some(gateway_id),
                ends_at,
                Some(claims_json.clone()),
                Self::charge_facts(&transaction, claims_json),
                TransactionType::Payment,
            )
            .await
    }

    async fn cancel_subscription(
        &self,
        subscription: &Subscription,
        immediate: bool,
    ) -> Result<Subscription, GatewayError> {
        // No server-side cancellation API; the local record is the truth
        // until the store notifies otherwise.
        info!(subscription_id = %subscription.id, "store-receipt cancel applied locally");
        self.core.mark_canceled(subscription, immediate).await
    }

    async fn resume_subscription(
        &self,
        _subscription: &Subscription,
    ) -> Result<Subscription, GatewayError> {
        Err(GatewayError::unsupported(Gateway::Apple, "resume"))
    }

    async fn swap_plan(
        &self,
        _subscription: &Subscription,
        _new_plan: &Plan,
    ) -> Result<Subscription, GatewayError> {
        Err(GatewayError::unsupported(Gateway::Apple, "plan swap"))
    }

    async fn handle_webhook(
        &self,
        request: &WebhookRequest,
    ) -> Result<WebhookOutcome, GatewayError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Envelope {
            signed_payload: String,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct NotificationData {
            #[serde(default)]
            signed_transaction_info: Option<String>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Notification {
            #[serde(default)]
            notification_type: Option<String>,
            #[serde(default)]
            data: Option<NotificationData>,
        }

        let envelope: Envelope = request
            .json()
            .map_err(|_| GatewayError::authentication("webhook carries no signedPayload"))?;

        let notification: Notification =
            serde_json::from_value(self.verifier.verify(&envelope.signed_payload)?)
                .map_err(|_| GatewayError::authentication("notification claims are malformed"))?;
        let event_type = notification.notification_type.unwrap_or_default();

        let (transaction, claims_json) = match notification
            .data
            .and_then(|d| d.signed_transaction_info)
        {
            Some(jws) => {
                let (transaction, claims) = self.decode_transaction(&jws)?;
                (Some(transaction), claims)
            }
            None => (None, serde_json::Value::Null),
        };

        let gateway_id = transaction.as_ref().and_then(|t| {
            t.original_transaction_id
                .clone()
                .or_else(|| t.transaction_id.clone())
        });
        let expires_at = transaction
            .as_ref()
            .and_then(|t| t.expires_date)
            .and_then(Timestamp::from_unix_millis);

        let signal = match event_type.as_str() {
            "SUBSCRIBED" | "DID_RENEW" => Signal::Renewed,
            "CANCEL" | "DID_CHANGE_RENEWAL_STATUS" | "EXPIRED" => Signal::CanceledOrExpired,
            "BILLING_RECOVERY" => Signal::BillingRecovered,
            "DID_FAIL_TO_RENEW" => {
                // a failed charge is recorded without any state transition
                let Some(gateway_id) = gateway_id else {
                    return Ok(WebhookOutcome::Ignored {
                        event_type,
                        reason: "missing transaction id".into(),
                    });
                };
                let Some(sub) = self
                    .core
                    .store()
                    .find_by_gateway_id(Gateway::Apple, &gateway_id)
                    .await?
                else {
                    warn!(gateway_id, "failed-renewal notification matched no subscription");
                    return Ok(WebhookOutcome::Ignored {
                        event_type,
                        reason: "no matching subscription".into(),
                    });
                };
                let plan = self.core.plan_for(&sub).await?;
                let mut facts = transaction
                    .as_ref()
                    .map(|t| Self::charge_facts(t, claims_json))
                    .unwrap_or_default();
                facts.amount = Some(Money::ZERO);
                self.core
                    .record_charge(&sub, &plan, TransactionType::Failed, TransactionStatus::Failed, facts)
                    .await?;
                return Ok(WebhookOutcome::Processed { event_type });
            }
            other => {
                info!(event_type = other, "unhandled store notification type");
                return Ok(WebhookOutcome::Ignored {
                    event_type,
                    reason: "unhandled notification type".into(),
                });
            }
        };

        let mut provider = ProviderNotification::new(Gateway::Apple, signal, event_type);
        if let Some(id) = gateway_id {
            provider = provider.with_gateway_id(id);
        }
        if let Some(expires) = expires_at {
            provider = provider.with_expires_at(expires);
        }

        let facts = transaction
            .as_ref()
            .map(|t| Self::charge_facts(t, claims_json))
            .unwrap_or_default();
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
    use crate::domain::foundation::{AccountTokenCodec, Currency, SubscriberRef};
    use crate::domain::plan::BillingInterval;
    use crate::ports::{GatewayErrorCode, SubscriptionStore};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use secrecy::SecretString;
    use std::sync::Arc;

    fn gateway_with_store() -> (AppleGateway, Arc<InMemorySubscriptionStore>) {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let core = GatewayCore::new(
            Gateway::Apple,
            store.clone(),
            Arc::new(InMemoryPlanCatalog::new()),
            Arc::new(InMemoryEventPublisher::new()),
            Arc::new(AccountTokenCodec::new(SecretString::new(
                "test-salt-test-salt".into(),
            ))),
        );
        let config = AppleConfig {
            bundle_id: "com.example.app".into(),
            root_certificate: STANDARD.encode(b"pinned-root"),
        };
        (AppleGateway::new(core, &config).unwrap(), store)
    }

    fn plan() -> Plan {
        Plan::new(
            "Premium",
            "premium",
            Money::from_minor_units(999),
            Currency::USD,
            BillingInterval::Month,
            1,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_rejects_missing_proof() {
        let (gateway, _) = gateway_with_store();
        let sub = Subscription::new(
            SubscriberRef::new("user", "1").unwrap(),
            &plan(),
            Gateway::Apple,
        );

        let err = gateway
            .create_subscription(&sub, &plan(), CreateOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, GatewayErrorCode::Validation);
    }

    #[tokio::test]
    async fn webhook_with_bad_chain_rejects_and_mutates_nothing() {
        let (gateway, store) = gateway_with_store();

        let mut sub = Subscription::new(
            SubscriberRef::new("user", "1").unwrap(),
            &plan(),
            Gateway::Apple,
        );
        sub.gateway_id = Some("orig-txn-1".into());
        let before_end = Timestamp::now().plus_days(10);
        sub.set_period_end(before_end, 0);
        store.insert(sub.clone()).await.unwrap();

        // a signedPayload whose chain cannot verify
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let header = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&serde_json::json!({
                "alg": "ES256",
                "x5c": [STANDARD.encode(b"junk"), STANDARD.encode(b"junk"), STANDARD.encode(b"pinned-root")],
            }))
            .unwrap(),
        );
        let claims = URL_SAFE_NO_PAD.encode(br#"{"notificationType":"DID_RENEW"}"#);
        let sig = URL_SAFE_NO_PAD.encode([0u8; 64]);
        let body = serde_json::json!({
            "signedPayload": format!("{}.{}.{}", header, claims, sig),
        });

        let err = gateway
            .handle_webhook(&WebhookRequest::from_body(body.to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.code, GatewayErrorCode::Authentication);

        let after = store.get(sub.id).await.unwrap().unwrap();
        assert_eq!(after.ends_at, Some(before_end));
        assert_eq!(after.renewal_count, 0);
        assert!(store.transactions_for(sub.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resume_and_swap_are_unsupported() {
        let (gateway, _) = gateway_with_store();
        let sub = Subscription::new(
            SubscriberRef::new("user", "1").unwrap(),
            &plan(),
            Gateway::Apple,
        );

        let err = gateway.resume_subscription(&sub).await.unwrap_err();
        assert_eq!(err.code, GatewayErrorCode::UnsupportedOperation);

        let err = gateway.swap_plan(&sub, &plan()).await.unwrap_err();
        assert_eq!(err.code, GatewayErrorCode::UnsupportedOperation);
    }
}
