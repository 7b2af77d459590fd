//! Recurring-plan gateway adapter.
//!
//! Creation registers a provider-side recurring plan keyed by our
//! subscription id (`sub-{uuid}`) and may hand back an authorization URL
//! for the payer. Webhooks authenticate through the `x-callback-token`
//! shared secret, compared in constant time.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::config::XenditConfig;
use crate::domain::foundation::{Money, SubscriptionId};
use crate::domain::plan::Plan;
use crate::domain::subscription::{
    ProviderNotification, Signal, Subscription, TransactionStatus, TransactionType,
};
use crate::domain::Gateway;
use crate::ports::{
    CreateOptions, GatewayError, SubscriptionGateway, WebhookOutcome, WebhookRequest,
};

use super::common::{ChargeFacts, GatewayCore};

const API_VERSION: &str = "2022-07-31";

pub struct XenditGateway {
    core: GatewayCore,
    api_key: SecretString,
    callback_token: SecretString,
    api_base: String,
    http: reqwest::Client,
}

impl XenditGateway {
    pub fn new(core: GatewayCore, config: &XenditConfig, http: reqwest::Client) -> Self {
        Self {
            core,
            api_key: config.api_key.clone(),
            callback_token: config.callback_token.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            http,
        }
    }

    async fn api_request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&serde_json::Value>,
        idempotency_key: Option<String>,
    ) -> Result<serde_json::Value, GatewayError> {
        let mut request = self
            .http
            .request(method, format!("{}{}", self.api_base, path))
            .basic_auth(self.api_key.expose_secret(), Some(""))
            .header("api-version", API_VERSION);
        if let Some(key) = idempotency_key {
            request = request.header("idempotency-key", key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::provider(format!(
                "API call {} rejected [{}]: {}",
                path, status, body
            )));
        }
        Ok(response.json().await.unwrap_or(serde_json::Value::Null))
    }

    /// Amount as the major-unit number the provider expects.
    fn major_units(amount: Money) -> serde_json::Value {
        serde_json::Number::from_f64(amount.minor_units() as f64 / 100.0)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }

    /// Owned recurring plan id from a create response; the response value
    /// itself is stored as transaction metadata afterwards.
    fn plan_id_from(response: &serde_json::Value) -> Result<String, GatewayError> {
        response["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::provider("recurring plan response carries no id"))
    }

    fn auth_url(response: &serde_json::Value) -> Option<String> {
        response["actions"].as_array().and_then(|actions| {
            actions
                .iter()
                .find(|a| a["action"].as_str() == Some("AUTH"))
                .and_then(|a| a["url"].as_str())
                .map(str::to_string)
        })
    }

    fn check_callback_token(&self, request: &WebhookRequest) -> Result<(), GatewayError> {
        let provided = request
            .header("x-callback-token")
            .ok_or_else(|| GatewayError::authentication("missing x-callback-token header"))?;
        let expected = self.callback_token.expose_secret();
        if provided.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() != 1 {
            return Err(GatewayError::authentication("callback token mismatch"));
        }
        Ok(())
    }

    /// Locates the local subscription a callback refers to. Cycle events
    /// carry the recurring plan id under `plan_id`, plan events under `id`;
    /// both also echo our `sub-{uuid}` reference.
    async fn locate(
        &self,
        data: &serde_json::Value,
    ) -> Result<Option<Subscription>, GatewayError> {
        if let Some(reference) = data["reference_id"].as_str() {
            if let Some(id) = reference
                .strip_prefix("sub-")
                .and_then(|raw| raw.parse::<SubscriptionId>().ok())
            {
                if let Some(sub) = self.core.store().get(id).await? {
                    return Ok(Some(sub));
                }
            }
        }
        for key in ["plan_id", "id"] {
            if let Some(provider_id) = data[key].as_str() {
                if let Some(sub) = self
                    .core
                    .store()
                    .find_by_gateway_id(Gateway::Xendit, provider_id)
                    .await?
                {
                    return Ok(Some(sub));
                }
            }
        }
        Ok(None)
    }

    fn charge_facts(data: &serde_json::Value) -> ChargeFacts {
        ChargeFacts {
            amount: data["amount"]
                .as_f64()
                .map(|a| Money::from_minor_units((a * 100.0).round() as i64)),
            currency: data["currency"].as_str().and_then(|c| c.parse().ok()),
            provider_txn_id: data["id"].as_str().map(str::to_string),
            metadata: data.clone(),
        }
    }
}

#[async_trait]
impl SubscriptionGateway for XenditGateway {
    fn gateway(&self) -> Gateway {
        Gateway::Xendit
    }

    async fn create_subscription(
        &self,
        subscription: &Subscription,
        plan: &Plan,
        options: CreateOptions,
    ) -> Result<Subscription, GatewayError> {
        let amount = plan.price_for(Gateway::Xendit);
        let currency = plan.currency_for(Gateway::Xendit);

        let mut payload = serde_json::json!({
            "reference_id": format!("sub-{}", subscription.id),
            "recurring_action": "PAYMENT",
            "amount": Self::major_units(amount),
            "currency": currency.as_str(),
            "schedule": {
                "reference_id": format!("sched-{}", subscription.id),
                "interval": plan.interval().as_str().to_uppercase(),
                "interval_count": plan.interval_count(),
                "retry_interval": "DAY",
                "retry_interval_count": 3,
                "total_retry": 3,
                "failed_attempt_notifications": [1, 3],
            },
            "immediate_action_type": "FULL_AMOUNT",
            "failed_cycle_action": "STOP",
            "metadata": { "subscription_id": subscription.id.to_string() },
        });
        if let Some(url) = &options.return_url {
            payload["success_return_url"] = serde_json::json!(url);
        }
        if let Some(url) = &options.cancel_url {
            payload["failure_return_url"] = serde_json::json!(url);
        }

        let response = self
            .api_request(
                reqwest::Method::POST,
                "/recurring/plans",
                Some(&payload),
                Some(format!("xendit-create-sub-{}", subscription.id)),
            )
            .await?;

        let provider_id = Self::plan_id_from(&response)?;

        // Pending until the activation callback; authorization may still be
        // required from the payer.
        let updated = self
            .core
            .attach_gateway_id(subscription, provider_id.clone(), Some(response.clone()))
            .await?;

        self.core
            .record_charge(
                &updated,
                plan,
                TransactionType::Setup,
                TransactionStatus::Pending,
                ChargeFacts {
                    provider_txn_id: Some(provider_id.clone()),
                    metadata: response,
                    ..ChargeFacts::default()
                },
            )
            .await?;

        info!(
            subscription_id = %updated.id,
            provider_id,
            "recurring plan registered, awaiting activation"
        );
        Ok(updated)
    }

    async fn cancel_subscription(
        &self,
        subscription: &Subscription,
        immediate: bool,
    ) -> Result<Subscription, GatewayError> {
        let gateway_id = subscription
            .gateway_id
            .as_deref()
            .ok_or_else(|| GatewayError::validation("subscription has no provider id"))?;

        self.api_request(
            reqwest::Method::POST,
            &format!("/recurring/plans/{}/deactivate", gateway_id),
            None,
            None,
        )
        .await?;

        self.core.mark_canceled(subscription, immediate).await
    }

    async fn resume_subscription(
        &self,
        _subscription: &Subscription,
    ) -> Result<Subscription, GatewayError> {
        Err(GatewayError::unsupported(Gateway::Xendit, "resume"))
    }

    async fn swap_plan(
        &self,
        subscription: &Subscription,
        new_plan: &Plan,
    ) -> Result<Subscription, GatewayError> {
        let gateway_id = subscription
            .gateway_id
            .as_deref()
            .ok_or_else(|| GatewayError::validation("subscription has no provider id"))?;

        let current = self
            .api_request(
                reqwest::Method::GET,
                &format!("/recurring/plans/{}", gateway_id),
                None,
                None,
            )
            .await?;
        let schedule_id = current["schedule_id"]
            .as_str()
            .or_else(|| current["schedule"]["id"].as_str())
            .ok_or_else(|| GatewayError::provider("recurring plan carries no schedule id"))?
            .to_string();

        self.api_request(
            reqwest::Method::PATCH,
            &format!("/recurring/plans/{}", gateway_id),
            Some(&serde_json::json!({
                "amount": Self::major_units(new_plan.price_for(Gateway::Xendit)),
                "currency": new_plan.currency_for(Gateway::Xendit).as_str(),
                "description": new_plan.name(),
            })),
            None,
        )
        .await?;

        self.api_request(
            reqwest::Method::PATCH,
            &format!("/recurring/schedules/{}", schedule_id),
            Some(&serde_json::json!({
                "interval": new_plan.interval().as_str().to_uppercase(),
                "interval_count": new_plan.interval_count(),
            })),
            None,
        )
        .await?;

        self.core.mark_swapped(subscription, new_plan).await
    }

    async fn handle_webhook(
        &self,
        request: &WebhookRequest,
    ) -> Result<WebhookOutcome, GatewayError> {
        self.check_callback_token(request)?;

        let payload: serde_json::Value = request
            .json()
            .map_err(|_| GatewayError::validation("callback body is not valid JSON"))?;
        let event_type = payload["event"].as_str().unwrap_or_default().to_string();
        let data = &payload["data"];

        match event_type.as_str() {
            "recurring.plan.activated" => {
                let Some(sub) = self.locate(data).await? else {
                    warn!(event_type = %event_type, "activation callback matched no subscription");
                    return Ok(WebhookOutcome::Ignored {
                        event_type,
                        reason: "no matching subscription".into(),
                    });
                };
                let plan = self.core.plan_for(&sub).await?;
                let gateway_id = data["id"].as_str().map(str::to_string);
                let ends_at = sub.next_period_end(&plan);

                self.core
                    .mark_active(
                        &sub,
                        &plan,
                        gateway_id,
                        Some(ends_at),
                        Some(data.clone()),
                        Self::charge_facts(data),
                        TransactionType::Payment,
                    )
                    .await?;
                Ok(WebhookOutcome::Processed { event_type })
            }
            "recurring.cycle.succeeded" => {
                let mut notification = ProviderNotification::new(
                    Gateway::Xendit,
                    Signal::Renewed,
                    event_type.clone(),
                );
                if let Some(plan_id) = data["plan_id"].as_str() {
                    notification = notification.with_gateway_id(plan_id);
                }
                self.core
                    .apply_notification(&notification, Self::charge_facts(data))
                    .await
            }
            "recurring.cycle.failed" => {
                let Some(sub) = self.locate(data).await? else {
                    warn!(event_type = %event_type, "failed-cycle callback matched no subscription");
                    return Ok(WebhookOutcome::Ignored {
                        event_type,
                        reason: "no matching subscription".into(),
                    });
                };
                let plan = self.core.plan_for(&sub).await?;
                self.core
                    .record_charge(
                        &sub,
                        &plan,
                        TransactionType::Failed,
                        TransactionStatus::Failed,
                        Self::charge_facts(data),
                    )
                    .await?;
                // Plans are created with failed_cycle_action STOP, so a
                // failed cycle ends the subscription provider-side.
                self.core.mark_canceled(&sub, true).await?;
                Ok(WebhookOutcome::Processed { event_type })
            }
            "recurring.plan.inactivated" => {
                let mut notification = ProviderNotification::new(
                    Gateway::Xendit,
                    Signal::CanceledOrExpired,
                    event_type.clone(),
                );
                if let Some(id) = data["id"].as_str() {
                    notification = notification.with_gateway_id(id);
                }
                self.core
                    .apply_notification(&notification, ChargeFacts::default())
                    .await
            }
            "recurring.cycle.retrying" => {
                info!(
                    cycle_id = data["id"].as_str().unwrap_or_default(),
                    "charge cycle retrying, no state change"
                );
                Ok(WebhookOutcome::Ignored {
                    event_type,
                    reason: "retry in progress".into(),
                })
            }
            other => {
                info!(event_type = other, "unhandled callback event type");
                Ok(WebhookOutcome::Ignored {
                    event_type,
                    reason: "unhandled event type".into(),
                })
            }
        }
    }

    async fn redirect_target(
        &self,
        subscription: &Subscription,
    ) -> Result<Option<String>, GatewayError> {
        // Authorization is only required for some payment methods; a plan
        // without an AUTH action needs no redirect.
        Ok(subscription
            .gateway_response
            .as_ref()
            .and_then(Self::auth_url))
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
    use http::header::{HeaderMap, HeaderValue};
    use secrecy::SecretString;
    use std::sync::Arc;

    fn gateway() -> (XenditGateway, Arc<InMemorySubscriptionStore>) {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let core = GatewayCore::new(
            Gateway::Xendit,
            store.clone(),
            Arc::new(InMemoryPlanCatalog::new()),
            Arc::new(InMemoryEventPublisher::new()),
            Arc::new(AccountTokenCodec::new(SecretString::new(
                "test-salt-test-salt".into(),
            ))),
        );
        let config = XenditConfig {
            api_key: SecretString::new("xnd-key".into()),
            callback_token: SecretString::new("shared-callback-token".into()),
            api_base: "https://api.invalid".into(),
        };
        (XenditGateway::new(core, &config, reqwest::Client::new()), store)
    }

    fn plan() -> Plan {
        Plan::new(
            "Premium",
            "premium",
            Money::from_minor_units(2_990_000),
            Currency::new("IDR").unwrap(),
            BillingInterval::Month,
            1,
        )
        .unwrap()
    }

    fn callback(token: Option<&'static str>, body: &str) -> WebhookRequest {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            headers.insert("x-callback-token", HeaderValue::from_static(token));
        }
        WebhookRequest::new(headers, body.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn callback_without_token_is_rejected() {
        let (gw, store) = gateway();
        let sub = Subscription::new(
            SubscriberRef::new("user", "1").unwrap(),
            &plan(),
            Gateway::Xendit,
        );
        store.insert(sub.clone()).await.unwrap();

        let request = callback(
            None,
            r#"{"event":"recurring.plan.inactivated","data":{"id":"rp-1"}}"#,
        );
        let err = gw.handle_webhook(&request).await.unwrap_err();
        assert_eq!(err.code, GatewayErrorCode::Authentication);

        // nothing mutated
        let stored = store.get(sub.id).await.unwrap().unwrap();
        assert!(stored.canceled_at.is_none());
        assert!(store.transactions_for(sub.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn callback_with_wrong_token_is_rejected() {
        let (gw, _) = gateway();
        let request = callback(Some("guessed-token"), r#"{"event":"x","data":{}}"#);
        let err = gw.handle_webhook(&request).await.unwrap_err();
        assert_eq!(err.code, GatewayErrorCode::Authentication);
        assert!(err.message.contains("mismatch"));
    }

    #[tokio::test]
    async fn unknown_event_is_acknowledged_as_ignored() {
        let (gw, _) = gateway();
        let request = callback(
            Some("shared-callback-token"),
            r#"{"event":"recurring.cycle.created","data":{"id":"rc-1"}}"#,
        );
        let outcome = gw.handle_webhook(&request).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn retrying_cycle_changes_nothing() {
        let (gw, store) = gateway();
        let mut sub = Subscription::new(
            SubscriberRef::new("user", "1").unwrap(),
            &plan(),
            Gateway::Xendit,
        );
        sub.gateway_id = Some("rp-1".into());
        store.insert(sub.clone()).await.unwrap();

        let request = callback(
            Some("shared-callback-token"),
            r#"{"event":"recurring.cycle.retrying","data":{"id":"rc-9","plan_id":"rp-1"}}"#,
        );
        let outcome = gw.handle_webhook(&request).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
        assert!(store.transactions_for(sub.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resume_is_unsupported() {
        let (gw, _) = gateway();
        let sub = Subscription::new(
            SubscriberRef::new("user", "1").unwrap(),
            &plan(),
            Gateway::Xendit,
        );
        let err = gw.resume_subscription(&sub).await.unwrap_err();
        assert_eq!(err.code, GatewayErrorCode::UnsupportedOperation);
    }

    #[tokio::test]
    async fn redirect_target_reads_auth_action() {
        let (gw, _) = gateway();
        let mut sub = Subscription::new(
            SubscriberRef::new("user", "1").unwrap(),
            &plan(),
            Gateway::Xendit,
        );
        sub.gateway_response = Some(serde_json::json!({
            "actions": [
                { "action": "AUTH", "url": "https://checkout.invalid/auth/1" },
            ]
        }));
        assert_eq!(
            gw.redirect_target(&sub).await.unwrap().as_deref(),
            Some("https://checkout.invalid/auth/1")
        );

        sub.gateway_response = Some(serde_json::json!({ "actions": [] }));
        assert_eq!(gw.redirect_target(&sub).await.unwrap(), None);
    }

    #[test]
    fn plan_id_is_extracted_owned_from_the_create_response() {
        let response = serde_json::json!({ "id": "repl_123", "status": "PENDING" });
        let id = XenditGateway::plan_id_from(&response).unwrap();
        drop(response);
        assert_eq!(id, "repl_123");

        let err = XenditGateway::plan_id_from(&serde_json::json!({})).unwrap_err();
        assert_eq!(err.code, GatewayErrorCode::Provider);
    }
}
