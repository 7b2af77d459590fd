//! Redirect-checkout gateway adapter.
//!
//! Creation registers a provider-side subscription and hands back an
//! approval URL the subscriber must visit; activation is confirmed later
//! through a webhook. Webhook authenticity is proven by calling the
//! provider's own verification API with the transmission headers and the
//! raw event body; a missing header is a verification failure, never a
//! pass-through.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::PaypalConfig;
use crate::domain::foundation::{Money, Timestamp};
use crate::domain::plan::Plan;
use crate::domain::subscription::{
    ProviderNotification, Signal, Subscription, TransactionType,
};
use crate::domain::Gateway;
use crate::ports::{
    CreateOptions, GatewayError, SubscriptionGateway, WebhookOutcome, WebhookRequest,
};

use super::common::{ChargeFacts, GatewayCore};

/// Headers the verification API requires. All must be present.
const REQUIRED_HEADERS: [&str; 5] = [
    "paypal-transmission-id",
    "paypal-transmission-time",
    "paypal-cert-url",
    "paypal-auth-algo",
    "paypal-transmission-sig",
];

pub struct PaypalGateway {
    core: GatewayCore,
    client_id: String,
    client_secret: SecretString,
    webhook_id: String,
    api_base: String,
    http: reqwest::Client,
}

impl PaypalGateway {
    pub fn new(core: GatewayCore, config: &PaypalConfig, http: reqwest::Client) -> Self {
        Self {
            core,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            webhook_id: config.webhook_id.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            http,
        }
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::provider(format!(
                "token request rejected [{}]",
                response.status()
            )));
        }
        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    async fn api_post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::provider(format!(
                "API call {} rejected [{}]: {}",
                path, status, body
            )));
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(serde_json::Value::Null);
        }
        Ok(response.json().await.unwrap_or(serde_json::Value::Null))
    }

    fn approval_link(response: &serde_json::Value) -> Option<String> {
        response["links"].as_array().and_then(|links| {
            links
                .iter()
                .find(|l| l["rel"].as_str() == Some("approve"))
                .and_then(|l| l["href"].as_str())
                .map(str::to_string)
        })
    }

    fn gateway_plan_id<'a>(plan: &'a Plan) -> Result<&'a str, GatewayError> {
        plan.gateway_listing(Gateway::Paypal)
            .and_then(|l| l.gateway_plan_id.as_deref())
            .ok_or_else(|| {
                GatewayError::validation("plan has no provider plan id for this gateway")
            })
    }
}

#[async_trait]
impl SubscriptionGateway for PaypalGateway {
    fn gateway(&self) -> Gateway {
        Gateway::Paypal
    }

    async fn create_subscription(
        &self,
        subscription: &Subscription,
        plan: &Plan,
        options: CreateOptions,
    ) -> Result<Subscription, GatewayError> {
        let plan_id = Self::gateway_plan_id(plan)?;

        let mut payload = serde_json::json!({
            "plan_id": plan_id,
            "custom_id": format!("sub-{}", subscription.id),
            "application_context": {
                "shipping_preference": "NO_SHIPPING",
                "user_action": "SUBSCRIBE_NOW",
            },
        });
        if let Some(email) = &options.customer_email {
            payload["subscriber"] = serde_json::json!({ "email_address": email });
        }
        if let Some(url) = &options.return_url {
            payload["application_context"]["return_url"] = serde_json::json!(url);
        }
        if let Some(url) = &options.cancel_url {
            payload["application_context"]["cancel_url"] = serde_json::json!(url);
        }

        let response = self.api_post("/v1/billing/subscriptions", &payload).await?;

        let provider_id = response["id"].as_str().ok_or_else(|| {
            GatewayError::provider("subscription creation response carries no id")
        })?;
        if response["status"].as_str() != Some("APPROVAL_PENDING") {
            return Err(GatewayError::provider(format!(
                "unexpected subscription status {:?}",
                response["status"]
            )));
        }

        // Pending until the approval webhook arrives; no transaction yet.
        let updated = self
            .core
            .attach_gateway_id(subscription, provider_id.to_string(), Some(response.clone()))
            .await?;

        info!(
            subscription_id = %updated.id,
            provider_id,
            "redirect-checkout subscription awaiting approval"
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

        self.api_post(
            &format!("/v1/billing/subscriptions/{}/cancel", gateway_id),
            &serde_json::json!({ "reason": "Customer requested cancellation" }),
        )
        .await?;

        self.core.mark_canceled(subscription, immediate).await
    }

    async fn resume_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<Subscription, GatewayError> {
        let gateway_id = subscription
            .gateway_id
            .as_deref()
            .ok_or_else(|| GatewayError::validation("subscription has no provider id"))?;

        self.api_post(
            &format!("/v1/billing/subscriptions/{}/activate", gateway_id),
            &serde_json::json!({ "reason": "Customer requested reactivation" }),
        )
        .await?;

        self.core.mark_resumed(subscription).await
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
        let new_plan_id = Self::gateway_plan_id(new_plan)?;

        let response = self
            .api_post(
                &format!("/v1/billing/subscriptions/{}/revise", gateway_id),
                &serde_json::json!({ "plan_id": new_plan_id }),
            )
            .await?;
        if response.get("links").is_none() {
            return Err(GatewayError::provider("revise response carries no links"));
        }

        self.core.mark_swapped(subscription, new_plan).await
    }

    async fn handle_webhook(
        &self,
        request: &WebhookRequest,
    ) -> Result<WebhookOutcome, GatewayError> {
        // every transmission header is required for verification
        let mut headers = Vec::with_capacity(REQUIRED_HEADERS.len());
        for name in REQUIRED_HEADERS {
            match request.header(name) {
                Some(value) => headers.push(value.to_string()),
                None => {
                    return Err(GatewayError::authentication(format!(
                        "missing webhook header {}",
                        name
                    )))
                }
            }
        }
        let [transmission_id, transmission_time, cert_url, auth_algo, transmission_sig]: [String; 5] =
            headers
                .try_into()
                .map_err(|_| GatewayError::authentication("missing webhook headers"))?;

        let event: serde_json::Value = request
            .json()
            .map_err(|_| GatewayError::validation("webhook body is not valid JSON"))?;

        let verification = self
            .api_post(
                "/v1/notifications/verify-webhook-signature",
                &serde_json::json!({
                    "auth_algo": auth_algo,
                    "cert_url": cert_url,
                    "transmission_id": transmission_id,
                    "transmission_sig": transmission_sig,
                    "transmission_time": transmission_time,
                    "webhook_id": self.webhook_id,
                    "webhook_event": event,
                }),
            )
            .await?;

        if verification["verification_status"].as_str() != Some("SUCCESS") {
            return Err(GatewayError::authentication(
                "webhook signature verification failed",
            ));
        }

        let event_type = event["event_type"].as_str().unwrap_or_default().to_string();
        let resource_id = event["resource"]["id"]
            .as_str()
            .or_else(|| event["resource"]["billing_agreement_id"].as_str());
        let Some(resource_id) = resource_id else {
            warn!(event_type = %event_type, "webhook carries no resource id");
            return Ok(WebhookOutcome::Ignored {
                event_type,
                reason: "missing resource id".into(),
            });
        };

        match event_type.as_str() {
            "BILLING.SUBSCRIPTION.ACTIVATED" | "BILLING.SUBSCRIPTION.CREATED" => {
                let Some(sub) = self
                    .core
                    .store()
                    .find_by_gateway_id(Gateway::Paypal, resource_id)
                    .await?
                else {
                    warn!(resource_id, "activation webhook matched no subscription");
                    return Ok(WebhookOutcome::Ignored {
                        event_type,
                        reason: "no matching subscription".into(),
                    });
                };
                let plan = self.core.plan_for(&sub).await?;
                let ends_at = event["resource"]["billing_info"]["next_billing_time"]
                    .as_str()
                    .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
                    .map(|dt| Timestamp::from_datetime(dt.with_timezone(&chrono::Utc)));

                self.core
                    .mark_active(
                        &sub,
                        &plan,
                        None,
                        ends_at,
                        Some(event.clone()),
                        ChargeFacts {
                            provider_txn_id: Some(resource_id.to_string()),
                            metadata: event.clone(),
                            ..ChargeFacts::default()
                        },
                        TransactionType::Payment,
                    )
                    .await?;
                Ok(WebhookOutcome::Processed { event_type })
            }
            "PAYMENT.SALE.COMPLETED" => {
                let amount = event["resource"]["amount"]["total"]
                    .as_str()
                    .and_then(|t| Money::parse_decimal(t).ok());
                let currency = event["resource"]["amount"]["currency"]
                    .as_str()
                    .and_then(|c| c.parse().ok());

                let notification = ProviderNotification::new(
                    Gateway::Paypal,
                    Signal::Renewed,
                    event_type.clone(),
                )
                .with_gateway_id(resource_id);
                self.core
                    .apply_notification(
                        &notification,
                        ChargeFacts {
                            amount,
                            currency,
                            provider_txn_id: event["resource"]["id"]
                                .as_str()
                                .map(str::to_string),
                            metadata: event.clone(),
                        },
                    )
                    .await
            }
            "BILLING.SUBSCRIPTION.CANCELLED" | "BILLING.SUBSCRIPTION.EXPIRED" => {
                let notification = ProviderNotification::new(
                    Gateway::Paypal,
                    Signal::CanceledOrExpired,
                    event_type.clone(),
                )
                .with_gateway_id(resource_id);
                self.core
                    .apply_notification(&notification, ChargeFacts::default())
                    .await
            }
            "BILLING.SUBSCRIPTION.RE-ACTIVATED" => {
                let notification = ProviderNotification::new(
                    Gateway::Paypal,
                    Signal::BillingRecovered,
                    event_type.clone(),
                )
                .with_gateway_id(resource_id);
                self.core
                    .apply_notification(&notification, ChargeFacts::default())
                    .await
            }
            other => {
                info!(event_type = other, "unhandled webhook event type");
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
        let Some(response) = &subscription.gateway_response else {
            return Ok(None);
        };
        match Self::approval_link(response) {
            Some(link) => Ok(Some(link)),
            None => Err(GatewayError::provider(
                "approval link not found in creation response",
            )),
        }
    }
}
