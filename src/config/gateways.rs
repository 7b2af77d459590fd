//! Per-gateway provider configuration.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;

fn https_only(url: &str) -> Result<(), ValidationError> {
    if url.starts_with("https://") {
        Ok(())
    } else {
        Err(ValidationError::ApiBaseMustBeHttps)
    }
}

/// Store-receipt provider (App Store Server Notifications).
#[derive(Debug, Clone, Deserialize)]
pub struct AppleConfig {
    /// App bundle id notifications must match.
    pub bundle_id: String,

    /// Pinned root CA certificate, base64-encoded DER. Webhook certificate
    /// chains must terminate at exactly this certificate.
    pub root_certificate: String,
}

impl AppleConfig {
    /// The pinned root certificate as DER bytes.
    pub fn root_certificate_der(&self) -> Result<Vec<u8>, ValidationError> {
        STANDARD
            .decode(self.root_certificate.trim())
            .map_err(|_| ValidationError::InvalidRootCertificate)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.bundle_id.is_empty() {
            return Err(ValidationError::MissingRequired("APPLE__BUNDLE_ID"));
        }
        if self.root_certificate.is_empty() {
            return Err(ValidationError::MissingRequired("APPLE__ROOT_CERTIFICATE"));
        }
        self.root_certificate_der()?;
        Ok(())
    }
}

fn default_google_api_base() -> String {
    "https://androidpublisher.googleapis.com".to_string()
}

/// Mobile-billing provider (Play Billing + RTDN over pub/sub).
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    /// Android application package name.
    pub package_name: String,

    /// OAuth access token for the publisher read API, minted by the
    /// deployment environment.
    pub access_token: SecretString,

    #[serde(default = "default_google_api_base")]
    pub api_base: String,
}

impl GoogleConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.package_name.is_empty() {
            return Err(ValidationError::MissingRequired("GOOGLE__PACKAGE_NAME"));
        }
        if self.access_token.expose_secret().is_empty() {
            return Err(ValidationError::MissingRequired("GOOGLE__ACCESS_TOKEN"));
        }
        https_only(&self.api_base)
    }
}

fn default_paypal_api_base() -> String {
    "https://api-m.paypal.com".to_string()
}

/// Redirect-checkout provider.
#[derive(Debug, Clone, Deserialize)]
pub struct PaypalConfig {
    pub client_id: String,
    pub client_secret: SecretString,

    /// Webhook id registered with the provider, required by its signature
    /// verification API.
    pub webhook_id: String,

    #[serde(default = "default_paypal_api_base")]
    pub api_base: String,
}

impl PaypalConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.client_id.is_empty() {
            return Err(ValidationError::MissingRequired("PAYPAL__CLIENT_ID"));
        }
        if self.client_secret.expose_secret().is_empty() {
            return Err(ValidationError::MissingRequired("PAYPAL__CLIENT_SECRET"));
        }
        if self.webhook_id.is_empty() {
            return Err(ValidationError::MissingRequired("PAYPAL__WEBHOOK_ID"));
        }
        https_only(&self.api_base)
    }
}

fn default_xendit_api_base() -> String {
    "https://api.xendit.co".to_string()
}

/// Recurring-plan provider.
#[derive(Debug, Clone, Deserialize)]
pub struct XenditConfig {
    pub api_key: SecretString,

    /// Shared secret expected in the `x-callback-token` webhook header.
    pub callback_token: SecretString,

    #[serde(default = "default_xendit_api_base")]
    pub api_base: String,
}

impl XenditConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.api_key.expose_secret().is_empty() {
            return Err(ValidationError::MissingRequired("XENDIT__API_KEY"));
        }
        if self.callback_token.expose_secret().is_empty() {
            return Err(ValidationError::MissingRequired("XENDIT__CALLBACK_TOKEN"));
        }
        https_only(&self.api_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apple_rejects_bad_base64_root() {
        let config = AppleConfig {
            bundle_id: "com.example.app".into(),
            root_certificate: "not base64!!!".into(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn apple_accepts_base64_root() {
        let config = AppleConfig {
            bundle_id: "com.example.app".into(),
            root_certificate: STANDARD.encode(b"fake-der"),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn api_bases_must_be_https() {
        let config = XenditConfig {
            api_key: SecretString::new("key".into()),
            callback_token: SecretString::new("token".into()),
            api_base: "http://api.xendit.co".into(),
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::ApiBaseMustBeHttps)
        ));
    }

    #[test]
    fn paypal_requires_webhook_id() {
        let config = PaypalConfig {
            client_id: "client".into(),
            client_secret: SecretString::new("secret".into()),
            webhook_id: String::new(),
            api_base: default_paypal_api_base(),
        };
        assert!(config.validate().is_err());
    }
}
