//! Application configuration module
//!
//! Type-safe configuration loading from environment variables using the
//! `config` and `dotenvy` crates. Variables carry the `UNISUB` prefix and
//! nested values use `__` as separator:
//!
//! - `UNISUB__DATABASE__URL=postgres://...` -> `database.url`
//! - `UNISUB__XENDIT__CALLBACK_TOKEN=...` -> `xendit.callback_token`
//!
//! Secrets deserialize into `secrecy::SecretString` so they never appear in
//! debug output.

mod database;
mod error;
mod gateways;
mod identity;
mod renewal;

pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use gateways::{AppleConfig, GoogleConfig, PaypalConfig, XenditConfig};
pub use identity::IdentityConfig;
pub use renewal::RenewalConfig;

use serde::Deserialize;

/// Root application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Database configuration (PostgreSQL connection)
    pub database: DatabaseConfig,

    /// Obfuscated account token settings
    pub identity: IdentityConfig,

    /// Background renewal sweep settings
    #[serde(default)]
    pub renewal: RenewalConfig,

    /// Store-receipt provider
    pub apple: AppleConfig,

    /// Mobile-billing provider
    pub google: GoogleConfig,

    /// Redirect-checkout provider
    pub paypal: PaypalConfig,

    /// Recurring-plan provider
    pub xendit: XenditConfig,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Loads a `.env` file if present (development), then reads variables
    /// with the `UNISUB` prefix.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when required variables are missing or values
    /// cannot be parsed into the expected types.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::default().prefix("UNISUB").separator("__"))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.database.validate()?;
        self.identity.validate()?;
        self.renewal.validate()?;
        self.apple.validate()?;
        self.google.validate()?;
        self.paypal.validate()?;
        self.xendit.validate()?;
        Ok(())
    }
}
