//! Identity obfuscation configuration.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;

/// Settings for the obfuscated account token codec.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Salt keying the token HMAC. Changing it invalidates every token
    /// already handed to providers.
    pub account_token_salt: SecretString,
}

impl IdentityConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let salt = self.account_token_salt.expose_secret();
        if salt.is_empty() {
            return Err(ValidationError::MissingRequired(
                "IDENTITY__ACCOUNT_TOKEN_SALT",
            ));
        }
        if salt.len() < 16 {
            return Err(ValidationError::SaltTooShort);
        }
        Ok(())
    }
}
