//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid database URL format")]
    InvalidDatabaseUrl,

    #[error("Pool size must be between 1 and 100")]
    InvalidPoolSize,

    #[error("Account token salt must be at least 16 characters")]
    SaltTooShort,

    #[error("Pinned root certificate is not valid base64 DER")]
    InvalidRootCertificate,

    #[error("API base URL must use HTTPS")]
    ApiBaseMustBeHttps,

    #[error("Renewal batch size must be between 1 and 1000")]
    InvalidRenewalBatchSize,
}
