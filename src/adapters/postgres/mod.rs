//! PostgreSQL adapters - durable implementations of the persistence ports.
//!
//! Every mutating store operation is one atomic statement (or one short
//! transaction) scoped to a single subscription row, so concurrent webhook
//! deliveries and the renewal sweep cannot interleave partial updates.

mod plan_catalog;
mod subscription_store;

pub use plan_catalog::PostgresPlanCatalog;
pub use subscription_store::PostgresSubscriptionStore;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::DatabaseConfig;
use crate::domain::foundation::{DomainError, ErrorCode};

/// Embedded schema migrations, applied with [`run_migrations`].
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Opens a connection pool from configuration.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DomainError> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to connect to database: {}", e),
            )
        })
}

/// Applies pending schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DomainError> {
    MIGRATOR.run(pool).await.map_err(|e| {
        DomainError::new(ErrorCode::DatabaseError, format!("Migration failed: {}", e))
    })
}

pub(crate) fn db_error(context: &str, err: sqlx::Error) -> DomainError {
    DomainError::new(ErrorCode::DatabaseError, format!("{}: {}", context, err))
}
