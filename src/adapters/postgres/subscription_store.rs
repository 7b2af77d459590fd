//! PostgreSQL implementation of SubscriptionStore.
//!
//! Renewal is a compare-and-set on the stored period end; usage recording
//! takes a per-(subscription, feature) advisory lock so the quota check and
//! the append cannot race.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::foundation::{
    Currency, DomainError, ErrorCode, Money, PlanId, SubscriberRef, SubscriptionId, Timestamp,
    TransactionId,
};
use crate::domain::subscription::{
    Subscription, SubscriptionTransaction, TransactionStatus, TransactionType,
};
use crate::domain::Gateway;
use crate::ports::store::{RenewalOutcome, UsageOutcome};
use crate::ports::SubscriptionStore;

use super::db_error;

/// PostgreSQL implementation of the SubscriptionStore port.
pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    /// Creates a store backed by the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> =
            sqlx::query_as(&format!("{} WHERE id = $1", SELECT_SUBSCRIPTION))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("Failed to load subscription", e))?;
        row.map(Subscription::try_from).transpose()
    }

    async fn fetch_required(&self, id: SubscriptionId) -> Result<Subscription, DomainError> {
        self.fetch(id).await?.ok_or_else(|| not_found(id))
    }
}

const SELECT_SUBSCRIPTION: &str = r#"
    SELECT id, owner_type, owner_id, plan_id, gateway, gateway_id,
           starts_at, ends_at, trial_ends_at, grace_ends_at, canceled_at,
           renewal_count, gateway_response, created_at, updated_at
    FROM subscriptions
"#;

/// Database row representation of a subscription.
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    owner_type: String,
    owner_id: String,
    plan_id: Uuid,
    gateway: String,
    gateway_id: Option<String>,
    starts_at: DateTime<Utc>,
    ends_at: Option<DateTime<Utc>>,
    trial_ends_at: Option<DateTime<Utc>>,
    grace_ends_at: Option<DateTime<Utc>>,
    canceled_at: Option<DateTime<Utc>>,
    renewal_count: i32,
    gateway_response: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let gateway: Gateway = row.gateway.parse().map_err(|_| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid gateway value: {}", row.gateway),
            )
        })?;
        let subscriber = SubscriberRef::new(row.owner_type, row.owner_id)
            .map_err(|e| DomainError::new(ErrorCode::DatabaseError, e.to_string()))?;

        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.id),
            subscriber,
            plan_id: PlanId::from_uuid(row.plan_id),
            gateway,
            gateway_id: row.gateway_id,
            starts_at: Timestamp::from_datetime(row.starts_at),
            ends_at: row.ends_at.map(Timestamp::from_datetime),
            trial_ends_at: row.trial_ends_at.map(Timestamp::from_datetime),
            grace_ends_at: row.grace_ends_at.map(Timestamp::from_datetime),
            canceled_at: row.canceled_at.map(Timestamp::from_datetime),
            renewal_count: row.renewal_count.max(0) as u32,
            gateway_response: row.gateway_response,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

/// Database row representation of a transaction.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    subscription_id: Uuid,
    transaction_type: String,
    amount: i64,
    currency: String,
    gateway_transaction_id: Option<String>,
    status: String,
    metadata: serde_json::Value,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for SubscriptionTransaction {
    type Error = DomainError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(SubscriptionTransaction {
            id: TransactionId::from_uuid(row.id),
            subscription_id: SubscriptionId::from_uuid(row.subscription_id),
            transaction_type: parse_transaction_type(&row.transaction_type)?,
            amount: Money::from_minor_units(row.amount),
            currency: Currency::new(&row.currency)
                .map_err(|e| DomainError::new(ErrorCode::DatabaseError, e.to_string()))?,
            gateway_transaction_id: row.gateway_transaction_id,
            status: parse_transaction_status(&row.status)?,
            metadata: row.metadata,
            occurred_at: Timestamp::from_datetime(row.occurred_at),
        })
    }
}

fn parse_transaction_type(s: &str) -> Result<TransactionType, DomainError> {
    match s {
        "payment" => Ok(TransactionType::Payment),
        "renewal" => Ok(TransactionType::Renewal),
        "refund" => Ok(TransactionType::Refund),
        "failed" => Ok(TransactionType::Failed),
        "setup" => Ok(TransactionType::Setup),
        "expiry" => Ok(TransactionType::Expiry),
        "plan_swap" => Ok(TransactionType::PlanSwap),
        _ => Err(DomainError::new(
            ErrorCode::DatabaseError,
            format!("Invalid transaction type: {}", s),
        )),
    }
}

fn parse_transaction_status(s: &str) -> Result<TransactionStatus, DomainError> {
    match s {
        "completed" => Ok(TransactionStatus::Completed),
        "failed" => Ok(TransactionStatus::Failed),
        "refunded" => Ok(TransactionStatus::Refunded),
        "pending" => Ok(TransactionStatus::Pending),
        _ => Err(DomainError::new(
            ErrorCode::DatabaseError,
            format!("Invalid transaction status: {}", s),
        )),
    }
}

fn not_found(id: SubscriptionId) -> DomainError {
    DomainError::new(
        ErrorCode::SubscriptionNotFound,
        format!("Subscription {} not found", id),
    )
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn insert(&self, subscription: Subscription) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, owner_type, owner_id, plan_id, gateway, gateway_id,
                starts_at, ends_at, trial_ends_at, grace_ends_at, canceled_at,
                renewal_count, gateway_response, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.subscriber.owner_type())
        .bind(subscription.subscriber.owner_id())
        .bind(subscription.plan_id.as_uuid())
        .bind(subscription.gateway.as_str())
        .bind(&subscription.gateway_id)
        .bind(subscription.starts_at.as_datetime())
        .bind(subscription.ends_at.as_ref().map(Timestamp::as_datetime))
        .bind(subscription.trial_ends_at.as_ref().map(Timestamp::as_datetime))
        .bind(subscription.grace_ends_at.as_ref().map(Timestamp::as_datetime))
        .bind(subscription.canceled_at.as_ref().map(Timestamp::as_datetime))
        .bind(subscription.renewal_count as i32)
        .bind(&subscription.gateway_response)
        .bind(subscription.created_at.as_datetime())
        .bind(subscription.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.constraint() == Some("subscriptions_subscriber_gateway_key") {
                    return DomainError::new(
                        ErrorCode::DuplicateSubscription,
                        "Subscriber already holds this provider subscription",
                    );
                }
            }
            db_error("Failed to insert subscription", e)
        })?;

        Ok(())
    }

    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        self.fetch(id).await
    }

    async fn find_by_gateway_id(
        &self,
        gateway: Gateway,
        gateway_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "{} WHERE gateway = $1 AND gateway_id = $2",
            SELECT_SUBSCRIPTION
        ))
        .bind(gateway.as_str())
        .bind(gateway_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find subscription by gateway id", e))?;
        row.map(Subscription::try_from).transpose()
    }

    async fn list_for_subscriber(
        &self,
        subscriber: &SubscriberRef,
    ) -> Result<Vec<Subscription>, DomainError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "{} WHERE owner_type = $1 AND owner_id = $2 ORDER BY created_at",
            SELECT_SUBSCRIPTION
        ))
        .bind(subscriber.owner_type())
        .bind(subscriber.owner_id())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list subscriptions", e))?;
        rows.into_iter().map(Subscription::try_from).collect()
    }

    // Transactions and usage go with the row via ON DELETE CASCADE.
    async fn delete(&self, id: SubscriptionId) -> Result<(), DomainError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to delete subscription", e))?;
        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                format!("Subscription {} not found", id),
            ));
        }
        Ok(())
    }

    async fn confirm(
        &self,
        id: SubscriptionId,
        gateway_id: Option<String>,
        ends_at: Option<Timestamp>,
        grace_days: u32,
        gateway_response: Option<serde_json::Value>,
    ) -> Result<Subscription, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE subscriptions SET
                gateway_id = COALESCE($2, gateway_id),
                ends_at = COALESCE($3, ends_at),
                grace_ends_at = CASE
                    WHEN $3::timestamptz IS NULL THEN grace_ends_at
                    WHEN $4 > 0 THEN $3 + make_interval(days => $4)
                    ELSE NULL
                END,
                gateway_response = COALESCE($5, gateway_response),
                updated_at = now()
            WHERE id = $1
            RETURNING {}
            "#,
            RETURNING_COLUMNS
        ))
        .bind(id.as_uuid())
        .bind(&gateway_id)
        .bind(ends_at.as_ref().map(Timestamp::as_datetime))
        .bind(grace_days as i32)
        .bind(&gateway_response)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to confirm subscription", e))?;

        row.map(Subscription::try_from)
            .transpose()?
            .ok_or_else(|| not_found(id))
    }

    async fn advance_period(
        &self,
        id: SubscriptionId,
        expected_ends_at: Option<Timestamp>,
        new_ends_at: Timestamp,
        grace_days: u32,
    ) -> Result<RenewalOutcome, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE subscriptions SET
                ends_at = $3,
                grace_ends_at = CASE
                    WHEN $4 > 0 THEN $3 + make_interval(days => $4)
                    ELSE NULL
                END,
                renewal_count = renewal_count + 1,
                updated_at = now()
            WHERE id = $1 AND ends_at IS NOT DISTINCT FROM $2
            RETURNING {}
            "#,
            RETURNING_COLUMNS
        ))
        .bind(id.as_uuid())
        .bind(expected_ends_at.as_ref().map(Timestamp::as_datetime))
        .bind(new_ends_at.as_datetime())
        .bind(grace_days as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to advance period", e))?;

        match row {
            Some(row) => Ok(RenewalOutcome::Applied(Subscription::try_from(row)?)),
            // Guard missed: another delivery already advanced the period.
            None => Ok(RenewalOutcome::AlreadyApplied(self.fetch_required(id).await?)),
        }
    }

    async fn cancel(
        &self,
        id: SubscriptionId,
        immediate: bool,
    ) -> Result<Subscription, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE subscriptions SET
                canceled_at = now(),
                ends_at = CASE WHEN $2 THEN now() ELSE ends_at END,
                grace_ends_at = CASE WHEN $2 THEN NULL ELSE grace_ends_at END,
                updated_at = now()
            WHERE id = $1 AND canceled_at IS NULL
            RETURNING {}
            "#,
            RETURNING_COLUMNS
        ))
        .bind(id.as_uuid())
        .bind(immediate)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to cancel subscription", e))?;

        match row {
            Some(row) => Subscription::try_from(row),
            // Already canceled: return the row unchanged.
            None => self.fetch_required(id).await,
        }
    }

    async fn resume(&self, id: SubscriptionId) -> Result<Subscription, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE subscriptions SET canceled_at = NULL, updated_at = now()
            WHERE id = $1 AND canceled_at IS NOT NULL
            RETURNING {}
            "#,
            RETURNING_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to resume subscription", e))?;

        match row {
            Some(row) => Subscription::try_from(row),
            None => self.fetch_required(id).await,
        }
    }

    async fn swap_plan(
        &self,
        id: SubscriptionId,
        new_plan_id: PlanId,
    ) -> Result<Subscription, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin swap", e))?;

        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE subscriptions SET plan_id = $2, updated_at = now()
            WHERE id = $1
            RETURNING {}
            "#,
            RETURNING_COLUMNS
        ))
        .bind(id.as_uuid())
        .bind(new_plan_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to swap plan", e))?;

        let Some(row) = row else {
            return Err(not_found(id));
        };

        sqlx::query("DELETE FROM subscription_usage WHERE subscription_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to reset usage on swap", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit swap", e))?;

        Subscription::try_from(row)
    }

    async fn record_transaction(
        &self,
        transaction: SubscriptionTransaction,
    ) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO subscription_transactions (
                id, subscription_id, transaction_type, amount, currency,
                gateway_transaction_id, status, metadata, occurred_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(transaction.id.as_uuid())
        .bind(transaction.subscription_id.as_uuid())
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.amount.minor_units())
        .bind(transaction.currency.as_str())
        .bind(&transaction.gateway_transaction_id)
        .bind(transaction.status.as_str())
        .bind(&transaction.metadata)
        .bind(transaction.occurred_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to record transaction", e))?;

        Ok(())
    }

    async fn transactions_for(
        &self,
        id: SubscriptionId,
    ) -> Result<Vec<SubscriptionTransaction>, DomainError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            r#"
            SELECT id, subscription_id, transaction_type, amount, currency,
                   gateway_transaction_id, status, metadata, occurred_at
            FROM subscription_transactions
            WHERE subscription_id = $1
            ORDER BY occurred_at
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list transactions", e))?;

        rows.into_iter()
            .map(SubscriptionTransaction::try_from)
            .collect()
    }

    async fn try_record_usage(
        &self,
        id: SubscriptionId,
        feature_slug: &str,
        quantity: u64,
        quota: Option<u64>,
    ) -> Result<UsageOutcome, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin usage record", e))?;

        // Serialize concurrent recorders for this (subscription, feature)
        // pair; the lock releases at commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1 || ':' || $2))")
            .bind(id.as_uuid().to_string())
            .bind(feature_slug)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to take usage lock", e))?;

        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(used), 0)
            FROM subscription_usage
            WHERE subscription_id = $1 AND feature_slug = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(feature_slug)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to sum usage", e))?;
        let total = total.max(0) as u64;

        if let Some(quota) = quota {
            if total + quantity > quota {
                tx.rollback()
                    .await
                    .map_err(|e| db_error("Failed to roll back usage record", e))?;
                return Ok(UsageOutcome::Rejected {
                    remaining: quota.saturating_sub(total),
                });
            }
        }

        sqlx::query(
            r#"
            INSERT INTO subscription_usage (id, subscription_id, feature_slug, used, used_at)
            VALUES ($1, $2, $3, $4, now())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(id.as_uuid())
        .bind(feature_slug)
        .bind(quantity as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to record usage", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit usage record", e))?;

        Ok(UsageOutcome::Recorded {
            total_used: total + quantity,
        })
    }

    async fn used_for_feature(
        &self,
        id: SubscriptionId,
        feature_slug: &str,
    ) -> Result<u64, DomainError> {
        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(used), 0)
            FROM subscription_usage
            WHERE subscription_id = $1 AND feature_slug = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(feature_slug)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to sum usage", e))?;

        Ok(total.max(0) as u64)
    }

    async fn due_for_renewal(&self, limit: u32) -> Result<Vec<Subscription>, DomainError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            {} WHERE canceled_at IS NULL
               AND ends_at IS NOT NULL
               AND ends_at <= now()
            ORDER BY ends_at
            LIMIT $1
            "#,
            SELECT_SUBSCRIPTION
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list due subscriptions", e))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }
}

const RETURNING_COLUMNS: &str = r#"
    id, owner_type, owner_id, plan_id, gateway, gateway_id,
    starts_at, ends_at, trial_ends_at, grace_ends_at, canceled_at,
    renewal_count, gateway_response, created_at, updated_at
"#;
