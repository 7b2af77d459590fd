//! PostgreSQL implementation of PlanCatalog.
//!
//! Plans are read-heavy and small: each lookup loads the plan row, then its
//! features and gateway listings concurrently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::foundation::{Currency, DomainError, ErrorCode, Money, PlanId};
use crate::domain::plan::{BillingInterval, Plan, PlanFeature, PlanGatewayPrice};
use crate::domain::Gateway;
use crate::ports::PlanCatalog;

use super::db_error;

/// PostgreSQL implementation of the PlanCatalog port.
pub struct PostgresPlanCatalog {
    pool: PgPool,
}

impl PostgresPlanCatalog {
    /// Creates a catalog backed by the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persists a plan with its features and gateway listings. Upserts by
    /// id so catalog sync jobs can run repeatedly.
    pub async fn upsert(&self, plan: &Plan) -> Result<(), DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin plan upsert", e))?;

        sqlx::query(
            r#"
            INSERT INTO plans (
                id, name, slug, description, price, currency,
                billing_interval, interval_count, trial_days, grace_days, active
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                slug = EXCLUDED.slug,
                description = EXCLUDED.description,
                price = EXCLUDED.price,
                currency = EXCLUDED.currency,
                billing_interval = EXCLUDED.billing_interval,
                interval_count = EXCLUDED.interval_count,
                trial_days = EXCLUDED.trial_days,
                grace_days = EXCLUDED.grace_days,
                active = EXCLUDED.active,
                updated_at = now()
            "#,
        )
        .bind(plan.id().as_uuid())
        .bind(plan.name())
        .bind(plan.slug())
        .bind(plan.description())
        .bind(plan.price().minor_units())
        .bind(plan.currency().as_str())
        .bind(plan.interval().as_str())
        .bind(plan.interval_count() as i32)
        .bind(plan.trial_days().map(|d| d as i32))
        .bind(plan.grace_days() as i32)
        .bind(plan.is_active())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to upsert plan", e))?;

        sqlx::query("DELETE FROM plan_features WHERE plan_id = $1")
            .bind(plan.id().as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to clear plan features", e))?;
        for feature in plan.features() {
            sqlx::query(
                "INSERT INTO plan_features (plan_id, slug, quota, resettable) VALUES ($1, $2, $3, $4)",
            )
            .bind(plan.id().as_uuid())
            .bind(feature.slug())
            .bind(feature.quota() as i64)
            .bind(feature.resettable())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to insert plan feature", e))?;
        }

        sqlx::query("DELETE FROM plan_gateway_prices WHERE plan_id = $1")
            .bind(plan.id().as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to clear gateway prices", e))?;
        for listing in plan.gateway_prices() {
            sqlx::query(
                r#"
                INSERT INTO plan_gateway_prices (
                    plan_id, gateway, gateway_plan_id, gateway_offer_id,
                    gateway_product_id, price, currency
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(plan.id().as_uuid())
            .bind(listing.gateway.as_str())
            .bind(&listing.gateway_plan_id)
            .bind(&listing.gateway_offer_id)
            .bind(&listing.gateway_product_id)
            .bind(listing.price.minor_units())
            .bind(listing.currency.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to insert gateway price", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit plan upsert", e))
    }

    async fn load(&self, row: PlanRow) -> Result<Plan, DomainError> {
        let plan_id = row.id;

        let features = sqlx::query_as::<_, FeatureRow>(
            "SELECT slug, quota, resettable FROM plan_features WHERE plan_id = $1",
        )
        .bind(plan_id)
        .fetch_all(&self.pool);

        let listings = sqlx::query_as::<_, GatewayPriceRow>(
            r#"
            SELECT gateway, gateway_plan_id, gateway_offer_id, gateway_product_id, price, currency
            FROM plan_gateway_prices
            WHERE plan_id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_all(&self.pool);

        let (features, listings) = futures::try_join!(features, listings)
            .map_err(|e| db_error("Failed to load plan details", e))?;

        build_plan(row, features, listings)
    }

    async fn load_optional(&self, row: Option<PlanRow>) -> Result<Option<Plan>, DomainError> {
        match row {
            Some(row) => Ok(Some(self.load(row).await?)),
            None => Ok(None),
        }
    }
}

const SELECT_PLAN: &str = r#"
    SELECT id, name, slug, description, price, currency, billing_interval,
           interval_count, trial_days, grace_days, active, created_at, updated_at
    FROM plans
"#;

#[derive(Debug, sqlx::FromRow)]
struct PlanRow {
    id: Uuid,
    name: String,
    slug: String,
    description: Option<String>,
    price: i64,
    currency: String,
    billing_interval: String,
    interval_count: i32,
    trial_days: Option<i32>,
    grace_days: i32,
    active: bool,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    #[allow(dead_code)]
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct FeatureRow {
    slug: String,
    quota: i64,
    resettable: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct GatewayPriceRow {
    gateway: String,
    gateway_plan_id: Option<String>,
    gateway_offer_id: Option<String>,
    gateway_product_id: Option<String>,
    price: i64,
    currency: String,
}

fn invalid(field: &str, value: &str) -> DomainError {
    DomainError::new(
        ErrorCode::DatabaseError,
        format!("Invalid {} value: {}", field, value),
    )
}

fn build_plan(
    row: PlanRow,
    features: Vec<FeatureRow>,
    listings: Vec<GatewayPriceRow>,
) -> Result<Plan, DomainError> {
    let currency =
        Currency::new(&row.currency).map_err(|_| invalid("currency", &row.currency))?;
    let interval: BillingInterval = row
        .billing_interval
        .parse()
        .map_err(|_| invalid("billing_interval", &row.billing_interval))?;

    let mut plan = Plan::new(
        row.name,
        row.slug,
        Money::from_minor_units(row.price),
        currency,
        interval,
        row.interval_count.max(0) as u32,
    )
    .map_err(|e| DomainError::new(ErrorCode::DatabaseError, e.to_string()))?
    .with_id(PlanId::from_uuid(row.id))
    .with_grace_days(row.grace_days.max(0) as u32);

    if let Some(description) = row.description {
        plan = plan.with_description(description);
    }
    if let Some(days) = row.trial_days {
        plan = plan.with_trial_days(days.max(0) as u32);
    }
    if !row.active {
        plan = plan.deactivated();
    }

    for f in features {
        let mut feature = PlanFeature::new(f.slug, f.quota.max(0) as u64)
            .map_err(|e| DomainError::new(ErrorCode::DatabaseError, e.to_string()))?;
        if !f.resettable {
            feature = feature.non_resettable();
        }
        plan = plan.with_feature(feature);
    }

    for l in listings {
        let gateway: Gateway = l.gateway.parse().map_err(|_| invalid("gateway", &l.gateway))?;
        let currency = Currency::new(&l.currency).map_err(|_| invalid("currency", &l.currency))?;
        let mut listing = PlanGatewayPrice::new(gateway, Money::from_minor_units(l.price), currency);
        if let Some(id) = l.gateway_plan_id {
            listing = listing.with_plan_id(id);
        }
        if let Some(id) = l.gateway_offer_id {
            listing = listing.with_offer_id(id);
        }
        if let Some(id) = l.gateway_product_id {
            listing = listing.with_product_id(id);
        }
        plan = plan.with_gateway_price(listing);
    }

    Ok(plan)
}

#[async_trait]
impl PlanCatalog for PostgresPlanCatalog {
    async fn get(&self, id: PlanId) -> Result<Option<Plan>, DomainError> {
        let row: Option<PlanRow> = sqlx::query_as(&format!("{} WHERE id = $1", SELECT_PLAN))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load plan", e))?;
        self.load_optional(row).await
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Plan>, DomainError> {
        let row: Option<PlanRow> = sqlx::query_as(&format!("{} WHERE slug = $1", SELECT_PLAN))
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load plan by slug", e))?;
        self.load_optional(row).await
    }

    async fn find_by_provider_id(
        &self,
        gateway: Gateway,
        provider_id: &str,
    ) -> Result<Option<Plan>, DomainError> {
        let row: Option<PlanRow> = sqlx::query_as(&format!(
            r#"
            {} WHERE id = (
                SELECT plan_id FROM plan_gateway_prices
                WHERE gateway = $1
                  AND $2 IN (gateway_plan_id, gateway_offer_id, gateway_product_id)
                LIMIT 1
            )
            "#,
            SELECT_PLAN
        ))
        .bind(gateway.as_str())
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find plan by provider id", e))?;
        self.load_optional(row).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_row() -> PlanRow {
        PlanRow {
            id: Uuid::new_v4(),
            name: "Premium".into(),
            slug: "premium-monthly".into(),
            description: Some("Full access".into()),
            price: 1999,
            currency: "USD".into(),
            billing_interval: "month".into(),
            interval_count: 1,
            trial_days: Some(7),
            grace_days: 3,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn builds_plan_from_rows() {
        let plan = build_plan(
            plan_row(),
            vec![FeatureRow {
                slug: "api-calls".into(),
                quota: 1000,
                resettable: true,
            }],
            vec![GatewayPriceRow {
                gateway: "google".into(),
                gateway_plan_id: None,
                gateway_offer_id: Some("intro".into()),
                gateway_product_id: Some("premium_monthly".into()),
                price: 1899,
                currency: "USD".into(),
            }],
        )
        .unwrap();

        assert_eq!(plan.slug(), "premium-monthly");
        assert_eq!(plan.trial_days(), Some(7));
        assert_eq!(plan.quota_for("api-calls"), Some(1000));
        assert_eq!(
            plan.price_for(Gateway::Google),
            Money::from_minor_units(1899)
        );
        assert!(plan
            .gateway_listing(Gateway::Google)
            .unwrap()
            .matches_provider_id("premium_monthly"));
    }

    #[test]
    fn rejects_unknown_interval_or_gateway() {
        let mut row = plan_row();
        row.billing_interval = "fortnight".into();
        assert!(build_plan(row, vec![], vec![]).is_err());

        let err = build_plan(
            plan_row(),
            vec![],
            vec![GatewayPriceRow {
                gateway: "stripe".into(),
                gateway_plan_id: None,
                gateway_offer_id: None,
                gateway_product_id: None,
                price: 0,
                currency: "USD".into(),
            }],
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::DatabaseError);
    }
}
