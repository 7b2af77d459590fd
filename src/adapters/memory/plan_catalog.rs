//! In-memory plan catalog.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, PlanId};
use crate::domain::plan::Plan;
use crate::domain::Gateway;
use crate::ports::PlanCatalog;

/// Plan lookup backed by a map. Seed with `insert`.
#[derive(Debug, Default)]
pub struct InMemoryPlanCatalog {
    plans: RwLock<HashMap<PlanId, Plan>>,
}

impl InMemoryPlanCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a plan.
    pub async fn insert(&self, plan: Plan) {
        self.plans.write().await.insert(plan.id(), plan);
    }
}

#[async_trait]
impl PlanCatalog for InMemoryPlanCatalog {
    async fn get(&self, id: PlanId) -> Result<Option<Plan>, DomainError> {
        Ok(self.plans.read().await.get(&id).cloned())
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Plan>, DomainError> {
        Ok(self
            .plans
            .read()
            .await
            .values()
            .find(|p| p.slug() == slug)
            .cloned())
    }

    async fn find_by_provider_id(
        &self,
        gateway: Gateway,
        provider_id: &str,
    ) -> Result<Option<Plan>, DomainError> {
        Ok(self
            .plans
            .read()
            .await
            .values()
            .find(|p| {
                p.gateway_prices()
                    .iter()
                    .any(|gp| gp.gateway == gateway && gp.matches_provider_id(provider_id))
            })
            .cloned())
    }
}
