//! Metered plan features.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::ValidationError;

/// A metered entitlement granted by a plan.
///
/// `quota` is the total quantity a subscriber may consume over the current
/// billing period. Features a plan does not declare are unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFeature {
    slug: String,
    quota: u64,
    resettable: bool,
}

impl PlanFeature {
    /// Creates a feature with the given slug and quota.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for an empty slug.
    pub fn new(slug: impl Into<String>, quota: u64) -> Result<Self, ValidationError> {
        let slug = slug.into();
        if slug.trim().is_empty() {
            return Err(ValidationError::empty_field("feature_slug"));
        }
        Ok(Self {
            slug,
            quota,
            resettable: true,
        })
    }

    /// Marks the feature as carrying usage across renewals.
    pub fn non_resettable(mut self) -> Self {
        self.resettable = false;
        self
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn quota(&self) -> u64 {
        self.quota
    }

    /// Whether usage resets at the start of each billing period.
    pub fn resettable(&self) -> bool {
        self.resettable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_slug() {
        assert!(PlanFeature::new("", 10).is_err());
        assert!(PlanFeature::new("   ", 10).is_err());
    }

    #[test]
    fn defaults_to_resettable() {
        let f = PlanFeature::new("api-calls", 100).unwrap();
        assert!(f.resettable());
        assert!(!f.clone().non_resettable().resettable());
    }
}
