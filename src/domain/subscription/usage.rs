//! Feature usage records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::foundation::{SubscriptionId, Timestamp};

/// One consumption fact for a metered feature.
///
/// Entitlement is always a sum over these records for the subscription,
/// never a running counter, which makes delete-and-reset on plan swap safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub subscription_id: SubscriptionId,
    pub feature_slug: String,
    pub used: u64,
    pub used_at: Timestamp,
}

impl UsageRecord {
    /// Creates a usage record occurring now.
    pub fn new(subscription_id: SubscriptionId, feature_slug: impl Into<String>, used: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscription_id,
            feature_slug: feature_slug.into(),
            used,
            used_at: Timestamp::now(),
        }
    }
}
