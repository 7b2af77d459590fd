//! Append-only billing transaction records.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::{Currency, Money, SubscriptionId, Timestamp, TransactionId};

/// What a transaction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Payment,
    Renewal,
    Refund,
    Failed,
    Setup,
    Expiry,
    PlanSwap,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Payment => "payment",
            TransactionType::Renewal => "renewal",
            TransactionType::Refund => "refund",
            TransactionType::Failed => "failed",
            TransactionType::Setup => "setup",
            TransactionType::Expiry => "expiry",
            TransactionType::PlanSwap => "plan_swap",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of the transaction at the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
    Failed,
    Refunded,
    Pending,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
            TransactionStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable audit fact about money movement on a subscription.
///
/// Transactions are append-only. Adapters never mutate subscription fields
/// without recording the transaction that justifies the mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionTransaction {
    pub id: TransactionId,
    pub subscription_id: SubscriptionId,
    pub transaction_type: TransactionType,
    pub amount: Money,
    pub currency: Currency,
    pub gateway_transaction_id: Option<String>,
    pub status: TransactionStatus,
    pub metadata: serde_json::Value,
    pub occurred_at: Timestamp,
}

impl SubscriptionTransaction {
    /// Creates a transaction occurring now with empty metadata.
    pub fn new(
        subscription_id: SubscriptionId,
        transaction_type: TransactionType,
        amount: Money,
        currency: Currency,
        status: TransactionStatus,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            subscription_id,
            transaction_type,
            amount,
            currency,
            gateway_transaction_id: None,
            status,
            metadata: serde_json::Value::Null,
            occurred_at: Timestamp::now(),
        }
    }

    /// Attaches the provider's transaction id.
    pub fn with_gateway_transaction_id(mut self, id: impl Into<String>) -> Self {
        self.gateway_transaction_id = Some(id.into());
        self
    }

    /// Attaches free-form metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether this transaction represents money successfully collected.
    pub fn is_successful_charge(&self) -> bool {
        self.status == TransactionStatus::Completed
            && matches!(
                self.transaction_type,
                TransactionType::Payment | TransactionType::Renewal
            )
    }

    /// Whether this transaction records a failed collection attempt.
    pub fn is_failed_charge(&self) -> bool {
        self.status == TransactionStatus::Failed
    }
}
