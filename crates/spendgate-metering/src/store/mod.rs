//! Authoritative store contract
//!
//! The store owns pricing, quota counters, the usage log and the violation
//! audit log. The engine only reads through these primitives; the one write
//! that must be atomic is [`MeteringStore::record_usage`], which inserts the
//! usage row and increments every matching quota counter together.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use spendgate_common::{PricingRecord, QuotaDefinition, QuotaViolation, SpendgateError, UsageRecord};
use uuid::Uuid;

pub use memory::{InMemoryMeteringStore, PricingSeed, QuotaSeed, StoreSeed};

/// Trait for metering storage backends
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MeteringStore: Send + Sync {
    /// Latest pricing record for provider/model with `effective_date <= at`
    async fn latest_pricing(
        &self,
        provider: &str,
        model: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<PricingRecord>, StoreError>;

    /// Every quota defined for an organization, across all scopes
    async fn quotas_for_organization(
        &self,
        organization_id: &str,
    ) -> Result<Vec<QuotaDefinition>, StoreError>;

    /// Insert a usage row and increment all matching quota counters atomically
    async fn record_usage(&self, record: &UsageRecord) -> Result<Uuid, StoreError>;

    /// Append a violation audit row
    async fn insert_violation(&self, violation: &QuotaViolation) -> Result<(), StoreError>;

    /// Usage rows for an organization created at or after `since`
    async fn usage_since(
        &self,
        organization_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, StoreError>;
}

/// Errors from store operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for SpendgateError {
    fn from(err: StoreError) -> Self {
        SpendgateError::Storage(err.to_string())
    }
}
