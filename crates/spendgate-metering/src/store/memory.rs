//! In-process metering store
//!
//! Quotas and usage rows are sharded per organization in a DashMap. The
//! shard guard is held across the usage insert and the counter increments,
//! which makes [`MeteringStore::record_usage`] one atomic step per
//! organization while different organizations proceed in parallel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spendgate_common::{
    PricingRecord, QuotaDefinition, QuotaPeriod, QuotaScope, QuotaViolation, UsageRecord,
};
use tracing::debug;
use uuid::Uuid;

use super::{MeteringStore, StoreError};

/// Per-organization rows guarded together
#[derive(Debug, Default)]
struct OrganizationLedger {
    quotas: Vec<QuotaDefinition>,
    usage: Vec<UsageRecord>,
}

/// In-memory store implementation
#[derive(Debug, Default)]
pub struct InMemoryMeteringStore {
    /// Append-only pricing versions
    pricing: RwLock<Vec<PricingRecord>>,
    /// Quotas and usage by organization
    ledgers: DashMap<String, OrganizationLedger>,
    /// Violation audit log
    violations: Mutex<Vec<QuotaViolation>>,
}

impl InMemoryMeteringStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from seed data
    pub fn from_seed(seed: StoreSeed) -> Self {
        let store = Self::new();
        for pricing in seed.pricing {
            store.add_pricing(pricing.into_record());
        }
        for quota in seed.quotas {
            store.upsert_quota(quota.into_definition());
        }
        store
    }

    /// Append a pricing version
    pub fn add_pricing(&self, record: PricingRecord) {
        self.pricing.write().push(record);
    }

    /// Insert or replace a quota definition by ID
    pub fn upsert_quota(&self, quota: QuotaDefinition) {
        let mut ledger = self.ledgers.entry(quota.organization_id.clone()).or_default();
        match ledger.quotas.iter_mut().find(|q| q.id == quota.id) {
            Some(existing) => *existing = quota,
            None => ledger.quotas.push(quota),
        }
    }

    /// Current state of a quota
    pub fn quota(&self, organization_id: &str, quota_id: Uuid) -> Option<QuotaDefinition> {
        self.ledgers
            .get(organization_id)
            .and_then(|ledger| ledger.quotas.iter().find(|q| q.id == quota_id).cloned())
    }

    /// All usage rows for an organization
    pub fn usage_records(&self, organization_id: &str) -> Vec<UsageRecord> {
        self.ledgers
            .get(organization_id)
            .map(|ledger| ledger.usage.clone())
            .unwrap_or_default()
    }

    /// All violation rows
    pub fn violations(&self) -> Vec<QuotaViolation> {
        self.violations.lock().clone()
    }
}

#[async_trait]
impl MeteringStore for InMemoryMeteringStore {
    async fn latest_pricing(
        &self,
        provider: &str,
        model: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<PricingRecord>, StoreError> {
        let pricing = self.pricing.read();
        Ok(pricing
            .iter()
            .filter(|p| p.provider == provider && p.model == model && p.is_effective_at(at))
            .max_by_key(|p| p.effective_date)
            .cloned())
    }

    async fn quotas_for_organization(
        &self,
        organization_id: &str,
    ) -> Result<Vec<QuotaDefinition>, StoreError> {
        Ok(self
            .ledgers
            .get(organization_id)
            .map(|ledger| ledger.quotas.clone())
            .unwrap_or_default())
    }

    async fn record_usage(&self, record: &UsageRecord) -> Result<Uuid, StoreError> {
        if record.cost < Decimal::ZERO {
            return Err(StoreError::Rejected("usage cost cannot be negative".into()));
        }

        let now = Utc::now();
        let mut ledger = self.ledgers.entry(record.organization_id.clone()).or_default();

        let mut incremented = 0usize;
        for quota in ledger
            .quotas
            .iter_mut()
            .filter(|q| q.applies_to(&record.provider, &record.model))
        {
            quota.apply_usage(record.cost, now);
            incremented += 1;
        }
        ledger.usage.push(record.clone());

        debug!(
            record_id = %record.id,
            organization = %record.organization_id,
            incremented,
            "Recorded usage"
        );
        Ok(record.id)
    }

    async fn insert_violation(&self, violation: &QuotaViolation) -> Result<(), StoreError> {
        self.violations.lock().push(violation.clone());
        Ok(())
    }

    async fn usage_since(
        &self,
        organization_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, StoreError> {
        Ok(self
            .ledgers
            .get(organization_id)
            .map(|ledger| {
                ledger
                    .usage
                    .iter()
                    .filter(|u| u.created_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Seed file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSeed {
    #[serde(default)]
    pub pricing: Vec<PricingSeed>,
    #[serde(default)]
    pub quotas: Vec<QuotaSeed>,
}

/// Pricing entry in a seed file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingSeed {
    pub provider: String,
    pub model: String,
    pub input_cost_per_1k: Decimal,
    pub output_cost_per_1k: Decimal,
    #[serde(default)]
    pub effective_date: Option<DateTime<Utc>>,
}

impl PricingSeed {
    fn into_record(self) -> PricingRecord {
        let record = PricingRecord::new(
            self.provider,
            self.model,
            self.input_cost_per_1k,
            self.output_cost_per_1k,
        );
        match self.effective_date {
            Some(date) => record.effective_from(date),
            None => record,
        }
    }
}

/// Quota entry in a seed file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSeed {
    pub organization_id: String,
    pub scope: QuotaScope,
    pub period: QuotaPeriod,
    pub limit_amount: Decimal,
    #[serde(default)]
    pub current_usage: Decimal,
}

impl QuotaSeed {
    fn into_definition(self) -> QuotaDefinition {
        QuotaDefinition::new(self.organization_id, self.scope, self.period, self.limit_amount)
            .with_usage(self.current_usage)
    }
}
