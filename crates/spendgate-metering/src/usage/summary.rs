//! Usage summaries
//!
//! Spend totals for an organization over the current daily or monthly
//! window, aggregated from the usage log and cached briefly.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spendgate_common::{QuotaPeriod, Result, SpendgateError, UsageRecord, DEFAULT_SUMMARY_CACHE_TTL_SECS};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::cache::{usage_prefix, CacheLayer};
use crate::store::MeteringStore;

/// Spend of one provider within a summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub provider: String,
    pub total_cost: Decimal,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub request_count: u64,
}

/// Organization spend over the current period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub organization_id: String,
    pub period: QuotaPeriod,
    /// Start of the current period (UTC)
    pub period_start: DateTime<Utc>,
    pub total_cost: Decimal,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub request_count: u64,
    pub unique_users: u64,
    /// Per-provider breakdown, ordered by provider tag
    pub by_provider: Vec<ProviderUsage>,
}

impl UsageSummary {
    /// Aggregate `records` into a summary
    pub fn from_records(
        organization_id: &str,
        period: QuotaPeriod,
        period_start: DateTime<Utc>,
        records: &[UsageRecord],
    ) -> Self {
        let mut total_cost = Decimal::ZERO;
        let mut input_tokens = 0u64;
        let mut output_tokens = 0u64;
        let mut users = HashSet::new();
        let mut providers: BTreeMap<&str, ProviderUsage> = BTreeMap::new();

        for record in records {
            total_cost += record.cost;
            input_tokens += record.input_tokens;
            output_tokens += record.output_tokens;
            users.insert(record.user_id.as_str());

            let entry = providers
                .entry(record.provider.as_str())
                .or_insert_with(|| ProviderUsage {
                    provider: record.provider.clone(),
                    total_cost: Decimal::ZERO,
                    input_tokens: 0,
                    output_tokens: 0,
                    request_count: 0,
                });
            entry.total_cost += record.cost;
            entry.input_tokens += record.input_tokens;
            entry.output_tokens += record.output_tokens;
            entry.request_count += 1;
        }

        Self {
            organization_id: organization_id.to_string(),
            period,
            period_start,
            total_cost,
            input_tokens,
            output_tokens,
            request_count: records.len() as u64,
            unique_users: users.len() as u64,
            by_provider: providers.into_values().collect(),
        }
    }
}

/// Cache key for one organization's summary
pub fn summary_key(organization_id: &str, period: QuotaPeriod) -> String {
    format!("{}summary:{period}", usage_prefix(organization_id))
}

/// Read-through summary service
pub struct UsageSummaries {
    store: Arc<dyn MeteringStore>,
    cache: CacheLayer,
    ttl: Duration,
}

impl UsageSummaries {
    pub fn new(store: Arc<dyn MeteringStore>, cache: CacheLayer) -> Self {
        Self {
            store,
            cache,
            ttl: Duration::from_secs(DEFAULT_SUMMARY_CACHE_TTL_SECS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Spend of `organization_id` since the start of the current `period`
    #[instrument(skip(self))]
    pub async fn summary(&self, organization_id: &str, period: QuotaPeriod) -> Result<UsageSummary> {
        if organization_id.trim().is_empty() {
            return Err(SpendgateError::Validation("organization_id is required".into()));
        }

        self.cache
            .get_or_set(&summary_key(organization_id, period), self.ttl, || async {
                let period_start = period.period_start(Utc::now());
                let records = self.store.usage_since(organization_id, period_start).await?;
                Ok::<_, SpendgateError>(UsageSummary::from_records(
                    organization_id,
                    period,
                    period_start,
                    &records,
                ))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;
    use crate::store::InMemoryMeteringStore;
    use crate::usage::{MeteringOptions, UsageRecorder};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_summary_aggregates_by_provider() {
        let store = Arc::new(InMemoryMeteringStore::new());
        let recorder = UsageRecorder::new(store.clone());

        let alice = MeteringOptions::new("alice", "org-1", "openai", "gpt-4o");
        let bob = MeteringOptions::new("bob", "org-1", "anthropic", "claude-haiku");
        recorder.record(&alice, 100, 20, dec!(0.25), None).await.unwrap();
        recorder.record(&alice, 50, 10, dec!(0.10), None).await.unwrap();
        recorder.record(&bob, 10, 5, dec!(0.05), None).await.unwrap();

        let summaries = UsageSummaries::new(store, CacheLayer::disabled());
        let summary = summaries.summary("org-1", QuotaPeriod::Daily).await.unwrap();

        assert_eq!(summary.total_cost, dec!(0.40));
        assert_eq!(summary.request_count, 3);
        assert_eq!(summary.unique_users, 2);
        assert_eq!(summary.input_tokens, 160);
        assert_eq!(summary.by_provider.len(), 2);
        assert_eq!(summary.by_provider[0].provider, "anthropic");
        assert_eq!(summary.by_provider[1].total_cost, dec!(0.35));
    }

    #[tokio::test]
    async fn test_empty_organization() {
        let summaries = UsageSummaries::new(Arc::new(InMemoryMeteringStore::new()), CacheLayer::disabled());
        let summary = summaries.summary("org-empty", QuotaPeriod::Monthly).await.unwrap();
        assert_eq!(summary.total_cost, Decimal::ZERO);
        assert!(summary.by_provider.is_empty());
    }

    #[tokio::test]
    async fn test_summary_cached_until_invalidated() {
        let store = Arc::new(InMemoryMeteringStore::new());
        let cache = CacheLayer::new(Arc::new(InMemoryCacheBackend::new(16)));
        let recorder = UsageRecorder::new(store.clone());
        let summaries = UsageSummaries::new(store, cache.clone());
        let options = MeteringOptions::new("alice", "org-1", "openai", "gpt-4o");

        recorder.record(&options, 1, 1, dec!(1), None).await.unwrap();
        assert_eq!(summaries.summary("org-1", QuotaPeriod::Daily).await.unwrap().total_cost, dec!(1));

        recorder.record(&options, 1, 1, dec!(2), None).await.unwrap();
        assert_eq!(summaries.summary("org-1", QuotaPeriod::Daily).await.unwrap().total_cost, dec!(1));

        cache.del_pattern(&usage_prefix("org-1")).await;
        assert_eq!(summaries.summary("org-1", QuotaPeriod::Daily).await.unwrap().total_cost, dec!(3));
    }

    #[test]
    fn test_summary_key_under_usage_prefix() {
        assert_eq!(summary_key("org-1", QuotaPeriod::Monthly), "usage:org-1:summary:monthly");
    }
}
