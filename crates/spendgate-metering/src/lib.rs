//! # Spendgate Metering
//!
//! Cost estimation, quota enforcement and usage recording for LLM calls.
//!
//! ## Request Flow
//!
//! ```text
//! estimate -> check quotas -> call provider -> extract tokens -> price -> record
//! ```
//!
//! The quota check is a function of cached state plus the caller's estimate.
//! The authoritative counters live in the [`store::MeteringStore`] and only
//! advance through its atomic usage write.

pub mod cache;
pub mod metrics;
pub mod middleware;
pub mod pricing;
pub mod quota;
pub mod store;
pub mod tokens;
pub mod usage;

use rust_decimal::Decimal;
use spendgate_common::{
    DEFAULT_PRICING_CACHE_TTL_SECS, DEFAULT_QUOTA_CACHE_TTL_SECS, DEFAULT_SUMMARY_CACHE_TTL_SECS,
    FALLBACK_ESTIMATED_COST,
};
use std::sync::Arc;
use std::time::Duration;

pub use cache::{CacheBackend, CacheLayer, InMemoryCacheBackend, RedisCacheBackend};
pub use metrics::MeteringMetrics;
pub use middleware::{MeteredOutcome, MeteringError, MeteringMiddleware, MeteringState, RecordedUsage};
pub use pricing::{CostModel, TokenExtractorRegistry};
pub use quota::{QuotaCheckRequest, QuotaCheckResult, QuotaEvaluator, QuotaStatus};
pub use store::{InMemoryMeteringStore, MeteringStore, StoreError};
pub use tokens::{ChatMessage, TokenEstimator};
pub use usage::{MeteringOptions, PersistError, UsageRecorder, UsageSummaries, UsageSummary};

/// Metering configuration
#[derive(Debug, Clone)]
pub struct MeteringConfig {
    /// How long quota snapshots are cached
    pub quota_cache_ttl: Duration,
    /// How long resolved rates are cached
    pub pricing_cache_ttl: Duration,
    /// How long usage summaries are cached
    pub summary_cache_ttl: Duration,
    /// Bound on a single cache round trip
    pub cache_op_timeout: Duration,
    /// Flat cost used when no pricing exists (USD)
    pub fallback_estimated_cost: Decimal,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            quota_cache_ttl: Duration::from_secs(DEFAULT_QUOTA_CACHE_TTL_SECS),
            pricing_cache_ttl: Duration::from_secs(DEFAULT_PRICING_CACHE_TTL_SECS),
            summary_cache_ttl: Duration::from_secs(DEFAULT_SUMMARY_CACHE_TTL_SECS),
            cache_op_timeout: cache::DEFAULT_CACHE_OP_TIMEOUT,
            fallback_estimated_cost: FALLBACK_ESTIMATED_COST,
        }
    }
}

/// Metering service: every component wired to one store and one cache
pub struct Metering {
    cost_model: Arc<CostModel>,
    evaluator: Arc<QuotaEvaluator>,
    summaries: Arc<UsageSummaries>,
    middleware: MeteringMiddleware,
    metrics: Arc<MeteringMetrics>,
}

impl Metering {
    /// Wire components over `store`, with `backend` as the optional cache
    pub fn new(
        config: MeteringConfig,
        store: Arc<dyn MeteringStore>,
        backend: Option<Arc<dyn CacheBackend>>,
        metrics: Arc<MeteringMetrics>,
    ) -> Self {
        let cache = backend
            .map(CacheLayer::new)
            .unwrap_or_default()
            .with_timeout(config.cache_op_timeout);

        let cost_model = Arc::new(
            CostModel::new(store.clone(), cache.clone())
                .with_ttl(config.pricing_cache_ttl)
                .with_fallback_cost(config.fallback_estimated_cost),
        );
        let evaluator = Arc::new(
            QuotaEvaluator::new(store.clone(), cache.clone())
                .with_ttl(config.quota_cache_ttl)
                .with_metrics(metrics.clone()),
        );
        let recorder = Arc::new(UsageRecorder::new(store.clone()).with_metrics(metrics.clone()));
        let summaries = Arc::new(
            UsageSummaries::new(store, cache.clone()).with_ttl(config.summary_cache_ttl),
        );
        let middleware = MeteringMiddleware::new(
            evaluator.clone(),
            cost_model.clone(),
            recorder,
            Arc::new(TokenExtractorRegistry::default()),
            cache,
        );

        Self {
            cost_model,
            evaluator,
            summaries,
            middleware,
            metrics,
        }
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.cost_model
    }

    pub fn evaluator(&self) -> &QuotaEvaluator {
        &self.evaluator
    }

    pub fn summaries(&self) -> &UsageSummaries {
        &self.summaries
    }

    pub fn middleware(&self) -> &MeteringMiddleware {
        &self.middleware
    }

    pub fn metrics(&self) -> &MeteringMetrics {
        &self.metrics
    }
}
