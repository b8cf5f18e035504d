//! Quota evaluator
//!
//! Decides admission for one call against every quota that applies to it:
//!
//! ```text
//! admitted(Q) = effective_usage(Q) + estimated_cost < Q.limit_amount
//! allowed     = AND over all applicable Q
//! ```
//!
//! All scopes are checked; none short-circuits another. When the call is
//! denied, the reported limiting quota is the first denier in the fixed
//! order daily-org, monthly-org, provider, model. That is the first scope to
//! block, not necessarily the one with the least headroom.
//!
//! Quota state is read through the cache. A warm entry can be up to one TTL
//! behind concurrent admissions, so a burst may be over-admitted by a
//! bounded amount; the store's atomic counter stays exact regardless.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spendgate_common::{
    QuotaDefinition, QuotaPeriod, QuotaType, QuotaViolation, Result, SpendgateError,
    DEFAULT_QUOTA_CACHE_TTL_SECS,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::{quota_key, CacheLayer};
use crate::metrics::MeteringMetrics;
use crate::store::MeteringStore;

/// Admission check input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaCheckRequest {
    pub organization_id: String,
    pub provider: String,
    pub model: String,
    /// Estimated cost of the call (USD)
    pub estimated_cost: Decimal,
    /// Caller, recorded on violation rows
    pub user_id: Option<String>,
}

impl QuotaCheckRequest {
    pub fn new(
        organization_id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        estimated_cost: Decimal,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            provider: provider.into(),
            model: model.into(),
            estimated_cost,
            user_id: None,
        }
    }

    /// Attribute the check to a user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Validate the request
    pub fn validate(&self) -> Result<()> {
        if self.organization_id.trim().is_empty() {
            return Err(SpendgateError::Validation("organization_id is required".into()));
        }
        if self.provider.trim().is_empty() {
            return Err(SpendgateError::Validation("provider is required".into()));
        }
        if self.model.trim().is_empty() {
            return Err(SpendgateError::Validation("model is required".into()));
        }
        // Identifiers are joined with ':' into cache keys
        for (field, value) in [
            ("organization_id", &self.organization_id),
            ("provider", &self.provider),
            ("model", &self.model),
        ] {
            if value.contains(':') {
                return Err(SpendgateError::Validation(format!(
                    "{field} cannot contain ':'"
                )));
            }
        }
        if self.estimated_cost < Decimal::ZERO {
            return Err(SpendgateError::Validation(
                "estimated_cost cannot be negative".into(),
            ));
        }
        Ok(())
    }
}

/// State of one quota as seen by a check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub quota_id: Uuid,
    pub quota_type: QuotaType,
    pub period: QuotaPeriod,
    pub limit: Decimal,
    /// Usage counted against the limit
    pub current: Decimal,
    /// `max(limit - current, 0)`
    pub remaining: Decimal,
    /// Whether this quota alone would admit the call
    pub admitted: bool,
    pub reset_at: DateTime<Utc>,
}

/// Admission decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCheckResult {
    pub allowed: bool,
    /// First denier in check order, present only on denial
    pub limiting_quota: Option<QuotaStatus>,
    /// Every applicable quota, in check order
    pub quotas: Vec<QuotaStatus>,
}

impl QuotaCheckResult {
    /// Decision for a call no quota applies to
    pub fn unbounded() -> Self {
        Self {
            allowed: true,
            limiting_quota: None,
            quotas: Vec::new(),
        }
    }

    /// Quota to report: the limiting one on denial, else the first checked
    pub fn primary(&self) -> Option<&QuotaStatus> {
        self.limiting_quota.as_ref().or_else(|| self.quotas.first())
    }

    /// Remaining headroom of the primary quota; `None` means unbounded
    pub fn remaining(&self) -> Option<Decimal> {
        self.primary().map(|q| q.remaining)
    }
}

/// Hierarchical quota evaluator
pub struct QuotaEvaluator {
    store: Arc<dyn MeteringStore>,
    cache: CacheLayer,
    ttl: Duration,
    metrics: Option<Arc<MeteringMetrics>>,
}

impl QuotaEvaluator {
    pub fn new(store: Arc<dyn MeteringStore>, cache: CacheLayer) -> Self {
        Self {
            store,
            cache,
            ttl: Duration::from_secs(DEFAULT_QUOTA_CACHE_TTL_SECS),
            metrics: None,
        }
    }

    /// Set how long quota snapshots are cached
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MeteringMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Decide whether a call may proceed
    ///
    /// Store read failures are returned as errors: without quota state no
    /// correct decision exists. Failing to write the violation row on denial
    /// is logged and does not change the decision.
    #[instrument(skip(self, request), fields(org = %request.organization_id, provider = %request.provider, model = %request.model))]
    pub async fn check(&self, request: &QuotaCheckRequest) -> Result<QuotaCheckResult> {
        request.validate()?;
        let started = Instant::now();

        let quotas = self
            .applicable_quotas(&request.organization_id, &request.provider, &request.model)
            .await?;
        let result = Self::evaluate(&quotas, request.estimated_cost, Utc::now());

        match &result.limiting_quota {
            Some(limiting) => {
                info!(
                    quota_type = %limiting.quota_type,
                    limit = %limiting.limit,
                    current = %limiting.current,
                    estimated_cost = %request.estimated_cost,
                    "Quota exceeded"
                );
                self.report_violation(request, limiting).await;
            }
            None => debug!(
                quotas = result.quotas.len(),
                estimated_cost = %request.estimated_cost,
                "Quota check passed"
            ),
        }

        if let Some(metrics) = &self.metrics {
            metrics.observe_check(result.allowed, started.elapsed().as_secs_f64());
        }
        Ok(result)
    }

    /// Pure admission decision over a set of applicable quotas
    pub fn evaluate(
        quotas: &[QuotaDefinition],
        estimated_cost: Decimal,
        now: DateTime<Utc>,
    ) -> QuotaCheckResult {
        if quotas.is_empty() {
            return QuotaCheckResult::unbounded();
        }

        let mut ordered: Vec<&QuotaDefinition> = quotas.iter().collect();
        ordered.sort_by_key(|q| q.check_order());

        let statuses: Vec<QuotaStatus> = ordered
            .into_iter()
            .map(|q| QuotaStatus {
                quota_id: q.id,
                quota_type: q.quota_type(),
                period: q.period,
                limit: q.limit_amount,
                current: q.effective_usage(now),
                remaining: q.remaining(now),
                admitted: q.admits(estimated_cost, now),
                reset_at: q.reset_at,
            })
            .collect();

        let limiting_quota = statuses.iter().find(|s| !s.admitted).cloned();
        QuotaCheckResult {
            allowed: limiting_quota.is_none(),
            limiting_quota,
            quotas: statuses,
        }
    }

    /// Quotas applying to provider/model, read through the cache
    async fn applicable_quotas(
        &self,
        organization_id: &str,
        provider: &str,
        model: &str,
    ) -> Result<Vec<QuotaDefinition>> {
        let key = quota_key(organization_id, provider, model);
        self.cache
            .get_or_set(&key, self.ttl, || async {
                let quotas = self.store.quotas_for_organization(organization_id).await?;
                Ok::<_, SpendgateError>(
                    quotas
                        .into_iter()
                        .filter(|q| q.applies_to(provider, model))
                        .collect(),
                )
            })
            .await
    }

    async fn report_violation(&self, request: &QuotaCheckRequest, limiting: &QuotaStatus) {
        let violation = QuotaViolation {
            id: Uuid::new_v4(),
            organization_id: request.organization_id.clone(),
            user_id: request.user_id.clone(),
            provider: request.provider.clone(),
            model: request.model.clone(),
            quota_type: limiting.quota_type,
            limit_amount: limiting.limit,
            current_usage: limiting.current,
            estimated_cost: request.estimated_cost,
            occurred_at: Utc::now(),
        };

        if let Err(e) = self.store.insert_violation(&violation).await {
            warn!(error = %e, "Failed to write quota violation");
            if let Some(metrics) = &self.metrics {
                metrics.violation_write_failures.inc();
            }
        }
    }
}
