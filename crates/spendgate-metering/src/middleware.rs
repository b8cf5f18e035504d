//! Metering middleware
//!
//! Wraps one provider call in admission, execution and write-back:
//!
//! ```text
//! Pending --check--> Admitted --run--> Executing --record--> Recorded
//!    |                                     |
//!    +--------------> Denied               +-------------> RecordFailed
//! ```
//!
//! `Denied` is terminal and the operation is never invoked. Once the
//! operation has succeeded nothing in write-back can fail the call: a record
//! that cannot be persisted surfaces as `usage: None`.

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use spendgate_common::{Result, SpendgateError, TokenCounts};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::cache::{quota_prefix, usage_prefix, CacheLayer};
use crate::pricing::{CostModel, TokenExtractorRegistry};
use crate::quota::{QuotaCheckRequest, QuotaCheckResult, QuotaEvaluator};
use crate::tokens::{ChatMessage, TokenEstimator};
use crate::usage::{MeteringOptions, UsageRecorder};

/// Lifecycle of one metered call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MeteringState {
    Pending,
    Admitted,
    Denied,
    Executing,
    Recorded,
    RecordFailed,
}

impl MeteringState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeteringState::Pending => "pending",
            MeteringState::Admitted => "admitted",
            MeteringState::Denied => "denied",
            MeteringState::Executing => "executing",
            MeteringState::Recorded => "recorded",
            MeteringState::RecordFailed => "record_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MeteringState::Denied | MeteringState::Recorded | MeteringState::RecordFailed
        )
    }
}

impl std::fmt::Display for MeteringState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Usage persisted for a completed call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedUsage {
    pub record_id: Uuid,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Decimal,
}

/// Outcome of a metered call
#[derive(Debug, Clone)]
pub struct MeteredOutcome<R> {
    /// Operation result; `None` when denied
    pub response: Option<R>,
    /// Persisted usage; `None` when denied or when write-back failed
    pub usage: Option<RecordedUsage>,
    pub quota_exceeded: bool,
    /// Terminal state reached
    pub state: MeteringState,
    /// Admission decision the call ran under
    pub check: QuotaCheckResult,
}

/// Failure of a metered call
#[derive(Debug, Error)]
pub enum MeteringError<E> {
    /// Admission could not be decided
    #[error("Quota check failed: {0}")]
    Admission(SpendgateError),

    /// The wrapped operation failed; the error is passed through unchanged
    #[error("Operation failed: {0}")]
    Operation(E),
}

/// Admission + execution + write-back around provider calls
#[derive(Clone)]
pub struct MeteringMiddleware {
    evaluator: Arc<QuotaEvaluator>,
    cost_model: Arc<CostModel>,
    recorder: Arc<UsageRecorder>,
    extractors: Arc<TokenExtractorRegistry>,
    cache: CacheLayer,
}

impl MeteringMiddleware {
    pub fn new(
        evaluator: Arc<QuotaEvaluator>,
        cost_model: Arc<CostModel>,
        recorder: Arc<UsageRecorder>,
        extractors: Arc<TokenExtractorRegistry>,
        cache: CacheLayer,
    ) -> Self {
        Self {
            evaluator,
            cost_model,
            recorder,
            extractors,
            cache,
        }
    }

    /// Estimated cost of sending `messages` and receiving up to `max_output_tokens`
    pub async fn estimate(
        &self,
        provider: &str,
        model: &str,
        messages: &[ChatMessage],
        max_output_tokens: u64,
    ) -> Result<Decimal> {
        let input_tokens = TokenEstimator::estimate_messages(messages);
        self.cost_model
            .estimated_cost(provider, model, input_tokens, max_output_tokens)
            .await
    }

    /// Run `operation` under quota enforcement and record its usage
    #[instrument(
        skip(self, options, operation),
        fields(org = %options.organization_id, provider = %options.provider, model = %options.model)
    )]
    pub async fn wrap<R, E, F, Fut>(
        &self,
        options: &MeteringOptions,
        estimated_cost: Decimal,
        operation: F,
    ) -> std::result::Result<MeteredOutcome<R>, MeteringError<E>>
    where
        R: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
    {
        let mut state = MeteringState::Pending;

        let request = QuotaCheckRequest::new(
            options.organization_id.clone(),
            options.provider.clone(),
            options.model.clone(),
            estimated_cost,
        )
        .with_user(options.user_id.clone());
        let check = self
            .evaluator
            .check(&request)
            .await
            .map_err(MeteringError::Admission)?;

        if !check.allowed {
            transition(&mut state, MeteringState::Denied);
            return Ok(MeteredOutcome {
                response: None,
                usage: None,
                quota_exceeded: true,
                state,
                check,
            });
        }
        transition(&mut state, MeteringState::Admitted);

        transition(&mut state, MeteringState::Executing);
        let response = operation().await.map_err(MeteringError::Operation)?;

        let usage = self.write_back(options, &response).await;
        transition(
            &mut state,
            if usage.is_some() {
                MeteringState::Recorded
            } else {
                MeteringState::RecordFailed
            },
        );

        self.cache
            .del_pattern(&quota_prefix(&options.organization_id))
            .await;
        self.cache
            .del_pattern(&usage_prefix(&options.organization_id))
            .await;

        Ok(MeteredOutcome {
            response: Some(response),
            usage,
            quota_exceeded: false,
            state,
            check,
        })
    }

    /// Price and persist a completed call; every failure yields `None`
    async fn write_back<R: Serialize>(
        &self,
        options: &MeteringOptions,
        response: &R,
    ) -> Option<RecordedUsage> {
        let body = serde_json::to_value(response).unwrap_or_else(|e| {
            warn!(error = %e, "Response is not representable as JSON, recording zero tokens");
            Value::Null
        });
        let tokens: TokenCounts = self.extractors.extract(&options.provider, &body);

        let cost = match self
            .cost_model
            .actual_cost(&options.provider, &options.model, tokens)
            .await
        {
            Ok(cost) => cost,
            Err(e) => {
                warn!(error = %e, "Failed to price completed call, usage not recorded");
                return None;
            }
        };

        let record_id = self
            .recorder
            .record(
                options,
                tokens.input_tokens,
                tokens.output_tokens,
                cost,
                response_metadata(&body),
            )
            .await
            .ok()?;

        Some(RecordedUsage {
            record_id,
            input_tokens: tokens.input_tokens,
            output_tokens: tokens.output_tokens,
            cost,
        })
    }
}

impl std::fmt::Debug for MeteringMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeteringMiddleware")
            .field("extractors", &self.extractors)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

fn transition(state: &mut MeteringState, next: MeteringState) {
    debug!(from = %state, to = %next, "Metering state transition");
    *state = next;
}

/// Identifying fields of a provider response kept alongside the usage row
fn response_metadata(body: &Value) -> Option<Value> {
    let object = body.as_object()?;
    let kept: serde_json::Map<String, Value> = ["id", "model", "system_fingerprint", "stop_reason"]
        .into_iter()
        .filter_map(|field| object.get(field).map(|v| (field.to_string(), v.clone())))
        .collect();
    (!kept.is_empty()).then_some(Value::Object(kept))
}
