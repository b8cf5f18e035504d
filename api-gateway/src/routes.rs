//! HTTP handlers

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use spendgate_common::{QuotaPeriod, QuotaType, SpendgateError};
use spendgate_metering::{QuotaCheckRequest, QuotaCheckResult, QuotaStatus, UsageSummary};
use tracing::instrument;

use crate::auth::{Authenticated, Identity};
use crate::error::ApiError;
use crate::AppState;

const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

// ============ QUOTA CHECK ============

/// `POST /v1/quota/check` body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuotaCheckBody {
    pub organization_id: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Prompt size, priced as input tokens
    pub estimated_tokens: Option<u64>,
    /// Caller-supplied estimate (USD); wins over `estimated_tokens`
    pub estimated_cost: Option<Decimal>,
}

/// `POST /v1/quota/check` response, for both 200 and 429
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaCheckResponse {
    pub allowed: bool,
    pub quota_limit: Option<Decimal>,
    pub current_usage: Option<Decimal>,
    pub remaining: Option<Decimal>,
    pub quota_type: Option<QuotaType>,
    pub reset_at: Option<DateTime<Utc>>,
    pub estimated_cost: Decimal,
    pub quotas: Vec<QuotaStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl QuotaCheckResponse {
    fn new(result: QuotaCheckResult, estimated_cost: Decimal) -> Self {
        let primary = result.primary().cloned();
        let message = result.limiting_quota.as_ref().map(|q| {
            format!(
                "{} quota exceeded: {} of {} used, request needs {}",
                q.quota_type, q.current, q.limit, estimated_cost
            )
        });

        Self {
            allowed: result.allowed,
            quota_limit: primary.as_ref().map(|q| q.limit),
            current_usage: primary.as_ref().map(|q| q.current),
            remaining: primary.as_ref().map(|q| q.remaining),
            quota_type: primary.as_ref().map(|q| q.quota_type),
            reset_at: primary.as_ref().map(|q| q.reset_at),
            estimated_cost,
            quotas: result.quotas,
            message,
        }
    }
}

#[instrument(skip_all, fields(user = %identity.user_id))]
pub async fn check_quota(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    body: Result<Json<QuotaCheckBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|e| SpendgateError::Validation(e.body_text()))?;

    let organization_id = required(body.organization_id, "organization_id")?;
    let provider = required(body.provider, "provider")?;
    let model = required(body.model, "model")?;
    authorize_organization(&identity, &organization_id)?;

    let cost_model = state.metering.cost_model();
    let estimated_cost = match (body.estimated_cost, body.estimated_tokens) {
        (Some(cost), _) => cost,
        (None, Some(tokens)) => cost_model.estimated_cost(&provider, &model, tokens, 0).await?,
        (None, None) => cost_model.fallback_cost(),
    };

    let request = QuotaCheckRequest::new(organization_id, provider, model, estimated_cost)
        .with_user(identity.user_id.clone());
    let result = state.metering.evaluator().check(&request).await?;

    let status = if result.allowed {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    let body = QuotaCheckResponse::new(result, estimated_cost);

    let mut response = (status, Json(&body)).into_response();
    if let (Some(limit), Some(remaining)) = (body.quota_limit, body.remaining) {
        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
            headers.insert(HeaderName::from_static(RATE_LIMIT_LIMIT), value);
        }
        if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
            headers.insert(HeaderName::from_static(RATE_LIMIT_REMAINING), value);
        }
    }
    Ok(response)
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(SpendgateError::Validation(format!("{field} is required")).into()),
    }
}

fn authorize_organization(identity: &Identity, organization_id: &str) -> Result<(), ApiError> {
    if identity.organization_id == organization_id {
        Ok(())
    } else {
        Err(SpendgateError::Authentication(
            "organization does not match the authenticated caller".into(),
        )
        .into())
    }
}

// ============ USAGE SUMMARY ============

#[derive(Debug, Deserialize)]
pub struct SummaryParams {
    pub period: Option<String>,
}

#[instrument(skip_all, fields(org = %identity.organization_id))]
pub async fn usage_summary(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Query(params): Query<SummaryParams>,
) -> Result<Json<UsageSummary>, ApiError> {
    let period = match params.period.as_deref() {
        None => QuotaPeriod::Monthly,
        Some(raw) => raw
            .parse::<QuotaPeriod>()
            .map_err(SpendgateError::Validation)?,
    };

    let summary = state
        .metering
        .summaries()
        .summary(&identity.organization_id, period)
        .await?;
    Ok(Json(summary))
}

// ============ OPS ============

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": spendgate_common::VERSION,
    }))
}

pub async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let encoder = TextEncoder::new();
    let families = state.metering.metrics().registry().gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .map_err(|e| SpendgateError::Internal(format!("metrics encoding failed: {e}")))?;

    Ok((
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response())
}
