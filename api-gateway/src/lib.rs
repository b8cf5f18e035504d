//! # Spendgate Gateway
//!
//! REST surface over the metering engine:
//! - `POST /v1/quota/check`: admission decision for one prospective call
//! - `GET /v1/usage/summary`: caller organization spend for the period
//! - `GET /health`, `GET /metrics`

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use spendgate_common::SpendgateError;
use spendgate_metering::store::StoreSeed;
use spendgate_metering::{
    CacheBackend, InMemoryMeteringStore, Metering, MeteringMetrics, MeteringStore, RedisCacheBackend,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{Authenticator, StaticKeyAuthenticator};
use crate::config::GatewayConfig;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub metering: Arc<Metering>,
    pub auth: Arc<dyn Authenticator>,
}

impl AppState {
    pub fn new(metering: Arc<Metering>, auth: Arc<dyn Authenticator>) -> Self {
        Self { metering, auth }
    }

    /// Build state from configuration
    ///
    /// Redis is opened lazily: an unreachable cache at startup only degrades
    /// latency.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, SpendgateError> {
        let store: Arc<dyn MeteringStore> = Arc::new(match &config.seed_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| SpendgateError::Config(format!("cannot read seed file {path}: {e}")))?;
                let seed: StoreSeed = serde_json::from_str(&raw)?;
                info!(path, pricing = seed.pricing.len(), quotas = seed.quotas.len(), "Loaded seed data");
                InMemoryMeteringStore::from_seed(seed)
            }
            None => InMemoryMeteringStore::new(),
        });

        let backend: Option<Arc<dyn CacheBackend>> = match &config.redis_url {
            Some(url) => Some(Arc::new(RedisCacheBackend::open(url)?) as Arc<dyn CacheBackend>),
            None => {
                warn!("No Redis URL configured, caching disabled");
                None
            }
        };

        let metrics = MeteringMetrics::new()
            .map_err(|e| SpendgateError::Internal(format!("metrics registration failed: {e}")))?;
        let metering = Metering::new(config.metering(), store, backend, Arc::new(metrics));

        let auth = StaticKeyAuthenticator::parse(&config.api_keys)?;
        if auth.is_empty() {
            warn!("No API keys configured, every metered request will be rejected");
        }

        Ok(Self::new(Arc::new(metering), Arc::new(auth)))
    }
}

/// Gateway router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .route("/v1/quota/check", post(routes::check_quota))
        .route("/v1/usage/summary", get(routes::usage_summary))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::routes::QuotaCheckResponse;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use rust_decimal_macros::dec;
    use spendgate_common::{PricingRecord, QuotaDefinition, QuotaType};
    use spendgate_metering::{MeteringConfig, MeteringOptions, UsageRecorder, UsageSummary};
    use tower::ServiceExt;

    struct Harness {
        store: Arc<InMemoryMeteringStore>,
        app: Router,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryMeteringStore::new());
        let metering = Metering::new(
            MeteringConfig::default(),
            store.clone(),
            None,
            Arc::new(MeteringMetrics::new().unwrap()),
        );
        let auth = StaticKeyAuthenticator::new()
            .with_key("sk-acme", Identity::new("alice", "acme"))
            .with_key("sk-globex", Identity::new("bob", "globex"));

        Harness {
            store,
            app: router(AppState::new(Arc::new(metering), Arc::new(auth))),
        }
    }

    fn check(key: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/v1/quota/check")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(key) = key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {key}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unbounded_org_is_allowed() {
        let h = harness();
        let response = h
            .app
            .oneshot(check(
                Some("sk-acme"),
                r#"{"organization_id":"acme","provider":"openai","model":"gpt-4o","estimated_cost":"0.5"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
        let body: QuotaCheckResponse = json(response).await;
        assert!(body.allowed);
        assert_eq!(body.quota_limit, None);
        assert_eq!(body.remaining, None);
    }

    #[tokio::test]
    async fn test_denied_returns_429_with_headers() {
        let h = harness();
        h.store
            .upsert_quota(QuotaDefinition::daily("acme", dec!(1.00)).with_usage(dec!(0.99)));

        let response = h
            .app
            .oneshot(check(
                Some("sk-acme"),
                r#"{"organization_id":"acme","provider":"openai","model":"gpt-4o","estimated_cost":"0.02"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-limit"], "1.00");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0.01");

        let body: QuotaCheckResponse = json(response).await;
        assert!(!body.allowed);
        assert_eq!(body.quota_type, Some(QuotaType::Daily));
        assert!(body.message.is_some());
        assert_eq!(h.store.violations().len(), 1);
    }

    #[tokio::test]
    async fn test_estimated_tokens_priced_as_input() {
        let h = harness();
        h.store
            .add_pricing(PricingRecord::new("openai", "gpt-4o", dec!(0.01), dec!(0.03)));

        let response = h
            .app
            .oneshot(check(
                Some("sk-acme"),
                r#"{"organization_id":"acme","provider":"openai","model":"gpt-4o","estimated_tokens":2000}"#,
            ))
            .await
            .unwrap();

        let body: QuotaCheckResponse = json(response).await;
        assert_eq!(body.estimated_cost, dec!(0.02));
    }

    #[tokio::test]
    async fn test_no_estimate_uses_fallback() {
        let h = harness();
        let response = h
            .app
            .oneshot(check(
                Some("sk-acme"),
                r#"{"organization_id":"acme","provider":"openai","model":"gpt-4o"}"#,
            ))
            .await
            .unwrap();

        let body: QuotaCheckResponse = json(response).await;
        assert_eq!(body.estimated_cost, dec!(0.01));
    }

    #[tokio::test]
    async fn test_missing_fields_are_400() {
        let h = harness();
        let blank_model = h
            .app
            .clone()
            .oneshot(check(
                Some("sk-acme"),
                r#"{"organization_id":"acme","provider":"openai","model":"  "}"#,
            ))
            .await
            .unwrap();
        assert_eq!(blank_model.status(), StatusCode::BAD_REQUEST);

        let malformed = h
            .app
            .oneshot(check(Some("sk-acme"), "{not json"))
            .await
            .unwrap();
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_authentication_failures_are_401() {
        let h = harness();
        let body = r#"{"organization_id":"acme","provider":"openai","model":"gpt-4o"}"#;

        let missing = h.app.clone().oneshot(check(None, body)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let unknown = h.app.clone().oneshot(check(Some("sk-nope"), body)).await.unwrap();
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);

        // Valid key for another organization
        let foreign = h.app.oneshot(check(Some("sk-globex"), body)).await.unwrap();
        assert_eq!(foreign.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_get_on_check_is_405() {
        let h = harness();
        let response = h
            .app
            .oneshot(
                Request::builder()
                    .uri("/v1/quota/check")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_usage_summary_for_caller_org() {
        let h = harness();
        let recorder = UsageRecorder::new(h.store.clone());
        recorder
            .record(&MeteringOptions::new("alice", "acme", "openai", "gpt-4o"), 10, 5, dec!(0.25), None)
            .await
            .unwrap();
        recorder
            .record(&MeteringOptions::new("bob", "globex", "openai", "gpt-4o"), 10, 5, dec!(9), None)
            .await
            .unwrap();

        let response = h
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/usage/summary?period=daily")
                    .header(header::AUTHORIZATION, "Bearer sk-acme")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let summary: UsageSummary = json(response).await;
        assert_eq!(summary.organization_id, "acme");
        assert_eq!(summary.total_cost, dec!(0.25));

        let bad_period = h
            .app
            .oneshot(
                Request::builder()
                    .uri("/v1/usage/summary?period=weekly")
                    .header(header::AUTHORIZATION, "Bearer sk-acme")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(bad_period.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_state_from_seeded_config() {
        let config = GatewayConfig {
            seed_file: Some(concat!(env!("CARGO_MANIFEST_DIR"), "/seed.example.json").to_string()),
            api_keys: "sk-acme=alice@acme".to_string(),
            ..GatewayConfig::default()
        };
        let app = router(AppState::from_config(&config).unwrap());

        let response = app
            .oneshot(check(
                Some("sk-acme"),
                r#"{"organization_id":"acme","provider":"openai","model":"gpt-4o","estimated_cost":"1"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: QuotaCheckResponse = json(response).await;
        assert_eq!(body.quotas.len(), 3);
        assert_eq!(body.quota_type, Some(QuotaType::Daily));
        assert_eq!(body.quota_limit, Some(dec!(25.00)));
    }

    #[test]
    fn test_bad_key_table_fails_startup() {
        let config = GatewayConfig {
            api_keys: "no-separator".to_string(),
            ..GatewayConfig::default()
        };
        assert!(matches!(
            AppState::from_config(&config),
            Err(SpendgateError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let h = harness();
        let health = h
            .app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        h.app
            .clone()
            .oneshot(check(
                Some("sk-acme"),
                r#"{"organization_id":"acme","provider":"openai","model":"gpt-4o"}"#,
            ))
            .await
            .unwrap();

        let metrics = h
            .app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(metrics.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("spendgate_quota_checks_total{outcome=\"allowed\"} 1"));
    }
}
