//! Usage recorder
//!
//! Persists one [`UsageRecord`] per completed call. The store applies the
//! row and every matching quota increment as one atomic step, so concurrent
//! recorders for the same quota never lose an increment.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spendgate_common::UsageRecord;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::metrics::MeteringMetrics;
use crate::store::{MeteringStore, StoreError};

/// Who made a call and against what
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeteringOptions {
    pub user_id: String,
    pub organization_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    pub provider: String,
    pub model: String,
}

impl MeteringOptions {
    pub fn new(
        user_id: impl Into<String>,
        organization_id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id: organization_id.into(),
            session_id: None,
            workflow_id: None,
            provider: provider.into(),
            model: model.into(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }
}

/// Usage write-back failure
#[derive(Debug, Clone, Error)]
pub enum PersistError {
    #[error("Usage store rejected record: {0}")]
    Rejected(String),

    #[error("Usage store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for PersistError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(msg) => PersistError::Rejected(msg),
            StoreError::Unavailable(msg) => PersistError::Unavailable(msg),
            StoreError::Serialization(msg) => PersistError::Rejected(msg),
        }
    }
}

/// Usage write-back
pub struct UsageRecorder {
    store: Arc<dyn MeteringStore>,
    metrics: Option<Arc<MeteringMetrics>>,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn MeteringStore>) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MeteringMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Persist usage of one call and bump every matching quota counter
    #[instrument(skip(self, options, metadata), fields(org = %options.organization_id, provider = %options.provider, model = %options.model))]
    pub async fn record(
        &self,
        options: &MeteringOptions,
        input_tokens: u64,
        output_tokens: u64,
        cost: Decimal,
        metadata: Option<serde_json::Value>,
    ) -> Result<Uuid, PersistError> {
        let record = UsageRecord {
            id: Uuid::new_v4(),
            user_id: options.user_id.clone(),
            organization_id: options.organization_id.clone(),
            session_id: options.session_id.clone(),
            workflow_id: options.workflow_id.clone(),
            provider: options.provider.clone(),
            model: options.model.clone(),
            input_tokens,
            output_tokens,
            cost,
            metadata,
            created_at: Utc::now(),
        };

        let result = self.store.record_usage(&record).await.map_err(PersistError::from);
        if let Err(e) = &result {
            error!(record_id = %record.id, cost = %cost, error = %e, "Failed to record usage");
        }
        if let Some(metrics) = &self.metrics {
            metrics.observe_record(result.is_ok());
        }
        result
    }
}
