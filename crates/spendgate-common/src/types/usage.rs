//! Usage Types
//!
//! A UsageRecord is written exactly once per completed provider call and
//! never mutated or deleted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Input/output token counts reported for one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenCounts {
    pub const ZERO: TokenCounts = TokenCounts {
        input_tokens: 0,
        output_tokens: 0,
    };

    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    #[inline]
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Immutable fact of one completed call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Unique record ID
    pub id: Uuid,
    /// User who triggered the call
    pub user_id: String,
    /// Organization billed for the call
    pub organization_id: String,
    /// Optional collaboration session
    pub session_id: Option<String>,
    /// Optional workflow
    pub workflow_id: Option<String>,
    /// Provider tag
    pub provider: String,
    /// Model identifier
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Actual cost (USD)
    pub cost: Decimal,
    /// Provider-specific response metadata
    pub metadata: Option<serde_json::Value>,
    /// Record timestamp
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    #[inline]
    pub fn tokens(&self) -> TokenCounts {
        TokenCounts::new(self.input_tokens, self.output_tokens)
    }
}
