//! Pricing Types
//!
//! Pricing is append-only and versioned per (provider, model). The record
//! in force at time `t` is the one with the latest `effective_date <= t`.
//! Rates are quoted in USD per 1K tokens.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PricingError;
use crate::TOKENS_PER_RATE_UNIT;

/// One immutable pricing version for a provider/model pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingRecord {
    /// Unique record ID
    pub id: Uuid,
    /// Provider tag (e.g. "openai", "anthropic")
    pub provider: String,
    /// Model identifier
    pub model: String,
    /// Instant from which this version applies
    pub effective_date: DateTime<Utc>,
    /// USD per 1K input tokens
    pub input_cost_per_1k: Decimal,
    /// USD per 1K output tokens
    pub output_cost_per_1k: Decimal,
}

impl PricingRecord {
    /// Create a pricing record effective immediately
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        input_cost_per_1k: Decimal,
        output_cost_per_1k: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider: provider.into(),
            model: model.into(),
            effective_date: Utc::now(),
            input_cost_per_1k,
            output_cost_per_1k,
        }
    }

    /// Set the effective date
    pub fn effective_from(mut self, effective_date: DateTime<Utc>) -> Self {
        self.effective_date = effective_date;
        self
    }

    /// Whether this version is in force at `at`
    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        self.effective_date <= at
    }

    /// Resolved rate view of this record
    pub fn rate(&self) -> Rate {
        Rate {
            input_cost_per_1k: self.input_cost_per_1k,
            output_cost_per_1k: self.output_cost_per_1k,
            effective_date: self.effective_date,
        }
    }
}

/// Rate in force for a provider/model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    pub input_cost_per_1k: Decimal,
    pub output_cost_per_1k: Decimal,
    pub effective_date: DateTime<Utc>,
}

impl Rate {
    /// `(input/1000) * input_rate + (output/1000) * output_rate`
    pub fn cost_for(&self, input_tokens: u64, output_tokens: u64) -> Result<Decimal, PricingError> {
        let input = per_unit(input_tokens, self.input_cost_per_1k)?;
        let output = per_unit(output_tokens, self.output_cost_per_1k)?;
        input.checked_add(output).ok_or(PricingError::Overflow)
    }
}

fn per_unit(tokens: u64, rate: Decimal) -> Result<Decimal, PricingError> {
    Decimal::from(tokens)
        .checked_div(TOKENS_PER_RATE_UNIT)
        .and_then(|units| units.checked_mul(rate))
        .ok_or(PricingError::Overflow)
}
