//! Cost model
//!
//! Resolves the rate in force for a provider/model and prices token counts:
//!
//! ```text
//! cost = (input_tokens / 1000) * input_rate + (output_tokens / 1000) * output_rate
//! ```
//!
//! Pre-call estimates price the caller's `max_output_tokens` as if all of
//! them were produced, so estimates err on the high side of actual cost.

use chrono::Utc;
use rust_decimal::Decimal;
use spendgate_common::{
    PricingError, Rate, Result, SpendgateError, TokenCounts, DEFAULT_PRICING_CACHE_TTL_SECS,
    FALLBACK_ESTIMATED_COST,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

use crate::cache::{pricing_key, CacheLayer};
use crate::store::MeteringStore;

/// Pricing lookup and cost arithmetic
pub struct CostModel {
    store: Arc<dyn MeteringStore>,
    cache: CacheLayer,
    ttl: Duration,
    fallback_cost: Decimal,
}

impl CostModel {
    pub fn new(store: Arc<dyn MeteringStore>, cache: CacheLayer) -> Self {
        Self {
            store,
            cache,
            ttl: Duration::from_secs(DEFAULT_PRICING_CACHE_TTL_SECS),
            fallback_cost: FALLBACK_ESTIMATED_COST,
        }
    }

    /// Set how long resolved rates are cached
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the flat cost used when no pricing exists
    pub fn with_fallback_cost(mut self, fallback_cost: Decimal) -> Self {
        self.fallback_cost = fallback_cost;
        self
    }

    pub fn fallback_cost(&self) -> Decimal {
        self.fallback_cost
    }

    /// Rate in force now for provider/model
    #[instrument(skip(self))]
    pub async fn get_rate(&self, provider: &str, model: &str) -> Result<Rate> {
        self.cache
            .get_or_set(&pricing_key(provider, model), self.ttl, || {
                self.fetch_rate(provider, model)
            })
            .await
    }

    async fn fetch_rate(&self, provider: &str, model: &str) -> Result<Rate> {
        let record = self
            .store
            .latest_pricing(provider, model, Utc::now())
            .await?
            .ok_or_else(|| PricingError::RateNotFound {
                provider: provider.to_string(),
                model: model.to_string(),
            })?;

        if record.input_cost_per_1k < Decimal::ZERO || record.output_cost_per_1k < Decimal::ZERO {
            return Err(PricingError::NegativeRate {
                provider: provider.to_string(),
                model: model.to_string(),
            }
            .into());
        }
        Ok(record.rate())
    }

    /// Conservative pre-call estimate
    pub async fn estimated_cost(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        max_output_tokens: u64,
    ) -> Result<Decimal> {
        self.price(provider, model, TokenCounts::new(input_tokens, max_output_tokens))
            .await
    }

    /// Cost of measured token counts
    pub async fn actual_cost(&self, provider: &str, model: &str, tokens: TokenCounts) -> Result<Decimal> {
        self.price(provider, model, tokens).await
    }

    async fn price(&self, provider: &str, model: &str, tokens: TokenCounts) -> Result<Decimal> {
        match self.get_rate(provider, model).await {
            Ok(rate) => Ok(rate.cost_for(tokens.input_tokens, tokens.output_tokens)?),
            Err(SpendgateError::Pricing(PricingError::RateNotFound { .. })) => {
                warn!(
                    provider,
                    model,
                    fallback = %self.fallback_cost,
                    "No pricing configured, using fallback cost"
                );
                Ok(self.fallback_cost)
            }
            Err(e) => Err(e),
        }
    }
}
