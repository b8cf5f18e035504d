//! # Spendgate Common
//!
//! Shared domain types and errors for the Spendgate usage metering engine.
//!
//! ## Core Types
//!
//! - [`PricingRecord`]/[`Rate`]: versioned per-provider/model pricing
//! - [`QuotaDefinition`]: spend limit over an organization, provider or model scope
//! - [`UsageRecord`]: immutable fact of one completed provider call
//! - [`QuotaViolation`]: audit row written when a request is denied

pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{PricingError, Result, SpendgateError};
pub use types::{
    pricing::{PricingRecord, Rate},
    quota::{QuotaDefinition, QuotaPeriod, QuotaScope, QuotaType, QuotaViolation},
    usage::{TokenCounts, UsageRecord},
};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Spendgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Estimate used when no pricing exists for a provider/model (USD)
pub const FALLBACK_ESTIMATED_COST: Decimal = dec!(0.01);

/// Default quota snapshot TTL in seconds
pub const DEFAULT_QUOTA_CACHE_TTL_SECS: u64 = 300;

/// Default pricing TTL in seconds
pub const DEFAULT_PRICING_CACHE_TTL_SECS: u64 = 300;

/// Default usage summary TTL in seconds
pub const DEFAULT_SUMMARY_CACHE_TTL_SECS: u64 = 60;

/// Tokens per pricing unit (rates are quoted per 1K tokens)
pub const TOKENS_PER_RATE_UNIT: Decimal = dec!(1000);
