//! Pricing module
//!
//! Provides cost estimation for provider calls:
//! - Versioned rate lookup with caching
//! - Conservative pre-call estimates
//! - Per-provider token extraction from responses

pub mod cost_model;
pub mod extract;

pub use cost_model::CostModel;
pub use extract::{TokenExtractor, TokenExtractorRegistry};
