//! Quota module
//!
//! Hierarchical admission control over organization, provider and model
//! spend limits.

pub mod evaluator;

pub use evaluator::{QuotaCheckRequest, QuotaCheckResult, QuotaEvaluator, QuotaStatus};
