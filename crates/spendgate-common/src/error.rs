//! Error types for Spendgate
//!
//! Admission-path errors are fatal to a quota check. Recording-path errors
//! have their own local types in the metering crate and are recovered there.

use thiserror::Error;

/// Result type alias using SpendgateError
pub type Result<T> = std::result::Result<T, SpendgateError>;

/// Unified error type for Spendgate operations
#[derive(Debug, Error)]
pub enum SpendgateError {
    // Malformed or missing request fields
    #[error("Validation error: {0}")]
    Validation(String),

    // Caller identity could not be established
    #[error("Authentication error: {0}")]
    Authentication(String),

    // Pricing errors
    #[error("Pricing error: {0}")]
    Pricing(#[from] PricingError),

    // Authoritative store errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Cache backend errors (only surfaced by backends, never by CacheLayer)
    #[error("Cache error: {0}")]
    Cache(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SpendgateError {
    /// Whether the error was caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SpendgateError::Validation(_) | SpendgateError::Authentication(_)
        )
    }
}

/// Pricing lookup and arithmetic errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PricingError {
    #[error("No pricing configured for {provider}/{model}")]
    RateNotFound { provider: String, model: String },

    #[error("Negative rate configured for {provider}/{model}")]
    NegativeRate { provider: String, model: String },

    #[error("Cost calculation overflow")]
    Overflow,
}

impl From<serde_json::Error> for SpendgateError {
    fn from(err: serde_json::Error) -> Self {
        SpendgateError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SpendgateError {
    fn from(err: anyhow::Error) -> Self {
        SpendgateError::Internal(err.to_string())
    }
}
