//! Heuristic token estimation
//!
//! Estimates are `ceil(chars / 4)`. This deliberately trades accuracy for
//! speed: no tokenizer is loaded and results are stable across providers.
//! Use the provider-reported counts for billing; use these only to price a
//! call before it is made.

use serde::{Deserialize, Serialize};

/// Characters per estimated token
const CHARS_PER_TOKEN: usize = 4;

/// Fixed per-message overhead (role markers, separators)
const MESSAGE_OVERHEAD_TOKENS: u64 = 4;

/// Fixed per-conversation overhead (reply priming)
const CONVERSATION_OVERHEAD_TOKENS: u64 = 3;

/// Chat message as sent to a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// Character-based token estimator
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenEstimator;

impl TokenEstimator {
    /// Estimated tokens in `text`
    pub fn estimate(text: &str) -> u64 {
        text.chars().count().div_ceil(CHARS_PER_TOKEN) as u64
    }

    /// Estimated tokens for a whole conversation
    pub fn estimate_messages(messages: &[ChatMessage]) -> u64 {
        let body: u64 = messages
            .iter()
            .map(|m| MESSAGE_OVERHEAD_TOKENS + Self::estimate(&m.role) + Self::estimate(&m.content))
            .sum();
        body + CONVERSATION_OVERHEAD_TOKENS
    }
}
