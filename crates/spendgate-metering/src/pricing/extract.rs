//! Provider token extraction
//!
//! Each provider reports usage under its own field names. The registry maps
//! a provider tag to a pure extraction function; supporting a new provider
//! is a call to [`TokenExtractorRegistry::register`].
//!
//! Extraction never fails: an unknown provider, or a response without the
//! expected fields, yields zero tokens and a warning. An accounting gap must
//! not fail a call that already succeeded.

use serde_json::Value;
use spendgate_common::TokenCounts;
use std::collections::HashMap;
use tracing::warn;

/// Pure function pulling token counts out of a provider response
pub type TokenExtractor = fn(&Value) -> Option<TokenCounts>;

/// Registry of token extractors keyed by lowercase provider tag
#[derive(Clone)]
pub struct TokenExtractorRegistry {
    extractors: HashMap<String, TokenExtractor>,
}

impl TokenExtractorRegistry {
    /// Registry with no providers
    pub fn empty() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    /// Register or replace the extractor for `provider`
    pub fn register(&mut self, provider: &str, extractor: TokenExtractor) -> &mut Self {
        self.extractors.insert(provider.to_ascii_lowercase(), extractor);
        self
    }

    pub fn supports(&self, provider: &str) -> bool {
        self.extractors.contains_key(&provider.to_ascii_lowercase())
    }

    /// Token counts reported in `response`, or zero if they cannot be read
    pub fn extract(&self, provider: &str, response: &Value) -> TokenCounts {
        let Some(extractor) = self.extractors.get(&provider.to_ascii_lowercase()) else {
            warn!(provider, "No token extractor registered, recording zero tokens");
            return TokenCounts::ZERO;
        };

        extractor(response).unwrap_or_else(|| {
            warn!(provider, "Response carries no usage fields, recording zero tokens");
            TokenCounts::ZERO
        })
    }
}

impl std::fmt::Debug for TokenExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers: Vec<&str> = self.extractors.keys().map(String::as_str).collect();
        providers.sort_unstable();
        f.debug_struct("TokenExtractorRegistry")
            .field("providers", &providers)
            .finish()
    }
}

impl Default for TokenExtractorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for provider in ["openai", "azure-openai", "groq", "mistral", "deepseek"] {
            registry.register(provider, openai_usage);
        }
        registry.register("anthropic", anthropic_usage);
        registry.register("google", gemini_usage);
        registry.register("gemini", gemini_usage);
        registry.register("cohere", cohere_usage);
        registry
    }
}

fn counts_at(response: &Value, input: &str, output: &str) -> Option<TokenCounts> {
    let input = response.pointer(input).and_then(Value::as_u64);
    let output = response.pointer(output).and_then(Value::as_u64);
    match (input, output) {
        (None, None) => None,
        (input, output) => Some(TokenCounts::new(input.unwrap_or(0), output.unwrap_or(0))),
    }
}

/// `usage.prompt_tokens` / `usage.completion_tokens`
pub fn openai_usage(response: &Value) -> Option<TokenCounts> {
    counts_at(response, "/usage/prompt_tokens", "/usage/completion_tokens")
}

/// `usage.input_tokens` / `usage.output_tokens`
pub fn anthropic_usage(response: &Value) -> Option<TokenCounts> {
    counts_at(response, "/usage/input_tokens", "/usage/output_tokens")
}

/// `usageMetadata.promptTokenCount` / `usageMetadata.candidatesTokenCount`
pub fn gemini_usage(response: &Value) -> Option<TokenCounts> {
    counts_at(
        response,
        "/usageMetadata/promptTokenCount",
        "/usageMetadata/candidatesTokenCount",
    )
}

/// `meta.billed_units.input_tokens` / `meta.billed_units.output_tokens`
pub fn cohere_usage(response: &Value) -> Option<TokenCounts> {
    counts_at(
        response,
        "/meta/billed_units/input_tokens",
        "/meta/billed_units/output_tokens",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_openai_shape() {
        let registry = TokenExtractorRegistry::default();
        let response = json!({
            "id": "chatcmpl-1",
            "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150}
        });
        assert_eq!(registry.extract("openai", &response), TokenCounts::new(120, 30));
        assert_eq!(registry.extract("OpenAI", &response), TokenCounts::new(120, 30));
    }

    #[test]
    fn test_anthropic_and_gemini_shapes() {
        let registry = TokenExtractorRegistry::default();

        let anthropic = json!({"usage": {"input_tokens": 50, "output_tokens": 9}});
        assert_eq!(registry.extract("anthropic", &anthropic), TokenCounts::new(50, 9));

        let gemini = json!({"usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 3}});
        assert_eq!(registry.extract("gemini", &gemini), TokenCounts::new(7, 3));
    }

    #[test]
    fn test_unknown_provider_yields_zero() {
        let registry = TokenExtractorRegistry::default();
        let response = json!({"usage": {"prompt_tokens": 10, "completion_tokens": 1}});
        assert!(!registry.supports("replicate"));
        assert_eq!(registry.extract("replicate", &response), TokenCounts::ZERO);
    }

    #[test]
    fn test_missing_fields_yield_zero() {
        let registry = TokenExtractorRegistry::default();
        assert_eq!(registry.extract("openai", &json!({"choices": []})), TokenCounts::ZERO);
        assert_eq!(registry.extract("openai", &json!("plain text")), TokenCounts::ZERO);
    }

    #[test]
    fn test_register_custom_provider() {
        fn flat(response: &Value) -> Option<TokenCounts> {
            counts_at(response, "/in", "/out")
        }

        let mut registry = TokenExtractorRegistry::empty();
        registry.register("Acme", flat);
        assert_eq!(registry.extract("acme", &json!({"in": 4, "out": 2})), TokenCounts::new(4, 2));
    }
}
