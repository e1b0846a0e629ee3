/// Language model backends
///
/// This module contains:
/// - The `LanguageModel` contract used by the answer service
/// - `ChatCompletionClient` for OpenAI-compatible chat completion APIs
/// - `KeywordResponder`, the rule-based backend used when no API key is configured

pub mod chat_client;
pub mod keyword;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use chat_client::{ChatCompletionClient, ChatCompletionSettings};
pub use keyword::KeywordResponder;

/// Why a generation call produced no answer
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    /// Call exceeded its time budget
    #[error("generation timed out")]
    Timeout,

    /// Backend refused the call for quota reasons (HTTP 429)
    #[error("rate limited by language model backend")]
    RateLimited,

    /// Backend could not be reached or failed internally
    #[error("language model backend unreachable: {0}")]
    Unreachable(String),

    /// Backend answered with something that is not a usable answer
    #[error("invalid response from language model backend: {0}")]
    InvalidResponse(String),
}

impl GenerationError {
    /// Returns true if a later retry may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerationError::RateLimited | GenerationError::Unreachable(_))
    }

    /// Short label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Timeout => "timeout",
            GenerationError::RateLimited => "rate_limited",
            GenerationError::Unreachable(_) => "unreachable",
            GenerationError::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// Prompt to answer text
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate an answer; implementations should give up after `timeout`
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, GenerationError>;

    /// Name for logs and health reports
    fn backend_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(GenerationError::RateLimited.is_retryable());
        assert!(GenerationError::Unreachable("down".to_string()).is_retryable());
        assert!(!GenerationError::Timeout.is_retryable());
        assert!(!GenerationError::InvalidResponse("empty".to_string()).is_retryable());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(GenerationError::Timeout.kind(), "timeout");
        assert_eq!(GenerationError::RateLimited.kind(), "rate_limited");
    }
}
