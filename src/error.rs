use thiserror::Error;

use crate::llm::GenerationError;

/// Main error type for the question-answering service
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or empty question
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Primary embedding backend is down; recovered by the fallback strategy
    #[error("Embedding model unavailable: {0}")]
    ModelUnavailable(String),

    /// LLM call failed or timed out; never cached
    #[error("Answer generation failed (rag_used: {rag_used}): {source}")]
    GenerationFailed {
        question: String,
        rag_used: bool,
        #[source]
        source: GenerationError,
    },

    /// Unreadable disk tier entry; recovered as a cache miss
    #[error("Cache corruption: {0}")]
    CacheCorruption(String),

    /// Admin surface asked for a cache that is not registered
    #[error("Unknown cache: {0}")]
    UnknownCache(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Wrap an LLM failure with the context the boundary layer reports
    pub fn generation_failed(question: &str, rag_used: bool, source: GenerationError) -> Self {
        AppError::GenerationFailed {
            question: question.chars().take(200).collect(),
            rag_used,
            source,
        }
    }

    /// Whether the boundary layer may retry the request
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::GenerationFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Check if error is caller-caused
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, AppError::InvalidInput(_))
    }

    /// Get error type as string for logging and responses
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "invalid_input",
            AppError::ModelUnavailable(_) => "model_unavailable",
            AppError::GenerationFailed { .. } => "generation_failed",
            AppError::CacheCorruption(_) => "cache_corruption",
            AppError::UnknownCache(_) => "unknown_cache",
            AppError::ConfigError(_) => "config_error",
            AppError::IoError(_) => "io_error",
            AppError::SerializationError(_) => "serialization_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Get HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::InvalidInput(_) => 400,
            AppError::UnknownCache(_) => 404,
            AppError::GenerationFailed { source, .. } => match source {
                GenerationError::RateLimited => 429,
                GenerationError::Timeout => 504,
                GenerationError::Unreachable(_) | GenerationError::InvalidResponse(_) => 502,
            },
            AppError::ModelUnavailable(_) => 503,
            AppError::CacheCorruption(_)
            | AppError::ConfigError(_)
            | AppError::IoError(_)
            | AppError::SerializationError(_)
            | AppError::Internal(_) => 500,
        }
    }
}

/// Result type alias for service operations
pub type AppResult<T> = Result<T, AppError>;
