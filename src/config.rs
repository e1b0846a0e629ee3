use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Cache configuration shared by both cache instances
    pub cache: CacheConfig,
    /// Retrieval configuration
    pub retrieval: RetrievalConfig,
    /// Language model configuration
    pub llm: LlmConfig,
    /// Knowledge base configuration
    pub knowledge: KnowledgeConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Maximum request body size in bytes
    pub max_request_size: usize,
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory for the disk tier; one subdirectory per named cache
    pub dir: PathBuf,
    /// TTL for retrieval results
    pub retrieval_ttl_secs: u64,
    /// TTL for generated answers
    pub answer_ttl_secs: u64,
    /// Memory tier capacity in entries
    pub memory_capacity: usize,
    /// Disk tier capacity in entries
    pub disk_capacity: usize,
    /// Upper bound for a single disk operation
    pub disk_io_timeout_ms: u64,
    /// Period of the background expiry sweep
    pub sweep_interval_secs: u64,
}

/// Retrieval configuration
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Ground answers in retrieved documents
    pub enable_rag: bool,
    /// Documents handed to the prompt builder
    pub top_k: usize,
    /// Candidates computed and cached per query
    pub depth: usize,
    /// Dimension of the primary embedding model
    pub embedding_dimension: usize,
}

/// Language model configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Backend preset: "deepseek" or "openai"
    pub provider: String,
    /// API key; when absent the keyword responder is used
    pub api_key: Option<String>,
    /// Chat completions endpoint
    pub api_url: String,
    /// Model name
    pub model: String,
    /// Default generation timeout in seconds
    pub timeout_secs: u64,
    /// Completion token limit
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
}

/// Knowledge base configuration
#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    /// Path to the JSON question/answer file
    pub path: PathBuf,
}

fn parse_var<T>(name: &str, default: &str) -> AppResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|e| AppError::ConfigError(format!("Invalid {}: {}", name, e)))
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        // Load .env file if it exists
        if let Err(e) = dotenvy::dotenv() {
            tracing::warn!("Could not load .env file: {}", e);
        }

        let provider = env::var("LLM_PROVIDER")
            .unwrap_or_else(|_| "deepseek".to_string())
            .to_lowercase();
        let (default_url, default_model, api_key) = match provider.as_str() {
            "openai" => (
                "https://api.openai.com/v1/chat/completions",
                "gpt-3.5-turbo",
                non_empty_var("OPENAI_API_KEY"),
            ),
            _ => (
                "https://api.deepseek.com/v1/chat/completions",
                "deepseek-chat",
                non_empty_var("DEEPSEEK_API_KEY").or_else(|| non_empty_var("OPENAI_API_KEY")),
            ),
        };

        let config = Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT", "8080")?,
                request_timeout_ms: parse_var("REQUEST_TIMEOUT_MS", "60000")?,
                max_request_size: parse_var("MAX_REQUEST_SIZE", "32768")?, // 32KB
            },
            cache: CacheConfig {
                dir: PathBuf::from(env::var("CACHE_DIR").unwrap_or_else(|_| "cache".to_string())),
                retrieval_ttl_secs: parse_var("RETRIEVAL_CACHE_TTL_SECS", "7200")?, // 2 hours
                answer_ttl_secs: parse_var("ANSWER_CACHE_TTL_SECS", "3600")?, // 1 hour
                memory_capacity: parse_var("CACHE_MEMORY_CAPACITY", "1024")?,
                disk_capacity: parse_var("CACHE_DISK_CAPACITY", "10000")?,
                disk_io_timeout_ms: parse_var("CACHE_DISK_IO_TIMEOUT_MS", "200")?,
                sweep_interval_secs: parse_var("CACHE_SWEEP_INTERVAL_SECS", "300")?,
            },
            retrieval: RetrievalConfig {
                enable_rag: parse_var("ENABLE_RAG", "true")?,
                top_k: parse_var("TOP_K", "3")?,
                depth: parse_var("RETRIEVAL_DEPTH", "10")?,
                embedding_dimension: parse_var("EMBEDDING_DIMENSION", "384")?,
            },
            llm: LlmConfig {
                provider: provider.clone(),
                api_key,
                api_url: env::var("LLM_API_URL").unwrap_or_else(|_| default_url.to_string()),
                model: env::var("LLM_MODEL").unwrap_or_else(|_| default_model.to_string()),
                timeout_secs: parse_var("LLM_TIMEOUT_SECS", "30")?,
                max_tokens: parse_var("LLM_MAX_TOKENS", "500")?,
                temperature: parse_var("LLM_TEMPERATURE", "0.3")?,
            },
            knowledge: KnowledgeConfig {
                path: PathBuf::from(
                    env::var("KNOWLEDGE_BASE_PATH").unwrap_or_else(|_| "data/docs.json".to_string()),
                ),
            },
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.server.port == 0 {
            return Err(AppError::ConfigError("Server port cannot be 0".to_string()));
        }

        if self.server.request_timeout_ms == 0 {
            return Err(AppError::ConfigError("Request timeout must be greater than 0".to_string()));
        }

        if self.cache.memory_capacity == 0 || self.cache.disk_capacity == 0 {
            return Err(AppError::ConfigError("Cache capacities must be greater than 0".to_string()));
        }

        if self.cache.disk_io_timeout_ms == 0 {
            return Err(AppError::ConfigError("Disk I/O timeout must be greater than 0".to_string()));
        }

        if self.cache.sweep_interval_secs == 0 {
            return Err(AppError::ConfigError("Sweep interval must be greater than 0".to_string()));
        }

        if self.retrieval.top_k == 0 {
            return Err(AppError::ConfigError("TOP_K must be greater than 0".to_string()));
        }

        if self.retrieval.embedding_dimension == 0 {
            return Err(AppError::ConfigError("Embedding dimension must be greater than 0".to_string()));
        }

        if self.llm.timeout_secs == 0 {
            return Err(AppError::ConfigError("LLM timeout must be greater than 0".to_string()));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(AppError::ConfigError("LLM_TEMPERATURE must be within 0.0..=2.0".to_string()));
        }

        if !self.llm.api_url.starts_with("http://") && !self.llm.api_url.starts_with("https://") {
            return Err(AppError::ConfigError("LLM_API_URL must start with http:// or https://".to_string()));
        }

        Ok(())
    }

    /// Default timeout for a single generation call
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }

    /// Upper bound for a single disk tier operation
    pub fn disk_io_timeout(&self) -> Duration {
        Duration::from_millis(self.cache.disk_io_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                request_timeout_ms: 60000,
                max_request_size: 32768, // 32KB
            },
            cache: CacheConfig {
                dir: PathBuf::from("cache"),
                retrieval_ttl_secs: 7200,
                answer_ttl_secs: 3600,
                memory_capacity: 1024,
                disk_capacity: 10000,
                disk_io_timeout_ms: 200,
                sweep_interval_secs: 300,
            },
            retrieval: RetrievalConfig {
                enable_rag: true,
                top_k: 3,
                depth: 10,
                embedding_dimension: 384,
            },
            llm: LlmConfig {
                provider: "deepseek".to_string(),
                api_key: None,
                api_url: "https://api.deepseek.com/v1/chat/completions".to_string(),
                model: "deepseek-chat".to_string(),
                timeout_secs: 30,
                max_tokens: 500,
                temperature: 0.3,
            },
            knowledge: KnowledgeConfig {
                path: PathBuf::from("data/docs.json"),
            },
        }
    }
}
