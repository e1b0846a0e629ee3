use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::{GenerationError, LanguageModel};
use crate::config::LlmConfig;
use crate::error::{AppError, AppResult};

const SYSTEM_PROMPT: &str = "你是一个专业的火灾预防安全专家。";

/// Connection settings for an OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone)]
pub struct ChatCompletionSettings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatCompletionSettings {
    /// Settings from config; `None` when no API key is configured
    pub fn from_config(config: &LlmConfig) -> Option<Self> {
        config.api_key.as_ref().map(|key| Self {
            api_url: config.api_url.clone(),
            api_key: key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

/// Client for DeepSeek, OpenAI and compatible chat completion APIs
pub struct ChatCompletionClient {
    http: Client,
    settings: ChatCompletionSettings,
}

impl ChatCompletionClient {
    pub fn new(settings: ChatCompletionSettings) -> AppResult<Self> {
        let http = Client::builder()
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            api_url = %settings.api_url,
            model = %settings.model,
            api_key = %scrub_key(&settings.api_key),
            "Chat completion client initialized"
        );

        Ok(Self { http, settings })
    }

    fn classify_status(status: StatusCode, body: String) -> GenerationError {
        match status {
            StatusCode::TOO_MANY_REQUESTS => GenerationError::RateLimited,
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => GenerationError::Timeout,
            s if s.is_server_error() => GenerationError::Unreachable(format!("{}: {}", s, body)),
            s => GenerationError::InvalidResponse(format!("{}: {}", s, body)),
        }
    }

    fn classify_transport(error: reqwest::Error) -> GenerationError {
        if error.is_timeout() {
            GenerationError::Timeout
        } else {
            GenerationError::Unreachable(error.to_string())
        }
    }
}

/// Pull the answer text out of a chat completion response.
///
/// Accepts `choices[0].message.content` or a top-level `output` string.
pub fn extract_answer(body: &Value) -> Result<String, GenerationError> {
    let text = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .or_else(|| body.get("output").and_then(Value::as_str))
        .ok_or_else(|| GenerationError::InvalidResponse("no answer in response".to_string()))?;

    let text = text.trim();
    if text.is_empty() {
        return Err(GenerationError::InvalidResponse("empty answer".to_string()));
    }
    Ok(text.to_string())
}

fn scrub_key(key: &str) -> String {
    if key.chars().count() > 8 {
        format!("{}...[REDACTED]", key.chars().take(8).collect::<String>())
    } else {
        "[REDACTED]".to_string()
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionClient {
    #[instrument(skip(self, prompt), fields(prompt_len = prompt.len(), model = %self.settings.model))]
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            stream: false,
        };

        let response = self
            .http
            .post(&self.settings.api_url)
            .bearer_auth(&self.settings.api_key)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(Self::classify_transport)?;

        let status = response.status();
        debug!("Response status: {}", status);
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            warn!("LLM API error ({}): {}", status, body);
            return Err(Self::classify_status(status, body));
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout
            } else {
                GenerationError::InvalidResponse(e.to_string())
            }
        })?;
        extract_answer(&body)
    }

    fn backend_name(&self) -> &str {
        &self.settings.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    async fn spawn_backend(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/v1/chat/completions", addr)
    }

    fn client(api_url: String) -> ChatCompletionClient {
        ChatCompletionClient::new(ChatCompletionSettings {
            api_url,
            api_key: "sk-test-1234567890".to_string(),
            model: "deepseek-chat".to_string(),
            max_tokens: 500,
            temperature: 0.3,
        })
        .unwrap()
    }

    #[test]
    fn test_extract_answer_formats() {
        let openai = json!({"choices": [{"message": {"content": " 拨打119 "}}]});
        assert_eq!(extract_answer(&openai).unwrap(), "拨打119");

        let other = json!({"output": "低姿前进"});
        assert_eq!(extract_answer(&other).unwrap(), "低姿前进");

        assert!(matches!(
            extract_answer(&json!({"choices": []})),
            Err(GenerationError::InvalidResponse(_))
        ));
        assert!(matches!(
            extract_answer(&json!({"output": "   "})),
            Err(GenerationError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_key_scrubbing() {
        assert_eq!(scrub_key("sk-1234567890abc"), "sk-12345...[REDACTED]");
        assert_eq!(scrub_key("short"), "[REDACTED]");
    }

    #[test]
    fn test_settings_require_api_key() {
        let mut config = crate::config::Config::default().llm;
        assert!(ChatCompletionSettings::from_config(&config).is_none());

        config.api_key = Some("sk-test".to_string());
        let settings = ChatCompletionSettings::from_config(&config).unwrap();
        assert_eq!(settings.model, "deepseek-chat");
        assert_eq!(settings.max_tokens, 500);
    }

    #[tokio::test]
    async fn test_generate_sends_chat_request() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "deepseek-chat");
                assert_eq!(body["messages"][0]["role"], "system");
                assert_eq!(body["messages"][1]["content"], "用户问题：灭火器怎么用");
                Json(json!({"choices": [{"message": {"content": "拔掉保险销"}}]}))
            }),
        );
        let url = spawn_backend(router).await;

        let answer = client(url)
            .generate("用户问题：灭火器怎么用", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(answer, "拔掉保险销");
    }

    #[tokio::test]
    async fn test_generate_classifies_failures() {
        let router = Router::new()
            .route(
                "/limited/v1/chat/completions",
                post(|| async { (HttpStatus::TOO_MANY_REQUESTS, "slow down") }),
            )
            .route(
                "/broken/v1/chat/completions",
                post(|| async { (HttpStatus::INTERNAL_SERVER_ERROR, "boom") }),
            )
            .route(
                "/denied/v1/chat/completions",
                post(|| async { (HttpStatus::UNAUTHORIZED, "bad key") }),
            )
            .route(
                "/slow/v1/chat/completions",
                post(|| async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Json(json!({"output": "late"}))
                }),
            );
        let base = spawn_backend(router).await;
        let url = |prefix: &str| base.replace("/v1/", &format!("/{}/v1/", prefix));

        let err = client(url("limited")).generate("q", Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err, GenerationError::RateLimited);

        let err = client(url("broken")).generate("q", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, GenerationError::Unreachable(_)));

        let err = client(url("denied")).generate("q", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, GenerationError::InvalidResponse(_)));

        let err = client(url("slow")).generate("q", Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err, GenerationError::Timeout);
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(format!("http://{}/v1/chat/completions", addr))
            .generate("q", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Unreachable(_)));
    }
}
