use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::env;
use tracing::{event, Level};
use uuid::Uuid;

use crate::error::AppError;
use crate::types::AnswerResult;

const MAX_LOGGED_QUESTION_CHARS: usize = 200;

/// Structured JSON logging service with trace_id injection
#[derive(Clone)]
pub struct LoggingService {
    service_name: String,
    service_version: String,
    environment: String,
    redactions: Vec<(Regex, &'static str)>,
}

impl Default for LoggingService {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingService {
    /// Create a new logging service
    pub fn new() -> Self {
        let service_name = env::var("SERVICE_NAME").unwrap_or_else(|_| "kb-answer-cache".to_string());

        let service_version =
            env::var("SERVICE_VERSION").unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let redactions = [
            (r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b", "[EMAIL]"),
            (r"1[3-9]\d{9}", "[PHONE]"),
            (r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b", "[PHONE]"),
        ]
        .into_iter()
        .filter_map(|(pattern, label)| Regex::new(pattern).ok().map(|re| (re, label)))
        .collect();

        Self {
            service_name,
            service_version,
            environment,
            redactions,
        }
    }

    /// Log a structured message with trace_id
    pub fn log_structured(&self, level: Level, message: &str, fields: Option<HashMap<String, Value>>) {
        let trace_id = fields
            .as_ref()
            .and_then(|f| f.get("trace_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut log_entry = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "level": level.to_string().to_uppercase(),
            "message": message,
            "trace_id": trace_id,
            "service": {
                "name": self.service_name,
                "version": self.service_version,
                "environment": self.environment
            }
        });

        if let Some(fields) = fields {
            if let Value::Object(ref mut map) = log_entry {
                for (key, value) in fields {
                    map.insert(key, value);
                }
            }
        }

        match level {
            Level::ERROR => event!(Level::ERROR, %trace_id, "{}", log_entry),
            Level::WARN => event!(Level::WARN, %trace_id, "{}", log_entry),
            Level::INFO => event!(Level::INFO, %trace_id, "{}", log_entry),
            Level::DEBUG => event!(Level::DEBUG, %trace_id, "{}", log_entry),
            Level::TRACE => event!(Level::TRACE, %trace_id, "{}", log_entry),
        }
    }

    /// Log an incoming question with PII masked
    pub fn log_ask_request(&self, question: &str, trace_id: Uuid) {
        let fields = HashMap::from([
            ("trace_id".to_string(), json!(trace_id.to_string())),
            ("question_chars".to_string(), json!(question.chars().count())),
            ("sanitized_question".to_string(), json!(self.sanitize_question(question))),
        ]);

        self.log_structured(Level::INFO, "Ask request received", Some(fields));
    }

    /// Log an answered question
    pub fn log_ask_response(&self, trace_id: Uuid, result: &AnswerResult) {
        let fields = HashMap::from([
            ("trace_id".to_string(), json!(trace_id.to_string())),
            ("fingerprint".to_string(), json!(result.question_fingerprint)),
            ("duration_ms".to_string(), json!(result.processing_time_ms)),
            ("cache_hit".to_string(), json!(result.cache_hit)),
            ("rag_used".to_string(), json!(result.rag_used)),
            ("strategy".to_string(), json!(result.strategy.as_str())),
            ("relevant_docs".to_string(), json!(result.relevant_docs.len())),
        ]);

        self.log_structured(Level::INFO, "Ask request completed", Some(fields));
    }

    /// Log error with context
    pub fn log_error(&self, error: &AppError, context: Option<HashMap<String, Value>>) {
        let mut fields = HashMap::from([
            ("error_type".to_string(), json!(error.error_type())),
            ("error_message".to_string(), json!(error.to_string())),
            ("retryable".to_string(), json!(error.is_retryable())),
        ]);

        if let Some(context) = context {
            fields.extend(context);
        }

        let level = if error.is_invalid_input() { Level::WARN } else { Level::ERROR };
        self.log_structured(level, "Error occurred", Some(fields));
    }

    /// Log an administrative cache operation
    pub fn log_cache_operation(&self, operation: &str, cache: &str, affected: usize) {
        let fields = HashMap::from([
            ("operation".to_string(), json!(operation)),
            ("cache".to_string(), json!(cache)),
            ("affected_entries".to_string(), json!(affected)),
        ]);

        self.log_structured(Level::INFO, "Cache operation", Some(fields));
    }

    /// Mask contact details and truncate
    pub fn sanitize_question(&self, question: &str) -> String {
        let mut sanitized = question.to_string();
        for (re, label) in &self.redactions {
            sanitized = re.replace_all(&sanitized, *label).into_owned();
        }

        if sanitized.chars().count() > MAX_LOGGED_QUESTION_CHARS {
            sanitized = sanitized.chars().take(MAX_LOGGED_QUESTION_CHARS - 3).collect();
            sanitized.push_str("...");
        }
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::GenerationError;

    #[test]
    fn test_logging_service_creation() {
        let service = LoggingService::new();
        assert!(!service.service_version.is_empty());
        assert_eq!(service.redactions.len(), 3);
    }

    #[test]
    fn test_question_sanitization() {
        let service = LoggingService::new();

        let sanitized = service.sanitize_question("请联系 john.doe@example.com 咨询灭火器");
        assert!(sanitized.contains("[EMAIL]"));
        assert!(!sanitized.contains("john.doe@example.com"));

        let sanitized = service.sanitize_question("我的电话13812345678，楼里着火了");
        assert!(sanitized.contains("[PHONE]"));
        assert!(!sanitized.contains("13812345678"));

        let sanitized = service.sanitize_question("Call 555-123-4567 now");
        assert!(sanitized.contains("[PHONE]"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let service = LoggingService::new();
        let long = "火".repeat(500);
        let sanitized = service.sanitize_question(&long);
        assert_eq!(sanitized.chars().count(), MAX_LOGGED_QUESTION_CHARS);
        assert!(sanitized.ends_with("..."));
    }

    #[test]
    fn test_logging_methods() {
        let service = LoggingService::new();
        let trace_id = Uuid::new_v4();

        service.log_ask_request("灭火器怎么用", trace_id);
        service.log_cache_operation("clear", "answers", 3);
        service.log_error(
            &AppError::generation_failed("q", true, GenerationError::Timeout),
            Some(HashMap::from([("trace_id".to_string(), json!(trace_id.to_string()))])),
        );
        service.log_structured(Level::DEBUG, "Test message", None);
    }
}
