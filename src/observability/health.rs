use axum::{http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::answer::AnswerService;
use crate::cache::CacheAdmin;

const KEYWORD_BACKEND: &str = "keyword-rules";

/// Health check service for readiness/liveness probes
#[derive(Clone)]
pub struct HealthService {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    started_at: Instant,
}

/// Health status of individual components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub last_check: chrono::DateTime<chrono::Utc>,
    pub message: Option<String>,
    pub response_time_ms: Option<f64>,
}

/// Overall health status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub service: ServiceInfo,
    pub components: HashMap<String, ComponentHealth>,
    pub uptime_seconds: u64,
}

/// Service information
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub environment: String,
}

impl Default for HealthService {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthService {
    /// Create a new health service
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            started_at: Instant::now(),
        }
    }

    /// Update component health status
    pub async fn update_component_health(
        &self,
        component: &str,
        status: HealthStatus,
        message: Option<String>,
        response_time_ms: Option<f64>,
    ) {
        let health = ComponentHealth {
            status,
            last_check: chrono::Utc::now(),
            message,
            response_time_ms,
        };

        let mut components = self.components.write().await;
        components.insert(component.to_string(), health);
    }

    fn check_knowledge_base(answers: &AnswerService) -> (HealthStatus, Option<String>) {
        let documents = answers.retriever().knowledge().len();
        if documents == 0 {
            (HealthStatus::Degraded, Some("knowledge base is empty".to_string()))
        } else {
            (HealthStatus::Healthy, Some(format!("{} documents loaded", documents)))
        }
    }

    fn check_embedding_model(answers: &AnswerService) -> (HealthStatus, Option<String>) {
        match answers.retriever().primary_status() {
            Ok(()) => (HealthStatus::Healthy, None),
            // Fallback retrieval keeps answering
            Err(e) => (HealthStatus::Degraded, Some(format!("{}; using fallback strategy", e))),
        }
    }

    fn check_llm_backend(answers: &AnswerService) -> (HealthStatus, Option<String>) {
        let backend = answers.backend_name();
        if backend == KEYWORD_BACKEND {
            (
                HealthStatus::Degraded,
                Some("no API key configured; answering with keyword rules".to_string()),
            )
        } else {
            (HealthStatus::Healthy, Some(backend.to_string()))
        }
    }

    fn check_caches(admin: &CacheAdmin) -> (HealthStatus, Option<String>) {
        let summary = admin
            .stats_all()
            .iter()
            .map(|(name, s)| format!("{}: {} memory / {} disk", name, s.memory_entries, s.disk_entries))
            .collect::<Vec<_>>()
            .join(", ");
        (HealthStatus::Healthy, Some(summary))
    }

    /// Check every component and aggregate
    pub async fn comprehensive_health_check(&self, answers: &AnswerService, admin: &CacheAdmin) -> HealthResponse {
        let checks: [(&str, fn(&AnswerService) -> (HealthStatus, Option<String>)); 3] = [
            ("knowledge_base", Self::check_knowledge_base),
            ("embedding_model", Self::check_embedding_model),
            ("llm_backend", Self::check_llm_backend),
        ];

        for (name, check) in checks {
            let start = Instant::now();
            let (status, message) = check(answers);
            let elapsed = start.elapsed().as_secs_f64() * 1000.0;
            self.update_component_health(name, status, message, Some(elapsed)).await;
        }

        let start = Instant::now();
        let (status, message) = Self::check_caches(admin);
        let elapsed = start.elapsed().as_secs_f64() * 1000.0;
        self.update_component_health("caches", status, message, Some(elapsed)).await;

        let components = self.components.read().await;
        let overall_status = calculate_overall_status(&components);

        HealthResponse {
            status: overall_status,
            timestamp: chrono::Utc::now(),
            service: ServiceInfo {
                name: "kb-answer-cache".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            },
            components: components.clone(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }
}

/// Calculate overall health status based on component health
pub fn calculate_overall_status(components: &HashMap<String, ComponentHealth>) -> HealthStatus {
    let mut has_unhealthy = false;
    let mut has_degraded = false;

    for health in components.values() {
        match health.status {
            HealthStatus::Unhealthy => has_unhealthy = true,
            HealthStatus::Degraded => has_degraded = true,
            HealthStatus::Healthy => {}
        }
    }

    if has_unhealthy {
        HealthStatus::Unhealthy
    } else if has_degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// HTTP status a probe should return for an aggregated status
pub fn probe_status(status: HealthStatus) -> StatusCode {
    match status {
        // Still ready to serve traffic
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Liveness probe handler - basic check that service is running
pub async fn liveness_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "alive",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
