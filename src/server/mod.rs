use axum::{
    extract::{Path, Request, State},
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::answer::AnswerService;
use crate::cache::{CacheAdmin, CacheStats};
use crate::config::ServerConfig;
use crate::error::{AppError, AppResult};
use crate::knowledge::KnowledgeStatistics;
use crate::observability::health::{liveness_handler, probe_status};
use crate::observability::{HealthResponse, HealthService, LoggingService, MetricsRegistry};
use crate::types::{AnswerResult, AskRequest};

/// Sample questions offered to API clients
pub const EXAMPLE_QUESTIONS: [&str; 5] = [
    "如何使用灭火器？",
    "火灾发生时如何正确逃生？",
    "家庭火灾预防措施有哪些？",
    "办公室火灾应急处理流程是什么？",
    "电器火灾如何预防？",
];

/// Shared application state
pub struct AppState {
    pub answers: Arc<AnswerService>,
    pub admin: CacheAdmin,
    pub metrics: MetricsRegistry,
    pub logging: LoggingService,
    pub health: HealthService,
    /// Upper bound on any single request
    pub request_timeout: Duration,
}

/// HTTP boundary for the answer service
pub struct AnswerServer {
    app: Router,
    config: ServerConfig,
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub retryable: bool,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = if status.is_server_error() && !matches!(self, AppError::GenerationFailed { .. }) {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error: self.error_type().to_string(),
            message,
            retryable: self.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

impl AnswerServer {
    pub fn new(state: AppState, config: ServerConfig) -> Self {
        let app = router(Arc::new(state), config.max_request_size);
        Self { app, config }
    }

    /// Bind and serve until the process stops
    pub async fn run(self) -> AppResult<()> {
        let bind_addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| AppError::ConfigError(format!("Failed to bind to {}: {}", bind_addr, e)))?;

        info!("HTTP server listening on {}", bind_addr);

        axum::serve(listener, self.app)
            .await
            .map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;

        Ok(())
    }
}

/// Build the router with CORS, body limit and request timeout layers
pub fn router(state: Arc<AppState>, max_request_size: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any)
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/ask", post(ask_handler))
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/cache/stats", get(cache_stats_handler))
        .route("/cache/:name", delete(clear_cache_handler))
        .route("/knowledge/stats", get(knowledge_stats_handler))
        .route("/examples", get(examples_handler))
        .route("/metrics", get(metrics_handler))
        .layer(RequestBodyLimitLayer::new(max_request_size))
        .layer(middleware::from_fn_with_state(state.clone(), timeout_middleware))
        .layer(cors)
        .with_state(state)
}

async fn timeout_middleware(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    match timeout(state.request_timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            error!("Request timeout on {}", path);
            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(ErrorResponse {
                    error: "request_timeout".to_string(),
                    message: "Request processing took too long".to_string(),
                    retryable: true,
                }),
            )
                .into_response()
        }
    }
}

async fn ask_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AnswerResult>, AppError> {
    let trace_id = Uuid::new_v4();
    state.logging.log_ask_request(&request.question, trace_id);

    let generation_timeout = match request.timeout_ms {
        Some(0) => {
            let err = AppError::InvalidInput("timeout_ms must be greater than 0".to_string());
            state.logging.log_error(&err, Some(trace_context(trace_id)));
            return Err(err);
        }
        Some(ms) => Duration::from_millis(ms),
        None => state.answers.settings().generation_timeout,
    };

    match state.answers.ask_with_timeout(&request.question, generation_timeout).await {
        Ok(result) => {
            state.logging.log_ask_response(trace_id, &result);
            Ok(Json(result))
        }
        Err(e) => {
            state.logging.log_error(&e, Some(trace_context(trace_id)));
            Err(e)
        }
    }
}

fn trace_context(trace_id: Uuid) -> HashMap<String, serde_json::Value> {
    HashMap::from([("trace_id".to_string(), json!(trace_id.to_string()))])
}

async fn health_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let report = state
        .health
        .comprehensive_health_check(&state.answers, &state.admin)
        .await;
    (probe_status(report.status), Json(report))
}

async fn cache_stats_handler(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, CacheStats>> {
    let stats = state.admin.stats_all();
    state.metrics.record_cache_stats(&stats);
    Json(stats)
}

async fn clear_cache_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let cleared = state.admin.clear(&name).await.map_err(|e| {
        state.logging.log_error(&e, None);
        e
    })?;
    state.logging.log_cache_operation("clear", &name, cleared);

    Ok(Json(json!({ "cache": name, "cleared": cleared })))
}

async fn knowledge_stats_handler(State(state): State<Arc<AppState>>) -> Json<KnowledgeStatistics> {
    Json(state.answers.retriever().knowledge().statistics())
}

async fn examples_handler() -> Json<serde_json::Value> {
    Json(json!({ "example_questions": EXAMPLE_QUESTIONS }))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    state.metrics.record_cache_stats(&state.admin.stats_all());
    let body = state.metrics.gather()?;

    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::AnswerSettings;
    use crate::llm::GenerationError;
    use crate::search::VectorRetriever;
    use crate::testing::{memory_cache, sample_knowledge, ScriptedLlm, SwitchableEmbedder};
    use axum_test::TestServer;

    struct Fixture {
        server: TestServer,
        llm: Arc<ScriptedLlm>,
    }

    async fn create_test_server() -> Fixture {
        let retrieval = memory_cache("retrieval").await;
        let answers_cache = memory_cache("answers").await;
        let retriever = Arc::new(
            VectorRetriever::build(
                sample_knowledge(),
                Arc::new(SwitchableEmbedder::new(true)),
                retrieval.clone(),
                10,
            )
            .await,
        );
        let llm = Arc::new(ScriptedLlm::new(Duration::from_millis(5)));
        let metrics = MetricsRegistry::new().unwrap();
        let answers = AnswerService::new(retriever, llm.clone(), answers_cache.clone(), AnswerSettings::default())
            .with_metrics(metrics.metrics());

        let state = AppState {
            answers: Arc::new(answers),
            admin: CacheAdmin::new().with_cache(retrieval).with_cache(answers_cache),
            metrics,
            logging: LoggingService::new(),
            health: HealthService::new(),
            request_timeout: Duration::from_secs(5),
        };

        Fixture {
            server: TestServer::new(router(Arc::new(state), 64 * 1024)).unwrap(),
            llm,
        }
    }

    #[tokio::test]
    async fn test_ask_then_cached() {
        let f = create_test_server().await;

        let first = f.server.post("/ask").json(&json!({ "question": "灭火器怎么用" })).await;
        first.assert_status_ok();
        let first: AnswerResult = first.json();
        assert!(!first.cache_hit);
        assert!(first.relevant_docs.iter().any(|d| d.doc_id == "d1"));

        let second: AnswerResult = f
            .server
            .post("/ask")
            .json(&json!({ "question": "灭火器怎么用" }))
            .await
            .json();
        assert!(second.cache_hit);
        assert_eq!(second.answer, first.answer);
        assert_eq!(f.llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_question_is_bad_request() {
        let f = create_test_server().await;

        let response = f.server.post("/ask").json(&json!({ "question": "  " })).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: ErrorResponse = response.json();
        assert_eq!(body.error, "invalid_input");
        assert!(!body.retryable);
    }

    #[tokio::test]
    async fn test_zero_timeout_is_bad_request() {
        let f = create_test_server().await;

        let response = f
            .server
            .post("/ask")
            .json(&json!({ "question": "如何报警", "timeout_ms": 0 }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(f.llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_generation_failure_maps_status() {
        let f = create_test_server().await;

        f.llm.fail_with(Some(GenerationError::RateLimited));
        let response = f.server.post("/ask").json(&json!({ "question": "如何报警" })).await;
        response.assert_status(StatusCode::TOO_MANY_REQUESTS);
        let body: ErrorResponse = response.json();
        assert_eq!(body.error, "generation_failed");
        assert!(body.retryable);

        let response = f
            .server
            .post("/ask")
            .json(&json!({ "question": "如何预防火灾", "timeout_ms": 1 }))
            .await;
        response.assert_status(StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_cache_admin_endpoints() {
        let f = create_test_server().await;
        f.server.post("/ask").json(&json!({ "question": "灭火器怎么用" })).await;

        let stats: BTreeMap<String, CacheStats> = f.server.get("/cache/stats").await.json();
        assert_eq!(stats["answers"].memory_entries, 1);

        let cleared: serde_json::Value = f.server.delete("/cache/answers").await.json();
        assert_eq!(cleared["cleared"], 1);

        let stats: BTreeMap<String, CacheStats> = f.server.get("/cache/stats").await.json();
        assert_eq!(stats["answers"].memory_entries, 0);

        let response = f.server.delete("/cache/embeddings").await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: ErrorResponse = response.json();
        assert_eq!(body.error, "unknown_cache");
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let f = create_test_server().await;

        let live: serde_json::Value = f.server.get("/health/live").await.json();
        assert_eq!(live["status"], "alive");

        let response = f.server.get("/health").await;
        response.assert_status_ok();
        let report: serde_json::Value = response.json();
        assert_eq!(report["status"], "healthy");
        assert!(report["components"]["embedding_model"].is_object());
    }

    #[tokio::test]
    async fn test_knowledge_stats_endpoint() {
        let f = create_test_server().await;

        let stats: serde_json::Value = f.server.get("/knowledge/stats").await.json();
        assert_eq!(stats["total"], 4);
        assert_eq!(stats["categories"]["报警"], 1);
    }

    #[tokio::test]
    async fn test_examples_endpoint() {
        let f = create_test_server().await;

        let response = f.server.get("/examples").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        let questions = body["example_questions"].as_array().unwrap();
        assert_eq!(questions.len(), 5);
        assert_eq!(questions[0], "如何使用灭火器？");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let f = create_test_server().await;
        f.server.post("/ask").json(&json!({ "question": "灭火器怎么用" })).await;

        let response = f.server.get("/metrics").await;
        response.assert_status_ok();
        let text = response.text();
        assert!(text.contains("ask_total 1"));
        assert!(text.contains("cache_entries{cache=\"answers\",tier=\"memory\"} 1"));
    }
}
