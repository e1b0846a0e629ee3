use super::*;
use crate::answer::{AnswerService, AnswerSettings};
use crate::cache::CacheAdmin;
use crate::llm::{KeywordResponder, LanguageModel};
use crate::search::VectorRetriever;
use crate::testing::{memory_cache, sample_knowledge, ScriptedLlm, SwitchableEmbedder};
use std::sync::Arc;
use std::time::Duration;

async fn answers_with(embedder_up: bool, llm: Arc<dyn LanguageModel>) -> (AnswerService, CacheAdmin) {
    let retrieval = memory_cache("retrieval").await;
    let answers = memory_cache("answers").await;
    let retriever = Arc::new(
        VectorRetriever::build(
            sample_knowledge(),
            Arc::new(SwitchableEmbedder::new(embedder_up)),
            retrieval.clone(),
            10,
        )
        .await,
    );
    let admin = CacheAdmin::new().with_cache(retrieval).with_cache(answers.clone());
    (AnswerService::new(retriever, llm, answers, AnswerSettings::default()), admin)
}

#[tokio::test]
async fn test_all_components_healthy() {
    let (answers, admin) = answers_with(true, Arc::new(ScriptedLlm::new(Duration::from_millis(1)))).await;
    let health = HealthService::new();

    let report = health.comprehensive_health_check(&answers, &admin).await;

    assert_eq!(report.status, HealthStatus::Healthy);
    assert_eq!(report.service.name, "kb-answer-cache");
    for name in ["knowledge_base", "embedding_model", "llm_backend", "caches"] {
        assert!(report.components.contains_key(name), "missing {}", name);
    }
    assert!(report.components["caches"].message.as_deref().unwrap().contains("answers"));
}

#[tokio::test]
async fn test_fallback_embedding_degrades_health() {
    let (answers, admin) = answers_with(false, Arc::new(ScriptedLlm::new(Duration::from_millis(1)))).await;

    let report = HealthService::new().comprehensive_health_check(&answers, &admin).await;

    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.components["embedding_model"].status, HealthStatus::Degraded);
    assert_eq!(report.components["llm_backend"].status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_keyword_backend_degrades_health() {
    let (answers, admin) = answers_with(true, Arc::new(KeywordResponder::new())).await;

    let report = HealthService::new().comprehensive_health_check(&answers, &admin).await;

    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.components["llm_backend"].status, HealthStatus::Degraded);
}

#[tokio::test]
async fn test_cache_gauges_follow_admin_stats() {
    let (answers, admin) = answers_with(true, Arc::new(ScriptedLlm::new(Duration::from_millis(1)))).await;
    let registry = MetricsRegistry::new().unwrap();

    answers.ask("灭火器怎么用").await.unwrap();
    registry.record_cache_stats(&admin.stats_all());

    let output = registry.gather().unwrap();
    assert!(output.contains("cache_entries{cache=\"answers\",tier=\"memory\"} 1"));
    assert!(output.contains("cache_entries{cache=\"retrieval\",tier=\"memory\"} 1"));
}
