use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use kb_answer_cache::cache::{CacheAdmin, CacheSettings, CacheStore};
use kb_answer_cache::config::Config;
use kb_answer_cache::knowledge::KnowledgeBase;
use kb_answer_cache::llm::{ChatCompletionClient, ChatCompletionSettings, KeywordResponder, LanguageModel};
use kb_answer_cache::ml::HashingEmbedder;
use kb_answer_cache::observability::{init_tracing, HealthService, LoggingService, MetricsRegistry};
use kb_answer_cache::search::VectorRetriever;
use kb_answer_cache::server::{AnswerServer, AppState};
use kb_answer_cache::{AnswerService, AnswerSettings};

async fn open_cache(config: &Config, name: &str, ttl_secs: u64) -> anyhow::Result<Arc<CacheStore>> {
    let settings = CacheSettings::new(name, Duration::from_secs(ttl_secs))
        .with_disk(&config.cache.dir)
        .with_capacity(config.cache.memory_capacity, config.cache.disk_capacity)
        .with_disk_io_timeout(config.disk_io_timeout());

    let store = CacheStore::open(settings)
        .await
        .with_context(|| format!("opening {} cache under {}", name, config.cache.dir.display()))?;
    Ok(Arc::new(store))
}

fn language_model(config: &Config) -> anyhow::Result<Arc<dyn LanguageModel>> {
    match ChatCompletionSettings::from_config(&config.llm) {
        Some(settings) => {
            info!(provider = %config.llm.provider, model = %settings.model, "Using chat completion backend");
            Ok(Arc::new(ChatCompletionClient::new(settings)?))
        }
        None => {
            warn!(
                provider = %config.llm.provider,
                "No API key configured; answers come from keyword rules"
            );
            Ok(Arc::new(KeywordResponder::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let config = Config::from_env().context("loading configuration")?;
    info!("Starting kb-answer-cache server");

    let knowledge = Arc::new(
        KnowledgeBase::load(&config.knowledge.path)
            .with_context(|| format!("loading knowledge base from {}", config.knowledge.path.display()))?,
    );
    info!(documents = knowledge.len(), "Knowledge base loaded");

    let metrics = MetricsRegistry::new()?;
    let retrieval_cache = open_cache(&config, "retrieval", config.cache.retrieval_ttl_secs).await?;
    let answer_cache = open_cache(&config, "answers", config.cache.answer_ttl_secs).await?;

    let embedder = Arc::new(HashingEmbedder::new(config.retrieval.embedding_dimension));
    let retriever = VectorRetriever::build(knowledge, embedder, retrieval_cache.clone(), config.retrieval.depth)
        .await
        .with_metrics(metrics.metrics());
    if let Err(e) = retriever.primary_status() {
        warn!(error = %e, "Primary embedding model unavailable; using fallback retrieval");
    }

    let answers = AnswerService::new(
        Arc::new(retriever),
        language_model(&config)?,
        answer_cache.clone(),
        AnswerSettings {
            enable_rag: config.retrieval.enable_rag,
            top_k: config.retrieval.top_k,
            generation_timeout: config.generation_timeout(),
        },
    )
    .with_metrics(metrics.metrics());

    let sweep_interval = Duration::from_secs(config.cache.sweep_interval_secs);
    let _sweepers = [
        retrieval_cache.spawn_sweeper(sweep_interval),
        answer_cache.spawn_sweeper(sweep_interval),
    ];

    let state = AppState {
        answers: Arc::new(answers),
        admin: CacheAdmin::new().with_cache(retrieval_cache).with_cache(answer_cache),
        metrics,
        logging: LoggingService::new(),
        health: HealthService::new(),
        request_timeout: Duration::from_millis(config.server.request_timeout_ms),
    };

    AnswerServer::new(state, config.server.clone()).run().await?;

    Ok(())
}
