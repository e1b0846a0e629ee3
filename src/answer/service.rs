use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use super::prompt::PromptBuilder;
use crate::cache::CacheStore;
use crate::error::{AppError, AppResult};
use crate::llm::{GenerationError, LanguageModel};
use crate::ml::{fingerprint, normalize_question};
use crate::observability::Metrics;
use crate::search::VectorRetriever;
use crate::types::{AnswerResult, DocumentReference};

/// Answer service settings
#[derive(Debug, Clone)]
pub struct AnswerSettings {
    /// Ground prompts in retrieved documents
    pub enable_rag: bool,
    /// Documents retrieved per question
    pub top_k: usize,
    /// Default time budget for one generation call
    pub generation_timeout: Duration,
}

impl Default for AnswerSettings {
    fn default() -> Self {
        Self {
            enable_rag: true,
            top_k: 3,
            generation_timeout: Duration::from_secs(30),
        }
    }
}

/// Answers questions, serving repeats from the answer cache.
///
/// A failed generation is returned to the caller and never cached.
pub struct AnswerService {
    retriever: Arc<VectorRetriever>,
    llm: Arc<dyn LanguageModel>,
    cache: Arc<CacheStore>,
    prompts: PromptBuilder,
    settings: AnswerSettings,
    metrics: Option<Arc<Metrics>>,
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

impl AnswerService {
    pub fn new(
        retriever: Arc<VectorRetriever>,
        llm: Arc<dyn LanguageModel>,
        cache: Arc<CacheStore>,
        settings: AnswerSettings,
    ) -> Self {
        Self {
            retriever,
            llm,
            cache,
            prompts: PromptBuilder::new(),
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &AnswerSettings {
        &self.settings
    }

    pub fn retriever(&self) -> &Arc<VectorRetriever> {
        &self.retriever
    }

    pub fn backend_name(&self) -> &str {
        self.llm.backend_name()
    }

    /// Answer with the configured generation timeout
    pub async fn ask(&self, question: &str) -> AppResult<AnswerResult> {
        self.ask_with_timeout(question, self.settings.generation_timeout).await
    }

    #[instrument(skip(self, question), fields(question_len = question.len()))]
    pub async fn ask_with_timeout(&self, question: &str, timeout: Duration) -> AppResult<AnswerResult> {
        let start = Instant::now();
        if let Some(metrics) = &self.metrics {
            metrics.ask_total.inc();
        }

        let result = self.answer(question, timeout, start).await;

        if let Some(metrics) = &self.metrics {
            metrics.ask_duration_seconds.observe(start.elapsed().as_secs_f64());
            match &result {
                Ok(answer) if answer.cache_hit => metrics.answer_cache_hits_total.inc(),
                Ok(_) => metrics.answer_cache_misses_total.inc(),
                Err(AppError::GenerationFailed { source, .. }) => {
                    metrics.answer_cache_misses_total.inc();
                    metrics
                        .generation_errors_total
                        .with_label_values(&[source.kind()])
                        .inc();
                }
                Err(_) => {}
            }
        }
        result
    }

    async fn answer(&self, question: &str, timeout: Duration, start: Instant) -> AppResult<AnswerResult> {
        let normalized = normalize_question(question);
        if normalized.is_empty() {
            return Err(AppError::InvalidInput("Question is empty".to_string()));
        }
        let key = fingerprint(&normalized);

        if let Some(mut cached) = self.cache.get_json::<AnswerResult>(&key).await {
            cached.cache_hit = true;
            cached.processing_time_ms = elapsed_ms(start);
            debug!(fingerprint = %key, "Answer cache hit");
            return Ok(cached);
        }

        let (prompt, relevant_docs) = if self.settings.enable_rag {
            let retrieval = self.retriever.retrieve(question, self.settings.top_k).await?;
            let prompt = self.prompts.grounded(question, &retrieval);
            let refs = retrieval.documents.iter().map(DocumentReference::from).collect();
            (prompt, refs)
        } else {
            (self.prompts.direct(question), Vec::new())
        };
        let rag_used = self.settings.enable_rag;

        let generated = match tokio::time::timeout(timeout, self.llm.generate(&prompt.text, timeout)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            Ok(Ok(_)) => Err(GenerationError::InvalidResponse("empty answer".to_string())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(GenerationError::Timeout),
        };

        let answer = match generated {
            Ok(answer) => answer,
            Err(source) => {
                error!(
                    fingerprint = %key,
                    backend = self.llm.backend_name(),
                    kind = source.kind(),
                    retryable = source.is_retryable(),
                    "Answer generation failed: {}",
                    source
                );
                return Err(AppError::generation_failed(question, rag_used, source));
            }
        };

        let result = AnswerResult {
            question_fingerprint: key.clone(),
            question: question.trim().to_string(),
            answer,
            relevant_docs,
            generated_at: Utc::now(),
            processing_time_ms: elapsed_ms(start),
            cache_hit: false,
            rag_used,
            strategy: prompt.strategy,
        };

        if let Err(e) = self.cache.set_json(&key, &result).await {
            warn!(error = %e, "Failed to cache answer");
        }

        info!(
            fingerprint = %key,
            strategy = result.strategy.as_str(),
            processing_time_ms = result.processing_time_ms,
            "Answer generated"
        );
        Ok(result)
    }
}
