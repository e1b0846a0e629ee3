use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::cache::CacheStore;
use crate::error::{AppError, AppResult};
use crate::knowledge::KnowledgeBase;
use crate::ml::{fingerprint, normalize_question, EmbeddingModel, FlatIndex, IndexHit, NgramEmbedder, VectorIndex};
use crate::observability::Metrics;
use crate::types::{Retrieval, RetrievalResult, RetrievalStrategy, RetrievedDocument, ScoredDocument};

/// Fallback rankings expire sooner so a recovered primary model takes over
pub const FALLBACK_RESULT_TTL: Duration = Duration::from_secs(300);

/// Cached semantic search over the knowledge base.
///
/// Holds two indexes over the same documents: one built with the primary
/// embedding model and one built with the character n-gram fallback. The
/// strategy is picked per call; a primary failure never disables it for
/// later calls.
pub struct VectorRetriever {
    knowledge: Arc<KnowledgeBase>,
    primary: Arc<dyn EmbeddingModel>,
    primary_index: Option<FlatIndex>,
    fallback: NgramEmbedder,
    fallback_index: FlatIndex,
    cache: Arc<CacheStore>,
    depth: usize,
    metrics: Option<Arc<Metrics>>,
}

impl VectorRetriever {
    /// Embed every document with both strategies.
    ///
    /// Documents go through the same normalization as queries, so a question
    /// asked verbatim lands on its own document.
    ///
    /// If the primary model fails on any document the primary index is left
    /// out and every query takes the fallback path.
    pub async fn build(
        knowledge: Arc<KnowledgeBase>,
        primary: Arc<dyn EmbeddingModel>,
        cache: Arc<CacheStore>,
        depth: usize,
    ) -> Self {
        let contents: Vec<String> = knowledge
            .documents()
            .iter()
            .map(|d| normalize_question(&d.content()))
            .collect();

        let embedded = join_all(contents.iter().map(|c| primary.embed(c))).await;
        let primary_index = match embedded.into_iter().collect::<Result<Vec<_>, _>>() {
            Ok(vectors) => {
                let mut index = FlatIndex::new(primary.dimension());
                let mut complete = true;
                for (doc, vector) in knowledge.documents().iter().zip(vectors) {
                    complete &= index.add(doc.doc_id.clone(), vector);
                }
                if complete {
                    Some(index)
                } else {
                    warn!(model = primary.model_name(), "Primary model returned vectors of the wrong dimension, using fallback index only");
                    None
                }
            }
            Err(e) => {
                warn!(model = primary.model_name(), error = %e, "Primary model unavailable at startup, using fallback index only");
                None
            }
        };

        let fallback = NgramEmbedder::default();
        let mut fallback_index = FlatIndex::new(fallback.dimension());
        for (doc, content) in knowledge.documents().iter().zip(&contents) {
            fallback_index.add(doc.doc_id.clone(), fallback.embed_text(content));
        }

        info!(
            documents = knowledge.len(),
            primary_model = primary.model_name(),
            primary_indexed = primary_index.is_some(),
            "Vector retriever ready"
        );

        Self {
            knowledge,
            primary,
            primary_index,
            fallback,
            fallback_index,
            cache,
            depth: depth.max(1),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeBase> {
        &self.knowledge
    }

    /// `ModelUnavailable` when queries can only use the fallback strategy
    pub fn primary_status(&self) -> AppResult<()> {
        match self.primary_index {
            Some(_) => Ok(()),
            None => Err(AppError::ModelUnavailable(self.primary.model_name().to_string())),
        }
    }

    /// Top `top_k` documents for a question, best first
    #[instrument(skip(self, question), fields(top_k = top_k))]
    pub async fn retrieve(&self, question: &str, top_k: usize) -> AppResult<Retrieval> {
        let normalized = normalize_question(question);
        if normalized.is_empty() {
            return Err(AppError::InvalidInput("Question is empty".to_string()));
        }
        let top_k = top_k.max(1);
        let query_fingerprint = fingerprint(&normalized);

        let mut stale = false;
        let usable = self
            .cache
            .get_json_where::<RetrievalResult, _>(&query_fingerprint, |cached| {
                if !cached.covers(top_k) {
                    debug!(cached_depth = cached.depth, "Cached ranking too shallow, recomputing");
                    return false;
                }
                stale = !cached.documents.iter().take(top_k).all(|d| self.knowledge.get(&d.doc_id).is_some());
                !stale
            })
            .await;

        if let Some(cached) = usable {
            if let Some(documents) = self.hydrate(&cached, top_k) {
                debug!(strategy = ?cached.strategy, "Retrieval cache hit");
                return Ok(Retrieval {
                    documents,
                    cache_hit: true,
                    strategy: cached.strategy,
                    query_fingerprint,
                });
            }
        } else if stale {
            warn!("Cached ranking references unknown documents, recomputing");
            self.cache.invalidate(&query_fingerprint).await;
        }

        let depth = top_k.max(self.depth);
        let (strategy, hits) = self.search(&normalized, depth).await;
        let result = RetrievalResult {
            query_fingerprint: query_fingerprint.clone(),
            documents: hits
                .into_iter()
                .map(|h| RetrievedDocument {
                    doc_id: h.doc_id,
                    score: h.score,
                })
                .collect(),
            computed_at: Utc::now(),
            strategy,
            depth,
        };

        let ttl = match strategy {
            RetrievalStrategy::Primary => self.cache.ttl(),
            RetrievalStrategy::Fallback => FALLBACK_RESULT_TTL.min(self.cache.ttl()),
        };
        if let Err(e) = self.cache.set_json_with_ttl(&query_fingerprint, &result, ttl).await {
            warn!(error = %e, "Failed to cache retrieval result");
        }

        let documents = self.hydrate(&result, top_k).unwrap_or_default();
        info!(strategy = ?strategy, results = documents.len(), "Retrieval computed");
        Ok(Retrieval {
            documents,
            cache_hit: false,
            strategy,
            query_fingerprint,
        })
    }

    async fn search(&self, text: &str, depth: usize) -> (RetrievalStrategy, Vec<IndexHit>) {
        if let Some(index) = &self.primary_index {
            match self.primary.embed(text).await {
                Ok(vector) if vector.len() == index.dimension() => {
                    return (RetrievalStrategy::Primary, index.search(&vector, depth));
                }
                Ok(vector) => warn!(
                    expected = index.dimension(),
                    actual = vector.len(),
                    "Primary embedding has wrong dimension, using fallback"
                ),
                Err(e) => warn!(error = %e, "Primary embedding failed, using fallback"),
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.embedding_fallback_total.inc();
        }
        let vector = self.fallback.embed_text(text);
        (RetrievalStrategy::Fallback, self.fallback_index.search(&vector, depth))
    }

    /// Resolve cached ids; `None` if any id is no longer in the knowledge base
    fn hydrate(&self, result: &RetrievalResult, top_k: usize) -> Option<Vec<ScoredDocument>> {
        result
            .documents
            .iter()
            .take(top_k)
            .map(|d| {
                self.knowledge.get(&d.doc_id).map(|doc| ScoredDocument {
                    document: doc.clone(),
                    score: d.score,
                })
            })
            .collect()
    }
}
