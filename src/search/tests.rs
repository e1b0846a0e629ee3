use super::*;
use crate::cache::entry::ManualClock;
use crate::cache::{CacheSettings, CacheStore};
use crate::error::AppError;
use crate::ml::HashingEmbedder;
use crate::testing::{doc, memory_cache, sample_knowledge, SwitchableEmbedder};
use crate::types::RetrievalStrategy;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

async fn retriever_with(embedder: Arc<SwitchableEmbedder>) -> VectorRetriever {
    VectorRetriever::build(sample_knowledge(), embedder, memory_cache("retrieval").await, 3).await
}

#[tokio::test]
async fn test_retrieve_ranks_relevant_document_first() {
    let retriever = retriever_with(Arc::new(SwitchableEmbedder::new(true))).await;
    let retrieval = retriever.retrieve("灭火器怎么用", 3).await.unwrap();

    assert_eq!(retrieval.strategy, RetrievalStrategy::Primary);
    assert!(!retrieval.cache_hit);
    assert_eq!(retrieval.documents.len(), 3);
    assert_eq!(retrieval.documents[0].document.doc_id, "d1");
    assert!(retrieval
        .documents
        .windows(2)
        .all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn test_equivalent_questions_share_cached_ranking() {
    let embedder = Arc::new(SwitchableEmbedder::new(true));
    let retriever = retriever_with(embedder.clone()).await;
    let calls_after_build = embedder.calls.load(Ordering::SeqCst);

    let first = retriever.retrieve("灭火器怎么用", 3).await.unwrap();
    let second = retriever.retrieve("  灭火器怎么用 \u{0007}", 3).await.unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.query_fingerprint, second.query_fingerprint);
    let ids = |r: &crate::types::Retrieval| -> Vec<String> {
        r.documents.iter().map(|d| d.document.doc_id.clone()).collect()
    };
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), calls_after_build + 1);
}

#[tokio::test]
async fn test_empty_question_is_rejected_before_any_work() {
    let embedder = Arc::new(SwitchableEmbedder::new(true));
    let cache = memory_cache("retrieval").await;
    let retriever = VectorRetriever::build(sample_knowledge(), embedder.clone(), cache.clone(), 3).await;
    let calls_after_build = embedder.calls.load(Ordering::SeqCst);

    let err = retriever.retrieve(" \t\u{0001} ", 3).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), calls_after_build);
    assert_eq!(cache.stats().misses, 0);
}

#[tokio::test]
async fn test_zero_top_k_returns_one() {
    let retriever = retriever_with(Arc::new(SwitchableEmbedder::new(true))).await;
    let retrieval = retriever.retrieve("火灾报警", 0).await.unwrap();
    assert_eq!(retrieval.documents.len(), 1);
}

#[tokio::test]
async fn test_fallback_when_model_unavailable() {
    let embedder = Arc::new(SwitchableEmbedder::new(true));
    let retriever = retriever_with(embedder.clone()).await;
    assert!(retriever.primary_status().is_ok());

    embedder.set_available(false);
    let retrieval = retriever.retrieve("灭火器怎么用", 3).await.unwrap();
    assert_eq!(retrieval.strategy, RetrievalStrategy::Fallback);
    assert!(!retrieval.documents.is_empty());
    assert_eq!(retrieval.documents[0].document.doc_id, "d1");

    // A different question goes back to the primary model once it recovers
    embedder.set_available(true);
    let retrieval = retriever.retrieve("如何逃生", 3).await.unwrap();
    assert_eq!(retrieval.strategy, RetrievalStrategy::Primary);
}

#[tokio::test]
async fn test_unavailable_at_startup_uses_fallback_index() {
    let retriever = retriever_with(Arc::new(SwitchableEmbedder::new(false))).await;
    assert!(matches!(retriever.primary_status(), Err(AppError::ModelUnavailable(_))));

    let retrieval = retriever.retrieve("发现火灾怎样报警", 2).await.unwrap();
    assert_eq!(retrieval.strategy, RetrievalStrategy::Fallback);
    assert_eq!(retrieval.documents[0].document.doc_id, "d4");
}

#[tokio::test]
async fn test_deeper_request_recomputes_only_when_needed() {
    let knowledge = Arc::new(
        crate::knowledge::KnowledgeBase::from_documents(
            (0..8)
                .map(|i| doc(&format!("d{}", i), &format!("问题{}", i), "答案", "c"))
                .collect(),
        )
        .unwrap(),
    );
    let embedder = Arc::new(SwitchableEmbedder::new(true));
    let retriever = VectorRetriever::build(knowledge, embedder.clone(), memory_cache("retrieval").await, 3).await;

    let shallow = retriever.retrieve("问题", 2).await.unwrap();
    assert_eq!(shallow.documents.len(), 2);

    // Served from the depth-3 ranking
    let within = retriever.retrieve("问题", 3).await.unwrap();
    assert!(within.cache_hit);
    assert_eq!(within.documents.len(), 3);

    let deeper = retriever.retrieve("问题", 5).await.unwrap();
    assert!(!deeper.cache_hit);
    assert_eq!(deeper.documents.len(), 5);

    let again = retriever.retrieve("问题", 4).await.unwrap();
    assert!(again.cache_hit);
    assert_eq!(again.documents.len(), 4);
}

#[tokio::test]
async fn test_exhaustive_ranking_serves_any_top_k() {
    let retriever = retriever_with(Arc::new(SwitchableEmbedder::new(true))).await;
    retriever.retrieve("灭火器", 10).await.unwrap();

    let retrieval = retriever.retrieve("灭火器", 50).await.unwrap();
    assert!(retrieval.cache_hit);
    assert_eq!(retrieval.documents.len(), 4);
}

#[tokio::test]
async fn test_equal_scores_keep_insertion_order() {
    let knowledge = Arc::new(
        crate::knowledge::KnowledgeBase::from_documents(vec![
            doc("first", "同一个问题", "同一个答案", "c"),
            doc("second", "同一个问题", "同一个答案", "c"),
            doc("third", "同一个问题", "同一个答案", "c"),
        ])
        .unwrap(),
    );
    let retriever = VectorRetriever::build(
        knowledge,
        Arc::new(HashingEmbedder::default()),
        memory_cache("retrieval").await,
        3,
    )
    .await;

    for _ in 0..3 {
        let retrieval = retriever.retrieve("同一个问题", 3).await.unwrap();
        let ids: Vec<&str> = retrieval.documents.iter().map(|d| d.document.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }
}

#[tokio::test]
async fn test_verbatim_document_text_scores_as_exact_match() {
    let knowledge = Arc::new(
        crate::knowledge::KnowledgeBase::from_documents(vec![
            doc("co2", "How to use a CO2 Extinguisher?", "Pull the PIN, aim at the BASE of the fire.", "器材"),
            doc("exit", "Where is the nearest EXIT?", "Follow the green signs.", "逃生"),
        ])
        .unwrap(),
    );
    let verbatim = knowledge.documents()[0].content();

    for available in [true, false] {
        let embedder = Arc::new(SwitchableEmbedder::new(available));
        let retriever = VectorRetriever::build(knowledge.clone(), embedder, memory_cache("retrieval").await, 2).await;
        let retrieval = retriever.retrieve(&verbatim, 1).await.unwrap();

        assert_eq!(retrieval.documents[0].document.doc_id, "co2");
        assert!(
            retrieval.documents[0].score > 0.999,
            "score {} with primary available = {}",
            retrieval.documents[0].score,
            available
        );
    }
}

#[tokio::test]
async fn test_fallback_ranking_expires_before_primary_ranking() {
    let clock = Arc::new(ManualClock::new());
    let cache = Arc::new(
        CacheStore::open_with_clock(CacheSettings::new("retrieval", Duration::from_secs(7200)), clock.clone())
            .await
            .unwrap(),
    );
    let embedder = Arc::new(SwitchableEmbedder::new(true));
    let retriever = VectorRetriever::build(sample_knowledge(), embedder.clone(), cache, 3).await;

    embedder.set_available(false);
    let degraded = retriever.retrieve("灭火器怎么用", 3).await.unwrap();
    assert_eq!(degraded.strategy, RetrievalStrategy::Fallback);

    embedder.set_available(true);
    let cached = retriever.retrieve("灭火器怎么用", 3).await.unwrap();
    assert!(cached.cache_hit);
    assert_eq!(cached.strategy, RetrievalStrategy::Fallback);

    clock.advance(FALLBACK_RESULT_TTL + Duration::from_secs(1));
    let recovered = retriever.retrieve("灭火器怎么用", 3).await.unwrap();
    assert!(!recovered.cache_hit);
    assert_eq!(recovered.strategy, RetrievalStrategy::Primary);

    // Primary rankings keep the full TTL
    clock.advance(FALLBACK_RESULT_TTL + Duration::from_secs(1));
    let still_cached = retriever.retrieve("灭火器怎么用", 3).await.unwrap();
    assert!(still_cached.cache_hit);
    assert_eq!(still_cached.strategy, RetrievalStrategy::Primary);
}

#[tokio::test]
async fn test_too_shallow_ranking_is_counted_as_miss() {
    let cache = memory_cache("retrieval").await;
    let retriever = VectorRetriever::build(sample_knowledge(), Arc::new(SwitchableEmbedder::new(true)), cache.clone(), 2).await;

    let first = retriever.retrieve("灭火器怎么用", 1).await.unwrap();
    assert!(!first.cache_hit);
    let deeper = retriever.retrieve("灭火器怎么用", 3).await.unwrap();
    assert!(!deeper.cache_hit);
    assert_eq!(deeper.documents.len(), 3);

    let stats = cache.stats();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 2);

    let served = retriever.retrieve("灭火器怎么用", 2).await.unwrap();
    assert!(served.cache_hit);
    assert_eq!(cache.stats().hits, 1);
}
