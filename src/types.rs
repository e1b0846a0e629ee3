use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::knowledge::KnowledgeDocument;

/// Question submitted to the answer endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    /// Natural language question
    pub question: String,
    /// Optional generation timeout overriding the configured default
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Embedding strategy that produced a retrieval result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Primary embedding model over the primary index
    Primary,
    /// Character n-gram hashing over the fallback index
    Fallback,
}

/// How the prompt for an answer was grounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStrategy {
    /// Strong match: answer from the top documents
    DocumentBased,
    /// Partial match: document plus general expertise
    Hybrid,
    /// Weak match: general expertise only
    General,
    /// Retrieval disabled: question-only prompt
    Direct,
}

impl AnswerStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerStrategy::DocumentBased => "document_based",
            AnswerStrategy::Hybrid => "hybrid",
            AnswerStrategy::General => "general",
            AnswerStrategy::Direct => "direct",
        }
    }
}

/// Cached record of one retrieval: document ids only, rehydrated on read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Fingerprint of the normalized question
    pub query_fingerprint: String,
    /// Ranked (doc_id, score) pairs
    pub documents: Vec<RetrievedDocument>,
    /// When the ranking was computed
    pub computed_at: DateTime<Utc>,
    /// Strategy used to embed the query
    pub strategy: RetrievalStrategy,
    /// Number of candidates requested when computed
    pub depth: usize,
}

/// Ranked entry of a cached retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub doc_id: String,
    pub score: f32,
}

impl RetrievalResult {
    /// A cached ranking serves `top_k` when it is deep enough or covered the whole corpus
    pub fn covers(&self, top_k: usize) -> bool {
        self.documents.len() >= top_k || self.documents.len() < self.depth
    }
}

/// Knowledge document with its similarity to the query
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub document: KnowledgeDocument,
    pub score: f32,
}

/// Outcome of a retrieval call
#[derive(Debug, Clone)]
pub struct Retrieval {
    /// Ranked documents, best first
    pub documents: Vec<ScoredDocument>,
    /// Served from the retrieval cache
    pub cache_hit: bool,
    /// Strategy that produced the ranking
    pub strategy: RetrievalStrategy,
    /// Fingerprint of the normalized question
    pub query_fingerprint: String,
}

impl Retrieval {
    /// Best similarity score, 0.0 when nothing was retrieved
    pub fn max_score(&self) -> f32 {
        self.documents.first().map(|d| d.score).unwrap_or(0.0)
    }
}

/// Reference to a document that grounded an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReference {
    pub doc_id: String,
    pub question: String,
    pub category: String,
    pub score: f32,
}

impl From<&ScoredDocument> for DocumentReference {
    fn from(scored: &ScoredDocument) -> Self {
        DocumentReference {
            doc_id: scored.document.doc_id.clone(),
            question: scored.document.question.clone(),
            category: scored.document.category.clone(),
            score: scored.score,
        }
    }
}

/// Answer returned to callers and stored in the answer cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    /// Fingerprint of the normalized question
    pub question_fingerprint: String,
    /// Question as asked
    pub question: String,
    /// Generated answer text
    pub answer: String,
    /// Documents used to ground the answer
    pub relevant_docs: Vec<DocumentReference>,
    /// When the answer was generated
    pub generated_at: DateTime<Utc>,
    /// Wall-clock time spent serving this call
    pub processing_time_ms: f64,
    /// Served from the answer cache
    pub cache_hit: bool,
    /// Retrieval grounded the prompt
    pub rag_used: bool,
    /// Prompt strategy used
    pub strategy: AnswerStrategy,
}
