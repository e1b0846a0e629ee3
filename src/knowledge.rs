//! Knowledge base of curated question/answer pairs, loaded once at startup

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AppError, AppResult};

const DEFAULT_CATEGORY: &str = "未知";

/// Immutable knowledge base entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub doc_id: String,
    pub question: String,
    pub answer: String,
    pub category: String,
}

impl KnowledgeDocument {
    /// Text that gets embedded and quoted in prompts
    pub fn content(&self) -> String {
        format!("问题：{}\n答案：{}", self.question, self.answer)
    }
}

/// Record as stored in the JSON file
#[derive(Debug, Deserialize)]
struct RawDocument {
    question: String,
    answer: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    doc_id: Option<String>,
}

/// Summary of the loaded corpus
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeStatistics {
    pub total: usize,
    pub categories: BTreeMap<String, usize>,
    /// Mean answer length in characters
    pub avg_answer_length: f64,
}

/// Ordered, immutable document collection
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    documents: Vec<KnowledgeDocument>,
    positions: HashMap<String, usize>,
}

impl KnowledgeBase {
    /// Load a JSON array of `{ question, answer, category?, doc_id? }`
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Cannot read knowledge base {}: {}", path.display(), e))
        })?;
        let records: Vec<RawDocument> = serde_json::from_str(&raw)?;

        let documents = records
            .into_iter()
            .enumerate()
            .map(|(i, r)| KnowledgeDocument {
                doc_id: r.doc_id.unwrap_or_else(|| format!("qa_{}", i)),
                question: r.question,
                answer: r.answer,
                category: r.category.unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            })
            .collect();

        let kb = Self::from_documents(documents)?;
        info!(path = %path.display(), documents = kb.len(), "Knowledge base loaded");
        Ok(kb)
    }

    /// Build from documents in order; doc ids must be unique
    pub fn from_documents(documents: Vec<KnowledgeDocument>) -> AppResult<Self> {
        let mut positions = HashMap::with_capacity(documents.len());
        for (i, doc) in documents.iter().enumerate() {
            if positions.insert(doc.doc_id.clone(), i).is_some() {
                return Err(AppError::ConfigError(format!("Duplicate document id: {}", doc.doc_id)));
            }
        }
        Ok(Self { documents, positions })
    }

    pub fn get(&self, doc_id: &str) -> Option<&KnowledgeDocument> {
        self.positions.get(doc_id).map(|&i| &self.documents[i])
    }

    pub fn documents(&self) -> &[KnowledgeDocument] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }


    pub fn statistics(&self) -> KnowledgeStatistics {
        let mut categories = BTreeMap::new();
        for doc in &self.documents {
            *categories.entry(doc.category.clone()).or_insert(0) += 1;
        }

        let avg_answer_length = if self.documents.is_empty() {
            0.0
        } else {
            let total: usize = self.documents.iter().map(|d| d.answer.chars().count()).sum();
            total as f64 / self.documents.len() as f64
        };

        KnowledgeStatistics {
            total: self.documents.len(),
            categories,
            avg_answer_length,
        }
    }
}
