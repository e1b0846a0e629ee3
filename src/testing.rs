//! Shared fixtures and scripted collaborators for unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::{CacheSettings, CacheStore};
use crate::knowledge::{KnowledgeBase, KnowledgeDocument};
use crate::llm::{GenerationError, LanguageModel};
use crate::ml::{EmbeddingError, EmbeddingModel, HashingEmbedder};

pub fn doc(doc_id: &str, question: &str, answer: &str, category: &str) -> KnowledgeDocument {
    KnowledgeDocument {
        doc_id: doc_id.to_string(),
        question: question.to_string(),
        answer: answer.to_string(),
        category: category.to_string(),
    }
}

/// Small fire-safety corpus; d1 is the extinguisher document
pub fn sample_knowledge() -> Arc<KnowledgeBase> {
    Arc::new(
        KnowledgeBase::from_documents(vec![
            doc("d1", "灭火器的使用方法", "拔掉保险销，握住喷管对准火焰根部，用力压下压把。", "器材"),
            doc("d2", "火灾发生时如何逃生", "保持冷静，用湿毛巾捂住口鼻，低姿沿疏散通道撤离。", "逃生"),
            doc("d3", "家庭电器如何预防火灾", "定期检查线路，不超负荷用电，外出关闭电源。", "预防"),
            doc("d4", "发现火灾怎样报警", "立即拨打119，说明详细地址和火势情况。", "报警"),
        ])
        .unwrap(),
    )
}

pub async fn memory_cache(name: &str) -> Arc<CacheStore> {
    Arc::new(
        CacheStore::open(CacheSettings::new(name, Duration::from_secs(3600)))
            .await
            .unwrap(),
    )
}

/// Embedder that can be switched off
pub struct SwitchableEmbedder {
    inner: HashingEmbedder,
    available: AtomicBool,
    pub calls: AtomicUsize,
}

impl SwitchableEmbedder {
    pub fn new(available: bool) -> Self {
        Self {
            inner: HashingEmbedder::default(),
            available: AtomicBool::new(available),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingModel for SwitchableEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(EmbeddingError::ModelUnavailable("switched off".to_string()));
        }
        self.inner.embed(text).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        "switchable"
    }
}

/// Language model with a fixed latency and an injectable failure
pub struct ScriptedLlm {
    latency: Duration,
    failure: Mutex<Option<GenerationError>>,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_with(&self, error: Option<GenerationError>) {
        *self.failure.lock().unwrap() = error;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn generate(&self, prompt: &str, _timeout: Duration) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        tokio::time::sleep(self.latency).await;

        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(format!("answer #{}", self.call_count()))
    }

    fn backend_name(&self) -> &str {
        "scripted"
    }
}
