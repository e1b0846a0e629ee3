use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

/// Embedding backend failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbeddingError {
    /// Backend cannot serve requests (not loaded, crashed, unreachable)
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    /// Backend answered with something unusable
    #[error("invalid embedding output: {0}")]
    InvalidOutput(String),
}

/// Text to vector model
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Length of every vector `embed` returns
    fn dimension(&self) -> usize;

    /// Name for logs and health reports
    fn model_name(&self) -> &str;
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Adds a signed unit to the bucket chosen by the feature's hash
fn accumulate(vector: &mut [f32], feature: &str, weight: f32) {
    let hash = farmhash::hash64(feature.as_bytes());
    let bucket = (hash % vector.len() as u64) as usize;
    let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
    vector[bucket] += sign * weight;
}

/// Deterministic feature-hashing embedder used as the primary model.
///
/// Words (whitespace separated) and individual characters are hashed into
/// `dimension` buckets and the result is normalized to unit length.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl EmbeddingModel for HashingEmbedder {
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut embedding = vec![0.0f32; self.dimension];

        for word in text.split_whitespace() {
            accumulate(&mut embedding, &format!("w:{}", word), 1.0);
        }
        let mut buf = [0u8; 4];
        for ch in text.chars().filter(|c| !c.is_whitespace()) {
            accumulate(&mut embedding, ch.encode_utf8(&mut buf), 1.0);
        }

        l2_normalize(&mut embedding);
        debug!("Generated embedding with {} dimensions", embedding.len());
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hashing-embedder"
    }
}

/// Character n-gram embedder used when the primary model is unavailable.
///
/// Needs no external resources, so it cannot fail.
#[derive(Debug, Clone)]
pub struct NgramEmbedder {
    dimension: usize,
}

impl NgramEmbedder {
    pub const DEFAULT_DIMENSION: usize = 256;

    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();

        for ch in &chars {
            accumulate(&mut embedding, &ch.to_string(), 1.0);
        }
        for pair in chars.windows(2) {
            let bigram: String = pair.iter().collect();
            accumulate(&mut embedding, &bigram, 1.5);
        }

        l2_normalize(&mut embedding);
        embedding
    }
}

impl Default for NgramEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingModel for NgramEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_text(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "char-ngram"
    }
}
