use std::cmp::Ordering;

/// One match from a vector index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub doc_id: String,
    pub score: f32,
}

/// Nearest-neighbour search over document vectors.
///
/// Results are ordered by descending score; equal scores keep insertion order.
pub trait VectorIndex: Send + Sync {
    fn search(&self, query: &[f32], top_k: usize) -> Vec<IndexHit>;

    fn dimension(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Brute-force cosine index
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    entries: Vec<(String, Vec<f32>)>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: Vec::new(),
        }
    }

    /// Append a vector; vectors of the wrong dimension are rejected
    pub fn add(&mut self, doc_id: impl Into<String>, vector: Vec<f32>) -> bool {
        if vector.len() != self.dimension {
            return false;
        }
        self.entries.push((doc_id.into(), vector));
        true
    }
}

impl VectorIndex for FlatIndex {
    fn search(&self, query: &[f32], top_k: usize) -> Vec<IndexHit> {
        if query.len() != self.dimension || top_k == 0 {
            return Vec::new();
        }

        let mut hits: Vec<IndexHit> = self
            .entries
            .iter()
            .map(|(doc_id, vector)| IndexHit {
                doc_id: doc_id.clone(),
                score: cosine_similarity(query, vector),
            })
            .collect();

        // Stable sort keeps insertion order among equal scores
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(top_k);
        hits
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
