/// Embedding and similarity search
///
/// This module contains:
/// - Question normalization and fingerprinting
/// - The `EmbeddingModel` contract with the primary and fallback embedders
/// - The `VectorIndex` contract with a brute-force cosine index

pub mod embedding;
pub mod index;
pub mod normalize;

pub use embedding::{EmbeddingError, EmbeddingModel, HashingEmbedder, NgramEmbedder};
pub use index::{cosine_similarity, FlatIndex, IndexHit, VectorIndex};
pub use normalize::{fingerprint, normalize_question};
