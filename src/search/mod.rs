/// Knowledge base retrieval
///
/// `VectorRetriever` embeds questions, searches the document indexes and
/// caches rankings per normalized question.

pub mod retriever;

#[cfg(test)]
mod tests;

pub use retriever::{VectorRetriever, FALLBACK_RESULT_TTL};
