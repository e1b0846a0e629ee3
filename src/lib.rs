pub mod answer;
pub mod cache;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod ml;
pub mod observability;
pub mod search;
pub mod server;
pub mod types;

#[cfg(test)]
mod testing;

pub use answer::{AnswerService, AnswerSettings};
pub use cache::{CacheAdmin, CacheSettings, CacheStats, CacheStore};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use knowledge::{KnowledgeBase, KnowledgeDocument};
pub use search::VectorRetriever;
pub use server::{AnswerServer, AppState};
pub use types::*;
