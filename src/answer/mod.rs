/// Question answering over the knowledge base
///
/// `AnswerService` ties retrieval, prompt construction and generation together
/// behind the answer cache.

pub mod prompt;
pub mod service;


pub use prompt::{Prompt, PromptBuilder};
pub use service::{AnswerService, AnswerSettings};
