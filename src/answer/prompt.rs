use crate::types::{AnswerStrategy, Retrieval, ScoredDocument};

/// Precedes the user's question in every prompt
pub const QUESTION_MARKER: &str = "用户问题：";

const PERSONA: &str = "你是一个专业的火灾预防安全专家。";
const CLOSING: &str = "请给出专业、简洁的回答，使用中文：";
const GENERAL_GUIDANCE: &str = "请基于您的专业知识回答这个问题。";

/// Score above which answers lean on the documents alone
pub const DOCUMENT_THRESHOLD: f32 = 0.6;
/// Score above which documents are offered alongside general expertise
pub const HYBRID_THRESHOLD: f32 = 0.3;

/// Rendered prompt with the strategy that shaped it
#[derive(Debug, Clone)]
pub struct Prompt {
    pub text: String,
    pub strategy: AnswerStrategy,
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Picks a grounding strategy from retrieval scores and renders the prompt
#[derive(Debug, Default, Clone)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn strategy_for(&self, retrieval: &Retrieval) -> AnswerStrategy {
        let max_score = retrieval.max_score();

        if retrieval.documents.is_empty() {
            AnswerStrategy::General
        } else if max_score > DOCUMENT_THRESHOLD {
            AnswerStrategy::DocumentBased
        } else if max_score > HYBRID_THRESHOLD {
            AnswerStrategy::Hybrid
        } else {
            AnswerStrategy::General
        }
    }

    /// Prompt grounded in retrieved documents
    pub fn grounded(&self, question: &str, retrieval: &Retrieval) -> Prompt {
        let strategy = self.strategy_for(retrieval);
        let documents = &retrieval.documents;
        let (context, guidance) = match strategy {
            AnswerStrategy::DocumentBased => (
                Self::context("基于以下相关文档内容：", documents, 2, 300),
                "请主要基于提供的文档内容给出专业回答。",
            ),
            AnswerStrategy::Hybrid => (
                Self::context("以下文档可能与问题相关：", documents, 1, 200),
                "请结合文档内容和您的专业知识回答。",
            ),
            _ if documents.is_empty() => ("知识库中没有找到相关文档。".to_string(), GENERAL_GUIDANCE),
            _ => ("知识库中没有找到高度相关的文档。".to_string(), GENERAL_GUIDANCE),
        };
        Prompt {
            text: Self::render(Some(&context), question, guidance),
            strategy,
        }
    }

    /// Question-only prompt used when retrieval is disabled
    pub fn direct(&self, question: &str) -> Prompt {
        Prompt {
            text: Self::render(None, question, GENERAL_GUIDANCE),
            strategy: AnswerStrategy::Direct,
        }
    }

    fn context(header: &str, documents: &[ScoredDocument], take: usize, max_chars: usize) -> String {
        let mut section = header.to_string();
        for doc in documents.iter().take(take) {
            section.push_str("\n- ");
            section.push_str(&excerpt(&doc.document.content(), max_chars));
        }
        section
    }

    fn render(context: Option<&str>, question: &str, guidance: &str) -> String {
        let mut text = format!("{}\n\n", PERSONA);
        if let Some(context) = context {
            text.push_str(context);
            text.push_str("\n\n");
        }
        text.push_str(&format!("{}{}\n\n{}\n\n{}\n", QUESTION_MARKER, question.trim(), guidance, CLOSING));
        text
    }
}
