use std::time::Duration;

use async_trait::async_trait;

use super::{GenerationError, LanguageModel};
use crate::answer::prompt::QUESTION_MARKER;

/// Rule-based backend for deployments without an API key.
///
/// Picks a canned answer by keyword from the question section of the prompt,
/// or quotes the first grounding document when no rule matches.
#[derive(Debug, Default, Clone)]
pub struct KeywordResponder;

const RULES: &[(&[&str], &str)] = &[
    (
        &["灭火器"],
        "灭火器应放置在明显且易于取用的位置，定期检查压力表，确保在有效期内。使用时拔掉保险销，对准火焰根部，压下压把。",
    ),
    (
        &["逃生", "疏散"],
        "火灾逃生时应保持冷静，用湿毛巾捂住口鼻，低姿前进，按照疏散指示标志撤离，不要乘坐电梯。",
    ),
    (
        &["预防"],
        "火灾预防包括定期检查电器线路、不乱扔烟头、不堵塞消防通道、配备灭火器材等措施。",
    ),
    (
        &["报警"],
        "发现火灾应立即拨打119报警，说明详细地址、火势情况和人员被困情况。",
    ),
];

const NO_MATCH: &str = "建议您遵循标准的火灾预防和安全操作规程，关注电器安全和用火管理。";

impl KeywordResponder {
    pub fn new() -> Self {
        Self
    }

    fn question_section(prompt: &str) -> &str {
        match prompt.split_once(QUESTION_MARKER) {
            Some((_, rest)) => rest.split("\n\n").next().unwrap_or(rest).trim(),
            None => prompt.trim(),
        }
    }

    /// First quoted document line of the prompt's context section
    fn first_context_line(prompt: &str) -> Option<&str> {
        let context = prompt.split(QUESTION_MARKER).next()?;
        context
            .lines()
            .find_map(|line| line.strip_prefix("- "))
            .map(str::trim)
            .filter(|line| !line.is_empty())
    }

    pub fn respond(&self, prompt: &str) -> String {
        let question = Self::question_section(prompt);
        for (keywords, answer) in RULES {
            if keywords.iter().any(|k| question.contains(k)) {
                return answer.to_string();
            }
        }
        match Self::first_context_line(prompt) {
            Some(line) => format!("根据相关文档：{}", line),
            None => NO_MATCH.to_string(),
        }
    }
}

#[async_trait]
impl LanguageModel for KeywordResponder {
    async fn generate(&self, prompt: &str, _timeout: Duration) -> Result<String, GenerationError> {
        Ok(self.respond(prompt))
    }

    fn backend_name(&self) -> &str {
        "keyword-rules"
    }
}
