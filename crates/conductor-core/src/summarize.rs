use crate::error::ConductorResult;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How aggressively a summary should compress its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryLevel {
    Light,
    Medium,
    Heavy,
}

impl SummaryLevel {
    fn limits(self) -> (usize, usize) {
        // (max sentences, max chars)
        match self {
            SummaryLevel::Light => (3, 400),
            SummaryLevel::Medium => (2, 240),
            SummaryLevel::Heavy => (1, 160),
        }
    }
}

/// Condenses text or conversation history. Implementations may call a model.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str, level: SummaryLevel) -> ConductorResult<String>;

    async fn summarize_messages(
        &self,
        messages: &[Message],
        level: SummaryLevel,
    ) -> ConductorResult<String> {
        let joined = messages
            .iter()
            .map(|m| m.content.trim())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        self.summarize(&joined, level).await
    }
}

/// Summarizer that keeps the leading sentences of its input.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveSummarizer;

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, text: &str, level: SummaryLevel) -> ConductorResult<String> {
        Ok(extract_leading(text, level))
    }
}

/// Leading sentences of `text`, capped by the level's sentence and char limits.
pub fn extract_leading(text: &str, level: SummaryLevel) -> String {
    let (max_sentences, max_chars) = level.limits();
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut summary = String::new();
    let mut taken = 0;
    let mut start = 0;
    for (idx, ch) in normalized.char_indices() {
        if matches!(ch, '.' | '!' | '?') {
            let end = idx + ch.len_utf8();
            let sentence = normalized[start..end].trim();
            if !sentence.is_empty() {
                if !summary.is_empty() {
                    summary.push(' ');
                }
                summary.push_str(sentence);
                taken += 1;
            }
            start = end;
            if taken == max_sentences {
                break;
            }
        }
    }
    if taken < max_sentences {
        let rest = normalized[start..].trim();
        if !rest.is_empty() {
            if !summary.is_empty() {
                summary.push(' ');
            }
            summary.push_str(rest);
        }
    }

    if summary.chars().count() > max_chars {
        let cut: String = summary.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut.trim_end())
    } else {
        summary
    }
}
