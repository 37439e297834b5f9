use crate::budget::BudgetGuard;
use conductor_core::{
    summarize::extract_leading, AgentContext, FileReference, Message, Subtask, SubtaskResult,
    Summarizer, SummaryLevel, TokenCounter,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Metadata key holding the one-message history summary.
pub const HISTORY_SUMMARY_KEY: &str = "history_summary";
/// Metadata key holding the digest of prior subtask results.
pub const PRIOR_RESULTS_KEY: &str = "prior_results_summary";
/// Metadata key prefix for raw prior results, followed by the subtask id.
pub const PRIOR_RESULT_PREFIX: &str = "prior_result.";

/// Words of `text` longer than three characters, lowercased.
pub fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3)
        .map(str::to_lowercase)
        .collect()
}

fn shares_keyword(text: &str, wanted: &BTreeSet<String>) -> bool {
    keywords(text).iter().any(|w| wanted.contains(w))
}

fn file_relevance(file: &FileReference, wanted: &BTreeSet<String>, description: &str) -> u8 {
    let name = file.name.to_lowercase();
    let by_name = wanted.iter().any(|w| name.contains(w.as_str()));
    let by_extension = file.extension().is_some_and(|ext| {
        description
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .any(|w| w == ext)
    });
    u8::from(by_name) + u8::from(by_extension)
}

/// Builds the isolated context each subtask runs against.
///
/// The shared context is never handed out; every subtask gets a derived
/// copy holding a history summary, relevance-ordered files, a digest of
/// prior results, related tool results and the user's preferences, fitted
/// to the subtask budget by a [`BudgetGuard`].
#[derive(Clone)]
pub struct ContextAssembler {
    summarizer: Arc<dyn Summarizer>,
    guard: BudgetGuard,
}

impl ContextAssembler {
    pub fn new(counter: Arc<dyn TokenCounter>, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            guard: BudgetGuard::new(counter, summarizer.clone()),
            summarizer,
        }
    }

    pub fn guard(&self) -> &BudgetGuard {
        &self.guard
    }

    /// Build the context for `subtask` from `base` and the results so far.
    pub async fn build(
        &self,
        subtask: &Subtask,
        base: &AgentContext,
        prior_results: &[SubtaskResult],
        budget: usize,
    ) -> AgentContext {
        let wanted = keywords(&subtask.description);
        let mut context = AgentContext::new();
        context
            .metadata
            .insert("subtask_id".into(), Value::String(subtask.id.clone()));

        if !base.conversation_history.is_empty() {
            let summary = self.history_summary(&base.conversation_history).await;
            if !summary.is_empty() {
                context.conversation_history =
                    vec![Message::system(format!("Conversation so far: {summary}"))];
                context
                    .metadata
                    .insert(HISTORY_SUMMARY_KEY.into(), Value::String(summary));
            }
        }

        let mut files: Vec<(u8, &FileReference)> = base
            .file_references
            .iter()
            .map(|f| (file_relevance(f, &wanted, &subtask.description), f))
            .collect();
        // Stable: equally relevant files keep their original order.
        files.sort_by_key(|(score, _)| std::cmp::Reverse(*score));
        context.file_references = files.into_iter().map(|(_, f)| f.clone()).collect();

        if !prior_results.is_empty() {
            let digest = self.results_digest(prior_results).await;
            context
                .metadata
                .insert(PRIOR_RESULTS_KEY.into(), Value::String(digest));
            for result in prior_results {
                context.metadata.insert(
                    format!("{PRIOR_RESULT_PREFIX}{}", result.subtask_id),
                    Value::String(result.content.clone()),
                );
            }
        }

        context.tool_results = base
            .tool_results
            .iter()
            .filter(|(key, value)| {
                key.contains("recent")
                    || key.contains("_result")
                    || shares_keyword(key, &wanted)
                    || shares_keyword(value, &wanted)
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<BTreeMap<_, _>>();

        context.user_preferences = base.user_preferences.clone();

        debug!(
            subtask_id = %subtask.id,
            files = context.file_references.len(),
            tool_results = context.tool_results.len(),
            prior_results = prior_results.len(),
            budget,
            "Assembled isolated context"
        );
        self.guard.enforce(context, budget).await
    }

    async fn history_summary(&self, history: &[Message]) -> String {
        match self
            .summarizer
            .summarize_messages(history, SummaryLevel::Medium)
            .await
        {
            Ok(summary) => summary.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "History summarization failed; using leading sentences");
                let joined = history
                    .iter()
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                extract_leading(&joined, SummaryLevel::Medium)
            }
        }
    }

    async fn results_digest(&self, results: &[SubtaskResult]) -> String {
        let mut lines = Vec::with_capacity(results.len());
        for result in results {
            let summary = match self
                .summarizer
                .summarize(&result.content, SummaryLevel::Light)
                .await
            {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(subtask_id = %result.subtask_id, error = %e, "Result summarization failed");
                    extract_leading(&result.content, SummaryLevel::Light)
                }
            };
            lines.push(format!("[{}] {}", result.subtask_id, summary.trim()));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_core::{ExtractiveSummarizer, HeuristicTokenCounter, Role};

    fn assembler() -> ContextAssembler {
        ContextAssembler::new(Arc::new(HeuristicTokenCounter), Arc::new(ExtractiveSummarizer))
    }

    fn result(id: &str, content: &str) -> SubtaskResult {
        SubtaskResult {
            subtask_id: id.into(),
            agent_id: "agent".into(),
            content: content.into(),
            tool_calls: Vec::new(),
            context_update: None,
            attempts: Vec::new(),
            tokens_used: 0,
            duration_ms: 0,
        }
    }

    fn base() -> AgentContext {
        AgentContext::new()
            .with_history(vec![
                Message::user("I want to visit Paris in spring. Budget is tight."),
                Message::assistant("Great, I can help plan that."),
            ])
            .with_file(FileReference::new("notes.md", "/tmp/notes.md"))
            .with_file(FileReference::new("hotels.csv", "/tmp/hotels.csv"))
            .with_tool_result("weather_lookup", "Sunny in Paris")
            .with_tool_result("search_result_1", "Flights from 80 EUR")
            .with_tool_result("unrelated", "Nothing to see")
            .with_preference("currency", "EUR")
    }

    #[tokio::test]
    async fn test_build_isolates_and_filters() {
        let subtask = Subtask::new("s2", "Compare hotels in Paris from the csv");
        let shared = base();
        let ctx = assembler()
            .build(&subtask, &shared, &[result("s1", "Found three hotels. Details follow.")], 2000)
            .await;

        assert_eq!(ctx.conversation_history.len(), 1);
        assert_eq!(ctx.conversation_history[0].role, Role::System);
        assert_eq!(ctx.file_references[0].name, "hotels.csv");
        assert_eq!(ctx.file_references.len(), 2);
        assert!(ctx.tool_results.contains_key("weather_lookup"));
        assert!(ctx.tool_results.contains_key("search_result_1"));
        assert!(!ctx.tool_results.contains_key("unrelated"));
        assert_eq!(ctx.user_preferences["currency"], "EUR");
        assert_eq!(
            ctx.metadata["prior_result.s1"],
            Value::String("Found three hotels. Details follow.".into())
        );
        assert!(ctx.metadata[PRIOR_RESULTS_KEY]
            .as_str()
            .unwrap()
            .starts_with("[s1]"));
        // the shared context is left alone
        assert_eq!(shared.conversation_history.len(), 2);
        assert_eq!(shared.tool_results.len(), 3);
    }

    #[tokio::test]
    async fn test_zero_budget_is_valid() {
        let subtask = Subtask::new("s1", "Anything at all here");
        let ctx = assembler().build(&subtask, &base(), &[], 0).await;
        assert!(ctx.conversation_history.is_empty());
        assert!(ctx.file_references.is_empty());
        assert!(ctx.tool_results.is_empty());
        assert_eq!(ctx.metadata["subtask_id"], Value::String("s1".into()));
    }

    #[test]
    fn test_keywords() {
        let words = keywords("Find the best hotels in Paris!");
        assert!(words.contains("hotels"));
        assert!(words.contains("paris"));
        assert!(!words.contains("the"));
        assert!(!words.contains("in"));
    }
}
