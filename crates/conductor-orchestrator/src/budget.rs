use conductor_core::{AgentContext, Message, Summarizer, SummaryLevel, TokenCounter};
use std::sync::Arc;
use tracing::{debug, warn};

/// Tokens reserved per kept file reference.
pub const TOKENS_PER_FILE: usize = 50;
/// Tokens reserved per kept tool result.
pub const TOKENS_PER_TOOL_RESULT: usize = 100;

/// Fits an [`AgentContext`] into a token budget by summarizing and truncating.
///
/// Never fails: the worst case is an empty context.
#[derive(Clone)]
pub struct BudgetGuard {
    counter: Arc<dyn TokenCounter>,
    summarizer: Arc<dyn Summarizer>,
}

impl BudgetGuard {
    pub fn new(counter: Arc<dyn TokenCounter>, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            counter,
            summarizer,
        }
    }

    /// Fit `context` into `budget` tokens.
    ///
    /// History above half the budget is replaced by one summary message, or
    /// by the most recent messages that fit half the budget when the summary
    /// does not fit. Files are then capped at one per [`TOKENS_PER_FILE`]
    /// remaining tokens, and tool results at one per
    /// [`TOKENS_PER_TOOL_RESULT`], keeping the lexicographically first keys.
    pub async fn enforce(&self, mut context: AgentContext, budget: usize) -> AgentContext {
        let half = budget / 2;
        let history_tokens = self.counter.count_messages(&context.conversation_history);
        if history_tokens > half {
            context.conversation_history = self
                .shrink_history(std::mem::take(&mut context.conversation_history), budget)
                .await;
        }

        let used = self.counter.count_messages(&context.conversation_history);
        let remaining = budget.saturating_sub(used);
        let max_files = remaining / TOKENS_PER_FILE;
        if context.file_references.len() > max_files {
            debug!(
                kept = max_files,
                dropped = context.file_references.len() - max_files,
                "Capping file references"
            );
            context.file_references.truncate(max_files);
        }

        let file_tokens: usize = context
            .file_references
            .iter()
            .map(|f| self.counter.count(&f.name) + self.counter.count(&f.path))
            .sum();
        let remaining = remaining.saturating_sub(file_tokens);
        let max_results = remaining / TOKENS_PER_TOOL_RESULT;
        if context.tool_results.len() > max_results {
            debug!(
                kept = max_results,
                dropped = context.tool_results.len() - max_results,
                "Capping tool results"
            );
            context.tool_results = std::mem::take(&mut context.tool_results)
                .into_iter()
                .take(max_results)
                .collect();
        }
        context
    }

    async fn shrink_history(&self, history: Vec<Message>, budget: usize) -> Vec<Message> {
        match self
            .summarizer
            .summarize_messages(&history, SummaryLevel::Heavy)
            .await
        {
            Ok(summary) if !summary.trim().is_empty() => {
                let message = vec![Message::system(format!(
                    "Summary of the earlier conversation: {}",
                    summary.trim()
                ))];
                if self.counter.count_messages(&message) <= budget {
                    return message;
                }
                debug!(budget, "History summary does not fit; keeping recent messages");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "History summarization failed; keeping recent messages"),
        }
        self.most_recent(history, budget / 2)
    }

    /// The newest messages whose combined count stays within `limit`.
    fn most_recent(&self, history: Vec<Message>, limit: usize) -> Vec<Message> {
        let mut kept: Vec<Message> = Vec::new();
        let mut used = 0;
        for message in history.into_iter().rev() {
            let cost = self.counter.count_messages(std::slice::from_ref(&message));
            if used + cost > limit {
                break;
            }
            used += cost;
            kept.push(message);
        }
        kept.reverse();
        kept
    }
}
