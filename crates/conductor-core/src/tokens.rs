use crate::message::Message;

/// Counts tokens for budget decisions.
///
/// The engine only consumes counts; plug in a real tokenizer for the model
/// the agents use when exact numbers matter.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// Tokens for a message list, including a small per-message overhead.
    fn count_messages(&self, messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|m| self.count(&m.content) + MESSAGE_OVERHEAD)
            .sum()
    }
}

const MESSAGE_OVERHEAD: usize = 4;

/// Rough token estimation (4 chars ≈ 1 token).
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_count() {
        let counter = HeuristicTokenCounter;
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("abcd"), 1);
        assert_eq!(counter.count("abcde"), 2);
    }

    #[test]
    fn test_count_messages_adds_overhead() {
        let counter = HeuristicTokenCounter;
        let messages = vec![Message::user("abcd"), Message::assistant("abcdefgh")];
        assert_eq!(counter.count_messages(&messages), 1 + 4 + 2 + 4);
    }
}
