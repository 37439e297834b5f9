//! Rejection rules for lines that describe a decomposition rather than a task.

use super::pattern;
use regex::Regex;
use std::sync::LazyLock;

/// Candidates shorter than this are never real subtasks.
pub const MIN_DESCRIPTION_CHARS: usize = 15;

static BOLD_LABEL: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"^[-*+•\s]*\*\*[^*\n]{1,60}?(?::\*\*|\*\*\s*:)"));

static NUMBERED_BOLD: LazyLock<Regex> = LazyLock::new(|| pattern(r"^\d+[.)]\s*\*\*"));

const BOILERPLATE: &[&str] = &[
    "this breakdown",
    "this decomposition",
    "this approach ensures",
    "this plan ensures",
    "this structure ensures",
    "here is the breakdown",
    "here's the breakdown",
    "here is how",
    "here's how",
    "the following subtasks",
    "breaking this down",
    "by breaking",
    "in summary",
    "to summarize",
    "let me know if",
];

/// True when `candidate` is formatting, a field label or boilerplate.
pub fn is_metadata(candidate: &str) -> bool {
    let trimmed = candidate.trim();
    if trimmed.chars().count() < MIN_DESCRIPTION_CHARS {
        return true;
    }
    if BOLD_LABEL.is_match(trimmed) || NUMBERED_BOLD.is_match(trimmed) {
        return true;
    }
    let lower = trimmed.to_lowercase();
    BOILERPLATE.iter().any(|phrase| lower.contains(phrase))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_short_strings_rejected() {
        assert!(is_metadata("Do it"));
        assert!(is_metadata("   tiny task   "));
        assert!(!is_metadata("Search the web for flights to Paris"));
    }

    #[test]
    fn test_bold_labels_rejected() {
        assert!(is_metadata("**Agent:** WebSearchAgent for everything"));
        assert!(is_metadata("- **Dependencies**: Subtask 1 must finish"));
        assert!(is_metadata("1. **Research** the market in detail"));
    }

    #[test]
    fn test_boilerplate_rejected() {
        assert!(is_metadata("This breakdown ensures every part is covered."));
        assert!(is_metadata("Here's how the work can be split up:"));
        assert!(!is_metadata("Compare hotel prices near the Louvre"));
    }
}
