use crate::parser::pattern;
use regex::Regex;
use std::sync::LazyLock;

/// Tasks with at least this many words are considered multi-part.
pub const MIN_MULTIPART_WORDS: usize = 12;

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?m)^[ \t]*(?:\d+[.)]|[-*•])[ \t]+\S"));

const SEQUENCE_MARKERS: &[&str] = &[
    " then ",
    "and then",
    "after that",
    "afterwards",
    "finally",
    "first,",
    "second,",
    "next,",
    " and also ",
    "; ",
];

/// Whether a run is delegated to specialists or executed directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationDecision {
    pub delegate: bool,
    pub reason: String,
}

impl DelegationDecision {
    fn new(delegate: bool, reason: impl Into<String>) -> Self {
        Self {
            delegate,
            reason: reason.into(),
        }
    }
}

/// True when `task` contains list items or sequencing words.
pub fn has_sequence_markers(task: &str) -> bool {
    if LIST_MARKER.is_match(task) {
        return true;
    }
    let lower = format!(" {} ", task.to_lowercase());
    SEQUENCE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Decide whether `task` is worth decomposing.
///
/// With smart delegation off every task is delegated. Otherwise delegation
/// needs more than one agent and a task that looks multi-part.
pub fn decide(task: &str, agent_count: usize, smart_delegation: bool) -> DelegationDecision {
    if !smart_delegation {
        return DelegationDecision::new(true, "smart delegation disabled");
    }
    if agent_count < 2 {
        return DelegationDecision::new(false, format!("only {agent_count} agent available"));
    }
    let words = task.split_whitespace().count();
    if words >= MIN_MULTIPART_WORDS {
        return DelegationDecision::new(true, format!("task has {words} words"));
    }
    if has_sequence_markers(task) {
        return DelegationDecision::new(true, "task lists several steps");
    }
    DelegationDecision::new(false, format!("simple task ({words} words)"))
}
