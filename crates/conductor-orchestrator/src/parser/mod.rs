//! Decomposition parsing: free-form analysis text to a [`TaskGraph`].
//!
//! Extractors are tried in order and the first one that yields at least one
//! usable subtask wins:
//!
//! 1. JSON (`{"subtasks": [...]}`, fenced or bare)
//! 2. `### Subtask N:` markdown sections
//! 3. numbered items
//! 4. bullet items
//! 5. `Subtask:` labels
//! 6. blank-line separated paragraphs

mod candidate;
mod hints;
mod json;
mod lists;
mod metadata;
mod sections;

pub use candidate::Candidate;
pub use hints::{dependency_refs, infer_capabilities, resolve_agent};
pub use json::JsonExtractor;
pub use lists::{BulletExtractor, LabelExtractor, NumberedExtractor, ParagraphExtractor};
pub use metadata::is_metadata;
pub use sections::SectionExtractor;

use conductor_core::{AgentDescriptor, HeuristicTokenCounter, TaskGraph, TokenCounter};
use regex::Regex;
use tracing::{debug, info};

/// Fixed overhead of dispatching any subtask, in tokens.
pub const BASE_SUBTASK_COST: u64 = 100;

/// Expected response tokens per description token.
const COST_PER_DESCRIPTION_TOKEN: u64 = 4;

/// Compile a pattern literal.
#[allow(clippy::expect_used)]
pub(crate) fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("pattern literal compiles")
}

/// One parsing strategy.
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Candidates found in `text`, or `None` if the strategy does not apply.
    fn extract(&self, text: &str) -> Option<Vec<Candidate>>;
}

/// Estimated token cost of a subtask, from its description alone.
pub fn estimate_cost(description: &str) -> u64 {
    let tokens = HeuristicTokenCounter.count(description) as u64;
    BASE_SUBTASK_COST + tokens * COST_PER_DESCRIPTION_TOKEN
}

/// A parsed graph and the strategy that produced it.
#[derive(Debug, Clone)]
pub struct ParsedDecomposition {
    pub graph: TaskGraph,
    pub strategy: &'static str,
}

/// Parses analysis output into a task graph with a prioritised extractor chain.
pub struct DecompositionParser {
    extractors: Vec<Box<dyn Extractor>>,
}

impl Default for DecompositionParser {
    fn default() -> Self {
        Self {
            extractors: vec![
                Box::new(JsonExtractor),
                Box::new(SectionExtractor),
                Box::new(NumberedExtractor),
                Box::new(BulletExtractor),
                Box::new(LabelExtractor),
                Box::new(ParagraphExtractor),
            ],
        }
    }
}

impl DecompositionParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// A parser with a custom extractor chain, tried in the given order.
    pub fn with_extractors(extractors: Vec<Box<dyn Extractor>>) -> Self {
        Self { extractors }
    }

    /// Parse `text` into a task graph, or `None` when no strategy applies.
    pub fn parse(&self, text: &str, agents: &[AgentDescriptor]) -> Option<TaskGraph> {
        self.parse_detailed(text, agents).map(|parsed| parsed.graph)
    }

    /// Like [`parse`](Self::parse), also reporting the winning strategy.
    pub fn parse_detailed(
        &self,
        text: &str,
        agents: &[AgentDescriptor],
    ) -> Option<ParsedDecomposition> {
        if text.trim().is_empty() {
            return None;
        }
        for extractor in &self.extractors {
            let Some(candidates) = extractor.extract(text) else {
                continue;
            };
            let mut subtasks = candidate::assemble(candidates, agents, extractor.name());
            if subtasks.is_empty() {
                debug!(strategy = extractor.name(), "Strategy matched but produced no subtasks");
                continue;
            }
            for subtask in &mut subtasks {
                if subtask.estimated_cost.is_none() {
                    subtask.estimated_cost = Some(estimate_cost(&subtask.description));
                }
            }
            let graph = TaskGraph::new(subtasks);
            info!(
                strategy = extractor.name(),
                subtasks = graph.len(),
                total_cost = graph.total_cost(),
                "Parsed decomposition"
            );
            return Some(ParsedDecomposition {
                graph,
                strategy: extractor.name(),
            });
        }
        debug!("No decomposition strategy matched");
        None
    }
}
