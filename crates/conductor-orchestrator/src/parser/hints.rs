//! Agent, capability and dependency hints found in free text.

use super::pattern;
use conductor_core::{AgentDescriptor, Capability};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static CAPABILITY_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"(?im)^[-*+•\t ]*(?:\*\*)?[ \t]*(?:required[ \t]+)?capabilit(?:y|ies)(?:[ \t]+needed|[ \t]+required)?[ \t]*(?:\*\*)?[ \t]*:[ \t]*(?:\*\*)?[ \t]*(.+)$",
    )
});

static DESCRIPTION_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"(?im)^[-*+•\t ]*(?:\*\*)?[ \t]*(?:specific[ \t]+)?task[ \t]+description[ \t]*(?:\*\*)?[ \t]*:[ \t]*(?:\*\*)?[ \t]*(.*)$",
    )
});

static FIELD_LABEL: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"^[-*+•\t ]*(?:\*\*)?[A-Za-z][A-Za-z ]{1,40}(?:\*\*)?[ \t]*:"));

static PARALLEL_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"(?im)parallel(?:izable|[ \t]+execution)?[ \t]*(?:\*\*)?[ \t]*:[ \t]*(?:\*\*)?[ \t]*(yes|no|true|false)",
    )
});

static SUBTASK_REF: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)\b(?:sub-?task|step|task|item)s?\s*#?\s*(\d+)"));

static DEPENDENCY_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?i)^[-*+•\t ]*(?:\*\*)?[ \t]*(?:dependencies|depends[ \t]+on|prerequisites?)[ \t]*(?:\*\*)?[ \t]*:(.*)$")
});

static BARE_NUMBER: LazyLock<Regex> = LazyLock::new(|| pattern(r"\b(\d+)\b"));

static CONTINUED_REF: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)^\s*(?:,|and|&|or)\s*#?\s*(\d+)"));

const DEPENDENCY_CUES: &[&str] = &[
    "depends on",
    "dependent on",
    "dependency",
    "dependencies",
    "after ",
    "once ",
    "requires",
    "required output",
    "following completion",
    "following the completion",
    "completion of",
    "builds on",
    "build on",
    "based on",
    "uses the output",
    "uses output",
    "use the output",
    "using the output",
    "results of",
    "output of",
    "output from",
    "results from",
    "prerequisite",
    "waits for",
    "wait for",
];

const CAPABILITY_KEYWORDS: &[(&str, Capability)] = &[
    ("web", Capability::WebSearch),
    ("search", Capability::WebSearch),
    ("browse", Capability::WebSearch),
    ("online", Capability::WebSearch),
    ("file", Capability::FileReading),
    ("document", Capability::FileReading),
    ("pdf", Capability::FileReading),
    ("code", Capability::CodeAnalysis),
    ("source", Capability::CodeAnalysis),
    ("data", Capability::DataAnalysis),
    ("calculat", Capability::DataAnalysis),
    ("statistic", Capability::DataAnalysis),
    ("reason", Capability::GeneralReasoning),
    ("coordinat", Capability::GeneralReasoning),
];

/// Strip markdown emphasis and collapse whitespace.
pub fn clean(text: &str) -> String {
    let stripped = text.replace("**", "").replace("__", "");
    stripped
        .trim_start_matches(|c: char| c == '#' || c.is_whitespace())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn words_of(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in name.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn variants(agent: &AgentDescriptor) -> Vec<String> {
    let mut words = words_of(&agent.name);
    if words.last().is_some_and(|w| w == "agent") && words.len() > 1 {
        words.pop();
    }
    let spaced = words.join(" ");
    let joined = words.concat();
    let mut out = vec![
        format!("{spaced} agent"),
        format!("{joined} agent"),
        format!("use {spaced}"),
        format!("use the {spaced}"),
        format!("use {joined}"),
    ];
    out.dedup();
    out
}

/// Resolve a mention of an agent in `text` to its registered name.
///
/// Exact names win over case-insensitive substrings, which win over spoken
/// variants such as "web search agent" or "use WebSearch". Longer names are
/// tried first so that "WebSearchAgent" is not shadowed by "Search".
pub fn resolve_agent(text: &str, agents: &[AgentDescriptor]) -> Option<String> {
    let mut by_length: Vec<&AgentDescriptor> = agents.iter().collect();
    by_length.sort_by_key(|a| std::cmp::Reverse(a.name.len()));

    if let Some(agent) = by_length.iter().find(|a| !a.name.is_empty() && text.contains(&a.name)) {
        return Some(agent.name.clone());
    }

    let lower = text.to_lowercase();
    if let Some(agent) = by_length
        .iter()
        .find(|a| !a.name.is_empty() && lower.contains(&a.name.to_lowercase()))
    {
        return Some(agent.name.clone());
    }

    by_length
        .iter()
        .find(|a| variants(a).iter().any(|v| lower.contains(v.as_str())))
        .map(|a| a.name.clone())
}

/// Split a capability list such as "webSearch, data analysis and reasoning".
pub fn parse_capability_list<S: AsRef<str>>(labels: &[S]) -> BTreeSet<Capability> {
    labels
        .iter()
        .flat_map(|label| {
            label
                .as_ref()
                .split([',', ';', '/', '|'])
                .flat_map(|part| part.split(" and "))
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|part| !part.trim().eq_ignore_ascii_case("none"))
        .filter_map(|part| Capability::from_label(&part))
        .collect()
}

/// Capabilities from an explicit "Capabilities Needed:" field, else keywords.
pub fn infer_capabilities(text: &str) -> BTreeSet<Capability> {
    if let Some(caps) = CAPABILITY_FIELD.captures(text) {
        let explicit = parse_capability_list(&[caps[1].replace('`', "")]);
        if !explicit.is_empty() {
            return explicit;
        }
    }
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    CAPABILITY_KEYWORDS
        .iter()
        .filter(|(keyword, _)| words.iter().any(|w| w.starts_with(keyword)))
        .map(|(_, cap)| cap.clone())
        .collect()
}

/// Value of a "Specific Task Description:" field, which may continue on
/// the following lines until a blank line or the next field.
pub fn description_field(section: &str) -> Option<String> {
    let caps = DESCRIPTION_FIELD.captures(section)?;
    let inline = clean(&caps[1]);
    if !inline.is_empty() {
        return Some(inline);
    }
    let end = caps.get(0).map_or(0, |m| m.end());
    let body: Vec<&str> = section[end..]
        .lines()
        .skip_while(|line| line.trim().is_empty())
        .take_while(|line| !line.trim().is_empty() && !FIELD_LABEL.is_match(line))
        .collect();
    let joined = clean(&body.join(" "));
    (!joined.is_empty()).then_some(joined)
}

/// An explicit "Parallel: yes/no" field, if present.
pub fn parallel_field(section: &str) -> Option<bool> {
    let caps = PARALLEL_FIELD.captures(section)?;
    Some(matches!(caps[1].to_lowercase().as_str(), "yes" | "true"))
}

/// Numeric references to other subtasks in dependency phrases.
///
/// Handles "depends on Subtask 1", "after steps 1 and 2",
/// "Dependencies: 1, 3" and similar. "None" fields produce nothing.
pub fn dependency_refs(text: &str) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    let mut push = |r: &str| {
        if !refs.iter().any(|existing| existing == r) {
            refs.push(r.to_string());
        }
    };

    for line in text.lines() {
        if let Some(field) = DEPENDENCY_FIELD.captures(line) {
            let value = field[1].to_lowercase();
            if value.trim().trim_matches('*').trim().starts_with("none") {
                continue;
            }
            for caps in BARE_NUMBER.captures_iter(&value) {
                push(&caps[1]);
            }
            continue;
        }

        let lower = line.to_lowercase();
        if !DEPENDENCY_CUES.iter().any(|cue| lower.contains(cue)) {
            continue;
        }
        for caps in SUBTASK_REF.captures_iter(&lower) {
            push(&caps[1]);
            // "steps 1, 2 and 3"
            let mut rest = &lower[caps.get(0).map_or(0, |m| m.end())..];
            while let Some(more) = CONTINUED_REF.captures(rest) {
                push(&more[1]);
                rest = &rest[more.get(0).map_or(rest.len(), |m| m.end())..];
            }
        }
    }
    refs
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn agents() -> Vec<AgentDescriptor> {
        vec![
            AgentDescriptor::new("search", "WebSearchAgent", [Capability::WebSearch]),
            AgentDescriptor::new("data", "DataAnalysisAgent", [Capability::DataAnalysis]),
            AgentDescriptor::new("coord", "Coordinator", [Capability::GeneralReasoning]),
        ]
    }

    #[test]
    fn test_clean_strips_markdown() {
        assert_eq!(clean("### **Find**   flights  "), "Find flights");
    }

    #[test]
    fn test_resolve_agent_exact_and_case_insensitive() {
        let agents = agents();
        assert_eq!(
            resolve_agent("Assign to WebSearchAgent", &agents).as_deref(),
            Some("WebSearchAgent")
        );
        assert_eq!(
            resolve_agent("assign to dataanalysisagent please", &agents).as_deref(),
            Some("DataAnalysisAgent")
        );
    }

    #[test]
    fn test_resolve_agent_variants() {
        let agents = agents();
        assert_eq!(
            resolve_agent("The web search agent should handle this", &agents).as_deref(),
            Some("WebSearchAgent")
        );
        assert_eq!(
            resolve_agent("Use data analysis to crunch it", &agents).as_deref(),
            Some("DataAnalysisAgent")
        );
        assert_eq!(resolve_agent("Nobody in particular", &agents), None);
    }

    #[test]
    fn test_infer_capabilities_prefers_explicit_field() {
        let text = "Look at the source code\n**Capabilities Needed:** webSearch, data analysis";
        let caps = infer_capabilities(text);
        assert_eq!(
            caps,
            BTreeSet::from([Capability::WebSearch, Capability::DataAnalysis])
        );
    }

    #[test]
    fn test_infer_capabilities_keywords() {
        let caps = infer_capabilities("Calculate totals from the document");
        assert!(caps.contains(&Capability::DataAnalysis));
        assert!(caps.contains(&Capability::FileReading));
        assert!(!caps.contains(&Capability::WebSearch));
        assert!(infer_capabilities("Write a haiku about autumn").is_empty());
    }

    #[test]
    fn test_description_field_inline_and_multiline() {
        let inline = "**Specific Task Description:** Find cheap flights to Paris\n**Agent:** X";
        assert_eq!(
            description_field(inline).as_deref(),
            Some("Find cheap flights to Paris")
        );
        let multi = "- Specific Task Description:\n  Compare hotel prices\n  near the Louvre\n\n- Agent: X";
        assert_eq!(
            description_field(multi).as_deref(),
            Some("Compare hotel prices near the Louvre")
        );
    }

    #[test]
    fn test_dependency_refs_phrasings() {
        assert_eq!(dependency_refs("This depends on Subtask 1."), vec!["1"]);
        assert_eq!(
            dependency_refs("Run after steps 1, 2 and 3 are done"),
            vec!["1", "2", "3"]
        );
        assert_eq!(dependency_refs("**Dependencies:** 2, 4"), vec!["2", "4"]);
        assert!(dependency_refs("**Dependencies:** None").is_empty());
        assert!(dependency_refs("Mention subtask 2 without any cue").is_empty());
    }

    #[test]
    fn test_parallel_field() {
        assert_eq!(parallel_field("**Parallel:** No"), Some(false));
        assert_eq!(parallel_field("Parallelizable: yes"), Some(true));
        assert_eq!(parallel_field("nothing here"), None);
    }
}
