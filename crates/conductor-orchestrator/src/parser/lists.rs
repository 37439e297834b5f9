//! Plain-text fallbacks: numbered items, bullets, `Subtask:` labels and paragraphs.

use super::candidate::Candidate;
use super::{hints, metadata, pattern, Extractor};
use regex::Regex;
use std::sync::LazyLock;

static NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?m)^[ \t]*(\d+)[.)][ \t]+(.+)$"));

static BULLET: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^[ \t]*[-*•+][ \t]+(.+)$"));

static LABEL: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?im)^[ \t]*(?:\*\*)?sub-?task(?:[ \t]*#?(\d+))?[ \t]*(?:\*\*)?[ \t]*:[ \t]*(?:\*\*)?[ \t]*(.+)$")
});

static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| pattern(r"\n[ \t]*\n"));

/// `1. Do something` / `2) Do something else`.
pub struct NumberedExtractor;

impl Extractor for NumberedExtractor {
    fn name(&self) -> &'static str {
        "numbered"
    }

    fn extract(&self, text: &str) -> Option<Vec<Candidate>> {
        let candidates: Vec<Candidate> = NUMBERED
            .captures_iter(text)
            .filter(|caps| !metadata::is_metadata(&caps[0]))
            .map(|caps| Candidate::new(&caps[1], hints::clean(&caps[2])).with_body(&caps[2]))
            .collect();
        (!candidates.is_empty()).then_some(candidates)
    }
}

/// `- item`, `* item`, `• item`. Items are keyed by their position.
pub struct BulletExtractor;

impl Extractor for BulletExtractor {
    fn name(&self) -> &'static str {
        "bullets"
    }

    fn extract(&self, text: &str) -> Option<Vec<Candidate>> {
        let candidates: Vec<Candidate> = BULLET
            .captures_iter(text)
            .filter(|caps| !metadata::is_metadata(&caps[1]))
            .enumerate()
            .map(|(i, caps)| {
                Candidate::new((i + 1).to_string(), hints::clean(&caps[1])).with_body(&caps[1])
            })
            .collect();
        (!candidates.is_empty()).then_some(candidates)
    }
}

/// `Subtask: ...` or `Subtask 3: ...` lines outside of markdown headers.
pub struct LabelExtractor;

impl Extractor for LabelExtractor {
    fn name(&self) -> &'static str {
        "labels"
    }

    fn extract(&self, text: &str) -> Option<Vec<Candidate>> {
        let candidates: Vec<Candidate> = LABEL
            .captures_iter(text)
            .enumerate()
            .map(|(i, caps)| {
                let key = caps
                    .get(1)
                    .map_or_else(|| (i + 1).to_string(), |m| m.as_str().to_string());
                Candidate::new(key, hints::clean(&caps[2])).with_body(&caps[2])
            })
            .collect();
        (!candidates.is_empty()).then_some(candidates)
    }
}

/// Blank-line separated paragraphs, the last resort.
pub struct ParagraphExtractor;

impl Extractor for ParagraphExtractor {
    fn name(&self) -> &'static str {
        "paragraphs"
    }

    fn extract(&self, text: &str) -> Option<Vec<Candidate>> {
        let paragraphs: Vec<&str> = PARAGRAPH_BREAK
            .split(text)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        // A single block of prose is the task itself, not a decomposition.
        if paragraphs.len() < 2 {
            return None;
        }
        let candidates: Vec<Candidate> = paragraphs
            .into_iter()
            .filter(|p| !metadata::is_metadata(p))
            .map(hints::clean)
            .enumerate()
            .map(|(i, p)| Candidate::new((i + 1).to_string(), p))
            .collect();
        (!candidates.is_empty()).then_some(candidates)
    }
}
