use super::candidate::Candidate;
use super::{hints, pattern, Extractor};
use regex::Regex;
use std::sync::LazyLock;

static SECTION_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?im)^[ \t]*(#{2,4})[ \t]*(?:\*\*)?[ \t]*sub-?task[ \t]*#?(\d+)[ \t]*(?:\*\*)?[ \t]*[:.)\-–—]?[ \t]*(.*)$")
});

static ANY_HEADER: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^[ \t]*(#{1,6})[ \t]"));

/// Start of the first header after `from` at `level` or shallower.
fn section_end(text: &str, from: usize, level: usize) -> Option<usize> {
    ANY_HEADER
        .captures_iter(&text[from..])
        .find(|caps| caps.get(1).is_some_and(|m| m.len() <= level))
        .and_then(|caps| caps.get(0))
        .map(|m| from + m.start())
}

/// Markdown sections headed `### Subtask N: title`.
///
/// The description comes from a "Specific Task Description" field when the
/// section has one, else from the header. A section runs until the next
/// header of the same or a higher level, and all of it is scanned for agent
/// mentions, capabilities and dependency phrases.
pub struct SectionExtractor;

impl Extractor for SectionExtractor {
    fn name(&self) -> &'static str {
        "sections"
    }

    fn extract(&self, text: &str) -> Option<Vec<Candidate>> {
        let headers: Vec<_> = SECTION_HEADER.captures_iter(text).collect();
        if headers.is_empty() {
            return None;
        }

        let mut candidates = Vec::with_capacity(headers.len());
        for (i, caps) in headers.iter().enumerate() {
            let (Some(whole), Some(hashes), Some(number)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            let next_subtask = headers
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map_or(text.len(), |m| m.start());
            let end = section_end(text, whole.end(), hashes.len())
                .map_or(next_subtask, |end| end.min(next_subtask));
            let section = &text[whole.start()..end];
            let title = hints::clean(caps.get(3).map_or("", |m| m.as_str()));

            let description = hints::description_field(section).unwrap_or(title);
            let mut candidate =
                Candidate::new(number.as_str(), description).with_body(section);
            candidate.parallel = hints::parallel_field(section);
            candidates.push(candidate);
        }
        Some(candidates)
    }
}
