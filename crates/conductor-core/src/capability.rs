use serde::{Deserialize, Serialize};
use std::fmt;

/// A capability tag advertised by an agent and required by a subtask.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    /// Searching the web or other external sources.
    WebSearch,
    /// Reading files and documents.
    FileReading,
    /// Reading, reviewing or writing code.
    CodeAnalysis,
    /// Calculations and data processing.
    DataAnalysis,
    /// Open-ended reasoning and coordination.
    GeneralReasoning,
    /// A capability added by an external agent kind.
    Custom(String),
}

impl Capability {
    /// Parse a capability label as written by an agent.
    ///
    /// Accepts camelCase (`webSearch`), snake_case (`web_search`) and spaced
    /// (`Web Search`) spellings. Anything else becomes [`Capability::Custom`].
    pub fn from_label(label: &str) -> Option<Self> {
        let trimmed = label.trim().trim_matches(|c: char| c == '`' || c == '*' || c == '"');
        if trimmed.is_empty() {
            return None;
        }
        let key: String = trimmed
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        let cap = match key.as_str() {
            "websearch" | "search" | "web" => Capability::WebSearch,
            "filereading" | "fileread" | "documentreading" | "files" => Capability::FileReading,
            "codeanalysis" | "code" | "coding" => Capability::CodeAnalysis,
            "dataanalysis" | "data" | "calculation" => Capability::DataAnalysis,
            "generalreasoning" | "reasoning" | "coordination" => Capability::GeneralReasoning,
            "" => return None,
            _ => Capability::Custom(trimmed.to_string()),
        };
        Some(cap)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::WebSearch => write!(f, "webSearch"),
            Capability::FileReading => write!(f, "fileReading"),
            Capability::CodeAnalysis => write!(f, "codeAnalysis"),
            Capability::DataAnalysis => write!(f, "dataAnalysis"),
            Capability::GeneralReasoning => write!(f, "generalReasoning"),
            Capability::Custom(name) => write!(f, "{name}"),
        }
    }
}
