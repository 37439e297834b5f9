use super::candidate::Candidate;
use super::{pattern, Extractor};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

static FENCED: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```"));

#[derive(Debug, Deserialize)]
struct RawDecomposition {
    #[serde(default, alias = "tasks", alias = "steps")]
    subtasks: Vec<RawSubtask>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSubtask {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, alias = "task", alias = "title")]
    description: String,
    #[serde(default, alias = "agentName", alias = "assignedAgent")]
    agent: Option<String>,
    #[serde(default, alias = "dependsOn", alias = "depends_on")]
    dependencies: Option<Vec<Value>>,
    #[serde(default, alias = "requiredCapabilities")]
    capabilities: Option<Vec<String>>,
    #[serde(default)]
    priority: Option<i64>,
    #[serde(default, alias = "parallelizable", alias = "canRunInParallel")]
    parallel: Option<bool>,
    #[serde(default, alias = "estimated_cost", alias = "estimatedTokens")]
    estimated_cost: Option<u64>,
}

fn key_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// JSON objects with a `subtasks` array, fenced or bare.
pub struct JsonExtractor;

impl JsonExtractor {
    fn documents(text: &str) -> Vec<&str> {
        let mut docs: Vec<&str> = FENCED
            .captures_iter(text)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect();
        if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
            if start < end {
                docs.push(&text[start..=end]);
            }
        }
        docs
    }
}

impl Extractor for JsonExtractor {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extract(&self, text: &str) -> Option<Vec<Candidate>> {
        let raw = Self::documents(text).into_iter().find_map(|doc| {
            match serde_json::from_str::<RawDecomposition>(doc) {
                Ok(parsed) if !parsed.subtasks.is_empty() => Some(parsed),
                Ok(_) => None,
                Err(e) => {
                    debug!(error = %e, "Decomposition is not JSON");
                    None
                }
            }
        })?;

        let candidates = raw
            .subtasks
            .into_iter()
            .enumerate()
            .map(|(index, sub)| {
                let key = sub
                    .id
                    .as_ref()
                    .and_then(key_of)
                    .unwrap_or_else(|| (index + 1).to_string());
                let mut candidate = Candidate::new(key, sub.description.trim());
                candidate.agent = sub.agent.filter(|a| !a.trim().is_empty());
                candidate.capabilities = sub.capabilities;
                candidate.dependencies = Some(
                    sub.dependencies
                        .unwrap_or_default()
                        .iter()
                        .filter_map(key_of)
                        .collect(),
                );
                candidate.priority = sub.priority;
                candidate.parallel = sub.parallel;
                candidate.estimated_cost = sub.estimated_cost;
                candidate
            })
            .collect();
        Some(candidates)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_json() {
        let text = r#"Here is my plan:
```json
{"subtasks": [
  {"id": "1", "description": "Search flights to Paris", "agent": "WebSearchAgent", "dependencies": []},
  {"id": 2, "description": "Compare the prices found", "dependencies": ["1"], "parallel": false}
]}
```
"#;
        let candidates = JsonExtractor.extract(text).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].key, "1");
        assert_eq!(candidates[0].agent.as_deref(), Some("WebSearchAgent"));
        assert_eq!(candidates[1].key, "2");
        assert_eq!(candidates[1].dependencies, Some(vec!["1".to_string()]));
        assert_eq!(candidates[1].parallel, Some(false));
    }

    #[test]
    fn test_bare_json_with_aliases() {
        let text = r#"{"tasks": [{"task": "Gather the sales figures", "dependsOn": []}]}"#;
        let candidates = JsonExtractor.extract(text).unwrap();
        assert_eq!(candidates[0].key, "1");
        assert_eq!(candidates[0].description, "Gather the sales figures");
    }

    #[test]
    fn test_not_json() {
        assert!(JsonExtractor.extract("1. Do a thing\n2. Do another").is_none());
        assert!(JsonExtractor.extract(r#"{"subtasks": []}"#).is_none());
    }
}
