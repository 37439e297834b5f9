use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A file the user attached to the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    /// Display name, usually the file name with extension.
    pub name: String,
    /// Path or URI the file can be read from.
    pub path: String,
    /// MIME type when known.
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl FileReference {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            mime_type: None,
        }
    }

    /// Lowercased extension of [`FileReference::name`], if any.
    pub fn extension(&self) -> Option<String> {
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .filter(|ext| !ext.is_empty())
    }
}

/// Key/value changes an agent asks to have merged into the shared context.
///
/// Every field is a keyed map, so applying two updates in either order
/// produces the same context as long as they do not write the same key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextUpdate {
    #[serde(default)]
    pub tool_results: BTreeMap<String, String>,
    #[serde(default)]
    pub user_preferences: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ContextUpdate {
    pub fn is_empty(&self) -> bool {
        self.tool_results.is_empty() && self.user_preferences.is_empty() && self.metadata.is_empty()
    }
}

/// Context handed to an agent call.
///
/// One instance is owned by each orchestration run (the shared context);
/// every subtask receives a derived copy built by the context assembler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    #[serde(default)]
    pub conversation_history: Vec<Message>,
    #[serde(default)]
    pub file_references: Vec<FileReference>,
    /// Prior tool and agent results, keyed by a descriptive slot name.
    #[serde(default)]
    pub tool_results: BTreeMap<String, String>,
    #[serde(default)]
    pub user_preferences: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl AgentContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.conversation_history = history;
        self
    }

    pub fn with_file(mut self, file: FileReference) -> Self {
        self.file_references.push(file);
        self
    }

    pub fn with_tool_result(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tool_results.insert(key.into(), value.into());
        self
    }

    pub fn with_preference(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_preferences.insert(key.into(), value.into());
        self
    }

    /// Merge an agent's update into this context. Later writes to the same key win.
    pub fn apply_update(&mut self, update: &ContextUpdate) {
        self.tool_results.extend(
            update
                .tool_results
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        self.user_preferences.extend(
            update
                .user_preferences
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        self.metadata.extend(
            update
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
    }

    /// True when the context carries nothing at all.
    pub fn is_empty(&self) -> bool {
        self.conversation_history.is_empty()
            && self.file_references.is_empty()
            && self.tool_results.is_empty()
            && self.user_preferences.is_empty()
            && self.metadata.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_file_extension() {
        assert_eq!(
            FileReference::new("Report.PDF", "/tmp/report.pdf").extension(),
            Some("pdf".to_string())
        );
        assert_eq!(FileReference::new("Makefile", "/src/Makefile").extension(), None);
    }

    #[test]
    fn test_apply_update_merges_keys() {
        let mut ctx = AgentContext::new().with_tool_result("weather", "sunny");
        let mut update = ContextUpdate::default();
        update
            .tool_results
            .insert("agent_result_subtask-1".into(), "done".into());
        update
            .metadata
            .insert("city".into(), serde_json::json!("Paris"));
        ctx.apply_update(&update);

        assert_eq!(ctx.tool_results.len(), 2);
        assert_eq!(ctx.metadata["city"], serde_json::json!("Paris"));
    }

    #[test]
    fn test_disjoint_updates_commute() {
        let mut a = ContextUpdate::default();
        a.metadata.insert("a".into(), serde_json::json!(1));
        let mut b = ContextUpdate::default();
        b.metadata.insert("b".into(), serde_json::json!(2));

        let mut first = AgentContext::new();
        first.apply_update(&a);
        first.apply_update(&b);
        let mut second = AgentContext::new();
        second.apply_update(&b);
        second.apply_update(&a);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_context() {
        assert!(AgentContext::new().is_empty());
        assert!(!AgentContext::new().with_preference("tone", "brief").is_empty());
        assert!(ContextUpdate::default().is_empty());
    }
}
