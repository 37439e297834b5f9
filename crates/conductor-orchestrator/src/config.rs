use crate::retry::RetryPolicies;
use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for an [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Jaccard similarity at or above which two subtasks are merged.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Token ceiling for the context handed to each subtask.
    #[serde(default = "default_subtask_token_budget")]
    pub subtask_token_budget: usize,
    /// Token ceiling for the context handed to the synthesis call.
    #[serde(default = "default_synthesis_token_budget")]
    pub synthesis_token_budget: usize,
    /// Optional ceiling on the estimated cost of the whole pruned graph.
    #[serde(default)]
    pub pruning_token_budget: Option<u64>,
    /// When false every task is decomposed, however small.
    #[serde(default = "default_smart_delegation")]
    pub smart_delegation: bool,
    /// Maximum number of subtasks of one wave running at the same time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Agent id used for analysis, synthesis and as the fallback executor.
    #[serde(default)]
    pub coordinator_id: Option<String>,
    #[serde(default)]
    pub retry: RetryPolicies,
}

fn default_similarity_threshold() -> f64 {
    0.7
}

fn default_subtask_token_budget() -> usize {
    2000
}

fn default_synthesis_token_budget() -> usize {
    1500
}

fn default_smart_delegation() -> bool {
    true
}

fn default_max_concurrency() -> usize {
    4
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            subtask_token_budget: default_subtask_token_budget(),
            synthesis_token_budget: default_synthesis_token_budget(),
            pruning_token_budget: None,
            smart_delegation: default_smart_delegation(),
            max_concurrency: default_max_concurrency(),
            coordinator_id: None,
            retry: RetryPolicies::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> ConductorResult<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| ConductorError::Config(format!("Invalid orchestrator config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub async fn load(path: &Path) -> ConductorResult<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            ConductorError::Config(format!("Failed to read '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject out-of-range settings.
    pub fn validate(&self) -> ConductorResult<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConductorError::Config(format!(
                "similarity_threshold must be within 0..=1, got {}",
                self.similarity_threshold
            )));
        }
        if self.max_concurrency == 0 {
            return Err(ConductorError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert!((config.similarity_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.subtask_token_budget, 2000);
        assert_eq!(config.synthesis_token_budget, 1500);
        assert!(config.smart_delegation);
        assert_eq!(config.retry.default, RetryPolicy::None);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = OrchestratorConfig::from_toml_str("").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = OrchestratorConfig::from_toml_str(
            "similarity_threshold = 0.5\nsmart_delegation = false\n\n[retry.default]\nkind = \"fixed\"\nmax_attempts = 2\ndelay_ms = 100\n",
        )
        .unwrap();
        assert!((config.similarity_threshold - 0.5).abs() < f64::EPSILON);
        assert!(!config.smart_delegation);
        assert_eq!(config.subtask_token_budget, 2000);
        assert!(matches!(config.retry.default, RetryPolicy::Fixed { .. }));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(OrchestratorConfig::from_toml_str("similarity_threshold = 1.5").is_err());
        assert!(OrchestratorConfig::from_toml_str("max_concurrency = 0").is_err());
        assert!(OrchestratorConfig::from_toml_str("max_concurrency = \"many\"").is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("orchestrator.toml");
        tokio::fs::write(
            &path,
            "max_concurrency = 2\npruning_token_budget = 900\ncoordinator_id = \"lead\"\n",
        )
        .await
        .unwrap();

        let config = OrchestratorConfig::load(&path).await.unwrap();
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.pruning_token_budget, Some(900));
        assert_eq!(config.coordinator_id.as_deref(), Some("lead"));
        assert_eq!(config.synthesis_token_budget, 1500);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = OrchestratorConfig::load(Path::new("/nonexistent/conductor.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::Config(_)));
    }
}
