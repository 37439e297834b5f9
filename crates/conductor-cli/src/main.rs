mod echo;

use clap::{Parser, Subcommand};
use conductor_core::{AgentContext, Capability, Message};
use conductor_orchestrator::{
    compute_waves, AgentRegistry, CancelToken, DecompositionParser, OrchestrationResult,
    Orchestrator, OrchestratorConfig, Pruner, TracingObserver,
};
use conductor_session::{CheckpointStore, FileCheckpointStore};
use echo::EchoAgent;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "conductor", about = "Conductor: task-graph orchestration for agent teams")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conductor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and prune a decomposition, then print its execution waves
    Plan {
        /// File holding the coordinator's decomposition text
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Inspect stored checkpoints
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },
    /// Run a task end to end against offline echo agents
    Simulate {
        /// The task to orchestrate
        task: String,
        /// Artificial latency of every echo agent call
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
        /// Cancel the run after this many milliseconds
        #[arg(long)]
        cancel_after_ms: Option<u64>,
    },
    /// Resume a run from a stored checkpoint against echo agents
    Resume {
        /// Checkpoint id
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// List checkpoints, oldest first
    List {
        /// Only checkpoints of this run
        #[arg(long)]
        run: Option<Uuid>,
        /// Checkpoint directory (overrides config)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Print one checkpoint as JSON
    Show {
        id: Uuid,
        /// Checkpoint directory (overrides config)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Deserialize)]
struct ConductorConfig {
    #[serde(default)]
    orchestrator: OrchestratorConfig,
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
    #[serde(default = "default_agents")]
    agents: Vec<AgentConfig>,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            data_dir: default_data_dir(),
            agents: default_agents(),
        }
    }
}

#[derive(Deserialize)]
struct AgentConfig {
    id: String,
    name: String,
    #[serde(default)]
    capabilities: Vec<String>,
}

impl AgentConfig {
    fn new(id: &str, name: &str, capabilities: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            capabilities: capabilities.iter().map(ToString::to_string).collect(),
        }
    }

    fn capability_set(&self) -> BTreeSet<Capability> {
        self.capabilities
            .iter()
            .filter_map(|label| Capability::from_label(label))
            .collect()
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_agents() -> Vec<AgentConfig> {
    vec![
        AgentConfig::new("coordinator", "CoordinatorAgent", &["generalReasoning"]),
        AgentConfig::new("search", "WebSearchAgent", &["webSearch"]),
        AgentConfig::new("files", "FileReaderAgent", &["fileReading"]),
        AgentConfig::new("code", "CodeAnalysisAgent", &["codeAnalysis"]),
        AgentConfig::new("data", "DataAnalysisAgent", &["dataAnalysis"]),
    ]
}

impl ConductorConfig {
    fn checkpoint_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }

    fn registry(&self, delay: Duration) -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        for agent in &self.agents {
            registry.register(Arc::new(EchoAgent::new(
                agent.id.clone(),
                agent.name.clone(),
                agent.capability_set(),
                delay,
            )));
        }
        registry
    }

    fn build_orchestrator(&self, delay: Duration) -> anyhow::Result<Orchestrator> {
        let mut orchestrator = Orchestrator::new(self.registry(delay), self.orchestrator.clone())?;
        orchestrator.subscribe(Arc::new(TracingObserver));
        Ok(orchestrator)
    }
}

async fn load_config(path: &Path) -> anyhow::Result<ConductorConfig> {
    if !path.exists() {
        info!(path = %path.display(), "No config file; using defaults");
        return Ok(ConductorConfig::default());
    }
    let config_str = tokio::fs::read_to_string(path).await.map_err(|e| {
        anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
    })?;
    let config: ConductorConfig = toml::from_str(&config_str)?;
    config.orchestrator.validate()?;
    Ok(config)
}

fn log_usage(result: &OrchestrationResult) {
    for (agent_id, usage) in &result.agent_usage {
        info!(
            agent_id = %agent_id,
            calls = usage.calls,
            errors = usage.errors,
            tokens = usage.total_tokens(),
            duration_ms = usage.duration_ms,
            "Agent usage"
        );
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    match cli.command {
        Commands::Plan { input } => {
            let text = tokio::fs::read_to_string(&input).await.map_err(|e| {
                anyhow::anyhow!("Failed to read decomposition '{}': {}", input.display(), e)
            })?;
            let descriptors = config.registry(Duration::ZERO).descriptors();
            let parsed = DecompositionParser::new()
                .parse_detailed(&text, &descriptors)
                .ok_or_else(|| anyhow::anyhow!("No subtasks found in '{}'", input.display()))?;
            let pruned = Pruner::new(config.orchestrator.similarity_threshold)
                .prune(&parsed.graph, config.orchestrator.pruning_token_budget);
            let waves = compute_waves(&pruned.graph);
            info!(
                strategy = parsed.strategy,
                parsed = parsed.graph.len(),
                kept = pruned.graph.len(),
                waves = waves.len(),
                "Plan ready"
            );
            print_json(&serde_json::json!({
                "strategy": parsed.strategy,
                "subtasks": pruned.graph.subtasks(),
                "execution_order": pruned.graph.execution_order(),
                "total_cost": pruned.graph.total_cost(),
                "pruned": pruned.removed,
                "waves": waves,
            }))?;
        }
        Commands::Checkpoints { action } => match action {
            CheckpointAction::List { run, dir } => {
                let store = FileCheckpointStore::new(dir.unwrap_or_else(|| config.checkpoint_dir())).await?;
                let checkpoints = match run {
                    Some(run_id) => store.list_for_run(run_id).await?,
                    None => store.list_all().await?,
                };
                for checkpoint in &checkpoints {
                    println!(
                        "{}  run={}  phase={}  resumable={}  {}",
                        checkpoint.id,
                        checkpoint.run_id,
                        checkpoint.phase,
                        checkpoint.resumable,
                        checkpoint.created_at.to_rfc3339()
                    );
                }
                info!(count = checkpoints.len(), "Listed checkpoints");
            }
            CheckpointAction::Show { id, dir } => {
                let store = FileCheckpointStore::new(dir.unwrap_or_else(|| config.checkpoint_dir())).await?;
                let checkpoint = store
                    .load(id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("Checkpoint {id} not found"))?;
                print_json(&checkpoint)?;
            }
        },
        Commands::Simulate {
            task,
            delay_ms,
            cancel_after_ms,
        } => {
            let orchestrator = config.build_orchestrator(Duration::from_millis(delay_ms))?;
            let store: Arc<dyn CheckpointStore> =
                Arc::new(FileCheckpointStore::new(config.checkpoint_dir()).await?);
            let cancel = CancelToken::new();
            if let Some(after) = cancel_after_ms {
                let token = cancel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(after)).await;
                    warn!(after_ms = after, "Cancelling simulated run");
                    token.cancel(Some(format!("cancelled after {after} ms")));
                });
            }
            let context = AgentContext::new().with_history(vec![Message::user(task.clone())]);
            let result = orchestrator
                .orchestrate(&task, context, Some(cancel), Some(store))
                .await?;
            log_usage(&result);
            print_json(&result)?;
        }
        Commands::Resume { id } => {
            let store = Arc::new(FileCheckpointStore::new(config.checkpoint_dir()).await?);
            let checkpoint = store
                .load(id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Checkpoint {id} not found"))?;
            let orchestrator = config
                .build_orchestrator(Duration::ZERO)?
                .with_conversation_id(checkpoint.conversation_id);
            let sink: Arc<dyn CheckpointStore> = store;
            let result = orchestrator.resume(&checkpoint, None, Some(sink)).await?;
            log_usage(&result);
            print_json(&result)?;
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: ConductorConfig = toml::from_str("").unwrap();
        assert_eq!(config.agents.len(), 5);
        assert_eq!(config.orchestrator, OrchestratorConfig::default());
        assert_eq!(config.checkpoint_dir(), PathBuf::from("./data/checkpoints"));
    }

    #[test]
    fn test_config_with_orchestrator_table_and_agents() {
        let config: ConductorConfig = toml::from_str(
            r#"
            data_dir = "/tmp/conductor"

            [orchestrator]
            max_concurrency = 2
            smart_delegation = false

            [[agents]]
            id = "lead"
            name = "LeadAgent"
            capabilities = ["generalReasoning", "web search"]
            "#,
        )
        .unwrap();
        assert_eq!(config.orchestrator.max_concurrency, 2);
        assert!(!config.orchestrator.smart_delegation);
        assert_eq!(config.agents.len(), 1);
        let caps = config.agents[0].capability_set();
        assert!(caps.contains(&Capability::GeneralReasoning));
        assert!(caps.contains(&Capability::WebSearch));
        assert_eq!(config.registry(Duration::ZERO).len(), 1);
    }

    #[tokio::test]
    async fn test_load_config_from_file_and_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = load_config(&tmp.path().join("absent.toml")).await.unwrap();
        assert_eq!(missing.agents.len(), 5);

        let path = tmp.path().join("conductor.toml");
        tokio::fs::write(&path, "data_dir = \"/srv/conductor\"\n\n[orchestrator]\nmax_concurrency = 3\n")
            .await
            .unwrap();
        let config = load_config(&path).await.unwrap();
        assert_eq!(config.orchestrator.max_concurrency, 3);
        assert_eq!(config.checkpoint_dir(), PathBuf::from("/srv/conductor/checkpoints"));

        tokio::fs::write(&path, "[orchestrator]\nmax_concurrency = 0\n")
            .await
            .unwrap();
        assert!(load_config(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_simulated_run_with_default_agents() {
        let config = ConductorConfig::default();
        let orchestrator = config.build_orchestrator(Duration::ZERO).unwrap();
        let task = "Search the web for flights to Lisbon in May, then read the packing list file and finally analyse the travel budget numbers";
        let result = orchestrator
            .orchestrate(task, AgentContext::new(), None, None)
            .await
            .unwrap();
        assert!(result.success, "error: {:?}", result.error);
        assert!(result.delegated);
        assert!(!result.subtask_results.is_empty());
        assert!(result.agent_usage["coordinator"].calls >= 2);
        let json = serde_json::to_value(&result).unwrap();
        assert!(json["agent_usage"]["coordinator"]["prompt_tokens"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["conductor", "plan", "--input", "plan.md"]).unwrap();
        assert!(matches!(cli.command, Commands::Plan { .. }));
        let cli = Cli::try_parse_from(["conductor", "checkpoints", "list", "--dir", "/tmp/x"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Checkpoints {
                action: CheckpointAction::List { .. }
            }
        ));
    }
}
