use crate::checkpoint::Checkpoint;
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Persistence for orchestration checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> ConductorResult<()>;
    async fn load(&self, id: Uuid) -> ConductorResult<Option<Checkpoint>>;
    /// Checkpoints of a conversation, oldest first.
    async fn list(&self, conversation_id: Uuid) -> ConductorResult<Vec<Checkpoint>>;
    /// Checkpoints of a single run, oldest first.
    async fn list_for_run(&self, run_id: Uuid) -> ConductorResult<Vec<Checkpoint>>;
    async fn delete(&self, id: Uuid) -> ConductorResult<()>;

    /// Most recent checkpoint of a run that can still be resumed.
    async fn latest_resumable(&self, run_id: Uuid) -> ConductorResult<Option<Checkpoint>> {
        Ok(self
            .list_for_run(run_id)
            .await?
            .into_iter()
            .rev()
            .find(|c| c.resumable))
    }
}

/// File-based checkpoint store (one JSON file per checkpoint).
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub async fn new(dir: PathBuf) -> ConductorResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn checkpoint_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Every checkpoint in the directory, oldest first. Unreadable files are
    /// logged and skipped.
    pub async fn list_all(&self) -> ConductorResult<Vec<Checkpoint>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut checkpoints = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".json") {
                    if let Ok(id) = Uuid::parse_str(stem) {
                        match self.load(id).await {
                            Ok(Some(checkpoint)) => checkpoints.push(checkpoint),
                            Ok(None) => {}
                            Err(e) => {
                                warn!(checkpoint_id = %id, error = %e, "Skipping unreadable checkpoint");
                            }
                        }
                    }
                }
            }
        }
        checkpoints.sort_by_key(|c| c.created_at);
        Ok(checkpoints)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> ConductorResult<()> {
        let path = self.checkpoint_path(checkpoint.id);
        let json = serde_json::to_string_pretty(checkpoint)?;
        tokio::fs::write(path, json).await?;
        debug!(checkpoint_id = %checkpoint.id, phase = %checkpoint.phase, "Checkpoint saved");
        Ok(())
    }

    async fn load(&self, id: Uuid) -> ConductorResult<Option<Checkpoint>> {
        let path = self.checkpoint_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path).await?;
        let checkpoint: Checkpoint = serde_json::from_str(&data).map_err(|e| {
            ConductorError::Checkpoint(format!("Failed to parse checkpoint {id}: {e}"))
        })?;
        Ok(Some(checkpoint))
    }

    async fn list(&self, conversation_id: Uuid) -> ConductorResult<Vec<Checkpoint>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|c| c.conversation_id == conversation_id)
            .collect())
    }

    async fn list_for_run(&self, run_id: Uuid) -> ConductorResult<Vec<Checkpoint>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|c| c.run_id == run_id)
            .collect())
    }

    async fn delete(&self, id: Uuid) -> ConductorResult<()> {
        let path = self.checkpoint_path(id);
        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }
}

/// In-memory checkpoint store, useful for tests and short-lived hosts.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<Uuid, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }

    async fn filtered(&self, keep: impl Fn(&Checkpoint) -> bool + Send) -> Vec<Checkpoint> {
        let checkpoints = self.checkpoints.read().await;
        let mut matching: Vec<Checkpoint> =
            checkpoints.values().filter(|c| keep(*c)).cloned().collect();
        matching.sort_by_key(|c| c.created_at);
        matching
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> ConductorResult<()> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.id, checkpoint.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> ConductorResult<Option<Checkpoint>> {
        Ok(self.checkpoints.read().await.get(&id).cloned())
    }

    async fn list(&self, conversation_id: Uuid) -> ConductorResult<Vec<Checkpoint>> {
        Ok(self
            .filtered(|c| c.conversation_id == conversation_id)
            .await)
    }

    async fn list_for_run(&self, run_id: Uuid) -> ConductorResult<Vec<Checkpoint>> {
        Ok(self.filtered(|c| c.run_id == run_id).await)
    }

    async fn delete(&self, id: Uuid) -> ConductorResult<()> {
        self.checkpoints.write().await.remove(&id);
        Ok(())
    }
}
