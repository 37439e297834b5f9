//! Checkpoints for pausing and resuming orchestration runs.
//!
//! A [`Checkpoint`] captures the progress snapshot, the original task and
//! the original context of a run at a phase boundary. Stores implement
//! [`CheckpointStore`]; [`FileCheckpointStore`] writes one JSON file per
//! checkpoint and [`MemoryCheckpointStore`] keeps them in a map.

/// Checkpoint type.
pub mod checkpoint;
/// Checkpoint store trait and implementations.
pub mod store;

pub use checkpoint::Checkpoint;
pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
