//! Checkpoint value types saved and loaded by a [`super::Checkpointer`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a checkpoint was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// The initial state supplied when the run started.
    Input,
    /// Written after a node completed during normal graph execution.
    Loop,
    /// Written by an explicit state update outside the normal loop (e.g. resume).
    Update,
}

/// A saved snapshot of graph state at one point in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint<S> {
    pub id: String,
    pub state: S,
    pub created_at: DateTime<Utc>,
    /// Node id whose completion produced this checkpoint, if any (absent for
    /// the initial input checkpoint).
    pub node_id: Option<String>,
}

impl<S> Checkpoint<S> {
    pub fn new(id: impl Into<String>, state: S, node_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            state,
            created_at: Utc::now(),
            node_id,
        }
    }
}

/// Metadata stored alongside a [`Checkpoint`], without the (potentially large) state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub source: CheckpointSource,
    /// Step number within the run; -1 for the input checkpoint, 0+ thereafter.
    pub step: i64,
}

/// A checkpoint list entry: id and metadata, without the state payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointListItem {
    pub id: String,
    pub metadata: CheckpointMetadata,
}
