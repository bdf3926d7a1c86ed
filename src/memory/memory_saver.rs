//! In-process [`Checkpointer`] backed by a locked map. Suitable for tests and
//! single-process embedding; anything that needs checkpoints to survive a
//! restart brings its own implementation against the same trait.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::memory::checkpoint::{Checkpoint, CheckpointListItem, CheckpointMetadata, CheckpointSource};
use crate::memory::checkpointer::{CheckpointError, Checkpointer};
use crate::memory::config::RunnableConfig;

struct Slot<S> {
    checkpoint: Checkpoint<S>,
    metadata: CheckpointMetadata,
}

/// Keyed by `(thread_id, checkpoint_ns)`, each holding an ordered history of
/// checkpoints (most recent last).
#[derive(Default)]
pub struct MemorySaver<S> {
    threads: RwLock<HashMap<(String, String), Vec<Slot<S>>>>,
}

impl<S> MemorySaver<S> {
    pub fn new() -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<S> Checkpointer<S> for MemorySaver<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    async fn put(&self, config: &RunnableConfig, checkpoint: &Checkpoint<S>) -> Result<String, CheckpointError> {
        let thread_id = config.thread_id.clone().ok_or(CheckpointError::ThreadIdRequired)?;
        let mut threads = self.threads.write().map_err(|e| CheckpointError::Storage(e.to_string()))?;
        let history = threads.entry((thread_id, config.checkpoint_ns.clone())).or_default();
        let step = history.len() as i64 - 1;
        let source = if history.is_empty() {
            CheckpointSource::Input
        } else {
            CheckpointSource::Loop
        };
        history.push(Slot {
            checkpoint: checkpoint.clone(),
            metadata: CheckpointMetadata { source, step },
        });
        Ok(checkpoint.id.clone())
    }

    async fn get_tuple(
        &self,
        config: &RunnableConfig,
    ) -> Result<Option<(Checkpoint<S>, CheckpointMetadata)>, CheckpointError> {
        let thread_id = config.thread_id.clone().ok_or(CheckpointError::ThreadIdRequired)?;
        let threads = self.threads.read().map_err(|e| CheckpointError::Storage(e.to_string()))?;
        let Some(history) = threads.get(&(thread_id, config.checkpoint_ns.clone())) else {
            return Ok(None);
        };
        let slot = match &config.checkpoint_id {
            Some(id) => history.iter().find(|s| &s.checkpoint.id == id),
            None => history.last(),
        };
        Ok(slot.map(|s| (s.checkpoint.clone(), s.metadata.clone())))
    }

    async fn list(
        &self,
        config: &RunnableConfig,
        limit: Option<usize>,
        before: Option<&str>,
        after: Option<&str>,
    ) -> Result<Vec<CheckpointListItem>, CheckpointError> {
        let thread_id = config.thread_id.clone().ok_or(CheckpointError::ThreadIdRequired)?;
        let threads = self.threads.read().map_err(|e| CheckpointError::Storage(e.to_string()))?;
        let Some(history) = threads.get(&(thread_id, config.checkpoint_ns.clone())) else {
            return Ok(Vec::new());
        };

        let mut items: Vec<CheckpointListItem> = history
            .iter()
            .rev()
            .map(|s| CheckpointListItem {
                id: s.checkpoint.id.clone(),
                metadata: s.metadata.clone(),
            })
            .collect();

        if let Some(before) = before {
            if let Some(pos) = items.iter().position(|i| i.id == before) {
                items = items.split_off(pos + 1);
            }
        }
        if let Some(after) = after {
            if let Some(pos) = items.iter().position(|i| i.id == after) {
                items.truncate(pos);
            }
        }
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }
}
