//! Per-run configuration threaded to the checkpointer and graph store.

use serde::{Deserialize, Serialize};

/// Identifies which thread (and, for subgraphs, which checkpoint namespace) a
/// run belongs to, plus which checkpoint to resume from. Mirrors §3's
/// `RunContext` fields that concern persistence rather than execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnableConfig {
    pub thread_id: Option<String>,
    pub checkpoint_id: Option<String>,
    #[serde(default)]
    pub checkpoint_ns: String,
    pub user_id: Option<String>,
    pub resume_from_node_id: Option<String>,
}

impl RunnableConfig {
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_no_thread() {
        let c = RunnableConfig::default();
        assert!(c.thread_id.is_none());
        assert_eq!(c.checkpoint_ns, "");
    }

    #[test]
    fn for_thread_sets_thread_id_only() {
        let c = RunnableConfig::for_thread("t1");
        assert_eq!(c.thread_id.as_deref(), Some("t1"));
        assert!(c.checkpoint_id.is_none());
    }
}
