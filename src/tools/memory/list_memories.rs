use async_trait::async_trait;

use serde_json::json;

use crate::memory::{Namespace, Store};
use crate::registry::{ToolCallContent, ToolCallContext, ToolOutcome, ToolSourceError};
use crate::registry::Tool;

use super::map_store_error;

/// Tool name for the list_memories operation.
pub const TOOL_LIST_MEMORIES: &str = "list_memories";

/// Tool for listing all memory keys in the current namespace.
///
/// Wraps [`Store::list`] and exposes it as a tool for the LLM.
pub struct ListMemoriesTool {
    store: std::sync::Arc<dyn Store>,
    namespace: Namespace,
}

impl ListMemoriesTool {
    /// Creates a new ListMemoriesTool scoped to `namespace` (e.g. `[user_id]`).
    pub fn new(store: std::sync::Arc<dyn Store>, namespace: Namespace) -> Self {
        Self { store, namespace }
    }
}

#[async_trait]
impl Tool for ListMemoriesTool {
    fn name(&self) -> &str {
        TOOL_LIST_MEMORIES
    }

    fn spec(&self) -> crate::registry::ToolSpec {
        crate::registry::ToolSpec {
            name: TOOL_LIST_MEMORIES.to_string(),
            description: Some(
                "List all memory keys in the current namespace. Call when you need to see what \
                 has been stored before recalling or searching."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    async fn call(
        &self,
        _args: serde_json::Value,
        _ctx: Option<&ToolCallContext>,
    ) -> Result<ToolOutcome, ToolSourceError> {
        let items = self.store.list(&self.namespace).await.map_err(map_store_error)?;
        let keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();

        Ok(ToolOutcome::Result(ToolCallContent {
            text: serde_json::to_string(&keys).map_err(|e| ToolSourceError::InvalidInput(e.to_string()))?,
        }))
    }
}
