use async_trait::async_trait;

use serde_json::json;

use crate::memory::{Namespace, Store};
use crate::registry::Tool;
use crate::registry::{ToolCallContent, ToolCallContext, ToolOutcome, ToolSourceError};

use super::map_store_error;

/// Tool name for the recall operation.
pub const TOOL_RECALL: &str = "recall";

/// Tool for fetching a single memory by key.
pub struct RecallTool {
    store: std::sync::Arc<dyn Store>,
    namespace: Namespace,
}

impl RecallTool {
    /// Creates a new RecallTool scoped to `namespace` (e.g. `[user_id]`).
    pub fn new(store: std::sync::Arc<dyn Store>, namespace: Namespace) -> Self {
        Self { store, namespace }
    }
}

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        TOOL_RECALL
    }

    fn spec(&self) -> crate::registry::ToolSpec {
        crate::registry::ToolSpec {
            name: TOOL_RECALL.to_string(),
            description: Some("Fetch a previously remembered value by key.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "key": { "type": "string", "description": "Memory key." }
                },
                "required": ["key"]
            }),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        _ctx: Option<&ToolCallContext>,
    ) -> Result<ToolOutcome, ToolSourceError> {
        let key = args
            .get("key")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolSourceError::InvalidInput("missing key".to_string()))?;

        let item = self.store.get(&self.namespace, key).await.map_err(map_store_error)?;

        let text = match item {
            Some(item) => item.value.to_string(),
            None => "null".to_string(),
        };

        Ok(ToolOutcome::Result(ToolCallContent { text }))
    }
}
