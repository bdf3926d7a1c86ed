use async_trait::async_trait;

use serde_json::json;

use crate::memory::{Namespace, Store};
use crate::registry::Tool;
use crate::registry::{ToolCallContent, ToolCallContext, ToolOutcome, ToolSourceError};

use super::map_store_error;

/// Tool name for the remember operation.
pub const TOOL_REMEMBER: &str = "remember";

/// Tool for storing a key/value memory in the current namespace.
pub struct RememberTool {
    store: std::sync::Arc<dyn Store>,
    namespace: Namespace,
}

impl RememberTool {
    /// Creates a new RememberTool scoped to `namespace` (e.g. `[user_id]`).
    pub fn new(store: std::sync::Arc<dyn Store>, namespace: Namespace) -> Self {
        Self { store, namespace }
    }
}

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &str {
        TOOL_REMEMBER
    }

    fn spec(&self) -> crate::registry::ToolSpec {
        crate::registry::ToolSpec {
            name: TOOL_REMEMBER.to_string(),
            description: Some(
                "Store a piece of information under a key for later recall. Overwrites any \
                 existing value at that key."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "key": { "type": "string", "description": "Memory key." },
                    "value": { "description": "Value to store (any JSON value)." }
                },
                "required": ["key", "value"]
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
        let value = args
            .get("value")
            .cloned()
            .ok_or_else(|| ToolSourceError::InvalidInput("missing value".to_string()))?;

        self.store.put(&self.namespace, key, value).await.map_err(map_store_error)?;

        Ok(ToolOutcome::Result(ToolCallContent {
            text: format!("remembered {key}"),
        }))
    }
}
