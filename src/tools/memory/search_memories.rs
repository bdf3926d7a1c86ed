use async_trait::async_trait;

use serde_json::json;

use crate::memory::{Namespace, Store};
use crate::registry::Tool;
use crate::registry::{ToolCallContent, ToolCallContext, ToolOutcome, ToolSourceError};

use super::map_store_error;

/// Tool name for the search_memories operation.
pub const TOOL_SEARCH_MEMORIES: &str = "search_memories";

const DEFAULT_LIMIT: usize = 10;

/// Tool for searching long-term memories by a substring query (optional) with
/// a result limit (optional).
///
/// [`Store`] exposes no index beyond `list`/`get`, so this filters by whether
/// `query` appears in the key or the serialized value; embedding-backed
/// recall is an embedder's concern, not this crate's (§1 non-goal).
pub struct SearchMemoriesTool {
    store: std::sync::Arc<dyn Store>,
    namespace: Namespace,
}

impl SearchMemoriesTool {
    /// Creates a new SearchMemoriesTool scoped to `namespace` (e.g. `[user_id]`).
    pub fn new(store: std::sync::Arc<dyn Store>, namespace: Namespace) -> Self {
        Self { store, namespace }
    }
}

#[async_trait]
impl Tool for SearchMemoriesTool {
    fn name(&self) -> &str {
        TOOL_SEARCH_MEMORIES
    }

    fn spec(&self) -> crate::registry::ToolSpec {
        crate::registry::ToolSpec {
            name: TOOL_SEARCH_MEMORIES.to_string(),
            description: Some(
                "Search long-term memories by query (optional) and limit (optional). Call when you need \
                 to find relevant past information before answering or acting."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Substring to match against keys and values (optional)" },
                    "limit": { "type": "integer", "description": "Max results (default 10)" }
                }
            }),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        _ctx: Option<&ToolCallContext>,
    ) -> Result<ToolOutcome, ToolSourceError> {
        let query = args.get("query").and_then(|v| v.as_str()).map(str::to_lowercase);
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_LIMIT);

        let items = self.store.list(&self.namespace).await.map_err(map_store_error)?;

        let hits: Vec<serde_json::Value> = items
            .into_iter()
            .filter(|item| match &query {
                None => true,
                Some(q) => {
                    item.key.to_lowercase().contains(q) || item.value.to_string().to_lowercase().contains(q)
                }
            })
            .take(limit)
            .map(|item| json!({"key": item.key, "value": item.value}))
            .collect();

        Ok(ToolOutcome::Result(ToolCallContent {
            text: serde_json::to_string(&hits).map_err(|e| ToolSourceError::InvalidInput(e.to_string()))?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;

    #[tokio::test]
    async fn filters_by_query_substring() {
        let store = std::sync::Arc::new(InMemoryStore::new());
        let ns = vec!["u".to_string()];
        store.put(&ns, "coffee", json!("likes coffee")).await.unwrap();
        store.put(&ns, "tea", json!("dislikes tea")).await.unwrap();

        let tool = SearchMemoriesTool::new(store, ns);
        let out = tool.call(json!({"query": "coffee"}), None).await.unwrap();
        match out {
            ToolOutcome::Result(c) => {
                assert!(c.text.contains("coffee"));
                assert!(!c.text.contains("tea"));
            }
            _ => panic!("expected result"),
        }
    }
}
