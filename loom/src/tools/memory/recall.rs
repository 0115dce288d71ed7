use async_trait::async_trait;
use serde_json::json;

use crate::memory::{Namespace, Store};
use crate::tool_source::{ToolCallContent, ToolCallContext, ToolSourceError};
use crate::tools::Tool;

pub const TOOL_RECALL: &str = "recall";

/// Reads a value by key from long-term memory (§4.G). Wraps `Store::get`.
pub struct RecallTool {
    store: std::sync::Arc<dyn Store>,
    namespace: Namespace,
}

impl RecallTool {
    pub fn new(store: std::sync::Arc<dyn Store>, namespace: Namespace) -> Self {
        Self { store, namespace }
    }
}

fn store_error_to_tool_error(e: crate::memory::StoreError) -> ToolSourceError {
    match e {
        crate::memory::StoreError::NotFound => ToolSourceError::NotFound("key not found".to_string()),
        crate::memory::StoreError::Serialization(s) => ToolSourceError::InvalidInput(s),
        crate::memory::StoreError::Storage(s) => ToolSourceError::Transport(s),
        crate::memory::StoreError::EmbeddingError(s) => ToolSourceError::Transport(s),
    }
}

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        TOOL_RECALL
    }

    fn spec(&self) -> crate::tool_source::ToolSpec {
        crate::tool_source::ToolSpec {
            name: TOOL_RECALL.to_string(),
            description: Some("Recall a previously-remembered value by its key.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": { "key": { "type": "string" } },
                "required": ["key"]
            }),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        _ctx: Option<&ToolCallContext>,
    ) -> Result<ToolCallContent, ToolSourceError> {
        let key = args
            .get("key")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolSourceError::InvalidInput("missing 'key'".to_string()))?;

        let value = self.store.get(&self.namespace, key).await.map_err(store_error_to_tool_error)?;

        match value {
            Some(v) => Ok(ToolCallContent::text(
                serde_json::to_string(&v).map_err(|e| ToolSourceError::InvalidInput(e.to_string()))?,
            )),
            None => Ok(ToolCallContent::text(format!("no memory found for '{key}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;

    #[tokio::test]
    async fn recall_missing_key_returns_not_found_message_not_error() {
        let store = std::sync::Arc::new(InMemoryStore::new());
        let tool = RecallTool::new(store, vec!["u1".to_string()]);
        let result = tool.call(json!({"key": "missing"}), None).await.unwrap();
        assert!(result.for_llm.contains("no memory found"));
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn recall_after_put_returns_value() {
        let store = std::sync::Arc::new(InMemoryStore::new());
        let namespace = vec!["u1".to_string()];
        store.put(&namespace, "k", &json!("v")).await.unwrap();
        let tool = RecallTool::new(store, namespace);
        let result = tool.call(json!({"key": "k"}), None).await.unwrap();
        assert!(result.for_llm.contains('v'));
    }
}
