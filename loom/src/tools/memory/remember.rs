use async_trait::async_trait;
use serde_json::json;

use crate::memory::{Namespace, Store};
use crate::tool_source::{ToolCallContent, ToolCallContext, ToolSourceError};
use crate::tools::Tool;

pub const TOOL_REMEMBER: &str = "remember";

/// Writes a key-value pair into long-term memory (§4.G), namespaced per
/// agent/user. Wraps `Store::put`.
pub struct RememberTool {
    store: std::sync::Arc<dyn Store>,
    namespace: Namespace,
}

impl RememberTool {
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
impl Tool for RememberTool {
    fn name(&self) -> &str {
        TOOL_REMEMBER
    }

    fn spec(&self) -> crate::tool_source::ToolSpec {
        crate::tool_source::ToolSpec {
            name: TOOL_REMEMBER.to_string(),
            description: Some(
                "Store a key-value fact in long-term memory, to recall in future conversations."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "key": { "type": "string" },
                    "value": { "type": "string" }
                },
                "required": ["key", "value"]
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
        let value = args
            .get("value")
            .ok_or_else(|| ToolSourceError::InvalidInput("missing 'value'".to_string()))?;

        self.store
            .put(&self.namespace, key, value)
            .await
            .map_err(store_error_to_tool_error)?;

        Ok(ToolCallContent::text(format!("remembered '{key}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;

    #[tokio::test]
    async fn remember_then_get_round_trips() {
        let store = std::sync::Arc::new(InMemoryStore::new());
        let namespace = vec!["u1".to_string()];
        let tool = RememberTool::new(store.clone(), namespace.clone());
        tool.call(json!({"key": "coffee", "value": "likes coffee"}), None).await.unwrap();
        let value = store.get(&namespace, "coffee").await.unwrap();
        assert_eq!(value, Some(json!("likes coffee")));
    }

    #[tokio::test]
    async fn missing_key_is_invalid_input() {
        let store = std::sync::Arc::new(InMemoryStore::new());
        let tool = RememberTool::new(store, vec!["u1".to_string()]);
        let err = tool.call(json!({"value": "x"}), None).await.unwrap_err();
        assert!(matches!(err, ToolSourceError::InvalidInput(_)));
    }
}
