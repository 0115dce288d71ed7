//! Composes a fixed set of [`Tool`]s into one [`ToolSource`] (§4.C/D). Used by
//! every per-capability tool source (bash, web, memory, ...) as their
//! internal registry, and directly by the Tool Registry to aggregate all
//! capability sources into the one `ToolSource` the Agent Loop holds.

use std::sync::RwLock;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::tool_source::{ToolCallContent, ToolCallContext, ToolSource, ToolSourceError, ToolSpec};
use crate::tools::Tool;

pub struct AggregateToolSource {
    tools: DashMap<String, Box<dyn Tool>>,
    call_context: RwLock<Option<ToolCallContext>>,
}

impl AggregateToolSource {
    pub fn new() -> Self {
        Self { tools: DashMap::new(), call_context: RwLock::new(None) }
    }

    /// Registers a tool. Named `register_async` for parity with the
    /// teacher's capability-source constructors, which are themselves async
    /// (they may probe the environment before returning); registration
    /// itself is synchronous.
    pub async fn register_async(&self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn register_sync(&self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }
}

impl Default for AggregateToolSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolSource for AggregateToolSource {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolSourceError> {
        Ok(self.tools.iter().map(|entry| entry.value().spec()).collect())
    }

    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<ToolCallContent, ToolSourceError> {
        let ctx = self.call_context.read().unwrap().clone();
        self.call_tool_with_context(name, arguments, ctx.as_ref()).await
    }

    async fn call_tool_with_context(
        &self,
        name: &str,
        arguments: serde_json::Value,
        ctx: Option<&ToolCallContext>,
    ) -> Result<ToolCallContent, ToolSourceError> {
        let ctx = ctx.cloned().or_else(|| self.call_context.read().unwrap().clone());
        let tool = self.tools.get(name).ok_or_else(|| ToolSourceError::NotFound(name.to_string()))?;
        tool.call(arguments, ctx.as_ref()).await
    }

    fn set_call_context(&self, ctx: Option<ToolCallContext>) {
        *self.call_context.write().unwrap() = ctx;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{GetRecentMessagesTool, TOOL_GET_RECENT_MESSAGES};

    #[tokio::test]
    async fn list_tools_reflects_registrations() {
        let source = AggregateToolSource::new();
        source.register_async(Box::new(GetRecentMessagesTool::new())).await;
        let specs = source.list_tools().await.unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, TOOL_GET_RECENT_MESSAGES);
    }

    #[tokio::test]
    async fn call_tool_unknown_name_is_not_found() {
        let source = AggregateToolSource::new();
        let err = source.call_tool("nope", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolSourceError::NotFound(_)));
    }

    #[tokio::test]
    async fn set_call_context_is_used_when_call_tool_omits_one() {
        let source = AggregateToolSource::new();
        source.register_async(Box::new(GetRecentMessagesTool::new())).await;
        let mut ctx = ToolCallContext::default();
        ctx.user_id = Some("u1".to_string());
        source.set_call_context(Some(ctx));
        // Calling without an explicit context must still pick up the ambient one.
        let result = source.call_tool(TOOL_GET_RECENT_MESSAGES, serde_json::json!({})).await;
        assert!(result.is_ok());
    }
}
