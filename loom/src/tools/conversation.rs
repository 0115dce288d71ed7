//! `get_recent_messages` tool (§ Glossary tool group `sessions`): surfaces
//! the call's recent-message window (already loaded by the Agent Loop, §4.K
//! step 2) back to the model without a separate session fetch.

use async_trait::async_trait;
use serde_json::json;

use crate::tool_source::{ToolCallContent, ToolCallContext, ToolSourceError};
use crate::tools::Tool;

pub const TOOL_GET_RECENT_MESSAGES: &str = "get_recent_messages";

pub struct GetRecentMessagesTool;

impl GetRecentMessagesTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GetRecentMessagesTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for GetRecentMessagesTool {
    fn name(&self) -> &str {
        TOOL_GET_RECENT_MESSAGES
    }

    fn spec(&self) -> crate::tool_source::ToolSpec {
        crate::tool_source::ToolSpec {
            name: TOOL_GET_RECENT_MESSAGES.to_string(),
            description: Some(
                "Return the most recent messages in the current session's history window.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": { "limit": { "type": "integer" } }
            }),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        ctx: Option<&ToolCallContext>,
    ) -> Result<ToolCallContent, ToolSourceError> {
        let limit = args.get("limit").and_then(|v| v.as_u64()).map(|n| n as usize);

        let messages = ctx
            .and_then(|c| c.recent_messages.as_ref())
            .map(|m| m.as_ref().clone())
            .unwrap_or_default();

        let slice: Vec<_> = match limit {
            Some(limit) if limit < messages.len() => messages[messages.len() - limit..].to_vec(),
            _ => messages,
        };

        let json_out = serde_json::to_string(&slice).map_err(|e| ToolSourceError::InvalidInput(e.to_string()))?;
        Ok(ToolCallContent::text(json_out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use std::sync::Arc;

    #[tokio::test]
    async fn no_context_returns_empty_list() {
        let tool = GetRecentMessagesTool::new();
        let result = tool.call(json!({}), None).await.unwrap();
        assert_eq!(result.for_llm, "[]");
    }

    #[tokio::test]
    async fn limit_returns_only_the_tail() {
        let tool = GetRecentMessagesTool::new();
        let mut ctx = ToolCallContext::default();
        ctx.recent_messages =
            Some(Arc::new(vec![Message::user("a"), Message::user("b"), Message::user("c")]));
        let result = tool.call(json!({"limit": 2}), Some(&ctx)).await.unwrap();
        let parsed: Vec<Message> = serde_json::from_str(&result.for_llm).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].content(), "b");
    }
}
