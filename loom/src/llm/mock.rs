//! Fixed-response `LlmClient` for tests and offline runs.

use async_trait::async_trait;

use crate::error::AgentError;
use crate::llm::{LlmClient, LlmResponse, LlmUsage};
use crate::message::{Message, ToolCall};

/// Returns a fixed assistant reply, optionally with fixed tool calls, for every
/// invocation. Used by tests and by the scheduler's dry-run mode.
pub struct MockLlm {
    content: String,
    tool_calls: Vec<ToolCall>,
}

impl MockLlm {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into(), tool_calls: Vec::new() }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(&self, _messages: &[Message]) -> Result<LlmResponse, AgentError> {
        Ok(LlmResponse {
            content: self.content.clone(),
            tool_calls: self.tool_calls.clone(),
            usage: Some(LlmUsage { prompt_tokens: 0, completion_tokens: 0, total_tokens: 0 }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invoke_returns_fixed_content() {
        let llm = MockLlm::new("hello");
        let resp = llm.invoke(&[Message::user("hi")]).await.unwrap();
        assert_eq!(resp.content, "hello");
        assert!(resp.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn invoke_returns_fixed_tool_calls() {
        let llm = MockLlm::new("").with_tool_calls(vec![ToolCall {
            id: "1".into(),
            name: "read_file".into(),
            arguments: serde_json::json!({"path": "a.txt"}),
        }]);
        let resp = llm.invoke(&[]).await.unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "read_file");
    }
}
