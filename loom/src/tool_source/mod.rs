//! Tool execution surface (§4.C/D): the `ToolSource` trait composing
//! registries of tools, the `Tool` trait itself (in `crate::tools`), and the
//! shared result/context/error/spec types every tool implementation and
//! every caller converges on.

mod bash_tools_source;
mod memory_tools_source;
mod store_tool_source;
mod web_tools_source;

pub use bash_tools_source::BashToolsSource;
pub use memory_tools_source::MemoryToolsSource;
pub use store_tool_source::StoreToolSource;
pub use web_tools_source::WebToolsSource;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::context::CallContext;
use crate::error::AgentError;

/// JSON-schema-described tool specification, handed to the LLM provider and
/// used to validate incoming tool-call arguments.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// Per-call context threaded into `Tool::call` (§4.C Context Propagation):
/// everything a tool might need beyond its own arguments, without giving it
/// access to the agent loop's internals.
#[derive(Clone, Default)]
pub struct ToolCallContext {
    pub channel: Option<String>,
    pub chat_id: Option<String>,
    pub peer_kind: Option<String>,
    pub sandbox_key: Option<String>,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub workspace: Option<Arc<std::path::PathBuf>>,
    pub recent_messages: Option<Arc<Vec<crate::message::Message>>>,
    pub stream: Option<crate::stream::ToolStreamWriter>,
}

impl ToolCallContext {
    pub fn from_call_context(ctx: &CallContext) -> Self {
        Self {
            channel: Some(ctx.channel.clone()),
            chat_id: Some(ctx.chat_id.clone()),
            peer_kind: Some(format!("{:?}", ctx.peer_kind)),
            sandbox_key: ctx.sandbox_key.clone(),
            user_id: ctx.user_id.clone(),
            agent_id: Some(ctx.agent_id.clone()),
            workspace: Some(ctx.workspace.clone()),
            recent_messages: Some(ctx.recent_messages.clone()),
            stream: ctx.stream_writer.clone(),
        }
    }
}

/// The result of one tool call (§4.C): `for_llm` is fed back into the
/// conversation; `for_user`, if non-empty, is surfaced directly on the
/// outbound channel. Both halves are independently credential-scrubbed by
/// the Tool Registry before being returned to a caller.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct ToolCallContent {
    pub for_llm: String,
    pub for_user: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub is_async: bool,
}

impl ToolCallContent {
    /// The common case: the same text is both fed back to the model and (if
    /// the channel surfaces it) shown to the user.
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self { for_user: text.clone(), for_llm: text, media: Vec::new(), is_error: false, is_async: false }
    }

    /// For tools whose model-facing and user-facing text genuinely differ
    /// (e.g. a search tool returning full results to the model but a short
    /// summary to the user).
    pub fn split(for_llm: impl Into<String>, for_user: impl Into<String>) -> Self {
        Self { for_llm: for_llm.into(), for_user: for_user.into(), media: Vec::new(), is_error: false, is_async: false }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let mut content = Self::text(message);
        content.is_error = true;
        content
    }

    pub fn with_media(mut self, media: Vec<String>) -> Self {
        self.media = media;
        self
    }
}

#[derive(Debug, Error)]
pub enum ToolSourceError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl From<ToolSourceError> for AgentError {
    fn from(e: ToolSourceError) -> Self {
        match e {
            ToolSourceError::NotFound(s) => AgentError::NotFound(s),
            ToolSourceError::InvalidInput(s) => AgentError::InvalidRequest(s),
            ToolSourceError::Transport(s) => AgentError::Unavailable(s),
            ToolSourceError::Unauthorized(s) => AgentError::Unauthorized(s),
            ToolSourceError::ResourceExhausted(s) => AgentError::ResourceExhausted(s),
        }
    }
}

/// A source of callable tools: a single tool, a composite registry, or an
/// adapter over an external protocol. The Agent Loop only ever depends on
/// this trait, never on a concrete tool list.
#[async_trait]
pub trait ToolSource: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolSourceError>;

    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<ToolCallContent, ToolSourceError>;

    async fn call_tool_with_context(
        &self,
        name: &str,
        arguments: serde_json::Value,
        ctx: Option<&ToolCallContext>,
    ) -> Result<ToolCallContent, ToolSourceError> {
        let _ = ctx;
        self.call_tool(name, arguments).await
    }

    /// Sets ambient call context (sandbox key, workspace, stream writer) used
    /// by sources that hold state across calls rather than threading context
    /// through every call site.
    fn set_call_context(&self, ctx: Option<ToolCallContext>) {
        let _ = ctx;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_sets_both_halves_identically() {
        let c = ToolCallContent::text("hello");
        assert_eq!(c.for_llm, "hello");
        assert_eq!(c.for_user, "hello");
        assert!(!c.is_error);
    }

    #[test]
    fn split_keeps_halves_independent() {
        let c = ToolCallContent::split("full result for model", "short summary");
        assert_eq!(c.for_llm, "full result for model");
        assert_eq!(c.for_user, "short summary");
    }

    #[test]
    fn error_sets_is_error_flag() {
        let c = ToolCallContent::error("boom");
        assert!(c.is_error);
        assert_eq!(c.for_llm, "boom");
    }
}
