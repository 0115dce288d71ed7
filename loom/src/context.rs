//! Context propagation (§4.C): immutable per-call metadata flowed through the
//! call tree without mutation.
//!
//! Every per-call datum — user id, agent id, agent type, channel, chat id, peer
//! kind, sandbox key, workspace, trace id, skip-hooks — is carried on `CallContext`
//! only. Tool instances are shared (`Arc<dyn Tool>`) across concurrent calls and
//! must never hold per-call state on their own struct (§9 Design Notes).

use std::path::PathBuf;
use std::sync::Arc;

use crate::agent_model::AgentType;
use crate::message::Message;
use crate::stream::ToolStreamWriter;

/// Direct vs. group peer, carried from the inbound message through to tool calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerKind {
    Direct,
    Group,
}

/// Immutable per-call context. Cheap to clone (`Arc` internals where large).
#[derive(Clone, Debug)]
pub struct CallContext {
    pub user_id: Option<String>,
    pub agent_id: String,
    pub agent_key: String,
    pub agent_type: AgentType,
    pub channel: String,
    pub chat_id: String,
    pub peer_kind: PeerKind,
    pub sandbox_key: Option<String>,
    pub workspace: Arc<PathBuf>,
    pub trace_id: String,
    pub root_span_id: Option<String>,
    pub skip_hooks: bool,
    pub is_subagent: bool,
    pub subagent_depth: u32,
    pub subagent_at_max_depth: bool,
    pub recent_messages: Arc<Vec<Message>>,
    pub stream_writer: Option<ToolStreamWriter>,
}

impl CallContext {
    pub fn new(
        agent_id: impl Into<String>,
        agent_key: impl Into<String>,
        agent_type: AgentType,
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        peer_kind: PeerKind,
        workspace: PathBuf,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: None,
            agent_id: agent_id.into(),
            agent_key: agent_key.into(),
            agent_type,
            channel: channel.into(),
            chat_id: chat_id.into(),
            peer_kind,
            sandbox_key: None,
            workspace: Arc::new(workspace),
            trace_id: trace_id.into(),
            root_span_id: None,
            skip_hooks: false,
            is_subagent: false,
            subagent_depth: 0,
            subagent_at_max_depth: false,
            recent_messages: Arc::new(Vec::new()),
            stream_writer: None,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_sandbox_key(mut self, key: impl Into<String>) -> Self {
        self.sandbox_key = Some(key.into());
        self
    }

    pub fn with_skip_hooks(mut self, skip: bool) -> Self {
        self.skip_hooks = skip;
        self
    }

    pub fn with_subagent(mut self, depth: u32, at_max_depth: bool) -> Self {
        self.is_subagent = true;
        self.subagent_depth = depth;
        self.subagent_at_max_depth = at_max_depth;
        self
    }

    pub fn with_recent_messages(mut self, messages: Vec<Message>) -> Self {
        self.recent_messages = Arc::new(messages);
        self
    }

    pub fn with_stream_writer(mut self, writer: ToolStreamWriter) -> Self {
        self.stream_writer = Some(writer);
        self
    }

    /// A child context carrying `skip_hooks = true` — used for recursion
    /// prevention (evaluator delegations, evaluator-optimizer loop iterations,
    /// hook-internal agent evaluations). Everything else is inherited verbatim.
    pub fn child_with_skip_hooks(&self) -> Self {
        let mut c = self.clone();
        c.skip_hooks = true;
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> CallContext {
        CallContext::new(
            "agent-1",
            "my-agent",
            AgentType::Open,
            "telegram",
            "chat-1",
            PeerKind::Direct,
            PathBuf::from("/workspace"),
            "trace-1",
        )
    }

    #[test]
    fn child_with_skip_hooks_sets_flag_without_mutating_original() {
        let ctx = base();
        assert!(!ctx.skip_hooks);
        let child = ctx.child_with_skip_hooks();
        assert!(child.skip_hooks);
        assert!(!ctx.skip_hooks, "original context must remain unmutated");
        assert_eq!(child.trace_id, ctx.trace_id);
    }

    #[test]
    fn builder_methods_compose() {
        let ctx = base()
            .with_user_id("u1")
            .with_sandbox_key("sbx-1")
            .with_subagent(1, true);
        assert_eq!(ctx.user_id.as_deref(), Some("u1"));
        assert_eq!(ctx.sandbox_key.as_deref(), Some("sbx-1"));
        assert!(ctx.is_subagent);
        assert!(ctx.subagent_at_max_depth);
    }
}
