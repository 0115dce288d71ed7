//! Agent Loop (§4.H): given a resolved call context and an inbound message,
//! runs the think/act cycle — LLM call, tool execution, repeat — until the
//! model stops calling tools, the iteration cap is hit, or the run is
//! cancelled.
//!
//! The loop owns none of its dependencies: session storage, the LLM client,
//! the tool registry, and the policy catalog are all injected so the same
//! loop logic drives every agent regardless of provider or tool set.

mod sanitize;

pub use sanitize::{sanitize, SanitizeAction, SanitizeFinding, SanitizeOutcome};

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::bootstrap::{self, BootstrapInput, BootstrapMode};
use crate::compress::{compaction, context_window, CompactionConfig};
use crate::context::CallContext;
use crate::error::AgentError;
use crate::interceptors::FsInterceptorChain;
use crate::llm::LlmClient;
use crate::message::Message;
use crate::policy::{visible_tools, PolicyCatalog, PolicyInput};
use crate::session::SessionStore;
use crate::stream::StreamWriter;
use crate::tool_source::ToolSpec;
use crate::tools::{ExecuteParams, ToolRegistry};

/// Emitted (verbatim, or as a substring of the final assistant message) when
/// a run produced nothing worth surfacing outbound — a heartbeat tick or
/// background housekeeping step with no news for the user.
pub const NO_REPLY_SENTINEL: &str = "<<NO_REPLY>>";

/// Tool names short-circuited through the Virtual FS Interceptors (§4.E)
/// before falling through to the Tool Registry's real filesystem path.
const INTERCEPTED_READ_TOOLS: &[&str] = &["read_file"];
const INTERCEPTED_WRITE_TOOLS: &[&str] = &["write_file"];

/// One inbound run request (§4.H).
pub struct RunRequest {
    pub session_key: String,
    pub message: String,
    pub user_id: Option<String>,
    pub channel: String,
    pub chat_id: String,
    pub peer_kind: String,
    pub run_id: String,
    pub stream: Option<StreamWriter>,
    pub history_limit: Option<usize>,
    pub extra_system_prompt: Option<String>,
    pub parent_trace_id: Option<String>,
    pub parent_root_span_id: Option<String>,
}

/// How a run ended, for trace finalization and scheduler bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
    Failed,
}

/// Outcome of one completed (or cancelled/failed) run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub reply: String,
    /// True when the reply matched the no-reply sentinel and should not be
    /// sent to an outbound channel.
    pub suppressed: bool,
    pub iterations: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Tunables for one agent's loop (§4.H, §4.G adaptive-throttle inputs).
/// Distinct from the persisted `Agent` row so tests can drive a loop without
/// a full agent; callers typically derive this from `Agent` + deployment
/// defaults.
#[derive(Clone, Debug)]
pub struct AgentLoopConfig {
    pub model: String,
    pub provider: String,
    pub max_tool_iterations: u32,
    pub context_window: u32,
    /// Tokens permanently reserved for the model's own completion.
    pub reserve_floor: u32,
    /// Extra headroom below the hard reserve at which compaction kicks in
    /// early, before the hard ceiling is actually hit.
    pub soft_threshold: u32,
    pub max_message_chars: usize,
    pub sanitize_action: SanitizeAction,
    pub memory_flush_max_iterations: u32,
    pub memory_flush_timeout: Duration,
    pub compaction: CompactionConfig,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            provider: "openai".to_string(),
            max_tool_iterations: 20,
            context_window: 128_000,
            reserve_floor: 4_096,
            soft_threshold: 8_192,
            max_message_chars: 32_000,
            sanitize_action: SanitizeAction::Warn,
            memory_flush_max_iterations: 5,
            memory_flush_timeout: Duration::from_secs(90),
            compaction: CompactionConfig::default(),
        }
    }
}

/// Drives one agent's think/act cycle over injected dependencies.
pub struct AgentLoop {
    sessions: Arc<dyn SessionStore>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    policy_catalog: Arc<PolicyCatalog>,
    interceptors: Option<Arc<FsInterceptorChain>>,
    config: AgentLoopConfig,
}

impl AgentLoop {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        policy_catalog: Arc<PolicyCatalog>,
        config: AgentLoopConfig,
    ) -> Self {
        Self { sessions, llm, tools, policy_catalog, interceptors: None, config }
    }

    pub fn with_interceptors(mut self, interceptors: Arc<FsInterceptorChain>) -> Self {
        self.interceptors = Some(interceptors);
        self
    }

    /// Runs one full cycle for `request` under `call_ctx`, with `policy_input`
    /// controlling which tools are visible and `bootstrap_input` supplying
    /// every resolved system-prompt section (§4.F). `cancel` is checked
    /// between iterations and between tool calls for cooperative
    /// cancellation (§4.G).
    pub async fn run(
        &self,
        call_ctx: CallContext,
        policy_input: PolicyInput,
        bootstrap_input: BootstrapInput,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, AgentError> {
        let span = info_span!(
            "agent",
            run_id = %request.run_id,
            session_key = %request.session_key,
            trace_id = %call_ctx.trace_id,
            parent_trace_id = request.parent_trace_id.as_deref().unwrap_or(""),
        );
        self.run_inner(call_ctx, policy_input, bootstrap_input, request, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        call_ctx: CallContext,
        policy_input: PolicyInput,
        bootstrap_input: BootstrapInput,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, AgentError> {
        let mut session = self
            .sessions
            .get_or_create(&request.session_key, &self.config.model, &self.config.provider)
            .await?;

        let guard = sanitize::sanitize(&request.message, self.config.sanitize_action);
        if guard.blocked {
            return Err(AgentError::InvalidRequest(
                "message rejected by input guard (suspected prompt injection)".to_string(),
            ));
        }
        let user_content = sanitize::truncate_message(&guard.content, self.config.max_message_chars);
        self.sessions.append_message(&request.session_key, Message::user(user_content.clone())).await?;
        session.messages.push(Message::user(user_content));

        let mut messages = session.messages.clone();
        if let Some(extra) = &request.extra_system_prompt {
            messages.push(Message::system(extra.clone()));
        }

        let system_prompt = bootstrap::assemble_system_prompt(BootstrapMode::Full, &bootstrap_input);

        let visible = visible_tools(&self.policy_catalog, &policy_input);
        let all_tools = self.tools.list_tools().await?;
        let tool_specs: Vec<ToolSpec> = all_tools.into_iter().filter(|t| visible.contains(&t.name)).collect();

        let mut final_reply = String::new();
        let mut flushed_this_cycle = false;
        let mut iterations: u32 = 0;
        let mut status = RunStatus::Completed;

        'outer: while iterations < self.config.max_tool_iterations {
            if cancel.is_cancelled() {
                status = RunStatus::Cancelled;
                break;
            }
            iterations += 1;

            if !flushed_this_cycle {
                let reserve = self.config.reserve_floor + self.config.soft_threshold;
                let check = context_window::ContextWindowCheck {
                    messages: &messages,
                    usage: Some((session.input_tokens as u32, session.output_tokens as u32)),
                    message_count_after_last_think: None,
                    max_context_tokens: self.config.context_window,
                    reserve_tokens: reserve,
                };
                if context_window::is_overflow(&check) {
                    self.run_memory_flush(&call_ctx, &mut messages, &tool_specs).await;
                    messages = compaction::compact(&messages, self.llm.as_ref(), &self.config.compaction).await?;
                    session.compaction_count += 1;
                    flushed_this_cycle = true;
                    self.sessions.set_summary(&request.session_key, messages.first().map(|m| m.content().to_string())).await?;
                }
            }

            let call_span = info_span!("llm_call", iteration = iterations);
            let mut full_messages = Vec::with_capacity(messages.len() + 1);
            full_messages.push(Message::system(system_prompt.clone()));
            full_messages.extend(messages.iter().cloned());

            let chunk_tx = request.stream.as_ref().map(|w| self.chunk_channel(w.clone()));
            let response = self
                .llm
                .invoke_with_tools(&full_messages, &tool_specs, chunk_tx.as_ref().map(|(tx, _)| tx.clone()))
                .instrument(call_span.clone())
                .await?;
            if let Some((_, handle)) = chunk_tx {
                handle.abort();
            }
            if let Some(usage) = &response.usage {
                self.sessions
                    .accumulate_tokens(&request.session_key, usage.prompt_tokens as u64, usage.completion_tokens as u64)
                    .await?;
                session.input_tokens += usage.prompt_tokens as u64;
                session.output_tokens += usage.completion_tokens as u64;
                if let Some(writer) = &request.stream {
                    writer.emit_usage(usage.prompt_tokens, usage.completion_tokens, usage.total_tokens).await;
                }
            }
            debug!(iteration = iterations, tool_call_count = response.tool_calls.len(), "llm_call complete");

            let assistant = Message::assistant_with_tool_calls(response.content.clone(), response.tool_calls.clone());
            self.sessions.append_message(&request.session_key, assistant.clone()).await?;
            messages.push(assistant);
            final_reply = response.content.clone();

            if response.tool_calls.is_empty() {
                break;
            }

            for tool_call in &response.tool_calls {
                if cancel.is_cancelled() {
                    status = RunStatus::Cancelled;
                    break 'outer;
                }
                if let Some(writer) = &request.stream {
                    writer.emit_tool_call_start(tool_call.id.clone(), tool_call.name.clone()).await;
                }

                let tool_span = info_span!("tool_call", name = %tool_call.name, id = %tool_call.id);
                let result = self
                    .execute_tool(&call_ctx, &tool_call.name, tool_call.arguments.clone())
                    .instrument(tool_span)
                    .await;

                let (content, is_error) = match result {
                    Ok(content) => (content, false),
                    Err(e) => {
                        warn!(tool = %tool_call.name, error = %e, "tool call failed");
                        (e.user_message().to_string(), true)
                    }
                };
                if let Some(writer) = &request.stream {
                    writer.emit_tool_call_end(tool_call.id.clone(), is_error).await;
                }

                let tool_msg = Message::tool_result(tool_call.id.clone(), content, is_error);
                self.sessions.append_message(&request.session_key, tool_msg.clone()).await?;
                messages.push(tool_msg);
            }
        }

        let suppressed = final_reply.contains(NO_REPLY_SENTINEL);
        if let Some(writer) = &request.stream {
            match status {
                RunStatus::Cancelled => {
                    writer.emit_cancelled().await;
                }
                _ if !suppressed => {
                    writer.emit_end(final_reply.clone()).await;
                }
                _ => {}
            }
        }

        self.sessions.save(&request.session_key).await?;

        Ok(RunOutcome {
            run_id: request.run_id,
            status,
            reply: final_reply,
            suppressed,
            iterations,
            input_tokens: session.input_tokens,
            output_tokens: session.output_tokens,
        })
    }

    /// Bridges a `StreamWriter` (`StreamEvent`-typed) to the plain
    /// `Sender<String>` the `LlmClient` trait expects for content deltas,
    /// tagging each delta with the run id as it crosses the boundary.
    fn chunk_channel(&self, writer: StreamWriter) -> (tokio::sync::mpsc::Sender<String>, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(64);
        let handle = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                writer.emit_chunk(chunk).await;
            }
        });
        (tx, handle)
    }

    /// Executes one tool call, consulting the Virtual FS Interceptors first
    /// for `read_file`/`write_file` (§4.E) before falling through to the
    /// Tool Registry's sandbox/host resolution. The interceptors need
    /// `CallContext::agent_type`, which the registry's flattened
    /// `ExecuteParams`/`ToolCallContext` intentionally don't carry, so the
    /// short-circuit happens here rather than inside the registry or the
    /// tools themselves.
    async fn execute_tool(&self, call_ctx: &CallContext, name: &str, args: serde_json::Value) -> Result<String, AgentError> {
        if let Some(interceptors) = &self.interceptors {
            if INTERCEPTED_READ_TOOLS.contains(&name) {
                if let Some(path) = args.get("path").and_then(|v| v.as_str()) {
                    if let Some(content) = interceptors.intercept_read(call_ctx, path).await? {
                        return Ok(content);
                    }
                }
            }
            if INTERCEPTED_WRITE_TOOLS.contains(&name) {
                if let (Some(path), Some(content)) = (
                    args.get("path").and_then(|v| v.as_str()),
                    args.get("content").and_then(|v| v.as_str()),
                ) {
                    if interceptors.intercept_write(call_ctx, path, content).await? {
                        return Ok("wrote file".to_string());
                    }
                }
            }
        }

        let result = self
            .tools
            .execute_with_context(ExecuteParams {
                name,
                args,
                channel: &call_ctx.channel,
                chat_id: &call_ctx.chat_id,
                peer_kind: &format!("{:?}", call_ctx.peer_kind),
                sandbox_key: call_ctx.sandbox_key.as_deref(),
                user_id: call_ctx.user_id.as_deref(),
                agent_id: &call_ctx.agent_id,
                workspace: call_ctx.workspace.clone(),
            })
            .await?;
        Ok(result.for_llm)
    }

    /// Bounded mini-loop (§4.H step 5a): gives the model a last chance to
    /// write important context to memory/files before the conversation is
    /// compacted away. Runs at most `memory_flush_max_iterations` turns or
    /// until `memory_flush_timeout` elapses, whichever comes first; failures
    /// are logged and swallowed since compaction proceeds regardless.
    async fn run_memory_flush(&self, call_ctx: &CallContext, messages: &mut Vec<Message>, tool_specs: &[ToolSpec]) {
        let prompt = Message::system(
            "Context is about to be compacted. If there is anything important you'll need later \
             that isn't already saved, use write_file or remember to save it now. Reply with a \
             short confirmation when done."
                .to_string(),
        );
        let mut flush_messages = messages.clone();
        flush_messages.push(prompt);

        let started = Instant::now();
        for _ in 0..self.config.memory_flush_max_iterations {
            if started.elapsed() >= self.config.memory_flush_timeout {
                break;
            }
            let remaining = self.config.memory_flush_timeout.saturating_sub(started.elapsed());
            let response = match tokio::time::timeout(
                remaining,
                self.llm.invoke_with_tools(&flush_messages, tool_specs, None),
            )
            .await
            {
                Ok(Ok(r)) => r,
                Ok(Err(e)) => {
                    warn!(error = %e, "memory-flush LLM call failed");
                    return;
                }
                Err(_) => {
                    warn!("memory-flush mini-loop timed out");
                    return;
                }
            };

            if response.tool_calls.is_empty() {
                return;
            }
            flush_messages.push(Message::assistant_with_tool_calls(response.content, response.tool_calls.clone()));
            for tool_call in &response.tool_calls {
                let result = self.execute_tool(call_ctx, &tool_call.name, tool_call.arguments.clone()).await;
                let (content, is_error) = match result {
                    Ok(c) => (c, false),
                    Err(e) => (e.user_message().to_string(), true),
                };
                flush_messages.push(Message::tool_result(tool_call.id.clone(), content, is_error));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PeerKind;
    use crate::llm::MockLlm;
    use crate::session::InMemorySessionStore;
    use crate::tools::AggregateToolSource;
    use std::path::PathBuf;

    fn call_ctx() -> CallContext {
        CallContext::new(
            "agent-1",
            "my-agent",
            crate::agent_model::AgentType::Open,
            "telegram",
            "chat-1",
            PeerKind::Direct,
            PathBuf::from("/tmp/loom-agent-loop-tests"),
            "trace-1",
        )
    }

    fn request(run_id: &str) -> RunRequest {
        RunRequest {
            session_key: "agent:agent-1:telegram:direct:chat-1".to_string(),
            message: "hello there".to_string(),
            user_id: None,
            channel: "telegram".to_string(),
            chat_id: "chat-1".to_string(),
            peer_kind: "direct".to_string(),
            run_id: run_id.to_string(),
            stream: None,
            history_limit: None,
            extra_system_prompt: None,
            parent_trace_id: None,
            parent_root_span_id: None,
        }
    }

    fn make_loop(llm: Arc<dyn LlmClient>) -> AgentLoop {
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let tools = Arc::new(ToolRegistry::new(Arc::new(AggregateToolSource::new())));
        let catalog = Arc::new(PolicyCatalog::default());
        AgentLoop::new(sessions, llm, tools, catalog, AgentLoopConfig::default())
    }

    #[tokio::test]
    async fn run_with_no_tool_calls_completes_on_first_iteration() {
        let agent_loop = make_loop(Arc::new(MockLlm::new("hi back")));
        let outcome = agent_loop
            .run(call_ctx(), PolicyInput::default(), BootstrapInput::default(), request("run-1"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.reply, "hi back");
        assert_eq!(outcome.iterations, 1);
        assert!(!outcome.suppressed);
    }

    #[tokio::test]
    async fn no_reply_sentinel_is_detected_as_suppressed() {
        let agent_loop = make_loop(Arc::new(MockLlm::new(NO_REPLY_SENTINEL)));
        let outcome = agent_loop
            .run(call_ctx(), PolicyInput::default(), BootstrapInput::default(), request("run-2"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.suppressed);
    }

    #[tokio::test]
    async fn pre_cancelled_token_stops_before_first_iteration() {
        let agent_loop = make_loop(Arc::new(MockLlm::new("should not run")));
        let token = CancellationToken::new();
        token.cancel();
        let outcome = agent_loop
            .run(call_ctx(), PolicyInput::default(), BootstrapInput::default(), request("run-3"), &token)
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert_eq!(outcome.iterations, 0);
    }

    #[tokio::test]
    async fn tool_calls_without_registered_tool_record_error_result_and_continue() {
        // MockLlm always returns the same unresolvable tool call, so the loop
        // runs until max_tool_iterations is exhausted; bound it for the test.
        let llm: Arc<dyn LlmClient> = Arc::new(
            MockLlm::new("").with_tool_calls(vec![crate::message::ToolCall {
                id: "1".to_string(),
                name: "does_not_exist".to_string(),
                arguments: serde_json::json!({}),
            }]),
        );
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let tools = Arc::new(ToolRegistry::new(Arc::new(AggregateToolSource::new())));
        let catalog = Arc::new(PolicyCatalog::default());
        let config = AgentLoopConfig { max_tool_iterations: 2, ..AgentLoopConfig::default() };
        let agent_loop = AgentLoop::new(sessions, llm, tools, catalog, config);

        let outcome = agent_loop
            .run(call_ctx(), PolicyInput::default(), BootstrapInput::default(), request("run-4"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.iterations, 2);
    }

    #[test]
    fn policy_catalog_with_no_profiles_yields_no_visible_tools() {
        let catalog = PolicyCatalog::default();
        let input = PolicyInput { global_profile: "full".to_string(), ..Default::default() };
        assert!(visible_tools(&catalog, &input).is_empty());
    }
}
