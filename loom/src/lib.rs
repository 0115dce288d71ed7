//! # Loom
//!
//! An agent-orchestration runtime: one call context flows through a single
//! agent loop turn — think, call tools, optionally delegate or spawn
//! subagents, run quality-gate hooks, stream events out.
//!
//! ## Main modules
//!
//! - [`agent_loop`]: [`agent_loop::AgentLoop`] — drives one run end to end:
//!   bootstrap assembly, think/act turns, interceptors, streaming.
//! - [`session`]: session store and transcript persistence.
//! - [`policy`]: per-agent-type tool/model/approval policy resolution.
//! - [`bootstrap`]: system-prompt assembly from identity, tooling, skills, memory recall.
//! - [`context`]: [`context::CallContext`], [`context::PeerKind`] — per-turn identity and workspace.
//! - [`bus`]: in-process pub/sub event bus used for handoffs and notifications.
//! - [`hooks`]: [`hooks::HookEngine`] — command or agent-reviewer quality gates.
//! - [`interceptors`]: pluggable pre/post hooks around a turn (e.g. memory writes).
//! - [`scheduler`]: heartbeat and delayed-run scheduling.
//! - [`subagent`]: [`subagent::SubagentManager`] — spawns and tracks subagent runs.
//! - [`delegate`]: [`delegate::DelegateManager`] — synchronous delegation with hook gating.
//! - [`team`]: [`team::TeamCoordinator`] — multi-agent routing and handoff.
//! - [`skills`]: skill discovery and the `skill` tool.
//! - [`llm`]: [`LlmClient`] trait, [`MockLlm`], [`ChatOpenAI`].
//! - [`memory`]: [`Store`] trait and its backends, hybrid search, embeddings.
//! - [`tool_source`]: [`ToolSource`], [`ToolSpec`]; [`WebToolsSource`], [`BashToolsSource`].
//! - [`tools`]: built-in tools (`bash`, file, memory, skill, todo, web) and the [`tools::ToolRegistry`].
//! - [`message`]: [`Message`] (System / User / Assistant), [`message::ToolCall`].
//! - [`stream`]: [`StreamWriter`], [`StreamEvent`] for per-run streaming output.
//! - [`compress`]: context-window compaction ([`CompactionConfig`]).
//! - [`config`]: run config summaries for logging ([`RunConfigSummary`]).
//! - [`error`]: [`AgentError`].
//!
//! Key types are re-exported at crate root: `use loom::{AgentError, Message, MockLlm};`.

pub mod compress;
pub mod config;
pub mod error;
pub mod llm;
pub mod memory;
pub mod message;
pub mod stream;
pub mod tool_source;
pub mod tools;

// Agent-orchestration core: session/call-context plumbing, policy, and the
// components that drive one run end to end.
pub mod agent_loop;
pub mod agent_model;
pub mod bootstrap;
pub mod bus;
pub mod context;
pub mod delegate;
pub mod hooks;
pub mod interceptors;
pub mod policy;
pub mod scheduler;
pub mod session;
pub mod skills;
pub mod subagent;
pub mod team;

pub use compress::CompactionConfig;
pub use config::{
    build_config_summary, ConfigSection, EmbeddingConfigSummary, LlmConfigSummary,
    MemoryConfigSummary, RunConfigSummary, RunConfigSummarySource, ToolConfigSummary,
};
pub use error::AgentError;
pub use llm::ChatOpenAI;
pub use llm::{LlmClient, LlmResponse, LlmUsage, MockLlm, ToolChoiceMode};
pub use memory::Embedder;
pub use memory::OpenAIEmbedder;
pub use memory::{
    FilterOp, InMemoryStore, Item, ListNamespacesOptions, MatchCondition, Namespace,
    NamespaceMatchType, SearchItem, SearchOptions, Store, StoreError, StoreOp, StoreOpResult,
    StoreSearchHit,
};
pub use memory::SqliteStore;
pub use message::Message;
pub use stream::{run_channel, StreamEvent, StreamWriter, ToolStreamWriter};
pub use tool_source::{
    BashToolsSource, MemoryToolsSource, StoreToolSource, ToolCallContent, ToolCallContext,
    ToolSource, ToolSourceError, ToolSpec, WebToolsSource,
};
pub use tools::{AggregateToolSource, ExecuteParams, RateLimiter, Tool, ToolRegistry};
