//! Session Store (§4.B): write-behind cache mapping session-key → message
//! history, summary, counters, and model/provider, persisted on explicit
//! `save` with an atomic overwrite.
//!
//! Session-key grammar (§3, persisted verbatim):
//! - `agent:{agentId}:{channel}:direct:{peerId}`
//! - `agent:{agentId}:{channel}:group:{peerId}` (optionally `:topic:{n}`)
//! - `agent:{agentId}:subagent:{label}`
//! - `agent:{agentId}:cron:{jobId}:run:{runId}`
//! - `agent:{agentId}:main`
//! - `delegate:{shortSrcId}:{targetKey}:{delegationId}`

mod key;
mod memory_store;
mod sqlite_store;

pub use key::{PeerScope, SessionKey};
pub use memory_store::InMemorySessionStore;
pub use sqlite_store::SqliteSessionStore;

use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::message::Message;

/// Where a session was spawned from, carried for provenance/trace linkage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnOrigin {
    #[default]
    Inbound,
    Subagent,
    Delegate,
    Cron,
}

/// A session's full mutable state (§3 Session attributes).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    pub messages: Vec<Message>,
    pub summary: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub compaction_count: u32,
    pub memory_flush_count: u32,
    pub last_flush_at: Option<SystemTime>,
    pub label: Option<String>,
    pub spawn_origin: SpawnOrigin,
    pub spawn_depth: u32,
    pub model: String,
    pub provider: String,
    pub updated_at: SystemTime,
}

impl Session {
    pub fn new(key: impl Into<String>, model: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            messages: Vec::new(),
            summary: None,
            input_tokens: 0,
            output_tokens: 0,
            compaction_count: 0,
            memory_flush_count: 0,
            last_flush_at: None,
            label: None,
            spawn_origin: SpawnOrigin::default(),
            spawn_depth: 0,
            model: model.into(),
            provider: provider.into(),
            updated_at: SystemTime::now(),
        }
    }

    /// Total tokens accumulated so far; used by the scheduler's adaptive
    /// throttle (§5) against the agent's context window.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Write-behind session cache + persistence backend (§4.B). `list` and
/// `delete` always bypass the cache; `save` is the only persistence write and
/// must be atomic (temp-then-rename for file backends, `UPDATE` for SQL).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads `key` from cache, falling back to persistence on miss and
    /// creating a fresh session if it doesn't exist there either.
    async fn get_or_create(&self, key: &str, model: &str, provider: &str) -> Result<Session, AgentError>;

    async fn append_message(&self, key: &str, message: Message) -> Result<(), AgentError>;

    async fn set_summary(&self, key: &str, summary: Option<String>) -> Result<(), AgentError>;

    async fn accumulate_tokens(&self, key: &str, input: u64, output: u64) -> Result<(), AgentError>;

    async fn update_metadata(
        &self,
        key: &str,
        label: Option<String>,
        model: Option<String>,
    ) -> Result<(), AgentError>;

    /// Flushes the cached session for `key` to persistence. Must be called at
    /// the natural end of a run; in-memory writes are never lost silently
    /// because the agent loop always reaches this boundary, even on error or
    /// cancellation (§4.K step 7).
    async fn save(&self, key: &str) -> Result<(), AgentError>;

    /// Lists all known session keys, bypassing the cache.
    async fn list(&self) -> Result<Vec<String>, AgentError>;

    /// Removes a session from both the cache and persistence.
    async fn delete(&self, key: &str) -> Result<(), AgentError>;

    /// Empties messages and summary while preserving the row (counters,
    /// label, model, provider survive a reset).
    async fn reset(&self, key: &str) -> Result<(), AgentError>;
}
