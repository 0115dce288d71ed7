//! Scheduler (§4.J): named concurrency lanes plus per-session-key FIFO
//! queues with debounce, drop policy, and adaptive throttling.
//!
//! Lanes bound how many runs of a given origin can be in flight at once
//! ([`tokio::sync::Semaphore`] per lane); session queues bound how many
//! messages for one conversation can be queued and decide what happens when
//! a new message arrives while a run is already in flight.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;

/// Global cross-session debounce window; `/stop`/`/stopall` bypass this (and
/// the per-session debounce) entirely.
pub const GLOBAL_DEBOUNCE_MS: u64 = 1_000;
const STOP_COMMANDS: &[&str] = &["/stop", "/stopall"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lane {
    Main,
    Subagent,
    Delegate,
    Cron,
}

impl Lane {
    /// Unrecognized lane names fall back to `main` rather than erroring, so a
    /// caller that forgets to tag a run still gets bounded concurrency.
    pub fn from_name(name: &str) -> Self {
        match name {
            "subagent" => Lane::Subagent,
            "delegate" => Lane::Delegate,
            "cron" => Lane::Cron,
            _ => Lane::Main,
        }
    }

    pub fn capacity(self) -> usize {
        match self {
            Lane::Main => 2,
            Lane::Subagent => 4,
            Lane::Delegate => 100,
            Lane::Cron => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueMode {
    /// Wait for a free concurrency slot.
    Queue,
    /// Like `Queue`, but the message is understood to be a followup to an
    /// already-running conversation rather than a fresh entry point.
    Followup,
    /// Cancel whatever is running, drop anything queued, and start fresh.
    Interrupt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropPolicy {
    /// Drop the oldest queued message to make room for the new one.
    Old,
    /// Refuse the new message with a queue-full error.
    New,
}

#[derive(Clone, Copy, Debug)]
pub struct SessionQueueConfig {
    pub mode: QueueMode,
    pub capacity: usize,
    pub drop: DropPolicy,
    pub debounce_ms: u64,
    /// Direct sessions run one at a time; group sessions allow up to 3.
    pub max_concurrent: usize,
}

impl SessionQueueConfig {
    pub fn direct() -> Self {
        Self { mode: QueueMode::Queue, capacity: 10, drop: DropPolicy::Old, debounce_ms: 800, max_concurrent: 1 }
    }

    pub fn group() -> Self {
        Self { max_concurrent: 3, ..Self::direct() }
    }
}

/// Drops `max_concurrent` to 1 once a session's token usage crosses 60% of
/// its context window, until the next compaction resets the ratio (§4.H
/// step 5a runs compaction; the caller re-derives `token_ratio` afterward).
pub fn effective_max_concurrent(config: &SessionQueueConfig, token_ratio: f32) -> usize {
    if token_ratio > 0.6 {
        1
    } else {
        config.max_concurrent
    }
}

#[derive(Clone, Debug)]
pub struct QueuedMessage {
    pub run_id: String,
    pub content: String,
    pub metadata: serde_json::Value,
    enqueued_at: Instant,
}

pub enum EnqueueOutcome {
    /// A new entry was appended to the session's pending queue.
    Accepted { run_id: String },
    /// Merged into the most recently queued (not yet dispatched) message,
    /// because it arrived within the debounce window.
    Merged { run_id: String },
    /// The queue was at capacity and the drop policy refused the message.
    Refused,
}

struct SessionState {
    config: SessionQueueConfig,
    pending: VecDeque<QueuedMessage>,
    active_token: Option<CancellationToken>,
}

impl SessionState {
    fn new(config: SessionQueueConfig) -> Self {
        Self { config, pending: VecDeque::new(), active_token: None }
    }
}

/// Owns every lane semaphore and every session's queue state.
pub struct Scheduler {
    lanes: DashMap<&'static str, Arc<Semaphore>>,
    sessions: DashMap<String, Mutex<SessionState>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let lanes = DashMap::new();
        for (name, lane) in [("main", Lane::Main), ("subagent", Lane::Subagent), ("delegate", Lane::Delegate), ("cron", Lane::Cron)] {
            lanes.insert(name, Arc::new(Semaphore::new(lane.capacity())));
        }
        Self { lanes, sessions: DashMap::new() }
    }

    fn lane_semaphore(&self, lane: Lane) -> Arc<Semaphore> {
        let name = match lane {
            Lane::Main => "main",
            Lane::Subagent => "subagent",
            Lane::Delegate => "delegate",
            Lane::Cron => "cron",
        };
        self.lanes.get(name).expect("all four lanes are seeded in new()").clone()
    }

    /// Blocks until a concurrency slot in `lane` is free, returning a permit
    /// that releases it on drop.
    pub async fn acquire_lane(&self, lane: Lane) -> tokio::sync::OwnedSemaphorePermit {
        self.lane_semaphore(lane)
            .acquire_owned()
            .await
            .expect("lane semaphore is never closed")
    }

    fn session(&self, session_key: &str, config: SessionQueueConfig) -> dashmap::mapref::one::Ref<'_, String, Mutex<SessionState>> {
        self.sessions
            .entry(session_key.to_string())
            .or_insert_with(|| Mutex::new(SessionState::new(config)));
        self.sessions.get(session_key).expect("just inserted")
    }

    /// Enqueues a message for `session_key`, applying debounce merge, the
    /// configured drop policy, and (for `interrupt` mode) cancellation of
    /// whatever is currently running.
    pub async fn enqueue(
        &self,
        session_key: &str,
        run_id: impl Into<String>,
        content: impl Into<String>,
        metadata: serde_json::Value,
        config: SessionQueueConfig,
    ) -> EnqueueOutcome {
        let run_id = run_id.into();
        let content = content.into();
        let is_stop_command = STOP_COMMANDS.contains(&content.trim());

        let entry = self.session(session_key, config);
        let mut state = entry.value().lock().await;
        let now = Instant::now();

        if state.config.mode == QueueMode::Interrupt {
            if let Some(token) = state.active_token.take() {
                token.cancel();
            }
            state.pending.clear();
        }

        if !is_stop_command {
            if let Some(last) = state.pending.back_mut() {
                if now.duration_since(last.enqueued_at) < Duration::from_millis(state.config.debounce_ms) {
                    last.content = format!("{}\n{}", last.content, content);
                    last.metadata = metadata;
                    let merged_id = last.run_id.clone();
                    return EnqueueOutcome::Merged { run_id: merged_id };
                }
            }
        }

        if state.pending.len() >= state.config.capacity {
            match state.config.drop {
                DropPolicy::Old => {
                    state.pending.pop_front();
                }
                DropPolicy::New => return EnqueueOutcome::Refused,
            }
        }

        state.pending.push_back(QueuedMessage { run_id: run_id.clone(), content, metadata, enqueued_at: now });
        EnqueueOutcome::Accepted { run_id }
    }

    /// Pops the next pending message for `session_key`, registering a fresh
    /// cancellation token as the session's active run.
    pub async fn dequeue(&self, session_key: &str) -> Option<(QueuedMessage, CancellationToken)> {
        let entry = self.sessions.get(session_key)?;
        let mut state = entry.value().lock().await;
        let message = state.pending.pop_front()?;
        let token = CancellationToken::new();
        state.active_token = Some(token.clone());
        Some((message, token))
    }

    /// Fires the cancellation token for `session_key`'s active run, if any.
    /// Observed cooperatively by the agent loop, tool calls, and LLM calls.
    pub async fn cancel(&self, session_key: &str, run_id: &str) -> Result<(), AgentError> {
        let entry = self
            .sessions
            .get(session_key)
            .ok_or_else(|| AgentError::NotFound(format!("no active session queue for {session_key}")))?;
        let mut state = entry.value().lock().await;
        match state.active_token.take() {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(AgentError::FailedPrecondition(format!("no active run {run_id} for {session_key}"))),
        }
    }

    pub async fn pending_len(&self, session_key: &str) -> usize {
        match self.sessions.get(session_key) {
            Some(entry) => entry.value().lock().await.pending.len(),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_lane_name_falls_back_to_main() {
        assert_eq!(Lane::from_name("bogus").capacity(), Lane::Main.capacity());
        assert_eq!(Lane::from_name("cron").capacity(), 1);
        assert_eq!(Lane::from_name("delegate").capacity(), 100);
    }

    #[test]
    fn adaptive_throttle_drops_to_one_above_sixty_percent() {
        let config = SessionQueueConfig::group();
        assert_eq!(effective_max_concurrent(&config, 0.5), 3);
        assert_eq!(effective_max_concurrent(&config, 0.61), 1);
    }

    #[tokio::test]
    async fn lane_semaphore_bounds_concurrent_acquires() {
        let scheduler = Scheduler::new();
        let _p1 = scheduler.acquire_lane(Lane::Cron).await;
        let second = tokio::time::timeout(Duration::from_millis(50), scheduler.acquire_lane(Lane::Cron)).await;
        assert!(second.is_err(), "cron lane has capacity 1, a second acquire must block");
    }

    #[tokio::test]
    async fn enqueue_within_debounce_window_merges() {
        let scheduler = Scheduler::new();
        let config = SessionQueueConfig::direct();
        let first = scheduler.enqueue("s1", "r1", "hello", serde_json::json!({}), config).await;
        assert!(matches!(first, EnqueueOutcome::Accepted { .. }));
        let second = scheduler.enqueue("s1", "r2", "world", serde_json::json!({}), config).await;
        assert!(matches!(second, EnqueueOutcome::Merged { .. }));
        assert_eq!(scheduler.pending_len("s1").await, 1);
    }

    #[tokio::test]
    async fn drop_old_policy_evicts_oldest_at_capacity() {
        let scheduler = Scheduler::new();
        let mut config = SessionQueueConfig::direct();
        config.capacity = 1;
        config.debounce_ms = 0;
        scheduler.enqueue("s1", "r1", "first", serde_json::json!({}), config).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = scheduler.enqueue("s1", "r2", "second", serde_json::json!({}), config).await;
        assert!(matches!(second, EnqueueOutcome::Accepted { .. }));
        assert_eq!(scheduler.pending_len("s1").await, 1);
    }

    #[tokio::test]
    async fn drop_new_policy_refuses_at_capacity() {
        let scheduler = Scheduler::new();
        let mut config = SessionQueueConfig::direct();
        config.capacity = 1;
        config.drop = DropPolicy::New;
        config.debounce_ms = 0;
        scheduler.enqueue("s1", "r1", "first", serde_json::json!({}), config).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = scheduler.enqueue("s1", "r2", "second", serde_json::json!({}), config).await;
        assert!(matches!(second, EnqueueOutcome::Refused));
    }

    #[tokio::test]
    async fn interrupt_mode_cancels_active_run_and_drains_queue() {
        let scheduler = Scheduler::new();
        let mut config = SessionQueueConfig::direct();
        config.debounce_ms = 0;
        scheduler.enqueue("s1", "r1", "first", serde_json::json!({}), config).await;
        let (_, token) = scheduler.dequeue("s1").await.unwrap();
        scheduler.enqueue("s1", "r2", "queued", serde_json::json!({}), config).await;

        let mut interrupt_config = config;
        interrupt_config.mode = QueueMode::Interrupt;
        let outcome = scheduler.enqueue("s1", "r3", "interrupt this", serde_json::json!({}), interrupt_config).await;
        assert!(matches!(outcome, EnqueueOutcome::Accepted { .. }));
        assert!(token.is_cancelled());
        assert_eq!(scheduler.pending_len("s1").await, 1);
    }

    #[tokio::test]
    async fn stop_command_bypasses_debounce_merge() {
        let scheduler = Scheduler::new();
        let config = SessionQueueConfig::direct();
        scheduler.enqueue("s1", "r1", "hello", serde_json::json!({}), config).await;
        let outcome = scheduler.enqueue("s1", "r2", "/stop", serde_json::json!({}), config).await;
        assert!(matches!(outcome, EnqueueOutcome::Accepted { .. }));
        assert_eq!(scheduler.pending_len("s1").await, 2);
    }

    #[tokio::test]
    async fn cancel_fires_active_token() {
        let scheduler = Scheduler::new();
        let config = SessionQueueConfig::direct();
        scheduler.enqueue("s1", "r1", "hello", serde_json::json!({}), config).await;
        let (_, token) = scheduler.dequeue("s1").await.unwrap();
        scheduler.cancel("s1", "r1").await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_without_active_run_is_failed_precondition() {
        let scheduler = Scheduler::new();
        let config = SessionQueueConfig::direct();
        scheduler.enqueue("s1", "r1", "hello", serde_json::json!({}), config).await;
        let err = scheduler.cancel("s1", "r1").await.unwrap_err();
        assert!(matches!(err, AgentError::FailedPrecondition(_)));
    }
}
