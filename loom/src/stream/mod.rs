//! Streaming types for agent runs.
//!
//! Per §9 Design Notes: "Streaming is a write-only event channel keyed by run
//! id." There is no generic graph-state type parameter here — events are keyed
//! by `run_id` (a `String`) and delivered over a plain `tokio::sync::mpsc`
//! channel that the scheduler/agent loop owns for the duration of one run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One chunk of streamed assistant content, or a structured run event.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental assistant text delta.
    MessageChunk { run_id: String, content: String },
    /// A tool call the model has decided to invoke (emitted before execution).
    ToolCallStart { run_id: String, tool_call_id: String, name: String },
    /// The result of a tool call.
    ToolCallEnd { run_id: String, tool_call_id: String, is_error: bool },
    /// Token usage for the last completion.
    Usage { run_id: String, prompt_tokens: u32, completion_tokens: u32, total_tokens: u32 },
    /// Arbitrary structured payload (progress, custom tool events).
    Custom { run_id: String, payload: serde_json::Value },
    /// The run has finished.
    End { run_id: String, reply: String },
    /// The run was cancelled.
    Cancelled { run_id: String },
    /// The run failed terminally.
    Error { run_id: String, message: String },
}

impl StreamEvent {
    pub fn run_id(&self) -> &str {
        match self {
            StreamEvent::MessageChunk { run_id, .. }
            | StreamEvent::ToolCallStart { run_id, .. }
            | StreamEvent::ToolCallEnd { run_id, .. }
            | StreamEvent::Usage { run_id, .. }
            | StreamEvent::Custom { run_id, .. }
            | StreamEvent::End { run_id, .. }
            | StreamEvent::Cancelled { run_id, .. }
            | StreamEvent::Error { run_id, .. } => run_id,
        }
    }
}

/// A cheap, clonable sender half for a single run's stream channel.
///
/// Sequence numbers are assigned per writer instance (one writer per run),
/// which gives §5's "chunk events for a given run id are emitted in
/// monotonically increasing sequence" for free as long as all emits for a run
/// go through the same (possibly cloned) `StreamWriter`.
#[derive(Clone)]
pub struct StreamWriter {
    run_id: Arc<str>,
    tx: Option<mpsc::Sender<StreamEvent>>,
}

impl StreamWriter {
    pub fn new(run_id: impl Into<Arc<str>>, tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { run_id: run_id.into(), tx: Some(tx) }
    }

    /// A writer that discards everything; used when a run was not requested
    /// to stream.
    pub fn noop(run_id: impl Into<Arc<str>>) -> Self {
        Self { run_id: run_id.into(), tx: None }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    async fn send(&self, event: StreamEvent) -> bool {
        match &self.tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    pub async fn emit_chunk(&self, content: impl Into<String>) -> bool {
        self.send(StreamEvent::MessageChunk {
            run_id: self.run_id.to_string(),
            content: content.into(),
        })
        .await
    }

    pub async fn emit_tool_call_start(&self, tool_call_id: impl Into<String>, name: impl Into<String>) -> bool {
        self.send(StreamEvent::ToolCallStart {
            run_id: self.run_id.to_string(),
            tool_call_id: tool_call_id.into(),
            name: name.into(),
        })
        .await
    }

    pub async fn emit_tool_call_end(&self, tool_call_id: impl Into<String>, is_error: bool) -> bool {
        self.send(StreamEvent::ToolCallEnd {
            run_id: self.run_id.to_string(),
            tool_call_id: tool_call_id.into(),
            is_error,
        })
        .await
    }

    pub async fn emit_usage(&self, prompt_tokens: u32, completion_tokens: u32, total_tokens: u32) -> bool {
        self.send(StreamEvent::Usage {
            run_id: self.run_id.to_string(),
            prompt_tokens,
            completion_tokens,
            total_tokens,
        })
        .await
    }

    pub async fn emit_custom(&self, payload: serde_json::Value) -> bool {
        self.send(StreamEvent::Custom { run_id: self.run_id.to_string(), payload }).await
    }

    pub async fn emit_end(&self, reply: impl Into<String>) -> bool {
        self.send(StreamEvent::End { run_id: self.run_id.to_string(), reply: reply.into() }).await
    }

    pub async fn emit_cancelled(&self) -> bool {
        self.send(StreamEvent::Cancelled { run_id: self.run_id.to_string() }).await
    }

    pub async fn emit_error(&self, message: impl Into<String>) -> bool {
        self.send(StreamEvent::Error { run_id: self.run_id.to_string(), message: message.into() }).await
    }

    pub fn is_active(&self) -> bool {
        self.tx.is_some()
    }
}

/// Type-erased writer handed to tools, which are state-agnostic and must not
/// depend on the agent loop's internals.
#[derive(Clone)]
pub struct ToolStreamWriter {
    inner: StreamWriter,
}

impl ToolStreamWriter {
    pub fn new(inner: StreamWriter) -> Self {
        Self { inner }
    }

    pub fn noop() -> Self {
        Self { inner: StreamWriter::noop("noop") }
    }

    pub async fn emit_custom(&self, payload: serde_json::Value) -> bool {
        self.inner.emit_custom(payload).await
    }
}

impl Default for ToolStreamWriter {
    fn default() -> Self {
        Self::noop()
    }
}

/// Creates a bounded channel for one run's stream events; capacity matches the
/// bus's per-subscriber buffer convention (§4.A, 256).
pub fn run_channel(run_id: impl Into<Arc<str>>) -> (StreamWriter, mpsc::Receiver<StreamEvent>) {
    let (tx, rx) = mpsc::channel(256);
    (StreamWriter::new(run_id, tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_writer_never_sends() {
        let w = StreamWriter::noop("r1");
        assert!(!w.is_active());
        assert!(!w.emit_chunk("hi").await);
    }

    #[tokio::test]
    async fn run_channel_delivers_events_in_send_order() {
        let (w, mut rx) = run_channel("r1");
        w.emit_chunk("a").await;
        w.emit_chunk("b").await;
        w.emit_end("ab").await;

        let e1 = rx.recv().await.unwrap();
        let e2 = rx.recv().await.unwrap();
        let e3 = rx.recv().await.unwrap();
        assert!(matches!(e1, StreamEvent::MessageChunk { content, .. } if content == "a"));
        assert!(matches!(e2, StreamEvent::MessageChunk { content, .. } if content == "b"));
        assert!(matches!(e3, StreamEvent::End { reply, .. } if reply == "ab"));
        assert_eq!(e1.run_id(), "r1");
    }

    #[tokio::test]
    async fn tool_stream_writer_noop_is_inert() {
        let w = ToolStreamWriter::noop();
        assert!(!w.emit_custom(serde_json::json!({"a": 1})).await);
    }
}
