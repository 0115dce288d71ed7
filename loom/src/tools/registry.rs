//! Tool Registry (§4.C, labeled D in the component table): holds named
//! tools, injects per-call metadata, enforces a per-session rate limit, and
//! scrubs credentials from tool output before it reaches the model or the
//! user.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::AgentError;
use crate::tool_source::{ToolCallContent, ToolCallContext, ToolSource, ToolSourceError};

/// Regex-based redaction of common API-key shapes (OpenAI-style `sk-...`,
/// AWS-style `AKIA...`, and generic long hex/base64 bearer tokens), replaced
/// with a fixed sentinel so neither half of a tool result can leak a secret
/// a tool happened to read off disk or out of an environment variable.
static CREDENTIAL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"sk-[A-Za-z0-9]{20,}").unwrap(),
        Regex::new(r"AKIA[A-Z0-9]{16}").unwrap(),
        Regex::new(r"(?i)bearer\s+[A-Za-z0-9\-_.]{20,}").unwrap(),
        Regex::new(r"ghp_[A-Za-z0-9]{36}").unwrap(),
    ]
});

const REDACTION_SENTINEL: &str = "[REDACTED]";

fn scrub(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in CREDENTIAL_PATTERNS.iter() {
        out = pattern.replace_all(&out, REDACTION_SENTINEL).into_owned();
    }
    out
}

/// Simple fixed-window per-key rate limiter keyed by session identity.
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    buckets: DashMap<String, (u32, Instant)>,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self { max_per_window, window, buckets: DashMap::new() }
    }

    /// Consumes one token for `key`; returns `false` if exhausted for the
    /// current window.
    pub fn try_acquire(&self, key: &str) -> bool {
        let mut entry = self.buckets.entry(key.to_string()).or_insert((0, Instant::now()));
        let (count, window_start) = *entry;
        if window_start.elapsed() >= self.window {
            *entry = (1, Instant::now());
            return true;
        }
        if count >= self.max_per_window {
            return false;
        }
        entry.0 += 1;
        true
    }
}

/// Per-call parameters threaded through `execute_with_context` (§4.C).
pub struct ExecuteParams<'a> {
    pub name: &'a str,
    pub args: serde_json::Value,
    pub channel: &'a str,
    pub chat_id: &'a str,
    pub peer_kind: &'a str,
    pub sandbox_key: Option<&'a str>,
    pub user_id: Option<&'a str>,
    pub agent_id: &'a str,
    pub workspace: Arc<std::path::PathBuf>,
}

/// Holds the aggregate [`ToolSource`] and optional rate limiter; the single
/// entry point the Agent Loop calls to run a tool by name.
pub struct ToolRegistry {
    source: Arc<dyn ToolSource>,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl ToolRegistry {
    pub fn new(source: Arc<dyn ToolSource>) -> Self {
        Self { source, rate_limiter: None }
    }

    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub async fn list_tools(&self) -> Result<Vec<crate::tool_source::ToolSpec>, AgentError> {
        self.source.list_tools().await.map_err(AgentError::from)
    }

    /// Runs the six-step pipeline (§4.C):
    /// 1. Look up the tool (NOT_FOUND if missing — delegated to the source).
    /// 2. Inject per-call metadata onto the call context.
    /// 3. Consume a rate-limit token keyed by session identity, if attached.
    /// 4. Invoke the tool.
    /// 5. Scrub credentials from both result halves.
    /// 6. Log duration.
    pub async fn execute_with_context(&self, params: ExecuteParams<'_>) -> Result<ToolCallContent, AgentError> {
        let started = Instant::now();

        let ctx = ToolCallContext {
            channel: Some(params.channel.to_string()),
            chat_id: Some(params.chat_id.to_string()),
            peer_kind: Some(params.peer_kind.to_string()),
            sandbox_key: params.sandbox_key.map(str::to_string),
            user_id: params.user_id.map(str::to_string),
            agent_id: Some(params.agent_id.to_string()),
            workspace: Some(params.workspace),
            recent_messages: None,
            stream: None,
        };

        if let Some(limiter) = &self.rate_limiter {
            let session_key = format!("{}:{}:{}", params.agent_id, params.channel, params.chat_id);
            if !limiter.try_acquire(&session_key) {
                return Err(AgentError::ResourceExhausted(format!("tool rate limit exceeded for {session_key}")));
            }
        }

        let result = self.source.call_tool_with_context(params.name, params.args, Some(&ctx)).await;

        let elapsed = started.elapsed();
        match result {
            Ok(mut content) => {
                content.for_llm = scrub(&content.for_llm);
                content.for_user = scrub(&content.for_user);
                tracing::debug!(tool = params.name, duration_ms = elapsed.as_millis() as u64, "tool call completed");
                Ok(content)
            }
            Err(e) => {
                tracing::warn!(
                    tool = params.name,
                    duration_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "tool call failed"
                );
                Err(match e {
                    ToolSourceError::NotFound(s) => AgentError::NotFound(s),
                    other => AgentError::from(other),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrub_redacts_openai_style_keys() {
        let text = "here is my key: sk-abcdefghijklmnopqrst1234";
        let scrubbed = scrub(text);
        assert!(!scrubbed.contains("sk-abcdefghijklmnopqrst1234"));
        assert!(scrubbed.contains(REDACTION_SENTINEL));
    }

    #[test]
    fn scrub_leaves_unrelated_text_untouched() {
        assert_eq!(scrub("hello world"), "hello world");
    }

    #[test]
    fn rate_limiter_exhausts_then_resets_after_window() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        assert!(limiter.try_acquire("k"));
        assert!(!limiter.try_acquire("k"));
        std::thread::sleep(Duration::from_millis(25));
        assert!(limiter.try_acquire("k"));
    }
}
