//! Hook Engine (§4.K): runs one quality-gate evaluator — either a shell
//! command in the agent's workspace, or a delegation to a reviewer agent —
//! and reports pass/fail plus feedback. Used by the Delegate Manager after a
//! delegation completes and by the Team Coordinator's evaluator-optimizer
//! loop, both under `skip_hooks` to prevent recursive evaluation.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::agent_model::EvaluatorKind;
use crate::context::CallContext;
use crate::error::AgentError;

/// The one capability the Hook Engine needs from whatever runs agent
/// evaluators: delegate a task to another agent synchronously and get its
/// final reply text back. Implemented by the Delegate Manager; kept as a
/// trait so `hooks.rs` and `delegate.rs` don't need to depend on each
/// other's concrete types — the Delegate Manager calls into the Hook Engine
/// for quality gates, and the Hook Engine calls back into the Delegate
/// Manager (through this trait) to run an agent evaluator.
#[async_trait]
pub trait SyncDelegator: Send + Sync {
    async fn delegate_sync(&self, reviewer_agent_key: &str, task: String, ctx: &CallContext) -> Result<String, AgentError>;
}

/// Outcome of one evaluator run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HookVerdict {
    Approved,
    Rejected { feedback: String },
    /// The agent evaluator's reply matched neither `APPROVED` nor
    /// `REJECTED:` (§4.K: "any other reply = reviewer error, skipped") — the
    /// gate neither passed nor failed; the caller treats it as if it hadn't
    /// run.
    Skipped { reason: String },
}

impl HookVerdict {
    pub fn passed(&self) -> bool {
        matches!(self, HookVerdict::Approved)
    }
}

pub struct HookEngine {
    delegator: Arc<dyn SyncDelegator>,
    command_timeout: Duration,
}

impl HookEngine {
    pub fn new(delegator: Arc<dyn SyncDelegator>) -> Self {
        Self { delegator, command_timeout: Duration::from_secs(120) }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Runs `evaluator` against `reviewed_content`. `ctx` must already carry
    /// `skip_hooks = true` — callers get this via `CallContext::child_with_skip_hooks`
    /// at every one of the three recursion-prevention points §4.K names: the
    /// evaluator's own delegation, each evaluator-optimizer iteration, and
    /// hook-internal agent evaluations.
    pub async fn evaluate(&self, evaluator: &EvaluatorKind, ctx: &CallContext, reviewed_content: &str) -> Result<HookVerdict, AgentError> {
        debug_assert!(ctx.skip_hooks, "hook evaluation must run under skip_hooks to prevent recursion");
        match evaluator {
            EvaluatorKind::Command { command } => self.run_command(command, ctx).await,
            EvaluatorKind::Agent { reviewer_agent_key } => self.run_agent_evaluator(reviewer_agent_key, ctx, reviewed_content).await,
        }
    }

    async fn run_command(&self, command: &str, ctx: &CallContext) -> Result<HookVerdict, AgentError> {
        let run = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(ctx.workspace.as_path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let output = tokio::time::timeout(self.command_timeout, run)
            .await
            .map_err(|_| AgentError::AgentTimeout(format!("hook command timed out after {:?}: {command}", self.command_timeout)))?
            .map_err(|e| AgentError::Internal(format!("failed to spawn hook command: {e}")))?;

        if output.status.success() {
            Ok(HookVerdict::Approved)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let feedback = if stderr.is_empty() {
                format!("command exited with status {:?}", output.status.code())
            } else {
                stderr
            };
            Ok(HookVerdict::Rejected { feedback })
        }
    }

    async fn run_agent_evaluator(&self, reviewer_agent_key: &str, ctx: &CallContext, reviewed_content: &str) -> Result<HookVerdict, AgentError> {
        let task = format!(
            "Review the following output. Reply with exactly `APPROVED` if it is acceptable, \
             or `REJECTED: <reason>` if it is not. Do not reply with anything else.\n\n{reviewed_content}"
        );
        let reply = self.delegator.delegate_sync(reviewer_agent_key, task, ctx).await?;
        Ok(parse_reviewer_reply(&reply))
    }
}

/// Parses an `APPROVED` / `REJECTED: <reason>` reply. Shared with the Team
/// Coordinator's evaluator-optimizer loop, which follows the same
/// reviewer-reply convention for its evaluator step.
pub(crate) fn parse_reviewer_reply(reply: &str) -> HookVerdict {
    let trimmed = reply.trim();
    let lower = trimmed.to_lowercase();
    if lower.starts_with("approved") {
        return HookVerdict::Approved;
    }
    if let Some(rest) = lower.strip_prefix("rejected:") {
        let feedback = trimmed[trimmed.len() - rest.len()..].trim().to_string();
        return HookVerdict::Rejected { feedback };
    }
    HookVerdict::Skipped { reason: format!("reviewer reply was neither APPROVED nor REJECTED: {trimmed}") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_model::AgentType;
    use crate::context::PeerKind;

    struct StubDelegator {
        reply: String,
    }

    #[async_trait]
    impl SyncDelegator for StubDelegator {
        async fn delegate_sync(&self, _reviewer_agent_key: &str, _task: String, _ctx: &CallContext) -> Result<String, AgentError> {
            Ok(self.reply.clone())
        }
    }

    fn ctx() -> CallContext {
        CallContext::new(
            "agent-1",
            "my-agent",
            AgentType::Open,
            "telegram",
            "chat-1",
            PeerKind::Direct,
            std::env::temp_dir(),
            "trace-1",
        )
        .child_with_skip_hooks()
    }

    #[tokio::test]
    async fn command_evaluator_approves_on_exit_zero() {
        let engine = HookEngine::new(Arc::new(StubDelegator { reply: String::new() }));
        let verdict = engine
            .evaluate(&EvaluatorKind::Command { command: "true".to_string() }, &ctx(), "content")
            .await
            .unwrap();
        assert_eq!(verdict, HookVerdict::Approved);
    }

    #[tokio::test]
    async fn command_evaluator_rejects_with_stderr_as_feedback_on_nonzero_exit() {
        let engine = HookEngine::new(Arc::new(StubDelegator { reply: String::new() }));
        let verdict = engine
            .evaluate(&EvaluatorKind::Command { command: "echo 'bad output' 1>&2; exit 1".to_string() }, &ctx(), "content")
            .await
            .unwrap();
        assert_eq!(verdict, HookVerdict::Rejected { feedback: "bad output".to_string() });
    }

    #[tokio::test]
    async fn agent_evaluator_parses_approved() {
        let engine = HookEngine::new(Arc::new(StubDelegator { reply: "APPROVED".to_string() }));
        let verdict = engine
            .evaluate(&EvaluatorKind::Agent { reviewer_agent_key: "reviewer".to_string() }, &ctx(), "content")
            .await
            .unwrap();
        assert_eq!(verdict, HookVerdict::Approved);
    }

    #[tokio::test]
    async fn agent_evaluator_parses_rejected_with_feedback_case_insensitively() {
        let engine = HookEngine::new(Arc::new(StubDelegator { reply: "rejected: missing tests".to_string() }));
        let verdict = engine
            .evaluate(&EvaluatorKind::Agent { reviewer_agent_key: "reviewer".to_string() }, &ctx(), "content")
            .await
            .unwrap();
        assert_eq!(verdict, HookVerdict::Rejected { feedback: "missing tests".to_string() });
    }

    #[tokio::test]
    async fn agent_evaluator_skips_on_unparseable_reply() {
        let engine = HookEngine::new(Arc::new(StubDelegator { reply: "sure, looks fine I guess".to_string() }));
        let verdict = engine
            .evaluate(&EvaluatorKind::Agent { reviewer_agent_key: "reviewer".to_string() }, &ctx(), "content")
            .await
            .unwrap();
        assert!(matches!(verdict, HookVerdict::Skipped { .. }));
        assert!(!verdict.passed());
    }
}
