//! Delegate Manager (§4.J): routes a task from one agent to another over an
//! explicit, directed `AgentLink`, either blocking for the reply (`sync`) or
//! detached on the `delegate` lane (`async`), and runs any quality gates the
//! target carries before the delegation is considered complete.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent_loop::{AgentLoop, RunOutcome, RunRequest, RunStatus};
use crate::agent_model::{Agent, AgentLink, EvaluatorKind, QualityGate};
use crate::bootstrap::BootstrapInput;
use crate::bus::{InboundMessage, MessageBus};
use crate::context::{CallContext, PeerKind};
use crate::error::AgentError;
use crate::hooks::{HookEngine, HookVerdict, SyncDelegator};
use crate::policy::PolicyInput;
use crate::scheduler::{Lane, Scheduler};
use crate::session::key::SessionKey;

/// Default cap on concurrent inbound delegations a single target agent will
/// run at once, absent an explicit `Agent.other_config.max_delegation_load`.
const DEFAULT_MAX_DELEGATION_LOAD: u32 = 5;

/// One agent's resolved runtime: the loop that executes its turns plus the
/// policy/bootstrap templates every run of that agent starts from. Mirrors
/// what `SubagentManager` holds for its one agent, generalized here to any
/// agent the directory can resolve.
pub struct AgentRuntime {
    pub agent_loop: Arc<AgentLoop>,
    pub policy_input: PolicyInput,
    pub bootstrap_input: BootstrapInput,
}

/// Read access to the agent/link/team graph the Delegate Manager routes
/// over. Implemented against whatever storage backs `Agent`/`AgentLink`/
/// `Team` in a full deployment; kept as a trait here the way `SessionStore`
/// and `LlmClient` are, so `delegate.rs` carries no storage-engine
/// dependency of its own.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn get_agent(&self, agent_key: &str) -> Result<Option<Agent>, AgentError>;
    async fn get_agent_by_id(&self, id: Uuid) -> Result<Option<Agent>, AgentError>;
    async fn find_link(&self, source_agent_id: Uuid, target_agent_id: Uuid) -> Result<Option<AgentLink>, AgentError>;
    /// `Some(team_id)` if both agents are members of the same team.
    async fn shared_team(&self, source_agent_id: Uuid, target_agent_id: Uuid) -> Result<Option<Uuid>, AgentError>;
    async fn runtime_for(&self, agent: &Agent) -> Result<AgentRuntime, AgentError>;
}

#[derive(Clone, Debug)]
pub struct DelegationRecord {
    pub id: Uuid,
    pub source_agent: Uuid,
    pub target_agent: Uuid,
    pub task: String,
    pub mode: DelegationMode,
    pub team_task_id: Option<Uuid>,
    pub status: DelegationStatus,
    pub result: Option<String>,
    pub started_at: SystemTime,
    pub completed_at: Option<SystemTime>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelegationMode {
    Sync,
    Async,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelegationStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Persists completed delegation history rows. Optional: a deployment with
/// no durable history still gets correct routing/limits/quality-gate
/// behavior, it just doesn't keep a record after the fact.
#[async_trait]
pub trait DelegationHistory: Send + Sync {
    async fn record(&self, record: DelegationRecord) -> Result<(), AgentError>;
}

/// Claims a team task and marks it complete in one atomic step, the way
/// `team.rs`'s task board does for its own `claim`/`complete` pair.
/// Optional for the same reason `DelegationHistory` is.
#[async_trait]
pub trait TeamTaskSink: Send + Sync {
    async fn claim_and_complete(&self, task_id: Uuid, result: String) -> Result<(), AgentError>;
}

struct ActiveDelegation {
    link_id: Uuid,
    target_agent_id: Uuid,
    cancel: CancellationToken,
}

pub struct DelegateManagerConfig {
    pub default_max_delegation_load: u32,
}

impl Default for DelegateManagerConfig {
    fn default() -> Self {
        Self { default_max_delegation_load: DEFAULT_MAX_DELEGATION_LOAD }
    }
}

pub struct DelegateManager {
    directory: Arc<dyn AgentDirectory>,
    scheduler: Arc<Scheduler>,
    bus: Arc<MessageBus>,
    hooks: Arc<HookEngine>,
    history: Option<Arc<dyn DelegationHistory>>,
    team_tasks: Option<Arc<dyn TeamTaskSink>>,
    config: DelegateManagerConfig,
    active: DashMap<Uuid, Mutex<ActiveDelegation>>,
}

impl DelegateManager {
    /// `hooks` is constructed separately and wired back in — see
    /// `hooks.rs`'s `SyncDelegator` seam for why the two can't be built in a
    /// single step.
    pub fn new(
        directory: Arc<dyn AgentDirectory>,
        scheduler: Arc<Scheduler>,
        bus: Arc<MessageBus>,
        hooks: Arc<HookEngine>,
        history: Option<Arc<dyn DelegationHistory>>,
        team_tasks: Option<Arc<dyn TeamTaskSink>>,
        config: DelegateManagerConfig,
    ) -> Arc<Self> {
        Arc::new(Self { directory, scheduler, bus, hooks, history, team_tasks, config, active: DashMap::new() })
    }

    async fn count_active(&self, link_id: Uuid, target_agent_id: Uuid) -> (usize, usize) {
        let mut by_link = 0;
        let mut by_target = 0;
        for entry in self.active.iter() {
            let d = entry.value().lock().await;
            if d.link_id == link_id {
                by_link += 1;
            }
            if d.target_agent_id == target_agent_id {
                by_target += 1;
            }
        }
        (by_link, by_target)
    }

    /// Runs the full ordered preflight chain from §4.J and returns the
    /// resolved source agent, target agent, and link once every check
    /// passes.
    async fn preflight(&self, ctx: &CallContext, target_agent_key: &str, team_task_id: Option<Uuid>) -> Result<(Agent, Agent, AgentLink), AgentError> {
        if ctx.agent_id.is_empty() {
            return Err(AgentError::FailedPrecondition("delegation requires a source agent id".to_string()));
        }
        let source = self
            .directory
            .get_agent(&ctx.agent_key)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("source agent not found: {}", ctx.agent_key)))?;
        if source.is_deleted() {
            return Err(AgentError::FailedPrecondition(format!("source agent is deleted: {}", ctx.agent_key)));
        }
        let target = self
            .directory
            .get_agent(target_agent_key)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("target agent not found: {target_agent_key}")))?;
        if target.is_deleted() {
            return Err(AgentError::FailedPrecondition(format!("target agent is deleted: {target_agent_key}")));
        }

        let link = self
            .directory
            .find_link(source.id, target.id)
            .await?
            .ok_or_else(|| AgentError::Unauthorized(format!("no delegation link from {} to {target_agent_key}", ctx.agent_key)))?;
        if !link.permits(source.id, target.id) {
            return Err(AgentError::Unauthorized(format!("delegation link from {} to {target_agent_key} does not permit this direction", ctx.agent_key)));
        }
        if !link.settings.permits_user(ctx.user_id.as_deref()) {
            return Err(AgentError::Unauthorized("delegation link denies this user".to_string()));
        }

        if let Some(team_id) = self.directory.shared_team(source.id, target.id).await? {
            if team_task_id.is_none() {
                return Err(AgentError::FailedPrecondition(format!("source and target share team {team_id}; a team_task_id is required")));
            }
        }

        let (by_link, by_target) = self.count_active(link.id, target.id).await;
        if by_link as u32 >= link.max_concurrent {
            return Err(AgentError::FailedPrecondition(format!("{target_agent_key} is already handling the maximum concurrent delegations over this link, try again shortly")));
        }
        let max_load = target
            .other_config
            .max_delegation_load
            .unwrap_or(self.config.default_max_delegation_load);
        if by_target as u32 >= max_load {
            return Err(AgentError::FailedPrecondition(format!("{target_agent_key} is at its delegation capacity right now, try again shortly")));
        }

        Ok((source, target, link))
    }

    fn build_request(&self, source_agent_key: &str, target: &Agent, task: &str, run_id: Uuid) -> (CallContext, RunRequest) {
        let session_key = SessionKey::delegate(source_agent_key, &format!("agent:{}:main", target.agent_key), &run_id.to_string()).to_string();
        let ctx = CallContext::new(
            target.id.to_string(),
            target.agent_key.clone(),
            target.agent_type,
            "delegate",
            session_key.clone(),
            PeerKind::Direct,
            std::path::PathBuf::from(&target.workspace_path),
            run_id.to_string(),
        );
        let request = RunRequest {
            session_key,
            message: task.to_string(),
            user_id: None,
            channel: "delegate".to_string(),
            chat_id: run_id.to_string(),
            peer_kind: "direct".to_string(),
            run_id: run_id.to_string(),
            stream: None,
            history_limit: None,
            extra_system_prompt: None,
            parent_trace_id: None,
            parent_root_span_id: None,
        };
        (ctx, request)
    }

    async fn run_target(&self, source_agent_key: &str, target: &Agent, task: &str, cancel: &CancellationToken) -> Result<RunOutcome, AgentError> {
        let runtime = self.directory.runtime_for(target).await?;
        let run_id = Uuid::new_v4();
        let (ctx, request) = self.build_request(source_agent_key, target, task, run_id);
        runtime
            .agent_loop
            .run(ctx, runtime.policy_input.clone(), runtime.bootstrap_input.clone(), request, cancel)
            .await
    }

    /// Runs `target`'s `delegation.completed` quality gates in order. Each
    /// rejection with `block_on_failure` set re-runs the target with the
    /// gate's feedback appended, up to its configured retry count; once
    /// retries are exhausted the last output is accepted with a warning,
    /// never as a hard failure — §4.J treats quality gates as advisory once
    /// retries run out, not as a delegation-blocking authority.
    async fn run_quality_gates(&self, source_agent_key: &str, target: &Agent, ctx: &CallContext, mut outcome: RunOutcome, cancel: &CancellationToken) -> Result<RunOutcome, AgentError> {
        if ctx.skip_hooks {
            return Ok(outcome);
        }
        let gate_ctx = ctx.child_with_skip_hooks();
        for gate in &target.other_config.quality_gates {
            if gate.event != "delegation.completed" {
                continue;
            }
            outcome = self.run_one_gate(source_agent_key, target, gate, &gate_ctx, outcome, cancel).await?;
        }
        Ok(outcome)
    }

    async fn run_one_gate(&self, source_agent_key: &str, target: &Agent, gate: &QualityGate, gate_ctx: &CallContext, mut outcome: RunOutcome, cancel: &CancellationToken) -> Result<RunOutcome, AgentError> {
        let mut verdict = self.hooks.evaluate(&gate.evaluator, gate_ctx, &outcome.reply).await?;
        let mut retries_left = gate.retries;

        loop {
            match &verdict {
                HookVerdict::Approved | HookVerdict::Skipped { .. } => return Ok(outcome),
                HookVerdict::Rejected { feedback } => {
                    if !gate.block_on_failure {
                        warn!(agent = %target.agent_key, %feedback, "quality gate rejected a non-blocking delegation, accepting output");
                        return Ok(outcome);
                    }
                    if retries_left == 0 {
                        warn!(agent = %target.agent_key, %feedback, "quality gate retries exhausted, accepting last output with warning");
                        return Ok(outcome);
                    }
                    let retry_task = format!("{}\n\nA reviewer rejected your previous reply: {feedback}\nPlease address the feedback and try again.", describe_gate(gate));
                    outcome = self.run_target(source_agent_key, target, &retry_task, cancel).await?;
                    retries_left -= 1;
                    verdict = self.hooks.evaluate(&gate.evaluator, gate_ctx, &outcome.reply).await?;
                }
            }
        }
    }

    async fn settle(&self, run_id: Uuid, source: &Agent, target: &Agent, team_task_id: Option<Uuid>, status: DelegationStatus, started_at: SystemTime, outcome: &Option<RunOutcome>) {
        if let (Some(task_id), Some(o), DelegationStatus::Completed) = (team_task_id, outcome, status) {
            if let Some(sink) = &self.team_tasks {
                let result = o.reply.clone();
                if let Err(e) = sink.claim_and_complete(task_id, result).await {
                    warn!(%task_id, error = %e, "failed to claim/complete team task after delegation");
                }
            }
        }
        if let Some(history) = &self.history {
            let record = DelegationRecord {
                id: run_id,
                source_agent: source.id,
                target_agent: target.id,
                task: String::new(),
                mode: if team_task_id.is_some() { DelegationMode::Async } else { DelegationMode::Sync },
                team_task_id,
                status,
                result: outcome.as_ref().map(|o| o.reply.clone()),
                started_at,
                completed_at: Some(started_at),
            };
            if let Err(e) = history.record(record).await {
                warn!(%run_id, error = %e, "failed to persist delegation history");
            }
        }
    }

    /// Blocks until the target agent replies (or errors), running quality
    /// gates before returning.
    pub async fn delegate_sync_inner(&self, source_ctx: &CallContext, target_agent_key: &str, task: impl Into<String>, team_task_id: Option<Uuid>) -> Result<RunOutcome, AgentError> {
        let task = task.into();
        let (source, target, link) = self.preflight(source_ctx, target_agent_key, team_task_id).await?;
        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.active.insert(run_id, Mutex::new(ActiveDelegation { link_id: link.id, target_agent_id: target.id, cancel: cancel.clone() }));

        let started_at = SystemTime::now();
        let result = self.run_target(&source.agent_key, &target, &task, &cancel).await;
        let outcome = match result {
            Ok(o) => self.run_quality_gates(&source.agent_key, &target, source_ctx, o, &cancel).await,
            Err(e) => Err(e),
        };
        self.active.remove(&run_id);

        let status = if outcome.is_ok() { DelegationStatus::Completed } else { DelegationStatus::Failed };
        self.settle(run_id, &source, &target, team_task_id, status, started_at, &outcome.as_ref().ok().cloned()).await;
        outcome
    }

    /// Detaches the delegation onto the `delegate` lane; the caller gets the
    /// delegation id back immediately and sees completion on the bus as
    /// `delegate:{id}` (§6).
    pub async fn delegate_async(self: &Arc<Self>, source_ctx: &CallContext, target_agent_key: &str, task: impl Into<String>, team_task_id: Option<Uuid>) -> Result<Uuid, AgentError> {
        let task = task.into();
        let (source, target, link) = self.preflight(source_ctx, target_agent_key, team_task_id).await?;
        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.active.insert(run_id, Mutex::new(ActiveDelegation { link_id: link.id, target_agent_id: target.id, cancel: cancel.clone() }));

        let this = Arc::clone(self);
        let source_ctx = source_ctx.clone();
        tokio::spawn(async move {
            let _permit = this.scheduler.acquire_lane(Lane::Delegate).await;
            let started_at = SystemTime::now();
            let result = this.run_target(&source.agent_key, &target, &task, &cancel).await;
            let outcome = match result {
                Ok(o) => this.run_quality_gates(&source.agent_key, &target, &source_ctx, o, &cancel).await,
                Err(e) => Err(e),
            };
            this.active.remove(&run_id);

            let status = if cancel.is_cancelled() {
                DelegationStatus::Cancelled
            } else if outcome.is_ok() {
                DelegationStatus::Completed
            } else {
                DelegationStatus::Failed
            };
            this.settle(run_id, &source, &target, team_task_id, status, started_at, &outcome.as_ref().ok().cloned()).await;

            if status == DelegationStatus::Cancelled {
                return;
            }
            let content = match &outcome {
                Ok(o) => o.reply.clone(),
                Err(e) => e.user_message().to_string(),
            };
            this.bus
                .publish_inbound(InboundMessage {
                    channel: "delegate".to_string(),
                    sender_id: format!("delegate:{run_id}"),
                    chat_id: source_ctx.chat_id.clone(),
                    content,
                    user_id: None,
                    agent_id: Some(source.agent_key.clone()),
                    metadata: std::collections::HashMap::from([("target_agent".to_string(), target.agent_key.clone())]),
                })
                .await;
            info!(%run_id, target = %target.agent_key, "delegation completed");
        });

        Ok(run_id)
    }

    pub async fn cancel(&self, run_id: Uuid) -> Result<(), AgentError> {
        let entry = self.active.get(&run_id).ok_or_else(|| AgentError::NotFound(format!("no active delegation: {run_id}")))?;
        entry.value().lock().await.cancel.cancel();
        Ok(())
    }
}

fn describe_gate(gate: &QualityGate) -> String {
    match &gate.evaluator {
        EvaluatorKind::Command { command } => format!("(quality gate: `{command}`)"),
        EvaluatorKind::Agent { reviewer_agent_key } => format!("(quality gate reviewed by {reviewer_agent_key})"),
    }
}

/// Lets the Hook Engine's agent evaluator delegate a review task without
/// `hooks.rs` depending on `DelegateManager` directly.
#[async_trait]
impl SyncDelegator for DelegateManager {
    async fn delegate_sync(&self, reviewer_agent_key: &str, task: String, ctx: &CallContext) -> Result<String, AgentError> {
        let outcome = self.delegate_sync_inner(ctx, reviewer_agent_key, task, None).await?;
        Ok(outcome.reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_model::{AgentStatus, AgentType, LinkDirection, LinkSettings, OtherAgentConfig};
    use crate::bootstrap::BootstrapInput;
    use crate::llm::mock::MockLlm;
    use crate::session::InMemorySessionStore;
    use crate::tools::{AggregateToolSource, ToolRegistry};
    use std::collections::HashMap;

    fn make_agent(key: &str) -> Agent {
        Agent {
            id: Uuid::new_v4(),
            agent_key: key.to_string(),
            owner_identity: "owner".to_string(),
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            context_window: 128_000,
            max_tool_iterations: 20,
            workspace_path: "/tmp".to_string(),
            restrict_to_workspace: false,
            agent_type: AgentType::Open,
            is_default: false,
            status: AgentStatus::Active,
            frontmatter: String::new(),
            embedding: None,
            other_config: OtherAgentConfig::default(),
            deleted_at: None,
        }
    }

    struct FixtureDirectory {
        agents: HashMap<String, Agent>,
        link: AgentLink,
    }

    #[async_trait]
    impl AgentDirectory for FixtureDirectory {
        async fn get_agent(&self, agent_key: &str) -> Result<Option<Agent>, AgentError> {
            Ok(self.agents.get(agent_key).cloned())
        }

        async fn get_agent_by_id(&self, id: Uuid) -> Result<Option<Agent>, AgentError> {
            Ok(self.agents.values().find(|a| a.id == id).cloned())
        }

        async fn find_link(&self, source_agent_id: Uuid, target_agent_id: Uuid) -> Result<Option<AgentLink>, AgentError> {
            if self.link.source_agent == source_agent_id && self.link.target_agent == target_agent_id {
                Ok(Some(self.link.clone()))
            } else {
                Ok(None)
            }
        }

        async fn shared_team(&self, _source_agent_id: Uuid, _target_agent_id: Uuid) -> Result<Option<Uuid>, AgentError> {
            Ok(None)
        }

        async fn runtime_for(&self, agent: &Agent) -> Result<AgentRuntime, AgentError> {
            let session_store = InMemorySessionStore::new();
            let llm = MockLlm::new("all good");
            let registry = ToolRegistry::new(Arc::new(AggregateToolSource::new()));
            let agent_loop = AgentLoop::new(
                Arc::new(session_store),
                Arc::new(llm),
                Arc::new(registry),
                Arc::new(crate::policy::PolicyCatalog::default()),
                Default::default(),
            );
            let _ = agent;
            Ok(AgentRuntime { agent_loop: Arc::new(agent_loop), policy_input: PolicyInput::default(), bootstrap_input: BootstrapInput::default() })
        }
    }

    struct AlwaysApprove;

    #[async_trait]
    impl SyncDelegator for AlwaysApprove {
        async fn delegate_sync(&self, _reviewer_agent_key: &str, _task: String, _ctx: &CallContext) -> Result<String, AgentError> {
            Ok("APPROVED".to_string())
        }
    }

    fn ctx_for(agent: &Agent) -> CallContext {
        CallContext::new(agent.id.to_string(), agent.agent_key.clone(), agent.agent_type, "telegram", "chat-1", PeerKind::Direct, std::path::PathBuf::from(&agent.workspace_path), "trace-1")
    }

    fn make_manager(source: &Agent, target: &Agent, link: AgentLink) -> Arc<DelegateManager> {
        let mut agents = HashMap::new();
        agents.insert(source.agent_key.clone(), source.clone());
        agents.insert(target.agent_key.clone(), target.clone());
        let directory = Arc::new(FixtureDirectory { agents, link });
        let hooks = Arc::new(HookEngine::new(Arc::new(AlwaysApprove)));
        DelegateManager::new(directory, Arc::new(Scheduler::new()), MessageBus::new(), hooks, None, None, DelegateManagerConfig::default())
    }

    #[tokio::test]
    async fn delegation_without_a_link_is_unauthorized() {
        let source = make_agent("source");
        let target = make_agent("target");
        let link = AgentLink {
            id: Uuid::new_v4(),
            source_agent: Uuid::new_v4(),
            target_agent: Uuid::new_v4(),
            direction: LinkDirection::Outbound,
            max_concurrent: 1,
            settings: LinkSettings::default(),
            active: true,
            team_id: None,
        };
        let mgr = make_manager(&source, &target, link);
        let err = mgr.delegate_sync_inner(&ctx_for(&source), "target", "do it", None).await.unwrap_err();
        assert_eq!(err.kind(), "unauthorized");
    }

    #[tokio::test]
    async fn delegation_over_a_valid_link_runs_the_target_and_passes_quality_gate() {
        let source = make_agent("source");
        let target = make_agent("target");
        let link = AgentLink {
            id: Uuid::new_v4(),
            source_agent: source.id,
            target_agent: target.id,
            direction: LinkDirection::Outbound,
            max_concurrent: 3,
            settings: LinkSettings::default(),
            active: true,
            team_id: None,
        };
        let mgr = make_manager(&source, &target, link);
        let outcome = mgr.delegate_sync_inner(&ctx_for(&source), "target", "do it", None).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_of_unknown_delegation_is_not_found() {
        let source = make_agent("source");
        let target = make_agent("target");
        let link = AgentLink {
            id: Uuid::new_v4(),
            source_agent: source.id,
            target_agent: target.id,
            direction: LinkDirection::Outbound,
            max_concurrent: 1,
            settings: LinkSettings::default(),
            active: true,
            team_id: None,
        };
        let mgr = make_manager(&source, &target, link);
        let err = mgr.cancel(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
