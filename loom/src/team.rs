//! Team Coordinator (§4.L) + Handoff Routing (§4.M): a shared task board with
//! atomic claim/complete semantics and a blocked-by DAG, an inter-agent
//! mailbox, conversation handoff between agents, and a bounded
//! evaluator-optimizer loop built from two sync delegations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::agent_model::{HandoffRoute, Team, TeamMessage, TeamMessageType, TeamTask, TeamTaskStatus};
use crate::bus::{InboundMessage, MessageBus};
use crate::context::CallContext;
use crate::error::AgentError;
use crate::hooks::{parse_reviewer_reply, HookVerdict, SyncDelegator};

/// Default number of evaluator-optimizer rounds when the caller doesn't
/// specify one; §4.L caps it at 5 regardless of what's requested.
pub const DEFAULT_OPTIMIZER_ROUNDS: u32 = 3;
pub const MAX_OPTIMIZER_ROUNDS: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskFilter {
    Active,
    Completed,
    All,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOrder {
    Priority,
    Newest,
}

/// Persistence for the task board, mailbox, and handoff-route table.
/// `claim_task` and `complete_task` must be atomic the way §4.L requires:
/// claim is a compare-and-set on `(status = pending, owner IS NULL)`, and
/// complete is one transaction that also clears the task out of every other
/// task's `blocked_by`.
#[async_trait]
pub trait TeamStore: Send + Sync {
    async fn get_team(&self, team_id: Uuid) -> Result<Option<Team>, AgentError>;
    async fn list_tasks(&self, team_id: Uuid, filter: TaskFilter, order: TaskOrder) -> Result<Vec<TeamTask>, AgentError>;
    async fn get_task(&self, task_id: Uuid) -> Result<Option<TeamTask>, AgentError>;
    async fn create_task(&self, task: TeamTask) -> Result<(), AgentError>;
    /// Returns `true` if the caller won the claim.
    async fn claim_task(&self, task_id: Uuid, agent_id: Uuid) -> Result<bool, AgentError>;
    async fn complete_task(&self, task_id: Uuid, result: String) -> Result<(), AgentError>;
    async fn search_tasks(&self, team_id: Uuid, query: &str) -> Result<Vec<TeamTask>, AgentError>;

    async fn send_message(&self, msg: TeamMessage) -> Result<(), AgentError>;
    async fn read_messages(&self, agent_id: Uuid) -> Result<Vec<TeamMessage>, AgentError>;

    async fn set_handoff_route(&self, route: HandoffRoute) -> Result<(), AgentError>;
    async fn get_handoff_route(&self, channel: &str, chat_id: &str) -> Result<Option<HandoffRoute>, AgentError>;
    async fn clear_handoff_route(&self, channel: &str, chat_id: &str) -> Result<(), AgentError>;
}

/// `DashMap`-backed `TeamStore` with no persistence tier — the same shape as
/// `InMemorySessionStore`. Used by tests and by deployments with no
/// database configured.
pub struct InMemoryTeamStore {
    teams: DashMap<Uuid, Team>,
    tasks: DashMap<Uuid, TeamTask>,
    messages: RwLock<Vec<TeamMessage>>,
    handoffs: DashMap<(String, String), HandoffRoute>,
}

impl InMemoryTeamStore {
    pub fn new() -> Self {
        Self { teams: DashMap::new(), tasks: DashMap::new(), messages: RwLock::new(Vec::new()), handoffs: DashMap::new() }
    }

    pub fn seed_team(&self, team: Team) {
        self.teams.insert(team.id, team);
    }
}

impl Default for InMemoryTeamStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TeamStore for InMemoryTeamStore {
    async fn get_team(&self, team_id: Uuid) -> Result<Option<Team>, AgentError> {
        Ok(self.teams.get(&team_id).map(|t| t.clone()))
    }

    async fn list_tasks(&self, team_id: Uuid, filter: TaskFilter, order: TaskOrder) -> Result<Vec<TeamTask>, AgentError> {
        let mut tasks: Vec<TeamTask> = self
            .tasks
            .iter()
            .filter(|t| t.team_id == team_id)
            .filter(|t| match filter {
                TaskFilter::Active => t.status != TeamTaskStatus::Completed,
                TaskFilter::Completed => t.status == TeamTaskStatus::Completed,
                TaskFilter::All => true,
            })
            .map(|t| t.clone())
            .collect();
        match order {
            TaskOrder::Priority => tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| b.created_at.cmp(&a.created_at))),
            TaskOrder::Newest => tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }
        Ok(tasks)
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<TeamTask>, AgentError> {
        Ok(self.tasks.get(&task_id).map(|t| t.clone()))
    }

    async fn create_task(&self, task: TeamTask) -> Result<(), AgentError> {
        self.tasks.insert(task.id, task);
        Ok(())
    }

    async fn claim_task(&self, task_id: Uuid, agent_id: Uuid) -> Result<bool, AgentError> {
        let mut entry = self.tasks.get_mut(&task_id).ok_or_else(|| AgentError::NotFound(format!("team task {task_id}")))?;
        if entry.status != TeamTaskStatus::Pending || entry.owner.is_some() {
            return Ok(false);
        }
        entry.status = TeamTaskStatus::InProgress;
        entry.owner = Some(agent_id);
        entry.updated_at = SystemTime::now();
        Ok(true)
    }

    async fn complete_task(&self, task_id: Uuid, result: String) -> Result<(), AgentError> {
        {
            let mut entry = self.tasks.get_mut(&task_id).ok_or_else(|| AgentError::NotFound(format!("team task {task_id}")))?;
            if entry.status != TeamTaskStatus::InProgress {
                return Err(AgentError::FailedPrecondition(format!("team task {task_id} is not in progress")));
            }
            entry.status = TeamTaskStatus::Completed;
            entry.result = Some(result);
            entry.updated_at = SystemTime::now();
        }
        for mut other in self.tasks.iter_mut() {
            if other.id == task_id {
                continue;
            }
            if other.blocked_by.remove(&task_id) && other.blocked_by.is_empty() && other.status == TeamTaskStatus::Blocked {
                other.status = TeamTaskStatus::Pending;
                other.updated_at = SystemTime::now();
            }
        }
        Ok(())
    }

    async fn search_tasks(&self, team_id: Uuid, query: &str) -> Result<Vec<TeamTask>, AgentError> {
        let needle = query.to_lowercase();
        Ok(self
            .tasks
            .iter()
            .filter(|t| t.team_id == team_id)
            .filter(|t| t.subject.to_lowercase().contains(&needle) || t.description.to_lowercase().contains(&needle))
            .map(|t| t.clone())
            .collect())
    }

    async fn send_message(&self, msg: TeamMessage) -> Result<(), AgentError> {
        self.messages.write().await.push(msg);
        Ok(())
    }

    async fn read_messages(&self, agent_id: Uuid) -> Result<Vec<TeamMessage>, AgentError> {
        let mut messages = self.messages.write().await;
        let mut out = Vec::new();
        for msg in messages.iter_mut() {
            let addressed = msg.to_agent == Some(agent_id) || (msg.to_agent.is_none() && msg.from_agent != agent_id);
            if addressed && !msg.read {
                msg.read = true;
                out.push(msg.clone());
            }
        }
        Ok(out)
    }

    async fn set_handoff_route(&self, route: HandoffRoute) -> Result<(), AgentError> {
        self.handoffs.insert((route.channel.clone(), route.chat_id.clone()), route);
        Ok(())
    }

    async fn get_handoff_route(&self, channel: &str, chat_id: &str) -> Result<Option<HandoffRoute>, AgentError> {
        Ok(self.handoffs.get(&(channel.to_string(), chat_id.to_string())).map(|r| r.clone()))
    }

    async fn clear_handoff_route(&self, channel: &str, chat_id: &str) -> Result<(), AgentError> {
        self.handoffs.remove(&(channel.to_string(), chat_id.to_string()));
        Ok(())
    }
}

pub struct TeamCoordinator {
    store: Arc<dyn TeamStore>,
    bus: Arc<MessageBus>,
}

impl TeamCoordinator {
    pub fn new(store: Arc<dyn TeamStore>, bus: Arc<MessageBus>) -> Arc<Self> {
        Arc::new(Self { store, bus })
    }

    // -- Task board --------------------------------------------------

    pub async fn list_tasks(&self, team_id: Uuid, filter: TaskFilter, order: TaskOrder) -> Result<Vec<TeamTask>, AgentError> {
        self.store.list_tasks(team_id, filter, order).await
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Option<TeamTask>, AgentError> {
        self.store.get_task(task_id).await
    }

    pub async fn create_task(&self, team_id: Uuid, subject: impl Into<String>, description: impl Into<String>, priority: i32, blocked_by: std::collections::HashSet<Uuid>) -> Result<TeamTask, AgentError> {
        let now = SystemTime::now();
        let status = if blocked_by.is_empty() { TeamTaskStatus::Pending } else { TeamTaskStatus::Blocked };
        let task = TeamTask {
            id: Uuid::new_v4(),
            team_id,
            subject: subject.into(),
            description: description.into(),
            status,
            owner: None,
            blocked_by,
            priority,
            result: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create_task(task.clone()).await?;
        Ok(task)
    }

    /// Atomic claim. `false` means the caller lost the race to another
    /// claimant, not an error.
    pub async fn claim(&self, task_id: Uuid, agent_id: Uuid) -> Result<bool, AgentError> {
        self.store.claim_task(task_id, agent_id).await
    }

    pub async fn complete(&self, task_id: Uuid, result: impl Into<String>) -> Result<(), AgentError> {
        self.store.complete_task(task_id, result.into()).await
    }

    pub async fn search(&self, team_id: Uuid, query: &str) -> Result<Vec<TeamTask>, AgentError> {
        self.store.search_tasks(team_id, query).await
    }

    // -- Mailbox ------------------------------------------------------

    pub async fn send(&self, from_agent: Uuid, to_agent: Uuid, content: impl Into<String>, task_id: Option<Uuid>) -> Result<(), AgentError> {
        self.store
            .send_message(TeamMessage {
                id: Uuid::new_v4(),
                from_agent,
                to_agent: Some(to_agent),
                content: content.into(),
                message_type: TeamMessageType::Chat,
                read: false,
                task_id,
                created_at: SystemTime::now(),
            })
            .await
    }

    pub async fn broadcast(&self, from_agent: Uuid, content: impl Into<String>, task_id: Option<Uuid>) -> Result<(), AgentError> {
        self.store
            .send_message(TeamMessage {
                id: Uuid::new_v4(),
                from_agent,
                to_agent: None,
                content: content.into(),
                message_type: TeamMessageType::Broadcast,
                read: false,
                task_id,
                created_at: SystemTime::now(),
            })
            .await
    }

    pub async fn read(&self, agent_id: Uuid) -> Result<Vec<TeamMessage>, AgentError> {
        self.store.read_messages(agent_id).await
    }

    // -- Handoff routing (§4.M) ----------------------------------------

    /// Writes the route, broadcasts a `handoff` event for observers, and
    /// delivers an inbound message to the target agent so its next turn
    /// picks the conversation up without the user repeating themselves.
    /// `transfer_context`, when given, is folded into that inbound content.
    pub async fn transfer(&self, channel: impl Into<String>, chat_id: impl Into<String>, to_agent_key: impl Into<String>, reason: impl Into<String>, transfer_context: Option<String>) -> Result<(), AgentError> {
        let channel = channel.into();
        let chat_id = chat_id.into();
        let to_agent_key = to_agent_key.into();
        let reason = reason.into();

        let route = HandoffRoute { channel: channel.clone(), chat_id: chat_id.clone(), to_agent_key: to_agent_key.clone(), reason: reason.clone(), created_at: SystemTime::now() };
        self.store.set_handoff_route(route).await?;

        self.bus.publish_broadcast(
            "handoff",
            serde_json::json!({"channel": channel, "chat_id": chat_id, "to_agent_key": to_agent_key, "reason": reason}),
        );

        let content = match transfer_context {
            Some(ctx) => format!("Conversation handed off to you. Reason: {reason}\n\n{ctx}"),
            None => format!("Conversation handed off to you. Reason: {reason}"),
        };
        self.bus
            .publish_inbound(InboundMessage {
                channel: format!("handoff:{channel}"),
                sender_id: "handoff".to_string(),
                chat_id,
                content,
                user_id: None,
                agent_id: Some(to_agent_key),
                metadata: HashMap::new(),
            })
            .await;
        Ok(())
    }

    pub async fn clear_handoff(&self, channel: &str, chat_id: &str) -> Result<(), AgentError> {
        self.store.clear_handoff_route(channel, chat_id).await
    }

    /// Consulted by the inbound dispatcher before standard agent routing
    /// (§4.M): `Some(route)` means the next turn for `(channel, chat_id)`
    /// belongs to `route.to_agent_key`, not whatever agent would otherwise
    /// own that channel/chat.
    pub async fn resolve_route(&self, channel: &str, chat_id: &str) -> Result<Option<HandoffRoute>, AgentError> {
        self.store.get_handoff_route(channel, chat_id).await
    }

    // -- Evaluator-optimizer loop ---------------------------------------

    /// Runs up to `rounds` (clamped to [1, `MAX_OPTIMIZER_ROUNDS`]) of
    /// generate → evaluate via sync delegations under `skip_hooks`. Stops
    /// early on the first `APPROVED`; an ambiguous evaluator reply is
    /// treated the same as a rejection, carrying its own text forward as
    /// feedback for the next round. Returns the last generated output and
    /// the number of rounds actually used.
    pub async fn run_evaluator_optimizer(
        &self,
        delegator: &Arc<dyn SyncDelegator>,
        ctx: &CallContext,
        generator_agent_key: &str,
        evaluator_agent_key: &str,
        task: impl Into<String>,
        rounds: Option<u32>,
    ) -> Result<(String, u32), AgentError> {
        let rounds = rounds.unwrap_or(DEFAULT_OPTIMIZER_ROUNDS).clamp(1, MAX_OPTIMIZER_ROUNDS);
        let gen_ctx = ctx.child_with_skip_hooks();
        let mut prompt = task.into();
        let mut output = String::new();

        for round in 1..=rounds {
            output = delegator.delegate_sync(generator_agent_key, prompt.clone(), &gen_ctx).await?;
            let review_task = format!(
                "Review the following output. Reply with exactly `APPROVED` if it is acceptable, \
                 or `REJECTED: <reason>` if it is not.\n\n{output}"
            );
            let reply = delegator.delegate_sync(evaluator_agent_key, review_task, &gen_ctx).await?;
            match parse_reviewer_reply(&reply) {
                HookVerdict::Approved => return Ok((output, round)),
                HookVerdict::Rejected { feedback } => {
                    prompt = format!("{prompt}\n\nA reviewer rejected your previous attempt: {feedback}\nPlease try again.");
                }
                HookVerdict::Skipped { reason } => {
                    prompt = format!("{prompt}\n\nThe reviewer's reply was unclear ({reason}). Please try again and ensure your output is unambiguous.");
                }
            }
        }
        Ok((output, rounds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_model::AgentType;
    use crate::context::PeerKind;
    use std::collections::HashSet;

    fn team_id() -> Uuid {
        Uuid::new_v4()
    }

    fn coordinator() -> Arc<TeamCoordinator> {
        TeamCoordinator::new(Arc::new(InMemoryTeamStore::new()), MessageBus::new())
    }

    #[tokio::test]
    async fn create_and_claim_task_succeeds_once() {
        let coord = coordinator();
        let team = team_id();
        let task = coord.create_task(team, "write docs", "", 1, HashSet::new()).await.unwrap();
        let agent_a = Uuid::new_v4();
        let agent_b = Uuid::new_v4();
        assert!(coord.claim(task.id, agent_a).await.unwrap());
        assert!(!coord.claim(task.id, agent_b).await.unwrap());
    }

    #[tokio::test]
    async fn completing_a_task_unblocks_dependents() {
        let coord = coordinator();
        let team = team_id();
        let blocker = coord.create_task(team, "blocker", "", 1, HashSet::new()).await.unwrap();
        let mut blocked_by = HashSet::new();
        blocked_by.insert(blocker.id);
        let dependent = coord.create_task(team, "dependent", "", 1, blocked_by).await.unwrap();
        assert_eq!(coord.get_task(dependent.id).await.unwrap().unwrap().status, TeamTaskStatus::Blocked);

        let agent = Uuid::new_v4();
        coord.claim(blocker.id, agent).await.unwrap();
        coord.complete(blocker.id, "done").await.unwrap();

        let refreshed = coord.get_task(dependent.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, TeamTaskStatus::Pending);
        assert!(refreshed.blocked_by.is_empty());
    }

    #[tokio::test]
    async fn mailbox_send_then_read_marks_message_read() {
        let coord = coordinator();
        let sender = Uuid::new_v4();
        let recipient = Uuid::new_v4();
        coord.send(sender, recipient, "hi", None).await.unwrap();
        let unread = coord.read(recipient).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert!(coord.read(recipient).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transfer_sets_route_resolvable_by_channel_and_chat() {
        let coord = coordinator();
        coord.transfer("telegram", "chat-1", "support-agent", "user asked for billing help", None).await.unwrap();
        let route = coord.resolve_route("telegram", "chat-1").await.unwrap().unwrap();
        assert_eq!(route.to_agent_key, "support-agent");

        coord.clear_handoff("telegram", "chat-1").await.unwrap();
        assert!(coord.resolve_route("telegram", "chat-1").await.unwrap().is_none());
    }

    struct ScriptedDelegator {
        replies: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SyncDelegator for ScriptedDelegator {
        async fn delegate_sync(&self, _reviewer_agent_key: &str, _task: String, _ctx: &CallContext) -> Result<String, AgentError> {
            Ok(self.replies.lock().unwrap().remove(0))
        }
    }

    fn ctx() -> CallContext {
        CallContext::new("agent-1", "my-agent", AgentType::Open, "telegram", "chat-1", PeerKind::Direct, std::path::PathBuf::from("/tmp"), "trace-1")
    }

    #[tokio::test]
    async fn evaluator_optimizer_stops_on_first_approval() {
        let coord = coordinator();
        let delegator: Arc<dyn SyncDelegator> = Arc::new(ScriptedDelegator { replies: std::sync::Mutex::new(vec!["draft v1".to_string(), "APPROVED".to_string()]) });
        let (output, rounds) = coord.run_evaluator_optimizer(&delegator, &ctx(), "writer", "reviewer", "draft something", None).await.unwrap();
        assert_eq!(output, "draft v1");
        assert_eq!(rounds, 1);
    }

    #[tokio::test]
    async fn evaluator_optimizer_retries_until_rounds_exhausted() {
        let coord = coordinator();
        let delegator: Arc<dyn SyncDelegator> = Arc::new(ScriptedDelegator {
            replies: std::sync::Mutex::new(vec![
                "draft v1".to_string(),
                "REJECTED: too short".to_string(),
                "draft v2".to_string(),
                "REJECTED: still short".to_string(),
            ]),
        });
        let (output, rounds) = coord.run_evaluator_optimizer(&delegator, &ctx(), "writer", "reviewer", "draft something", Some(2)).await.unwrap();
        assert_eq!(output, "draft v2");
        assert_eq!(rounds, 2);
    }
}
