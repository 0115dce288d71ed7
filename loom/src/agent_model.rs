//! Data model (§3): Agent, AgentLink, Team, TeamTask, TeamMessage, HandoffRoute,
//! ContextFile, MemoryDocument/Chunk. Agents and links are modeled as
//! UUID-indexed entities (§9: "no structural cycles occur in runtime state; the
//! agent router caches loops by key and is invalidated through bus events").

use std::collections::HashSet;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `open` agents expose all seven context files per-user; `predefined` agents
/// keep six of them agent-level and route writes through the summoning path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Open,
    Predefined,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Summoning,
    SummonFailed,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OtherAgentConfig {
    pub max_delegation_load: Option<u32>,
    pub quality_gates: Vec<QualityGate>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QualityGate {
    pub event: String,
    pub evaluator: EvaluatorKind,
    pub retries: u32,
    pub block_on_failure: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluatorKind {
    Command { command: String },
    Agent { reviewer_agent_key: String },
}

/// Agent (§3). `agent_key` is the stable slug used in session keys and
/// routing; `id` is the storage-layer UUID.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub agent_key: String,
    pub owner_identity: String,
    pub provider: String,
    pub model: String,
    pub context_window: u32,
    pub max_tool_iterations: u32,
    pub workspace_path: String,
    pub restrict_to_workspace: bool,
    pub agent_type: AgentType,
    pub is_default: bool,
    pub status: AgentStatus,
    pub frontmatter: String,
    pub embedding: Option<Vec<f32>>,
    pub other_config: OtherAgentConfig,
    pub deleted_at: Option<SystemTime>,
}

impl Agent {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkDirection {
    Outbound,
    Bidirectional,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LinkSettings {
    pub allow_users: Option<HashSet<String>>,
    pub deny_users: Option<HashSet<String>>,
}

impl LinkSettings {
    pub fn permits_user(&self, user_id: Option<&str>) -> bool {
        if let Some(deny) = &self.deny_users {
            if let Some(u) = user_id {
                if deny.contains(u) {
                    return false;
                }
            }
        }
        if let Some(allow) = &self.allow_users {
            return match user_id {
                Some(u) => allow.contains(u),
                None => allow.is_empty(),
            };
        }
        true
    }
}

/// Directed edge between agents (§3). `source != target`; unique on the pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentLink {
    pub id: Uuid,
    pub source_agent: Uuid,
    pub target_agent: Uuid,
    pub direction: LinkDirection,
    pub max_concurrent: u32,
    pub settings: LinkSettings,
    pub active: bool,
    pub team_id: Option<Uuid>,
}

impl AgentLink {
    /// Whether this link permits a delegation from `source` to `target` given
    /// its direction.
    pub fn permits(&self, source: Uuid, target: Uuid) -> bool {
        if !self.active {
            return false;
        }
        match self.direction {
            LinkDirection::Outbound => self.source_agent == source && self.target_agent == target,
            LinkDirection::Bidirectional => {
                (self.source_agent == source && self.target_agent == target)
                    || (self.source_agent == target && self.target_agent == source)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamRole {
    Lead,
    Member,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeamMember {
    pub agent_id: Uuid,
    pub role: TeamRole,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub lead_agent: Uuid,
    pub members: Vec<TeamMember>,
    pub active: bool,
}

impl Team {
    pub fn member_agent_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.members.iter().map(|m| m.agent_id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamTaskStatus {
    Pending,
    InProgress,
    Blocked,
    Completed,
}

/// Team task (§3). Completion may only transition from `in_progress`; on
/// completion every task whose `blocked_by` becomes empty atomically
/// transitions `blocked` → `pending` (see `team.rs::complete_task`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeamTask {
    pub id: Uuid,
    pub team_id: Uuid,
    pub subject: String,
    pub description: String,
    pub status: TeamTaskStatus,
    pub owner: Option<Uuid>,
    pub blocked_by: HashSet<Uuid>,
    pub priority: i32,
    pub result: Option<String>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamMessageType {
    Chat,
    Broadcast,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeamMessage {
    pub id: Uuid,
    pub from_agent: Uuid,
    pub to_agent: Option<Uuid>,
    pub content: String,
    pub message_type: TeamMessageType,
    pub read: bool,
    pub task_id: Option<Uuid>,
    pub created_at: SystemTime,
}

/// Persistent routing override per (channel, chat_id) (§3, §4.M).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandoffRoute {
    pub channel: String,
    pub chat_id: String,
    pub to_agent_key: String,
    pub reason: String,
    pub created_at: SystemTime,
}

/// The seven well-known context-file names (§3, §6).
pub const CONTEXT_FILE_NAMES: [&str; 7] = [
    "SOUL.md",
    "IDENTITY.md",
    "AGENTS.md",
    "TOOLS.md",
    "HEARTBEAT.md",
    "USER.md",
    "BOOTSTRAP.md",
];

pub fn is_context_file_name(name: &str) -> bool {
    CONTEXT_FILE_NAMES.contains(&name)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextFileScope {
    Agent,
    User,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextFile {
    pub agent_id: Uuid,
    pub user_id: Option<String>,
    pub filename: String,
    pub scope: ContextFileScope,
    pub content: String,
    pub updated_at: SystemTime,
}

/// Memory document (§3): one per (agent, optional user, path), content-hashed
/// so re-indexing is skipped when the source is unchanged.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryDocument {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub user_id: Option<String>,
    pub path: String,
    pub content_hash: String,
    pub updated_at: SystemTime,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub text: String,
    pub text_hash: String,
    pub start_line: u32,
    pub end_line: u32,
    pub embedding: Option<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    #[test]
    fn outbound_link_only_permits_forward_direction() {
        let link = AgentLink {
            id: uuid(0),
            source_agent: uuid(1),
            target_agent: uuid(2),
            direction: LinkDirection::Outbound,
            max_concurrent: 1,
            settings: LinkSettings::default(),
            active: true,
            team_id: None,
        };
        assert!(link.permits(uuid(1), uuid(2)));
        assert!(!link.permits(uuid(2), uuid(1)), "reversed outbound must fail");
    }

    #[test]
    fn bidirectional_link_permits_both_directions() {
        let link = AgentLink {
            id: uuid(0),
            source_agent: uuid(1),
            target_agent: uuid(2),
            direction: LinkDirection::Bidirectional,
            max_concurrent: 1,
            settings: LinkSettings::default(),
            active: true,
            team_id: None,
        };
        assert!(link.permits(uuid(1), uuid(2)));
        assert!(link.permits(uuid(2), uuid(1)));
    }

    #[test]
    fn inactive_link_permits_nothing() {
        let link = AgentLink {
            id: uuid(0),
            source_agent: uuid(1),
            target_agent: uuid(2),
            direction: LinkDirection::Bidirectional,
            max_concurrent: 1,
            settings: LinkSettings::default(),
            active: false,
            team_id: None,
        };
        assert!(!link.permits(uuid(1), uuid(2)));
    }

    #[test]
    fn link_settings_deny_overrides_allow() {
        let mut settings = LinkSettings::default();
        settings.allow_users = Some(HashSet::from(["u1".to_string()]));
        settings.deny_users = Some(HashSet::from(["u1".to_string()]));
        assert!(!settings.permits_user(Some("u1")));
    }

    #[test]
    fn context_file_name_set_matches_spec() {
        assert!(is_context_file_name("BOOTSTRAP.md"));
        assert!(!is_context_file_name("MEMORY.md"));
        assert_eq!(CONTEXT_FILE_NAMES.len(), 7);
    }
}
