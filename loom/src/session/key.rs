//! Session-key grammar (§3): parsing and construction of the string keys that
//! partition queues, caches, and history. Keys are persisted verbatim (§6),
//! so parsing is lenient for forward compatibility but construction always
//! produces the canonical form.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerScope {
    Direct,
    Group,
}

impl fmt::Display for PeerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerScope::Direct => write!(f, "direct"),
            PeerScope::Group => write!(f, "group"),
        }
    }
}

/// A parsed or constructed session key (§3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionKey {
    Channel { agent_id: String, channel: String, scope: PeerScope, peer_id: String, topic: Option<String> },
    Subagent { agent_id: String, label: String },
    Cron { agent_id: String, job_id: String, run_id: String },
    Main { agent_id: String },
    Delegate { short_src_id: String, target_key: String, delegation_id: String },
}

impl SessionKey {
    pub fn channel(
        agent_id: impl Into<String>,
        channel: impl Into<String>,
        scope: PeerScope,
        peer_id: impl Into<String>,
    ) -> Self {
        SessionKey::Channel {
            agent_id: agent_id.into(),
            channel: channel.into(),
            scope,
            peer_id: peer_id.into(),
            topic: None,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        if let SessionKey::Channel { topic: t, .. } = &mut self {
            *t = Some(topic.into());
        }
        self
    }

    pub fn subagent(agent_id: impl Into<String>, label: impl Into<String>) -> Self {
        SessionKey::Subagent { agent_id: agent_id.into(), label: label.into() }
    }

    pub fn cron(agent_id: impl Into<String>, job_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        SessionKey::Cron { agent_id: agent_id.into(), job_id: job_id.into(), run_id: run_id.into() }
    }

    pub fn main(agent_id: impl Into<String>) -> Self {
        SessionKey::Main { agent_id: agent_id.into() }
    }

    pub fn delegate(
        short_src_id: impl Into<String>,
        target_key: impl Into<String>,
        delegation_id: impl Into<String>,
    ) -> Self {
        SessionKey::Delegate {
            short_src_id: short_src_id.into(),
            target_key: target_key.into(),
            delegation_id: delegation_id.into(),
        }
    }

    pub fn agent_id(&self) -> Option<&str> {
        match self {
            SessionKey::Channel { agent_id, .. }
            | SessionKey::Subagent { agent_id, .. }
            | SessionKey::Cron { agent_id, .. }
            | SessionKey::Main { agent_id } => Some(agent_id),
            SessionKey::Delegate { .. } => None,
        }
    }

    /// Parses a canonical session-key string. Returns `None` on an
    /// unrecognized shape; callers that only need the string form should
    /// prefer `to_string()`/`Display` and avoid round-tripping through parse.
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            ["delegate", short_src_id, target_key, delegation_id] => {
                Some(SessionKey::delegate(*short_src_id, *target_key, *delegation_id))
            }
            ["agent", agent_id, "main"] => Some(SessionKey::main(*agent_id)),
            ["agent", agent_id, "subagent", label] => Some(SessionKey::subagent(*agent_id, *label)),
            ["agent", agent_id, "cron", job_id, "run", run_id] => {
                Some(SessionKey::cron(*agent_id, *job_id, *run_id))
            }
            ["agent", agent_id, channel, "direct", peer_id] => {
                Some(SessionKey::channel(*agent_id, *channel, PeerScope::Direct, *peer_id))
            }
            ["agent", agent_id, channel, "group", peer_id] => {
                Some(SessionKey::channel(*agent_id, *channel, PeerScope::Group, *peer_id))
            }
            ["agent", agent_id, channel, "group", peer_id, "topic", n] => Some(
                SessionKey::channel(*agent_id, *channel, PeerScope::Group, *peer_id).with_topic(*n),
            ),
            _ => None,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKey::Channel { agent_id, channel, scope, peer_id, topic } => {
                write!(f, "agent:{agent_id}:{channel}:{scope}:{peer_id}")?;
                if let Some(n) = topic {
                    write!(f, ":topic:{n}")?;
                }
                Ok(())
            }
            SessionKey::Subagent { agent_id, label } => write!(f, "agent:{agent_id}:subagent:{label}"),
            SessionKey::Cron { agent_id, job_id, run_id } => {
                write!(f, "agent:{agent_id}:cron:{job_id}:run:{run_id}")
            }
            SessionKey::Main { agent_id } => write!(f, "agent:{agent_id}:main"),
            SessionKey::Delegate { short_src_id, target_key, delegation_id } => {
                write!(f, "delegate:{short_src_id}:{target_key}:{delegation_id}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_channel_round_trips() {
        let key = SessionKey::channel("a1", "telegram", PeerScope::Direct, "u1");
        let s = key.to_string();
        assert_eq!(s, "agent:a1:telegram:direct:u1");
        assert_eq!(SessionKey::parse(&s), Some(key));
    }

    #[test]
    fn group_with_topic_round_trips() {
        let key = SessionKey::channel("a1", "telegram", PeerScope::Group, "g1").with_topic("42");
        let s = key.to_string();
        assert_eq!(s, "agent:a1:telegram:group:g1:topic:42");
        assert_eq!(SessionKey::parse(&s), Some(key));
    }

    #[test]
    fn subagent_main_cron_and_delegate_round_trip() {
        assert_eq!(SessionKey::subagent("a1", "research").to_string(), "agent:a1:subagent:research");
        assert_eq!(SessionKey::main("a1").to_string(), "agent:a1:main");
        assert_eq!(SessionKey::cron("a1", "job1", "run1").to_string(), "agent:a1:cron:job1:run:run1");
        assert_eq!(
            SessionKey::delegate("src1", "agent:a2:main", "d1").to_string(),
            "delegate:src1:agent:a2:main:d1"
        );
    }

    #[test]
    fn parse_rejects_unknown_shapes() {
        assert_eq!(SessionKey::parse("not-a-key"), None);
    }
}
