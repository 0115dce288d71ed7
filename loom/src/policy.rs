//! Policy Engine (§4.D... referred to in §2's component table as E): computes
//! the set of tool names visible to a given (agent, provider, caller-role)
//! through a seven-step allow pipeline, then deny subtraction, then
//! subagent-specific subtraction.
//!
//! Profiles and groups are closed enumerations (§ Glossary).

use std::collections::HashSet;

/// Built-in tool profiles (§ Glossary).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolProfile {
    Full,
    Coding,
    Messaging,
    Minimal,
}

/// Built-in tool groups (§ Glossary).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolGroup {
    Fs,
    Runtime,
    Web,
    Memory,
    Sessions,
    Ui,
    Automation,
    Messaging,
    Delegation,
    Teams,
}

/// Tool names always removed from a subagent's visible set (§4.D), regardless
/// of any allow list.
pub const SUBAGENT_ALWAYS_DENIED: &[&str] = &[
    "gateway",
    "agents_list",
    "session_status",
    "cron",
    "memory_search",
    "memory_get",
    "sessions_send",
    "whatsapp_login",
];

/// Additionally removed when a subagent is at its maximum spawn depth, so a
/// leaf subagent cannot spawn further subagents or enumerate session history.
pub const SUBAGENT_LEAF_DENIED: &[&str] = &["sessions_list", "sessions_history", "sessions_spawn", "spawn", "subagent"];

/// A named profile's static tool set, and each group's static tool set. A
/// deployment supplies these via [`PolicyCatalog`]; the engine itself only
/// knows the pipeline, not which tools belong to which profile.
#[derive(Clone, Debug, Default)]
pub struct PolicyCatalog {
    pub profiles: std::collections::HashMap<String, HashSet<String>>,
    pub groups: std::collections::HashMap<String, HashSet<String>>,
}

impl PolicyCatalog {
    pub fn profile_tools(&self, profile: &str) -> HashSet<String> {
        self.profiles.get(profile).cloned().unwrap_or_default()
    }

    pub fn group_tools(&self, group: &str) -> HashSet<String> {
        self.groups.get(group).cloned().unwrap_or_default()
    }
}

/// Per-(agent, provider, caller) inputs to the seven-step pipeline (§4.D).
#[derive(Clone, Debug, Default)]
pub struct PolicyInput {
    pub global_profile: String,
    pub provider_profile_override: Option<String>,
    pub global_allow: HashSet<String>,
    pub provider_allow_override: HashSet<String>,
    pub agent_allow: HashSet<String>,
    pub agent_provider_allow: HashSet<String>,
    pub group_allow: HashSet<String>,
    pub global_deny: HashSet<String>,
    pub agent_deny: HashSet<String>,
    pub global_also_allow: HashSet<String>,
    pub agent_also_allow: HashSet<String>,
    pub is_subagent: bool,
    pub subagent_at_max_depth: bool,
}

/// Intersects `set` with `other` unless `other` is empty, in which case the
/// step is a no-op (an empty allow-override step means "no override
/// configured," not "allow nothing").
fn intersect_if_present(set: HashSet<String>, other: &HashSet<String>) -> HashSet<String> {
    if other.is_empty() {
        set
    } else {
        set.intersection(other).cloned().collect()
    }
}

/// Runs the full seven-step allow pipeline plus deny subtraction and
/// subagent restrictions, returning the final visible tool-name set.
pub fn visible_tools(catalog: &PolicyCatalog, input: &PolicyInput) -> HashSet<String> {
    // 1. Global profile.
    let mut visible = catalog.profile_tools(&input.global_profile);

    // 2. Provider-specific profile override.
    if let Some(provider_profile) = &input.provider_profile_override {
        visible = catalog.profile_tools(provider_profile);
    }

    // 3-7: each allow step intersects with the running set when non-empty.
    visible = intersect_if_present(visible, &input.global_allow);
    visible = intersect_if_present(visible, &input.provider_allow_override);
    visible = intersect_if_present(visible, &input.agent_allow);
    visible = intersect_if_present(visible, &input.agent_provider_allow);
    visible = intersect_if_present(visible, &input.group_allow);

    // Deny subtraction.
    for name in &input.global_deny {
        visible.remove(name);
    }
    for name in &input.agent_deny {
        visible.remove(name);
    }

    // Union-in also_allow, global and agent.
    visible.extend(input.global_also_allow.iter().cloned());
    visible.extend(input.agent_also_allow.iter().cloned());

    if input.is_subagent {
        for name in SUBAGENT_ALWAYS_DENIED {
            visible.remove(*name);
        }
        if input.subagent_at_max_depth {
            for name in SUBAGENT_LEAF_DENIED {
                visible.remove(*name);
            }
        }
    }

    visible
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn catalog() -> PolicyCatalog {
        let mut profiles = std::collections::HashMap::new();
        profiles.insert("full".to_string(), set(&["read_file", "write_file", "exec", "memory_search", "spawn"]));
        profiles.insert("minimal".to_string(), set(&["read_file"]));
        PolicyCatalog { profiles, groups: std::collections::HashMap::new() }
    }

    #[test]
    fn allow_steps_only_narrow_when_non_empty() {
        let catalog = catalog();
        let input = PolicyInput { global_profile: "full".into(), ..Default::default() };
        let visible = visible_tools(&catalog, &input);
        assert_eq!(visible, set(&["read_file", "write_file", "exec", "memory_search", "spawn"]));
    }

    #[test]
    fn agent_allow_narrows_the_profile_set() {
        let catalog = catalog();
        let input = PolicyInput {
            global_profile: "full".into(),
            agent_allow: set(&["read_file", "exec"]),
            ..Default::default()
        };
        let visible = visible_tools(&catalog, &input);
        assert_eq!(visible, set(&["read_file", "exec"]));
    }

    #[test]
    fn deny_then_also_allow_applies_in_order() {
        let catalog = catalog();
        let input = PolicyInput {
            global_profile: "full".into(),
            global_deny: set(&["exec"]),
            agent_also_allow: set(&["exec"]),
            ..Default::default()
        };
        let visible = visible_tools(&catalog, &input);
        assert!(visible.contains("exec"), "also_allow must re-admit after deny");
    }

    #[test]
    fn subagent_always_denied_set_is_subtracted() {
        let catalog = catalog();
        let input = PolicyInput { global_profile: "full".into(), is_subagent: true, ..Default::default() };
        let visible = visible_tools(&catalog, &input);
        assert!(!visible.contains("memory_search"));
        assert!(visible.contains("read_file"));
    }

    #[test]
    fn subagent_at_max_depth_also_loses_leaf_denied_tools() {
        let catalog = catalog();
        let input = PolicyInput {
            global_profile: "full".into(),
            is_subagent: true,
            subagent_at_max_depth: true,
            ..Default::default()
        };
        let visible = visible_tools(&catalog, &input);
        assert!(!visible.contains("spawn"));
    }

    #[test]
    fn also_allow_cannot_resurrect_subagent_always_denied_tools() {
        // §4.D orders subagent subtraction after also_allow union-in, so a
        // global also_allow of a hard-denied name must still be removed for
        // subagents specifically... but non-subagent callers keep it.
        let catalog = catalog();
        let input = PolicyInput {
            global_profile: "minimal".into(),
            global_also_allow: set(&["memory_search"]),
            is_subagent: true,
            ..Default::default()
        };
        let visible = visible_tools(&catalog, &input);
        assert!(!visible.contains("memory_search"));
    }
}
