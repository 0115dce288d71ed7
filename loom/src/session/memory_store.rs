//! In-memory `SessionStore` (§4.B): a `DashMap` cache with no persistence
//! tier. Used by tests and by deployments with no database configured.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::AgentError;
use crate::message::Message;
use crate::session::{Session, SessionStore, SpawnOrigin};

pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self { sessions: DashMap::new() }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, key: &str, model: &str, provider: &str) -> Result<Session, AgentError> {
        Ok(self
            .sessions
            .entry(key.to_string())
            .or_insert_with(|| Session::new(key, model, provider))
            .clone())
    }

    async fn append_message(&self, key: &str, message: Message) -> Result<(), AgentError> {
        let mut entry = self
            .sessions
            .get_mut(key)
            .ok_or_else(|| AgentError::NotFound(format!("session {key}")))?;
        entry.messages.push(message);
        entry.updated_at = std::time::SystemTime::now();
        Ok(())
    }

    async fn set_summary(&self, key: &str, summary: Option<String>) -> Result<(), AgentError> {
        let mut entry = self
            .sessions
            .get_mut(key)
            .ok_or_else(|| AgentError::NotFound(format!("session {key}")))?;
        entry.summary = summary;
        Ok(())
    }

    async fn accumulate_tokens(&self, key: &str, input: u64, output: u64) -> Result<(), AgentError> {
        let mut entry = self
            .sessions
            .get_mut(key)
            .ok_or_else(|| AgentError::NotFound(format!("session {key}")))?;
        entry.input_tokens += input;
        entry.output_tokens += output;
        Ok(())
    }

    async fn update_metadata(
        &self,
        key: &str,
        label: Option<String>,
        model: Option<String>,
    ) -> Result<(), AgentError> {
        let mut entry = self
            .sessions
            .get_mut(key)
            .ok_or_else(|| AgentError::NotFound(format!("session {key}")))?;
        if let Some(label) = label {
            entry.label = Some(label);
        }
        if let Some(model) = model {
            entry.model = model;
        }
        Ok(())
    }

    async fn save(&self, _key: &str) -> Result<(), AgentError> {
        // No persistence tier; the cache is the system of record.
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, AgentError> {
        Ok(self.sessions.iter().map(|e| e.key().clone()).collect())
    }

    async fn delete(&self, key: &str) -> Result<(), AgentError> {
        self.sessions.remove(key);
        Ok(())
    }

    async fn reset(&self, key: &str) -> Result<(), AgentError> {
        let mut entry = self
            .sessions
            .get_mut(key)
            .ok_or_else(|| AgentError::NotFound(format!("session {key}")))?;
        entry.messages.clear();
        entry.summary = None;
        entry.spawn_origin = SpawnOrigin::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = InMemorySessionStore::new();
        let s1 = store.get_or_create("agent:a:main", "gpt-4", "openai").await.unwrap();
        store.append_message("agent:a:main", Message::user("hi")).await.unwrap();
        let s2 = store.get_or_create("agent:a:main", "gpt-4", "openai").await.unwrap();
        assert_eq!(s1.key, s2.key);
        assert_eq!(store.sessions.get("agent:a:main").unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn reset_clears_messages_but_preserves_model() {
        let store = InMemorySessionStore::new();
        store.get_or_create("agent:a:main", "gpt-4", "openai").await.unwrap();
        store.append_message("agent:a:main", Message::user("hi")).await.unwrap();
        store.set_summary("agent:a:main", Some("s".into())).await.unwrap();
        store.reset("agent:a:main").await.unwrap();
        let s = store.get_or_create("agent:a:main", "gpt-4", "openai").await.unwrap();
        assert!(s.messages.is_empty());
        assert!(s.summary.is_none());
        assert_eq!(s.model, "gpt-4");
    }

    #[tokio::test]
    async fn append_message_on_unknown_session_is_not_found() {
        let store = InMemorySessionStore::new();
        let err = store.append_message("agent:missing:main", Message::user("hi")).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn delete_removes_from_list() {
        let store = InMemorySessionStore::new();
        store.get_or_create("agent:a:main", "gpt-4", "openai").await.unwrap();
        store.delete("agent:a:main").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
