//! SQLite-backed `SessionStore` (§4.B): an in-memory cache in front of a
//! `sessions` table, flushed on `save` via `INSERT OR REPLACE` (equivalent to
//! an atomic overwrite for a single-row key).

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use rusqlite::params;

use crate::error::AgentError;
use crate::message::Message;
use crate::session::{Session, SessionStore, SpawnOrigin};

fn millis_to_system_time(millis: i64) -> SystemTime {
    UNIX_EPOCH + std::time::Duration::from_millis(millis.max(0) as u64)
}

fn system_time_to_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

fn spawn_origin_str(o: SpawnOrigin) -> &'static str {
    match o {
        SpawnOrigin::Inbound => "inbound",
        SpawnOrigin::Subagent => "subagent",
        SpawnOrigin::Delegate => "delegate",
        SpawnOrigin::Cron => "cron",
    }
}

fn spawn_origin_from_str(s: &str) -> SpawnOrigin {
    match s {
        "subagent" => SpawnOrigin::Subagent,
        "delegate" => SpawnOrigin::Delegate,
        "cron" => SpawnOrigin::Cron,
        _ => SpawnOrigin::Inbound,
    }
}

/// SQLite-backed write-behind session store. The `DashMap` cache is the
/// fast path for the life of a run; `save` is the only point at which the
/// cache is written through to `db_path`.
pub struct SqliteSessionStore {
    db_path: PathBuf,
    cache: DashMap<String, Session>,
}

impl SqliteSessionStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path)?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                key TEXT PRIMARY KEY,
                messages TEXT NOT NULL,
                summary TEXT,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                compaction_count INTEGER NOT NULL DEFAULT 0,
                memory_flush_count INTEGER NOT NULL DEFAULT 0,
                last_flush_at INTEGER,
                label TEXT,
                spawn_origin TEXT NOT NULL DEFAULT 'inbound',
                spawn_depth INTEGER NOT NULL DEFAULT 0,
                model TEXT NOT NULL,
                provider TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT 0
            )
            "#,
            [],
        )?;
        Ok(Self { db_path, cache: DashMap::new() })
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
        let messages_json: String = row.get(1)?;
        let last_flush_millis: Option<i64> = row.get(7)?;
        let spawn_origin: String = row.get(9)?;
        Ok(Session {
            key: row.get(0)?,
            messages: serde_json::from_str(&messages_json).unwrap_or_default(),
            summary: row.get(2)?,
            input_tokens: row.get::<_, i64>(3)? as u64,
            output_tokens: row.get::<_, i64>(4)? as u64,
            compaction_count: row.get::<_, i64>(5)? as u32,
            memory_flush_count: row.get::<_, i64>(6)? as u32,
            last_flush_at: last_flush_millis.map(millis_to_system_time),
            label: row.get(8)?,
            spawn_origin: spawn_origin_from_str(&spawn_origin),
            spawn_depth: row.get::<_, i64>(10)? as u32,
            model: row.get(11)?,
            provider: row.get(12)?,
            updated_at: millis_to_system_time(row.get(13)?),
        })
    }

    async fn load_from_db(&self, key: &str) -> Result<Option<Session>, AgentError> {
        let key = key.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)?;
            let mut stmt = conn.prepare("SELECT * FROM sessions WHERE key = ?1")?;
            let session = stmt.query_row(params![key], Self::row_to_session).ok();
            Ok::<_, rusqlite::Error>(session)
        })
        .await
        .map_err(|e| AgentError::Internal(format!("join error: {e}")))?
        .map_err(AgentError::from)
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get_or_create(&self, key: &str, model: &str, provider: &str) -> Result<Session, AgentError> {
        if let Some(session) = self.cache.get(key) {
            return Ok(session.clone());
        }
        let session = match self.load_from_db(key).await? {
            Some(session) => session,
            None => Session::new(key, model, provider),
        };
        self.cache.insert(key.to_string(), session.clone());
        Ok(session)
    }

    async fn append_message(&self, key: &str, message: Message) -> Result<(), AgentError> {
        let mut entry = self.cache.get_mut(key).ok_or_else(|| AgentError::NotFound(format!("session {key}")))?;
        entry.messages.push(message);
        entry.updated_at = SystemTime::now();
        Ok(())
    }

    async fn set_summary(&self, key: &str, summary: Option<String>) -> Result<(), AgentError> {
        let mut entry = self.cache.get_mut(key).ok_or_else(|| AgentError::NotFound(format!("session {key}")))?;
        entry.summary = summary;
        Ok(())
    }

    async fn accumulate_tokens(&self, key: &str, input: u64, output: u64) -> Result<(), AgentError> {
        let mut entry = self.cache.get_mut(key).ok_or_else(|| AgentError::NotFound(format!("session {key}")))?;
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
        let mut entry = self.cache.get_mut(key).ok_or_else(|| AgentError::NotFound(format!("session {key}")))?;
        if let Some(label) = label {
            entry.label = Some(label);
        }
        if let Some(model) = model {
            entry.model = model;
        }
        Ok(())
    }

    async fn save(&self, key: &str) -> Result<(), AgentError> {
        let session = self
            .cache
            .get(key)
            .ok_or_else(|| AgentError::NotFound(format!("session {key}")))?
            .clone();
        let db_path = self.db_path.clone();
        let messages_json = serde_json::to_string(&session.messages)?;

        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)?;
            conn.execute(
                r#"
                INSERT INTO sessions (
                    key, messages, summary, input_tokens, output_tokens, compaction_count,
                    memory_flush_count, last_flush_at, label, spawn_origin, spawn_depth,
                    model, provider, updated_at
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
                ON CONFLICT(key) DO UPDATE SET
                    messages = excluded.messages,
                    summary = excluded.summary,
                    input_tokens = excluded.input_tokens,
                    output_tokens = excluded.output_tokens,
                    compaction_count = excluded.compaction_count,
                    memory_flush_count = excluded.memory_flush_count,
                    last_flush_at = excluded.last_flush_at,
                    label = excluded.label,
                    spawn_origin = excluded.spawn_origin,
                    spawn_depth = excluded.spawn_depth,
                    model = excluded.model,
                    provider = excluded.provider,
                    updated_at = excluded.updated_at
                "#,
                params![
                    session.key,
                    messages_json,
                    session.summary,
                    session.input_tokens as i64,
                    session.output_tokens as i64,
                    session.compaction_count as i64,
                    session.memory_flush_count as i64,
                    session.last_flush_at.map(system_time_to_millis),
                    session.label,
                    spawn_origin_str(session.spawn_origin),
                    session.spawn_depth as i64,
                    session.model,
                    session.provider,
                    system_time_to_millis(session.updated_at),
                ],
            )?;
            Ok::<(), rusqlite::Error>(())
        })
        .await
        .map_err(|e| AgentError::Internal(format!("join error: {e}")))?
        .map_err(AgentError::from)
    }

    async fn list(&self) -> Result<Vec<String>, AgentError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)?;
            let mut stmt = conn.prepare("SELECT key FROM sessions")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|e| AgentError::Internal(format!("join error: {e}")))?
        .map_err(AgentError::from)
    }

    async fn delete(&self, key: &str) -> Result<(), AgentError> {
        self.cache.remove(key);
        let key = key.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)?;
            conn.execute("DELETE FROM sessions WHERE key = ?1", params![key])?;
            Ok::<(), rusqlite::Error>(())
        })
        .await
        .map_err(|e| AgentError::Internal(format!("join error: {e}")))?
        .map_err(AgentError::from)
    }

    async fn reset(&self, key: &str) -> Result<(), AgentError> {
        let mut entry = self.cache.get_mut(key).ok_or_else(|| AgentError::NotFound(format!("session {key}")))?;
        entry.messages.clear();
        entry.summary = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("loom-session-test-{}.db", uuid::Uuid::new_v4()));
        p
    }

    #[tokio::test]
    async fn save_then_reload_round_trips_messages() {
        let path = temp_db();
        let store = SqliteSessionStore::new(&path).unwrap();
        store.get_or_create("agent:a:main", "gpt-4", "openai").await.unwrap();
        store.append_message("agent:a:main", Message::user("hi")).await.unwrap();
        store.save("agent:a:main").await.unwrap();

        let store2 = SqliteSessionStore::new(&path).unwrap();
        let session = store2.get_or_create("agent:a:main", "gpt-4", "openai").await.unwrap();
        assert_eq!(session.messages.len(), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn list_bypasses_cache_and_reflects_saved_rows() {
        let path = temp_db();
        let store = SqliteSessionStore::new(&path).unwrap();
        store.get_or_create("agent:a:main", "gpt-4", "openai").await.unwrap();
        store.save("agent:a:main").await.unwrap();
        let keys = store.list().await.unwrap();
        assert_eq!(keys, vec!["agent:a:main".to_string()]);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn delete_removes_cache_and_persisted_row() {
        let path = temp_db();
        let store = SqliteSessionStore::new(&path).unwrap();
        store.get_or_create("agent:a:main", "gpt-4", "openai").await.unwrap();
        store.save("agent:a:main").await.unwrap();
        store.delete("agent:a:main").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        let _ = std::fs::remove_file(&path);
    }
}
