//! Virtual FS Interceptors (§4.E): context-file and memory short-circuits
//! that run, in that order, before a path falls through to sandbox/host
//! resolution ([`crate::tools::file::path::resolve_path_under`]).
//!
//! Both interceptors are backed by the same [`Store`] used by the Memory
//! Engine, under dedicated namespace prefixes (`context`, `memory`) so they
//! never collide with user-facing `remember`/`recall` keys.

use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use crate::agent_model::{is_context_file_name, AgentType};
use crate::context::CallContext;
use crate::error::AgentError;
use crate::memory::{DocumentIndexer, Namespace, Store};

/// Directory/file names a memory path must not pass through.
const MEMORY_EXCLUDED_DIRS: &[&str] = &[".git", "node_modules", "target"];

fn context_namespace(agent_id: &str, user_id: Option<&str>) -> Namespace {
    match user_id {
        Some(uid) => vec!["context".to_string(), agent_id.to_string(), uid.to_string()],
        None => vec!["context".to_string(), agent_id.to_string()],
    }
}

fn memory_namespace(agent_id: &str, user_id: Option<&str>) -> Namespace {
    match user_id {
        Some(uid) => vec!["memory".to_string(), agent_id.to_string(), uid.to_string()],
        None => vec!["memory".to_string(), agent_id.to_string()],
    }
}

/// Returns the bare filename if `path` names one of the seven context files
/// at the top level (no subdirectory).
fn context_file_name(path: &str) -> Option<&'static str> {
    let p = Path::new(path);
    let is_top_level = p.parent().map_or(true, |parent| parent.as_os_str().is_empty());
    if !is_top_level {
        return None;
    }
    let name = p.file_name().and_then(|n| n.to_str())?;
    crate::agent_model::CONTEXT_FILE_NAMES
        .iter()
        .find(|candidate| **candidate == name)
        .copied()
        .filter(|_| is_context_file_name(name))
}

/// True for `MEMORY.md`, `memory.md` at the top level, or any `memory/*.md`
/// path whose components avoid VCS/dependency directories.
fn is_memory_path(path: &str) -> bool {
    let p = Path::new(path);
    let top_level_name = p.file_name().and_then(|n| n.to_str());
    let is_top_level = p.parent().map_or(true, |parent| parent.as_os_str().is_empty());
    if is_top_level && matches!(top_level_name, Some("MEMORY.md") | Some("memory.md")) {
        return true;
    }

    let mut components = p.components();
    let Some(first) = components.next() else { return false };
    if first.as_os_str() != "memory" {
        return false;
    }
    if p.extension().and_then(|e| e.to_str()) != Some("md") {
        return false;
    }
    !p.components()
        .any(|c| c.as_os_str().to_str().map_or(false, |s| MEMORY_EXCLUDED_DIRS.contains(&s)))
}

/// Minimal placeholder content for a context file that has never been
/// written, used only as the last fallback for `open` agents.
fn embedded_template(name: &str) -> &'static str {
    match name {
        "SOUL.md" => "# Soul\n\nNo soul has been written for this agent yet.",
        "IDENTITY.md" => "# Identity\n\nNo identity has been written for this agent yet.",
        "AGENTS.md" => "# Agents\n\nNo collaborating agents have been described yet.",
        "TOOLS.md" => "# Tools\n\nNo tool notes have been written yet.",
        "HEARTBEAT.md" => "# Heartbeat\n\nNo heartbeat routine has been configured yet.",
        "USER.md" => "# User\n\nNo notes about this user yet.",
        "BOOTSTRAP.md" => "",
        _ => "",
    }
}

/// Runs the context-file interceptor, then the memory interceptor, over a
/// tool-requested virtual path. A `None`/`false` result means the path was
/// not claimed and should fall through to sandbox/host resolution.
pub struct FsInterceptorChain {
    store: Arc<dyn Store>,
    indexer: Arc<DocumentIndexer>,
}

impl FsInterceptorChain {
    pub fn new(store: Arc<dyn Store>, indexer: Arc<DocumentIndexer>) -> Self {
        Self { store, indexer }
    }

    /// Attempts to resolve `path` as a context file or memory path. Returns
    /// `Ok(None)` when the path is not claimed by either interceptor.
    pub async fn intercept_read(&self, ctx: &CallContext, path: &str) -> Result<Option<String>, AgentError> {
        if let Some(name) = context_file_name(path) {
            return self.read_context_file(ctx, name).await;
        }
        if is_memory_path(path) {
            return self.read_memory_path(ctx, path).await;
        }
        Ok(None)
    }

    /// Attempts to write `content` at `path` as a context file or memory
    /// path. Returns `Ok(false)` when the path is not claimed by either
    /// interceptor and should fall through to sandbox/host resolution.
    pub async fn intercept_write(&self, ctx: &CallContext, path: &str, content: &str) -> Result<bool, AgentError> {
        if let Some(name) = context_file_name(path) {
            return self.write_context_file(ctx, name, content).await;
        }
        if is_memory_path(path) {
            return self.write_memory_path(ctx, path, content).await;
        }
        Ok(false)
    }

    async fn get_raw(&self, namespace: &Namespace, key: &str) -> Result<Option<String>, AgentError> {
        let value = self.store.get(namespace, key).await.map_err(AgentError::from)?;
        Ok(value.and_then(|v| v.as_str().map(str::to_string)))
    }

    async fn put_raw(&self, namespace: &Namespace, key: &str, content: &str) -> Result<(), AgentError> {
        self.store
            .put(namespace, key, &serde_json::Value::String(content.to_string()))
            .await
            .map_err(AgentError::from)
    }

    async fn read_context_file(&self, ctx: &CallContext, name: &str) -> Result<Option<String>, AgentError> {
        match ctx.agent_type {
            AgentType::Open => {
                if let Some(user_id) = &ctx.user_id {
                    let ns = context_namespace(&ctx.agent_id, Some(user_id));
                    if let Some(content) = self.get_raw(&ns, name).await? {
                        return Ok(Some(content));
                    }
                }
                let ns = context_namespace(&ctx.agent_id, None);
                if let Some(content) = self.get_raw(&ns, name).await? {
                    return Ok(Some(content));
                }
                Ok(Some(embedded_template(name).to_string()))
            }
            AgentType::Predefined => {
                if name == "USER.md" {
                    let Some(user_id) = &ctx.user_id else { return Ok(None) };
                    let ns = context_namespace(&ctx.agent_id, Some(user_id));
                    return self.get_raw(&ns, name).await;
                }
                let ns = context_namespace(&ctx.agent_id, None);
                self.get_raw(&ns, name).await
            }
        }
    }

    async fn write_context_file(&self, ctx: &CallContext, name: &str, content: &str) -> Result<bool, AgentError> {
        if ctx.agent_type == AgentType::Predefined {
            let ns = context_namespace(&ctx.agent_id, None);
            if name == "BOOTSTRAP.md" && content.is_empty() {
                self.store.delete(&ns, name).await.map_err(AgentError::from)?;
                return Ok(true);
            }
            if name != "USER.md" {
                return Err(AgentError::Unauthorized(format!(
                    "predefined agents cannot write {name} via tool call; use the summoning path"
                )));
            }
            let user_id = ctx
                .user_id
                .clone()
                .ok_or_else(|| AgentError::InvalidRequest("USER.md write requires a user id".to_string()))?;
            let ns = context_namespace(&ctx.agent_id, Some(&user_id));
            self.put_raw(&ns, name, content).await?;
            return Ok(true);
        }

        let ns = context_namespace(&ctx.agent_id, ctx.user_id.as_deref());
        self.put_raw(&ns, name, content).await?;
        Ok(true)
    }

    async fn read_memory_path(&self, ctx: &CallContext, path: &str) -> Result<Option<String>, AgentError> {
        let raw_key = format!("raw:{path}");
        if let Some(user_id) = &ctx.user_id {
            let ns = memory_namespace(&ctx.agent_id, Some(user_id));
            if let Some(content) = self.get_raw(&ns, &raw_key).await? {
                return Ok(Some(content));
            }
        }
        let ns = memory_namespace(&ctx.agent_id, None);
        self.get_raw(&ns, &raw_key).await
    }

    /// Writes the raw memory content synchronously, then schedules chunking
    /// and embedding as a detached background task — a write never blocks on
    /// the indexing pipeline.
    async fn write_memory_path(&self, ctx: &CallContext, path: &str, content: &str) -> Result<bool, AgentError> {
        let ns = memory_namespace(&ctx.agent_id, ctx.user_id.as_deref());
        self.put_raw(&ns, &format!("raw:{path}"), content).await?;

        let agent_uuid = Uuid::parse_str(&ctx.agent_id).unwrap_or_else(|_| Uuid::nil());
        let indexer = self.indexer.clone();
        let namespace = ns.clone();
        let user_id = ctx.user_id.clone();
        let path_owned = path.to_string();
        let content_owned = content.to_string();
        tokio::spawn(async move {
            if let Err(e) = indexer.index(&namespace, agent_uuid, user_id, &path_owned, &content_owned).await {
                tracing::warn!(error = %e, path = %path_owned, "memory indexing job failed");
            }
        });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PeerKind;
    use crate::memory::{Embedder, InMemoryStore, StoreError};
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError> {
            Ok(texts.iter().map(|_| vec![0.0; 4]).collect())
        }

        fn dimension(&self) -> usize {
            4
        }
    }

    fn chain() -> FsInterceptorChain {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let embedder: Arc<dyn Embedder> = Arc::new(StubEmbedder);
        FsInterceptorChain::new(store.clone(), Arc::new(DocumentIndexer::new(store, embedder)))
    }

    fn ctx(agent_type: AgentType, user_id: Option<&str>) -> CallContext {
        let mut c = CallContext::new(
            "agent-1",
            "my-agent",
            agent_type,
            "telegram",
            "chat-1",
            PeerKind::Direct,
            PathBuf::from("/workspace"),
            "trace-1",
        );
        if let Some(uid) = user_id {
            c = c.with_user_id(uid);
        }
        c
    }

    #[tokio::test]
    async fn unrelated_path_is_not_claimed() {
        let chain = chain();
        let c = ctx(AgentType::Open, Some("u1"));
        assert!(chain.intercept_read(&c, "src/main.rs").await.unwrap().is_none());
        assert!(!chain.intercept_write(&c, "src/main.rs", "x").await.unwrap());
    }

    #[tokio::test]
    async fn open_agent_falls_back_to_embedded_template() {
        let chain = chain();
        let c = ctx(AgentType::Open, Some("u1"));
        let content = chain.intercept_read(&c, "SOUL.md").await.unwrap().unwrap();
        assert!(content.contains("No soul"));
    }

    #[tokio::test]
    async fn open_agent_write_then_read_round_trips_per_user() {
        let chain = chain();
        let c = ctx(AgentType::Open, Some("u1"));
        assert!(chain.intercept_write(&c, "IDENTITY.md", "hello").await.unwrap());
        let content = chain.intercept_read(&c, "IDENTITY.md").await.unwrap().unwrap();
        assert_eq!(content, "hello");
    }

    #[tokio::test]
    async fn predefined_agent_rejects_write_to_non_user_file() {
        let chain = chain();
        let c = ctx(AgentType::Predefined, Some("u1"));
        let err = chain.intercept_write(&c, "SOUL.md", "hello").await.unwrap_err();
        assert!(matches!(err, AgentError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn predefined_agent_empty_bootstrap_deletes_before_rejection() {
        let chain = chain();
        let c = ctx(AgentType::Predefined, Some("u1"));
        assert!(chain.intercept_write(&c, "BOOTSTRAP.md", "").await.unwrap());
    }

    #[tokio::test]
    async fn predefined_agent_can_write_user_md() {
        let chain = chain();
        let c = ctx(AgentType::Predefined, Some("u1"));
        assert!(chain.intercept_write(&c, "USER.md", "notes").await.unwrap());
        let content = chain.intercept_read(&c, "USER.md").await.unwrap().unwrap();
        assert_eq!(content, "notes");
    }

    #[tokio::test]
    async fn memory_write_then_read_round_trips() {
        let chain = chain();
        let c = ctx(AgentType::Open, Some("u1"));
        assert!(chain.intercept_write(&c, "memory/notes.md", "remember this").await.unwrap());
        let content = chain.intercept_read(&c, "memory/notes.md").await.unwrap().unwrap();
        assert_eq!(content, "remember this");
    }

    #[tokio::test]
    async fn memory_path_under_dot_git_is_not_claimed() {
        let chain = chain();
        assert!(!is_memory_path("memory/.git/config.md"));
        let c = ctx(AgentType::Open, Some("u1"));
        assert!(chain.intercept_read(&c, "memory/.git/config.md").await.unwrap().is_none());
    }

    #[test]
    fn context_file_name_requires_top_level() {
        assert_eq!(context_file_name("SOUL.md"), Some("SOUL.md"));
        assert_eq!(context_file_name("sub/SOUL.md"), None);
        assert_eq!(context_file_name("NOTSOUL.md"), None);
    }
}
