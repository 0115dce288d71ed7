//! The `Store` trait and its supporting types (§4.G Memory Engine / §3 Memory
//! document & chunk). A namespace is a path of string segments (e.g.
//! `["user-123", "memories"]`); keys are scoped within a namespace.

use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Namespace = Vec<String>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("embedding error: {0}")]
    EmbeddingError(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for crate::error::AgentError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => crate::error::AgentError::NotFound("memory item".into()),
            StoreError::Serialization(s) => crate::error::AgentError::InvalidRequest(s),
            StoreError::Storage(s) => crate::error::AgentError::Internal(s),
            StoreError::EmbeddingError(s) => crate::error::AgentError::Unavailable(s),
        }
    }
}

/// One stored value at (namespace, key).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Item {
    pub namespace: Namespace,
    pub key: String,
    pub value: serde_json::Value,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl Item {
    pub fn with_timestamps(
        namespace: Namespace,
        key: impl Into<String>,
        value: serde_json::Value,
        created_at: SystemTime,
        updated_at: SystemTime,
    ) -> Self {
        Self { namespace, key: key.into(), value, created_at, updated_at }
    }

    pub fn new(namespace: Namespace, key: impl Into<String>, value: serde_json::Value) -> Self {
        let now = SystemTime::now();
        Self::with_timestamps(namespace, key, value, now, now)
    }
}

/// An `Item` with a relevance score from a search.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchItem {
    pub item: Item,
    pub score: f32,
}

impl SearchItem {
    pub fn from_item(item: Item) -> Self {
        Self { item, score: 0.0 }
    }

    pub fn with_score(item: Item, score: f32) -> Self {
        Self { item, score }
    }
}

/// Flattened search hit, used by the `search_memories`/`remember` tool layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreSearchHit {
    pub key: String,
    pub value: serde_json::Value,
    pub score: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterOp {
    Eq(serde_json::Value),
    Ne(serde_json::Value),
    Gt(serde_json::Value),
    Gte(serde_json::Value),
    Lt(serde_json::Value),
    Lte(serde_json::Value),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    pub query: Option<String>,
    pub filter: Option<std::collections::HashMap<String, FilterOp>>,
    pub limit: usize,
    pub offset: usize,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self { query: None, filter: None, limit: 10, offset: 0 }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceMatchType {
    Prefix,
    Suffix,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchCondition {
    pub path: Namespace,
    pub match_type: NamespaceMatchType,
}

impl MatchCondition {
    pub fn prefix(path: Namespace) -> Self {
        Self { path, match_type: NamespaceMatchType::Prefix }
    }

    pub fn suffix(path: Namespace) -> Self {
        Self { path, match_type: NamespaceMatchType::Suffix }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ListNamespacesOptions {
    pub match_conditions: Vec<MatchCondition>,
    pub max_depth: Option<usize>,
    pub offset: usize,
    pub limit: usize,
}

impl ListNamespacesOptions {
    pub fn new() -> Self {
        Self { match_conditions: Vec::new(), max_depth: None, offset: 0, limit: usize::MAX }
    }

    pub fn with_prefix(mut self, prefix: Namespace) -> Self {
        self.match_conditions.push(MatchCondition::prefix(prefix));
        self
    }

    pub fn with_suffix(mut self, suffix: Namespace) -> Self {
        self.match_conditions.push(MatchCondition::suffix(suffix));
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreOp {
    Get { namespace: Namespace, key: String },
    Put { namespace: Namespace, key: String, value: Option<serde_json::Value> },
    Search { namespace_prefix: Namespace, options: SearchOptions },
    ListNamespaces { options: ListNamespacesOptions },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum StoreOpResult {
    Get(Option<Item>),
    Put,
    Search(Vec<SearchItem>),
    ListNamespaces(Vec<Namespace>),
}

/// Long-term key/value + search store backing the Memory Engine (§4.G) and
/// the `remember`/`recall`/`search_memories`/`list_memories` tools.
#[async_trait]
pub trait Store: Send + Sync {
    async fn put(&self, namespace: &Namespace, key: &str, value: &serde_json::Value) -> Result<(), StoreError>;

    async fn get(&self, namespace: &Namespace, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    async fn get_item(&self, namespace: &Namespace, key: &str) -> Result<Option<Item>, StoreError>;

    async fn delete(&self, namespace: &Namespace, key: &str) -> Result<(), StoreError>;

    async fn list(&self, namespace: &Namespace) -> Result<Vec<String>, StoreError>;

    async fn search(&self, namespace_prefix: &Namespace, options: SearchOptions) -> Result<Vec<SearchItem>, StoreError>;

    async fn list_namespaces(&self, options: ListNamespacesOptions) -> Result<Vec<Namespace>, StoreError>;

    async fn batch(&self, ops: Vec<StoreOp>) -> Result<Vec<StoreOpResult>, StoreError>;

    /// Flattened convenience wrapper used by the `search_memories` tool.
    async fn search_simple(
        &self,
        namespace: &Namespace,
        query: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<StoreSearchHit>, StoreError> {
        let options = SearchOptions { query: query.map(String::from), filter: None, limit: limit.unwrap_or(10), offset: 0 };
        let results = self.search(namespace, options).await?;
        Ok(results
            .into_iter()
            .map(|si| StoreSearchHit { key: si.item.key, value: si.item.value, score: si.score })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_options_builder() {
        let o = SearchOptions::new().with_query("hello").with_limit(5).with_offset(1);
        assert_eq!(o.query.as_deref(), Some("hello"));
        assert_eq!(o.limit, 5);
        assert_eq!(o.offset, 1);
    }

    #[test]
    fn list_namespaces_options_builder_accumulates_conditions() {
        let o = ListNamespacesOptions::new()
            .with_prefix(vec!["u1".into()])
            .with_max_depth(2);
        assert_eq!(o.match_conditions.len(), 1);
        assert_eq!(o.max_depth, Some(2));
    }

    #[test]
    fn item_new_sets_equal_created_and_updated() {
        let item = Item::new(vec!["a".into()], "k", serde_json::json!(1));
        assert_eq!(item.created_at, item.updated_at);
    }
}
