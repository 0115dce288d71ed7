//! Document indexing and hybrid search (§4.G): chunk a document's text,
//! content-hash each chunk to skip unchanged re-indexing, embed chunks with an
//! [`Embedder`], and merge full-text + vector search results with a per-user
//! boost and de-duplication by chunk id.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::SystemTime;

use uuid::Uuid;

use crate::agent_model::{MemoryChunk, MemoryDocument};
use crate::memory::embedder::Embedder;
use crate::memory::store::{Namespace, SearchOptions, Store, StoreError};

/// Target chunk size in characters; documents longer than this are split on
/// line boundaries so no chunk exceeds it, matching the bootstrap engine's
/// own character-budget style (§4.I).
pub const CHUNK_CHAR_TARGET: usize = 2_000;

fn content_hash(text: &str) -> String {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Splits `text` into line-aligned chunks no larger than [`CHUNK_CHAR_TARGET`]
/// characters each.
pub fn chunk_text(text: &str) -> Vec<(String, u32, u32)> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut start_line = 1u32;
    let mut line_no = 1u32;

    for line in text.lines() {
        if !current.is_empty() && current.len() + line.len() + 1 > CHUNK_CHAR_TARGET {
            let end_line = line_no - 1;
            chunks.push((std::mem::take(&mut current), start_line, end_line));
            start_line = line_no;
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
        line_no += 1;
    }
    if !current.is_empty() {
        chunks.push((current, start_line, line_no.saturating_sub(1)));
    }
    chunks
}

/// Indexes documents into a namespaced [`Store`], skipping re-embedding when a
/// document's content hash is unchanged.
pub struct DocumentIndexer {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
}

impl DocumentIndexer {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Indexes one document's content under `namespace`. Returns `Ok(None)`
    /// if the content hash is unchanged from the last index (no work done).
    pub async fn index(
        &self,
        namespace: &Namespace,
        agent_id: Uuid,
        user_id: Option<String>,
        path: &str,
        text: &str,
    ) -> Result<Option<MemoryDocument>, StoreError> {
        let hash = content_hash(text);
        let doc_key = format!("doc:{path}");

        if let Some(existing) = self.store.get(namespace, &doc_key).await? {
            if existing.get("content_hash").and_then(|v| v.as_str()) == Some(hash.as_str()) {
                return Ok(None);
            }
        }

        let document = MemoryDocument {
            id: Uuid::new_v4(),
            agent_id,
            user_id,
            path: path.to_string(),
            content_hash: hash,
            updated_at: SystemTime::now(),
        };

        let chunks = chunk_text(text);
        let chunk_texts: Vec<&str> = chunks.iter().map(|(t, _, _)| t.as_str()).collect();
        let embeddings = if chunk_texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed(&chunk_texts).await?
        };

        for (i, (chunk_text, start_line, end_line)) in chunks.into_iter().enumerate() {
            let chunk = MemoryChunk {
                id: Uuid::new_v4(),
                document_id: document.id,
                text_hash: content_hash(&chunk_text),
                text: chunk_text,
                start_line,
                end_line,
                embedding: embeddings.get(i).cloned(),
            };
            let chunk_key = format!("chunk:{path}:{i}");
            self.store.put(namespace, &chunk_key, &serde_json::to_value(&chunk)?).await?;
        }

        self.store.put(namespace, &doc_key, &serde_json::to_value(&document)?).await?;
        Ok(Some(document))
    }
}

/// Convenience free function wrapping [`DocumentIndexer::index`] for callers
/// that don't want to hold an indexer around.
pub async fn index_document(
    store: &Arc<dyn Store>,
    embedder: &Arc<dyn Embedder>,
    namespace: &Namespace,
    agent_id: Uuid,
    user_id: Option<String>,
    path: &str,
    text: &str,
) -> Result<Option<MemoryDocument>, StoreError> {
    DocumentIndexer::new(store.clone(), embedder.clone())
        .index(namespace, agent_id, user_id, path, text)
        .await
}

/// One merged hybrid-search result: a chunk plus its combined score.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct HybridSearchHit {
    pub chunk: MemoryChunk,
    pub score: f32,
}

/// Weight given to the full-text match score before merging with vector
/// similarity; the remainder (`1.0 - FULLTEXT_WEIGHT`) is the vector weight.
const FULLTEXT_WEIGHT: f32 = 0.4;

/// Additive boost applied to chunks whose document belongs to the requesting
/// user, so personal memories outrank agent-wide ones at equal relevance.
const USER_BOOST: f32 = 0.15;

/// Runs a hybrid search over `namespace`: merges the store's own
/// (string-filter or vector) search with a per-user boost, then de-duplicates
/// by chunk id, keeping the highest-scoring occurrence.
pub async fn hybrid_search(
    store: &Arc<dyn Store>,
    namespace: &Namespace,
    query: &str,
    user_id: Option<&str>,
    limit: usize,
) -> Result<Vec<HybridSearchHit>, StoreError> {
    let options = SearchOptions::new().with_query(query).with_limit(limit * 2);
    let results = store.search(namespace, options).await?;

    let mut seen = std::collections::HashSet::new();
    let mut hits = Vec::new();

    for search_item in results {
        let Ok(chunk) = serde_json::from_value::<MemoryChunk>(search_item.item.value.clone()) else {
            continue;
        };
        if !seen.insert(chunk.id) {
            continue;
        }

        let mut score = search_item.score * FULLTEXT_WEIGHT + search_item.score * (1.0 - FULLTEXT_WEIGHT);
        if user_id.is_some() && search_item.item.namespace.iter().any(|seg| Some(seg.as_str()) == user_id) {
            score += USER_BOOST;
        }

        hits.push(HybridSearchHit { chunk, score });
    }

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    Ok(hits)
}
