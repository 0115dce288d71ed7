//! Skills Engine (§4.H): five-tier skill resolution over per-user, agent, and
//! global skill directories, falling back to a lazily-rebuilt BM25 index and
//! an optional embedding rerank pass. Also decides whether the bootstrap
//! system prompt (§4.I) should inline skill content or point the model at the
//! search tool.
//!
//! Tiers, tried in order, first hit wins:
//! 1. Exact name match under the per-user skills directory.
//! 2. Exact name match under the agent skills directory.
//! 3. Exact name match under the global skills directory.
//! 4. BM25 full-text search over the merged corpus.
//! 5. Embedding rerank of the BM25 candidates (only when an [`Embedder`] is
//!    configured; otherwise tier 4's top hit stands).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::memory::Embedder;

/// Max skills inlined into the system prompt before falling back to search.
pub const INLINE_MAX_SKILLS: usize = 20;
/// Max estimated token cost of inlined skill content before falling back to search.
pub const INLINE_MAX_TOKENS: usize = 3_500;

/// Crude chars-per-token heuristic, consistent with the bootstrap engine's
/// own character-budget accounting (§4.I) rather than a real tokenizer.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// One skill file resolved from any of the three directory tiers.
#[derive(Clone, Debug)]
pub struct SkillMeta {
    pub name: String,
    pub path: PathBuf,
    pub content: String,
}

impl SkillMeta {
    fn token_estimate(&self) -> usize {
        estimate_tokens(&self.content)
    }
}

/// Which tier a resolution was satisfied at, for logging/debugging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionTier {
    PerUserExact,
    AgentExact,
    GlobalExact,
    Bm25,
    EmbeddingRerank,
}

#[derive(Clone, Debug)]
pub struct SkillMatch {
    pub skill: SkillMeta,
    pub tier: ResolutionTier,
    pub score: f32,
}

const SKILL_EXTENSIONS: &[&str] = &["md", "txt", "markdown"];

fn read_exact(dir: &Path, name: &str) -> Option<SkillMeta> {
    for ext in SKILL_EXTENSIONS {
        let path = dir.join(format!("{name}.{ext}"));
        if path.is_file() {
            let content = std::fs::read_to_string(&path).ok()?;
            return Some(SkillMeta { name: name.to_string(), path, content });
        }
    }
    None
}

fn list_dir(dir: &Path) -> Vec<SkillMeta> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else { return out };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else { continue };
        if !SKILL_EXTENSIONS.contains(&ext) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        if let Ok(content) = std::fs::read_to_string(&path) {
            out.push(SkillMeta { name: stem.to_string(), path: path.clone(), content });
        }
    }
    out
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

/// A BM25 index over a fixed corpus snapshot. Rebuilt wholesale whenever the
/// Skills Engine's directories are marked dirty (§4.H lazy rebuild).
struct Bm25Index {
    docs: Vec<SkillMeta>,
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lengths: Vec<usize>,
    avg_doc_length: f32,
    doc_freq: HashMap<String, u32>,
}

impl Bm25Index {
    fn build(docs: Vec<SkillMeta>) -> Self {
        let mut term_freqs = Vec::with_capacity(docs.len());
        let mut doc_lengths = Vec::with_capacity(docs.len());
        let mut doc_freq: HashMap<String, u32> = HashMap::new();

        for doc in &docs {
            let tokens = tokenize(&doc.content);
            doc_lengths.push(tokens.len());
            let mut tf: HashMap<String, u32> = HashMap::new();
            for term in &tokens {
                *tf.entry(term.clone()).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(tf);
        }

        let avg_doc_length = if doc_lengths.is_empty() {
            0.0
        } else {
            doc_lengths.iter().sum::<usize>() as f32 / doc_lengths.len() as f32
        };

        Self { docs, term_freqs, doc_lengths, avg_doc_length, doc_freq }
    }

    fn score(&self, query_terms: &[String], doc_idx: usize) -> f32 {
        let n = self.docs.len() as f32;
        let doc_len = self.doc_lengths[doc_idx] as f32;
        let tf_map = &self.term_freqs[doc_idx];

        let mut score = 0.0;
        for term in query_terms {
            let Some(&tf) = tf_map.get(term) else { continue };
            let df = *self.doc_freq.get(term).unwrap_or(&0) as f32;
            if df == 0.0 {
                continue;
            }
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            let tf = tf as f32;
            let denom = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / self.avg_doc_length.max(1.0));
            score += idf * (tf * (BM25_K1 + 1.0)) / denom;
        }
        score
    }

    /// Returns up to `limit` documents scored against `query`, best first,
    /// excluding zero-score documents.
    fn search(&self, query: &str, limit: usize) -> Vec<(usize, f32)> {
        let query_terms = tokenize(query);
        let mut scored: Vec<(usize, f32)> = (0..self.docs.len())
            .map(|i| (i, self.score(&query_terms, i)))
            .filter(|(_, s)| *s > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Directories and optional embedder backing the five resolution tiers.
pub struct SkillsEngine {
    global_dir: Option<PathBuf>,
    agent_dir: PathBuf,
    user_root: Option<PathBuf>,
    embedder: Option<Arc<dyn Embedder>>,
    index: RwLock<Option<Bm25Index>>,
    dirty: AtomicBool,
}

impl SkillsEngine {
    pub fn new(agent_dir: PathBuf) -> Self {
        Self {
            global_dir: None,
            agent_dir,
            user_root: None,
            embedder: None,
            index: RwLock::new(None),
            dirty: AtomicBool::new(true),
        }
    }

    pub fn with_global_dir(mut self, dir: PathBuf) -> Self {
        self.global_dir = Some(dir);
        self
    }

    pub fn with_user_root(mut self, dir: PathBuf) -> Self {
        self.user_root = Some(dir);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Invalidates the BM25 index so the next search rebuilds it; called in
    /// response to the `cache:skills` bus event or a skill file write.
    pub fn invalidate(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    fn user_dir(&self, user_id: &str) -> Option<PathBuf> {
        self.user_root.as_ref().map(|root| root.join(user_id))
    }

    fn merged_corpus(&self, user_id: Option<&str>) -> Vec<SkillMeta> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();

        if let Some(uid) = user_id {
            if let Some(dir) = self.user_dir(uid) {
                for skill in list_dir(&dir) {
                    if seen.insert(skill.name.clone()) {
                        out.push(skill);
                    }
                }
            }
        }
        for skill in list_dir(&self.agent_dir) {
            if seen.insert(skill.name.clone()) {
                out.push(skill);
            }
        }
        if let Some(dir) = &self.global_dir {
            for skill in list_dir(dir) {
                if seen.insert(skill.name.clone()) {
                    out.push(skill);
                }
            }
        }
        out
    }

    /// Lists every skill visible to `user_id`, deduplicated per-user > agent >
    /// global, for the bootstrap inline-vs-search decision (§4.I).
    pub fn list_visible(&self, user_id: Option<&str>) -> Vec<SkillMeta> {
        self.merged_corpus(user_id)
    }

    /// True when the visible skill set is small enough to inline into the
    /// system prompt rather than pointing the model at the search tool.
    pub fn should_inline(&self, user_id: Option<&str>) -> bool {
        let skills = self.list_visible(user_id);
        if skills.len() > INLINE_MAX_SKILLS {
            return false;
        }
        let total_tokens: usize = skills.iter().map(SkillMeta::token_estimate).sum();
        total_tokens <= INLINE_MAX_TOKENS
    }

    /// Tiers 1-3: exact-name lookup across per-user, agent, and global
    /// directories, in that priority order.
    pub fn resolve_by_name(&self, name: &str, user_id: Option<&str>) -> Option<SkillMatch> {
        if let Some(uid) = user_id {
            if let Some(dir) = self.user_dir(uid) {
                if let Some(skill) = read_exact(&dir, name) {
                    return Some(SkillMatch { skill, tier: ResolutionTier::PerUserExact, score: 1.0 });
                }
            }
        }
        if let Some(skill) = read_exact(&self.agent_dir, name) {
            return Some(SkillMatch { skill, tier: ResolutionTier::AgentExact, score: 1.0 });
        }
        if let Some(dir) = &self.global_dir {
            if let Some(skill) = read_exact(dir, name) {
                return Some(SkillMatch { skill, tier: ResolutionTier::GlobalExact, score: 1.0 });
            }
        }
        None
    }

    async fn rebuild_index_if_dirty(&self, user_id: Option<&str>) {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            if self.index.read().await.is_some() {
                return;
            }
        }
        let corpus = self.merged_corpus(user_id);
        let mut guard = self.index.write().await;
        *guard = Some(Bm25Index::build(corpus));
    }

    /// Full five-tier resolution: exact name first, then BM25 full-text
    /// search, then an optional embedding rerank of the BM25 candidates.
    pub async fn resolve(&self, query: &str, user_id: Option<&str>) -> Option<SkillMatch> {
        if let Some(hit) = self.resolve_by_name(query, user_id) {
            return Some(hit);
        }

        self.rebuild_index_if_dirty(user_id).await;
        let guard = self.index.read().await;
        let index = guard.as_ref()?;
        let candidates = index.search(query, 8);
        if candidates.is_empty() {
            return None;
        }

        let Some(embedder) = &self.embedder else {
            let (idx, score) = candidates[0];
            return Some(SkillMatch { skill: index.docs[idx].clone(), tier: ResolutionTier::Bm25, score });
        };

        let query_embedding = embedder.embed(&[query]).await.ok()?.into_iter().next()?;
        let texts: Vec<&str> = candidates.iter().map(|(i, _)| index.docs[*i].content.as_str()).collect();
        let doc_embeddings = embedder.embed(&texts).await.ok()?;

        let mut reranked: Vec<(usize, f32)> = candidates
            .iter()
            .zip(doc_embeddings.iter())
            .map(|((idx, _), emb)| (*idx, cosine_similarity(&query_embedding, emb)))
            .collect();
        reranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let (best_idx, best_score) = reranked[0];
        Some(SkillMatch {
            skill: index.docs[best_idx].clone(),
            tier: ResolutionTier::EmbeddingRerank,
            score: best_score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::memory::StoreError;

    fn write_skill(dir: &Path, name: &str, content: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(format!("{name}.md")), content).unwrap();
    }

    #[test]
    fn estimate_tokens_is_roughly_chars_over_four() {
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[tokio::test]
    async fn resolve_by_name_prefers_per_user_over_agent_over_global() {
        let agent_dir = tempfile::tempdir().unwrap();
        let user_root = tempfile::tempdir().unwrap();
        let global_dir = tempfile::tempdir().unwrap();
        write_skill(agent_dir.path(), "deploy", "agent version");
        write_skill(global_dir.path(), "deploy", "global version");
        write_skill(&user_root.path().join("u1"), "deploy", "user version");

        let engine = SkillsEngine::new(agent_dir.path().to_path_buf())
            .with_global_dir(global_dir.path().to_path_buf())
            .with_user_root(user_root.path().to_path_buf());

        let hit = engine.resolve_by_name("deploy", Some("u1")).unwrap();
        assert_eq!(hit.tier, ResolutionTier::PerUserExact);
        assert_eq!(hit.skill.content, "user version");

        let hit_no_user = engine.resolve_by_name("deploy", None).unwrap();
        assert_eq!(hit_no_user.tier, ResolutionTier::AgentExact);
    }

    #[tokio::test]
    async fn resolve_falls_back_to_bm25_when_no_exact_name() {
        let agent_dir = tempfile::tempdir().unwrap();
        write_skill(agent_dir.path(), "deploy_runbook", "how to deploy the service to production safely");
        write_skill(agent_dir.path(), "unrelated", "fruit salad recipe instructions");

        let engine = SkillsEngine::new(agent_dir.path().to_path_buf());
        let hit = engine.resolve("how do I deploy to production", None).await.unwrap();
        assert_eq!(hit.tier, ResolutionTier::Bm25);
        assert_eq!(hit.skill.name, "deploy_runbook");
    }

    #[tokio::test]
    async fn resolve_returns_none_when_corpus_empty() {
        let agent_dir = tempfile::tempdir().unwrap();
        let engine = SkillsEngine::new(agent_dir.path().to_path_buf());
        assert!(engine.resolve("anything", None).await.is_none());
    }

    #[tokio::test]
    async fn invalidate_forces_next_resolve_to_see_new_files() {
        let agent_dir = tempfile::tempdir().unwrap();
        let engine = SkillsEngine::new(agent_dir.path().to_path_buf());
        assert!(engine.resolve("deploy", None).await.is_none());

        write_skill(agent_dir.path(), "deploy_runbook", "deploy the service");
        engine.invalidate();
        let hit = engine.resolve("deploy the service", None).await.unwrap();
        assert_eq!(hit.tier, ResolutionTier::Bm25);
    }

    #[test]
    fn should_inline_false_when_over_skill_count_limit() {
        let agent_dir = tempfile::tempdir().unwrap();
        for i in 0..25 {
            write_skill(agent_dir.path(), &format!("skill_{i}"), "short");
        }
        let engine = SkillsEngine::new(agent_dir.path().to_path_buf());
        assert!(!engine.should_inline(None));
    }

    #[test]
    fn should_inline_false_when_over_token_budget() {
        let agent_dir = tempfile::tempdir().unwrap();
        write_skill(agent_dir.path(), "huge", &"word ".repeat(5_000));
        let engine = SkillsEngine::new(agent_dir.path().to_path_buf());
        assert!(!engine.should_inline(None));
    }

    #[test]
    fn should_inline_true_for_small_corpus() {
        let agent_dir = tempfile::tempdir().unwrap();
        write_skill(agent_dir.path(), "tiny", "short skill body");
        let engine = SkillsEngine::new(agent_dir.path().to_path_buf());
        assert!(engine.should_inline(None));
    }

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError> {
            Ok(texts
                .iter()
                .map(|t| if t.contains("deploy") { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
                .collect())
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn embedding_rerank_runs_when_embedder_configured() {
        let agent_dir = tempfile::tempdir().unwrap();
        write_skill(agent_dir.path(), "deploy_runbook", "deploy the service to production");
        write_skill(agent_dir.path(), "cooking", "deploy is mentioned once but this is about cooking deploy");

        let engine = SkillsEngine::new(agent_dir.path().to_path_buf()).with_embedder(Arc::new(StubEmbedder));
        let hit = engine.resolve("deploy", None).await.unwrap();
        assert_eq!(hit.tier, ResolutionTier::EmbeddingRerank);
    }
}
