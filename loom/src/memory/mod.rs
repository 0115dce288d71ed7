//! Memory Engine (§4.G): chunk, hash, embed, and hybrid-search documents
//! (full-text + vector, weighted merge, per-user boost, dedup), built on top
//! of the `Store` trait which also backs the `remember`/`recall` tools.
//!
//! ## Store implementations
//!
//! | Type             | Persistence | Search                       |
//! |------------------|-------------|-------------------------------|
//! | [`InMemoryStore`] | In-memory   | String filter (key/value)     |
//! | [`SqliteStore`]   | SQLite file | String filter                 |
//! | [`SqliteVecStore`]| SQLite file | Vector similarity (semantic)  |
//!
//! `SqliteVecStore` requires an [`Embedder`] for vector indexing.

mod document;
mod embedder;
mod in_memory_store;
mod openai_embedder;
mod sqlite_store;
mod sqlite_vec_store;
pub mod store;
mod uuid6;

pub use document::{hybrid_search, index_document, DocumentIndexer, HybridSearchHit};
pub use embedder::Embedder;
pub use in_memory_store::InMemoryStore;
pub use openai_embedder::OpenAIEmbedder;
pub use sqlite_store::SqliteStore;
pub use sqlite_vec_store::SqliteVecStore;
pub use store::{
    FilterOp, Item, ListNamespacesOptions, MatchCondition, Namespace, NamespaceMatchType,
    SearchItem, SearchOptions, Store, StoreError, StoreOp, StoreOpResult, StoreSearchHit,
};
pub use uuid6::{uuid6, uuid6_with_params, Uuid6};
