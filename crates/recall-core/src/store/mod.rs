//! Storage abstraction for companion-recall.
//!
//! The [`Store`] trait defines every storage operation needed by the
//! ingestion pipeline and the retrieval path, enabling pluggable backends
//! (SQLite in the app crate, [`memory::InMemoryStore`] for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::chunk::item_text;
use crate::error::Result;
use crate::models::{
    Chunk, CorpusStats, Document, IndexedContent, ScoredUnit, SearchUnit, SourceItem, SyncRun,
};
use crate::representation::Transition;

/// Restricts which units a search may return.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Only units from this source label.
    pub source: Option<String>,
    /// Only units whose item was updated at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Only units whose item carries this tag.
    pub tag: Option<String>,
}

impl SearchFilter {
    /// Check item-level attributes against the filter.
    pub fn matches(&self, source: &str, updated_at: DateTime<Utc>, tags: &[String]) -> bool {
        if let Some(src) = &self.source {
            if src != source {
                return false;
            }
        }
        if let Some(since) = self.since {
            if updated_at < since {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        true
    }
}

/// Identity of an indexed item, used for deletion reconciliation.
#[derive(Debug, Clone)]
pub struct IndexedRef {
    pub id: String,
    pub source_id: String,
    pub trashed: bool,
}

/// Text a unit is matched and scored on lexically.
///
/// Inline units include the item title; chunks are scored on their own
/// content.
pub fn lexical_text(title: &str, content: &str, is_chunk: bool) -> String {
    if is_chunk {
        content.to_string()
    } else {
        item_text(title, content)
    }
}

impl SearchUnit {
    pub fn lexical_text(&self) -> String {
        lexical_text(&self.title, &self.content, self.document_id.is_some())
    }
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_item`](Store::get_item) | Look up a stored item by upstream identity |
/// | [`apply_index`](Store::apply_index) | Atomically write an item and its new representation |
/// | [`set_trashed`](Store::set_trashed) | Soft-delete or restore an item |
/// | [`list_indexed`](Store::list_indexed) | All items of a source, for reconciliation |
/// | [`vector_candidates`](Store::vector_candidates) | Similarity-scored searchable units |
/// | [`keyword_candidates`](Store::keyword_candidates) | Units containing any query term |
/// | [`record_sync_run`](Store::record_sync_run) | Persist sync bookkeeping |
#[async_trait]
pub trait Store: Send + Sync {
    /// Look up an item by `(source, source_id)`, trashed or not.
    async fn get_item(&self, source: &str, source_id: &str) -> Result<Option<SourceItem>>;

    /// Upsert `item` and replace its representation with `content`.
    ///
    /// The previous representation is read inside the same write and
    /// retired according to [`plan_transition`](crate::representation::plan_transition):
    /// a chunked item's chunks are deleted before the new set is inserted,
    /// and the inline embedding and document reference are never both set.
    /// The representation carried by `item` is ignored.
    async fn apply_index(&self, item: &SourceItem, content: &IndexedContent) -> Result<Transition>;

    /// Mark an item trashed (excluded from search) or restore it.
    async fn set_trashed(&self, item_id: &str, trashed: bool) -> Result<()>;

    /// Every stored item of `source`.
    async fn list_indexed(&self, source: &str) -> Result<Vec<IndexedRef>>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Chunks of a document ordered by `chunk_index`.
    async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>>;

    /// Every non-trashed embedded unit with its similarity to `query_vec` in `[0, 1]`.
    async fn vector_candidates(
        &self,
        query_vec: &[f32],
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredUnit>>;

    /// Non-trashed units whose lowercased lexical text contains any of `terms`.
    async fn keyword_candidates(
        &self,
        terms: &[String],
        filter: &SearchFilter,
    ) -> Result<Vec<SearchUnit>>;

    /// Unit count and mean token count over non-trashed units.
    async fn corpus_stats(&self, filter: &SearchFilter) -> Result<CorpusStats>;

    async fn record_sync_run(&self, run: &SyncRun) -> Result<()>;

    /// Most recent sync runs, newest first.
    async fn recent_sync_runs(&self, limit: usize) -> Result<Vec<SyncRun>>;
}
