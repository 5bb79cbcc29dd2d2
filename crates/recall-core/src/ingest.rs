//! Ingestion pipeline and incremental sync.
//!
//! [`Indexer::ingest`] indexes one upstream note:
//!
//! 1. Hash the normalized `title + body`. If the hash equals the stored
//!    one, skip embedding entirely (restoring the item if it was trashed).
//! 2. Below `chunk_threshold_words` the item is embedded inline; otherwise
//!    its body is chunked and every chunk is embedded in one batch call.
//! 3. The new representation is written with [`Store::apply_index`], which
//!    retires the old one in the same write.
//!
//! A provider failure never aborts sibling work. If the chunk batch fails,
//! each chunk is retried on its own; if any chunk still fails, the item is
//! left untouched (old representation and old hash) and the failures are
//! returned as [`UnitError`]s so the next sync retries it.
//!
//! [`Indexer::sync_incremental`] runs `ingest` over everything a
//! [`NoteSource`] reports, soft-deletes items the source no longer
//! reports, and persists a [`SyncRun`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::chunk::{chunk_text, content_hash, item_text, word_count, ChunkParams};
use crate::embedding::{validate_embeddings, EmbeddingProvider};
use crate::error::{ErrorKind, ProviderError, RecallError, Result};
use crate::models::{
    Chunk, Document, IndexedContent, ScanReport, SourceItem, SyncCounts, SyncRun, SyncStatus,
    UnitError, UpstreamNote,
};
use crate::representation::{item_state, ItemState, Transition};
use crate::store::Store;

/// An upstream collaborator that reports the current set of notes.
///
/// Every note carries a stable id, title and body, a last-modified time
/// and a trash flag. Notes the source stops reporting are treated as
/// removed; notes it reports as skipped are not.
#[async_trait]
pub trait NoteSource: Send + Sync {
    /// Source label stored on every item, e.g. `"notes"`.
    fn name(&self) -> &str;

    async fn scan(&self) -> anyhow::Result<ScanReport>;
}

/// Indexing thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexParams {
    /// Items with at least this many words are chunked.
    pub chunk_threshold_words: usize,
    pub chunking: ChunkParams,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            chunk_threshold_words: 300,
            chunking: ChunkParams::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    New,
    Updated,
    Unchanged,
    Failed,
}

/// Outcome of ingesting one note.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub status: IngestStatus,
    /// `None` when nothing was written.
    pub transition: Option<Transition>,
    /// Vectors obtained from the provider.
    pub embedded: usize,
    pub chunks_created: usize,
    pub errors: Vec<UnitError>,
}

impl IngestReport {
    fn skipped(status: IngestStatus) -> Self {
        Self {
            status,
            transition: None,
            embedded: 0,
            chunks_created: 0,
            errors: Vec::new(),
        }
    }

    fn failed(errors: Vec<UnitError>) -> Self {
        Self {
            errors,
            ..Self::skipped(IngestStatus::Failed)
        }
    }
}

/// Accumulated result of a batch of unit operations.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub errors: Vec<UnitError>,
}

impl BatchOutcome {
    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_errors(&mut self, errors: impl IntoIterator<Item = UnitError>) {
        self.errors.extend(errors);
    }
}

/// What a sync would do to one note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    New,
    /// Upstream content changed: re-embed.
    Update,
    Unchanged,
    /// Trashed locally but reported live again.
    Restore,
    /// Indexed but no longer reported live.
    Trash,
    /// Reported upstream but unreadable; left as it is.
    Skip,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanEntry {
    pub source_id: String,
    pub state: ItemState,
    pub action: PlanAction,
}

/// Dry-run classification of a sync, produced without writing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncPlan {
    pub entries: Vec<PlanEntry>,
}

impl SyncPlan {
    pub fn count(&self, action: PlanAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }
}

/// Writes upstream notes into a [`Store`] using an injected provider.
pub struct Indexer {
    store: Arc<dyn Store>,
    provider: Arc<dyn EmbeddingProvider>,
    params: IndexParams,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn EmbeddingProvider>,
        params: IndexParams,
    ) -> Self {
        Self {
            store,
            provider,
            params,
        }
    }

    pub fn params(&self) -> &IndexParams {
        &self.params
    }

    /// Index one live note. Never fails: errors are reported in the result.
    pub async fn ingest(&self, note: &UpstreamNote) -> IngestReport {
        match self.try_ingest(note).await {
            Ok(report) => {
                tracing::debug!(
                    item = %note.source_id,
                    status = ?report.status,
                    transition = report.transition.as_ref().map(|t| t.label()),
                    "ingested"
                );
                report
            }
            Err(e) => {
                tracing::warn!(item = %note.source_id, error = %e, "ingest failed");
                IngestReport::failed(vec![unit_error(&note.source_id, "item", e.kind(), &e)])
            }
        }
    }

    async fn try_ingest(&self, note: &UpstreamNote) -> Result<IngestReport> {
        let full_text = item_text(&note.title, &note.body);
        if full_text.is_empty() {
            return Err(RecallError::InvalidInput("empty title and body".to_string()));
        }

        let hash = content_hash(&note.title, &note.body);
        let stored = self.store.get_item(&note.source, &note.source_id).await?;

        if let Some(existing) = &stored {
            if existing.content_hash == hash {
                if existing.trashed {
                    self.store.set_trashed(&existing.id, false).await?;
                    return Ok(IngestReport::skipped(IngestStatus::Updated));
                }
                return Ok(IngestReport::skipped(IngestStatus::Unchanged));
            }
        }

        let now = Utc::now();
        let item = SourceItem {
            id: stored
                .as_ref()
                .map(|s| s.id.clone())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            source: note.source.clone(),
            source_id: note.source_id.clone(),
            title: note.title.clone(),
            content: note.body.clone(),
            content_hash: hash,
            representation: crate::models::Representation::InlineEmbedded(Vec::new()),
            tags: note.tags.clone(),
            created_at: stored.as_ref().map(|s| s.created_at).unwrap_or(now),
            updated_at: note.updated_at,
            trashed: false,
        };

        let pieces = if word_count(&full_text) >= self.params.chunk_threshold_words {
            chunk_text(&note.body, &self.params.chunking)
        } else {
            Vec::new()
        };

        let content = if pieces.is_empty() {
            match self.embed_units(&note.source_id, &[full_text]).await {
                Ok(mut vectors) => IndexedContent::Inline {
                    embedding: vectors.remove(0),
                },
                Err(errors) => return Ok(IngestReport::failed(errors)),
            }
        } else {
            let vectors = match self.embed_units(&note.source_id, &pieces).await {
                Ok(v) => v,
                Err(errors) => return Ok(IngestReport::failed(errors)),
            };
            let document_id = stored
                .as_ref()
                .and_then(|s| s.document_ref())
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let chunks: Vec<Chunk> = pieces
                .into_iter()
                .zip(vectors)
                .enumerate()
                .map(|(i, (text, embedding))| Chunk {
                    id: Uuid::new_v4().to_string(),
                    document_id: document_id.clone(),
                    chunk_index: i as i64,
                    content: text,
                    embedding,
                    created_at: now,
                })
                .collect();
            IndexedContent::Chunked {
                document: Document {
                    id: document_id,
                    item_id: item.id.clone(),
                    title: note.title.clone(),
                    total_chunks: chunks.len(),
                    tags: note.tags.clone(),
                    active: true,
                },
                chunks,
            }
        };

        let (embedded, chunks_created) = match &content {
            IndexedContent::Inline { .. } => (1, 0),
            IndexedContent::Chunked { chunks, .. } => (chunks.len(), chunks.len()),
        };

        let transition = self.store.apply_index(&item, &content).await?;

        Ok(IngestReport {
            status: if stored.is_some() {
                IngestStatus::Updated
            } else {
                IngestStatus::New
            },
            transition: Some(transition),
            embedded,
            chunks_created,
            errors: Vec::new(),
        })
    }

    /// Embed `texts` in one call, retrying one by one if the batch fails.
    ///
    /// Returns every vector, or the per-unit errors if any unit failed.
    async fn embed_units(
        &self,
        source_id: &str,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, Vec<UnitError>> {
        let label = |i: usize| {
            if texts.len() == 1 {
                "item".to_string()
            } else {
                format!("chunk {i}")
            }
        };

        match self.embed_checked(texts).await {
            Ok(vectors) => return Ok(vectors),
            Err(e) if texts.len() == 1 => {
                tracing::warn!(item = %source_id, error = %e, "embedding failed");
                return Err(vec![unit_error(source_id, &label(0), ErrorKind::Provider, &e)]);
            }
            Err(e) => {
                tracing::warn!(
                    item = %source_id,
                    units = texts.len(),
                    error = %e,
                    "batch embedding failed, retrying units individually"
                );
            }
        }

        let mut vectors = Vec::with_capacity(texts.len());
        let mut errors = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            match self.embed_checked(std::slice::from_ref(text)).await {
                Ok(mut v) => vectors.push(v.remove(0)),
                Err(e) => {
                    tracing::warn!(item = %source_id, unit = %label(i), error = %e, "embedding failed");
                    errors.push(unit_error(source_id, &label(i), ErrorKind::Provider, &e));
                }
            }
        }

        if errors.is_empty() {
            Ok(vectors)
        } else {
            Err(errors)
        }
    }

    async fn embed_checked(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let vectors = self.provider.embed_batch(texts).await?;
        validate_embeddings(&vectors, texts.len(), self.provider.dims())?;
        Ok(vectors)
    }

    /// Ingest every live note, returning counts and the batch accumulator.
    ///
    /// Checks `cancel` before each note; the second value is `true` if the
    /// batch stopped early.
    pub async fn ingest_all(
        &self,
        notes: &[UpstreamNote],
        cancel: &AtomicBool,
    ) -> (SyncCounts, BatchOutcome, bool) {
        let mut counts = SyncCounts::default();
        let mut outcome = BatchOutcome::default();

        for note in notes {
            if cancel.load(Ordering::Relaxed) {
                return (counts, outcome, true);
            }
            let report = self.ingest(note).await;
            counts.embedded += report.embedded;
            counts.chunks_created += report.chunks_created;
            match report.status {
                IngestStatus::New => counts.new += 1,
                IngestStatus::Updated => counts.updated += 1,
                IngestStatus::Unchanged => counts.unchanged += 1,
                IngestStatus::Failed => {}
            }
            if report.status == IngestStatus::Failed {
                outcome.record_errors(report.errors);
            } else {
                outcome.record_success();
            }
        }

        (counts, outcome, false)
    }

    /// Bring the index up to date with `source` and persist the run.
    ///
    /// Status is `failed` only when errors occurred and no item
    /// succeeded; `cancelled` when `cancel` was raised mid-run, in which
    /// case deletion reconciliation is skipped.
    pub async fn sync_incremental(
        &self,
        source: &dyn NoteSource,
        trigger: &str,
        cancel: &AtomicBool,
    ) -> Result<SyncRun> {
        let mut run = SyncRun {
            id: Uuid::new_v4().to_string(),
            source: source.name().to_string(),
            trigger: trigger.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            counts: SyncCounts::default(),
            errors: Vec::new(),
            status: SyncStatus::Running,
        };
        self.store.record_sync_run(&run).await?;

        let scan = match source.scan().await {
            Ok(scan) => scan,
            Err(e) => {
                tracing::warn!(source = %run.source, error = %e, "upstream scan failed");
                let err = RecallError::Upstream {
                    source_name: run.source.clone(),
                    detail: format!("{e:#}"),
                };
                run.errors
                    .push(unit_error("*", "scan", err.kind(), &err));
                run.status = SyncStatus::Failed;
                run.completed_at = Some(Utc::now());
                self.store.record_sync_run(&run).await?;
                return Ok(run);
            }
        };

        let live: Vec<UpstreamNote> = scan.notes.into_iter().filter(|n| !n.trashed).collect();
        let (mut counts, mut outcome, stopped) = self.ingest_all(&live, cancel).await;
        counts.total = live.len() + scan.skipped.len();
        let cancelled = stopped || cancel.load(Ordering::Relaxed);

        for skipped in &scan.skipped {
            tracing::warn!(source_id = %skipped.source_id, reason = %skipped.reason, "note skipped");
            outcome.record_errors([unit_error(
                &skipped.source_id,
                "item",
                ErrorKind::InvalidInput,
                &skipped.reason,
            )]);
        }

        if !cancelled {
            let live_ids: HashSet<&str> = live
                .iter()
                .map(|n| n.source_id.as_str())
                .chain(scan.skipped.iter().map(|s| s.source_id.as_str()))
                .collect();
            for indexed in self.store.list_indexed(source.name()).await? {
                if indexed.trashed || live_ids.contains(indexed.source_id.as_str()) {
                    continue;
                }
                match self.store.set_trashed(&indexed.id, true).await {
                    Ok(()) => {
                        counts.deleted += 1;
                        outcome.record_success();
                    }
                    Err(e) => outcome.record_errors([unit_error(
                        &indexed.source_id,
                        "item",
                        e.kind(),
                        &e,
                    )]),
                }
            }
        }

        run.status = if cancelled {
            SyncStatus::Cancelled
        } else if !outcome.errors.is_empty() && outcome.succeeded == 0 {
            SyncStatus::Failed
        } else {
            SyncStatus::Completed
        };
        run.counts = counts;
        run.errors = outcome.errors;
        run.completed_at = Some(Utc::now());
        self.store.record_sync_run(&run).await?;

        tracing::info!(
            source = %run.source,
            trigger = %run.trigger,
            status = %run.status,
            total = counts.total,
            new = counts.new,
            updated = counts.updated,
            unchanged = counts.unchanged,
            deleted = counts.deleted,
            errors = run.errors.len(),
            "sync finished"
        );
        Ok(run)
    }

    /// Classify what [`sync_incremental`](Self::sync_incremental) would do,
    /// without embedding or writing anything.
    pub async fn plan_sync(&self, source: &dyn NoteSource) -> Result<SyncPlan> {
        let scan = source.scan().await.map_err(|e| RecallError::Upstream {
            source_name: source.name().to_string(),
            detail: format!("{e:#}"),
        })?;

        let mut plan = SyncPlan::default();
        let mut live_ids = HashSet::new();

        for skipped in &scan.skipped {
            live_ids.insert(skipped.source_id.as_str());
            let stored = self.store.get_item(source.name(), &skipped.source_id).await?;
            plan.entries.push(PlanEntry {
                source_id: skipped.source_id.clone(),
                state: item_state(stored.as_ref(), None),
                action: PlanAction::Skip,
            });
        }

        for note in scan.notes.iter().filter(|n| !n.trashed) {
            live_ids.insert(note.source_id.as_str());
            let stored = self.store.get_item(&note.source, &note.source_id).await?;
            let hash = content_hash(&note.title, &note.body);
            let state = item_state(stored.as_ref(), Some(hash.as_str()));
            let action = match state {
                ItemState::Unindexed => PlanAction::New,
                ItemState::Stale => PlanAction::Update,
                ItemState::Trashed => PlanAction::Restore,
                ItemState::InlineEmbedded | ItemState::Chunked => PlanAction::Unchanged,
            };
            plan.entries.push(PlanEntry {
                source_id: note.source_id.clone(),
                state,
                action,
            });
        }

        for indexed in self.store.list_indexed(source.name()).await? {
            if indexed.trashed || live_ids.contains(indexed.source_id.as_str()) {
                continue;
            }
            let stored = self.store.get_item(source.name(), &indexed.source_id).await?;
            plan.entries.push(PlanEntry {
                source_id: indexed.source_id,
                state: item_state(stored.as_ref(), None),
                action: PlanAction::Trash,
            });
        }

        Ok(plan)
    }
}

fn unit_error(
    source_id: &str,
    unit: &str,
    kind: ErrorKind,
    err: &dyn std::fmt::Display,
) -> UnitError {
    UnitError {
        source_id: source_id.to_string(),
        unit: unit.to_string(),
        kind,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RepresentationKind, SkippedNote};
    use crate::store::memory::InMemoryStore;
    use crate::store::SearchFilter;
    use chrono::TimeZone;
    use std::sync::Mutex;

    const DIMS: usize = 8;

    /// Deterministic embedder; fails any call containing a text with "FAIL".
    struct FakeEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FakeEmbedder {
        fn model_name(&self) -> &str {
            "fake"
        }

        fn dims(&self) -> usize {
            DIMS
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            if texts.iter().any(|t| t.contains("FAIL")) {
                return Err(ProviderError::Unavailable("refused".to_string()));
            }
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![1.0f32; DIMS];
                    for b in t.bytes() {
                        v[b as usize % DIMS] += 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    struct VecSource {
        notes: Mutex<Vec<UpstreamNote>>,
        skipped: Mutex<Vec<SkippedNote>>,
    }

    impl VecSource {
        fn new(notes: Vec<UpstreamNote>) -> Self {
            Self {
                notes: Mutex::new(notes),
                skipped: Mutex::new(Vec::new()),
            }
        }

        fn set(&self, notes: Vec<UpstreamNote>) {
            *self.notes.lock().unwrap() = notes;
        }

        fn skip(&self, source_id: &str, reason: &str) {
            self.skipped.lock().unwrap().push(SkippedNote {
                source_id: source_id.to_string(),
                reason: reason.to_string(),
            });
        }
    }

    #[async_trait]
    impl NoteSource for VecSource {
        fn name(&self) -> &str {
            "notes"
        }

        async fn scan(&self) -> anyhow::Result<ScanReport> {
            Ok(ScanReport {
                notes: self.notes.lock().unwrap().clone(),
                skipped: self.skipped.lock().unwrap().clone(),
            })
        }
    }

    fn note(id: &str, title: &str, body: &str) -> UpstreamNote {
        UpstreamNote {
            source: "notes".to_string(),
            source_id: id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            updated_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            trashed: false,
            tags: Vec::new(),
        }
    }

    /// `paragraphs` paragraphs of 50 distinct words each.
    fn long_body(paragraphs: usize) -> String {
        (0..paragraphs)
            .map(|p| {
                (0..50)
                    .map(|w| format!("p{p}w{w}"))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn setup() -> (Arc<InMemoryStore>, Indexer) {
        let store = Arc::new(InMemoryStore::new());
        let indexer = Indexer::new(store.clone(), Arc::new(FakeEmbedder), IndexParams::default());
        (store, indexer)
    }

    #[tokio::test]
    async fn test_600_word_item_yields_two_overlapping_chunks() {
        let (store, indexer) = setup();
        let report = indexer.ingest(&note("a.md", "Long", &long_body(12))).await;
        assert_eq!(report.status, IngestStatus::New);
        assert_eq!(report.chunks_created, 2);

        let item = store.get_item("notes", "a.md").await.unwrap().unwrap();
        assert!(item.is_chunked());
        assert!(item.inline_embedding().is_none());
        let chunks = store.get_chunks(item.document_ref().unwrap()).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].content.starts_with("p9w0 "));
        assert!(chunks[0].content.contains("p9w49"));
        assert_eq!(
            chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[tokio::test]
    async fn test_short_item_is_inline() {
        let (store, indexer) = setup();
        let report = indexer.ingest(&note("s.md", "Short", "a few words")).await;
        assert_eq!(report.status, IngestStatus::New);
        assert_eq!(report.embedded, 1);
        let item = store.get_item("notes", "s.md").await.unwrap().unwrap();
        assert_eq!(item.representation.kind(), RepresentationKind::Inline);
        assert_eq!(item.inline_embedding().map(|v| v.len()), Some(DIMS));
    }

    #[tokio::test]
    async fn test_reingest_unchanged_is_noop() {
        let (store, indexer) = setup();
        let n = note("a.md", "Long", &long_body(12));
        indexer.ingest(&n).await;
        let before = store.get_item("notes", "a.md").await.unwrap().unwrap();
        let chunks_before = store.get_chunks(before.document_ref().unwrap()).await.unwrap();

        let report = indexer.ingest(&n).await;
        assert_eq!(report.status, IngestStatus::Unchanged);
        assert_eq!(report.embedded, 0);

        let chunks_after = store.get_chunks(before.document_ref().unwrap()).await.unwrap();
        let ids = |c: &[Chunk]| c.iter().map(|c| c.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&chunks_before), ids(&chunks_after));
        assert_eq!(chunks_before[0].embedding, chunks_after[0].embedding);
    }

    #[tokio::test]
    async fn test_representation_flips_both_ways() {
        let (store, indexer) = setup();
        indexer.ingest(&note("a.md", "Grow", "small start")).await;
        let inline = store.get_item("notes", "a.md").await.unwrap().unwrap();
        assert!(!inline.is_chunked());

        let report = indexer.ingest(&note("a.md", "Grow", &long_body(12))).await;
        assert_eq!(report.status, IngestStatus::Updated);
        assert_eq!(report.transition, Some(Transition::InlineToChunked));
        let chunked = store.get_item("notes", "a.md").await.unwrap().unwrap();
        assert_eq!(chunked.id, inline.id);
        assert!(chunked.inline_embedding().is_none());
        let doc_id = chunked.document_ref().unwrap().to_string();
        let doc = store.get_document(&doc_id).await.unwrap().unwrap();
        assert_eq!(doc.total_chunks, 2);

        let report = indexer.ingest(&note("a.md", "Grow", "small again")).await;
        assert_eq!(report.transition.as_ref().map(|t| t.label()), Some("chunked_to_inline"));
        let back = store.get_item("notes", "a.md").await.unwrap().unwrap();
        assert!(back.inline_embedding().is_some());
        assert!(back.document_ref().is_none());
        assert!(store.get_chunks(&doc_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rechunk_reuses_document_and_replaces_chunks() {
        let (store, indexer) = setup();
        indexer.ingest(&note("a.md", "Doc", &long_body(20))).await;
        let first = store.get_item("notes", "a.md").await.unwrap().unwrap();
        let doc_id = first.document_ref().unwrap().to_string();
        let n_first = store.get_chunks(&doc_id).await.unwrap().len();

        indexer.ingest(&note("a.md", "Doc", &long_body(12))).await;
        let second = store.get_item("notes", "a.md").await.unwrap().unwrap();
        assert_eq!(second.document_ref(), Some(doc_id.as_str()));
        let chunks = store.get_chunks(&doc_id).await.unwrap();
        assert!(chunks.len() < n_first);
        assert_eq!(
            chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
            (0..chunks.len() as i64).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_empty_note_is_invalid_input() {
        let (_, indexer) = setup();
        let report = indexer.ingest(&note("e.md", "  ", "\n\n")).await;
        assert_eq!(report.status, IngestStatus::Failed);
        assert_eq!(report.errors[0].kind, ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_second_sync_without_changes_is_quiet() {
        let (_, indexer) = setup();
        let source = VecSource::new(vec![
            note("a.md", "A", "alpha note"),
            note("b.md", "B", &long_body(12)),
        ]);
        let cancel = AtomicBool::new(false);

        let first = indexer.sync_incremental(&source, "test", &cancel).await.unwrap();
        assert_eq!(first.counts.new, 2);
        assert_eq!(first.status, SyncStatus::Completed);

        let second = indexer.sync_incremental(&source, "test", &cancel).await.unwrap();
        assert_eq!(second.counts.new, 0);
        assert_eq!(second.counts.updated, 0);
        assert_eq!(second.counts.unchanged, 2);
        assert_eq!(second.counts.embedded, 0);
        assert!(second.errors.is_empty());
        assert_eq!(second.status, SyncStatus::Completed);
    }

    #[tokio::test]
    async fn test_failed_item_does_not_abort_run() {
        let (store, indexer) = setup();
        let source = VecSource::new(vec![
            note("a.md", "A", "alpha"),
            note("bad.md", "Bad", "FAIL here"),
            note("c.md", "C", "gamma"),
        ]);
        let cancel = AtomicBool::new(false);
        let run = indexer.sync_incremental(&source, "test", &cancel).await.unwrap();

        assert_eq!(run.status, SyncStatus::Completed);
        assert_eq!(run.counts.new, 2);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.errors[0].source_id, "bad.md");
        assert_eq!(run.errors[0].kind, ErrorKind::Provider);
        assert!(store.get_item("notes", "bad.md").await.unwrap().is_none());

        // fixed upstream content is picked up on the next run
        source.set(vec![
            note("a.md", "A", "alpha"),
            note("bad.md", "Bad", "fine now"),
            note("c.md", "C", "gamma"),
        ]);
        let run = indexer.sync_incremental(&source, "test", &cancel).await.unwrap();
        assert_eq!(run.counts.new, 1);
        assert!(run.errors.is_empty());
    }

    #[tokio::test]
    async fn test_all_failures_mark_run_failed() {
        let (_, indexer) = setup();
        let source = VecSource::new(vec![note("x.md", "X", "FAIL"), note("y.md", "Y", "FAIL")]);
        let run = indexer
            .sync_incremental(&source, "test", &AtomicBool::new(false))
            .await
            .unwrap();
        assert_eq!(run.status, SyncStatus::Failed);
        assert_eq!(run.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_failing_chunk_keeps_previous_representation() {
        let (store, indexer) = setup();
        indexer.ingest(&note("a.md", "Doc", "short version")).await;
        let before = store.get_item("notes", "a.md").await.unwrap().unwrap();

        let mut body = long_body(12);
        body.push_str(" FAIL");
        let report = indexer.ingest(&note("a.md", "Doc", &body)).await;
        assert_eq!(report.status, IngestStatus::Failed);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].unit, "chunk 1");

        let after = store.get_item("notes", "a.md").await.unwrap().unwrap();
        assert_eq!(after.content_hash, before.content_hash);
        assert!(after.inline_embedding().is_some());
    }

    #[tokio::test]
    async fn test_removed_items_are_trashed_then_restored() {
        let (store, indexer) = setup();
        let source = VecSource::new(vec![
            note("a.md", "A", "invoice total"),
            note("b.md", "B", "weather"),
        ]);
        let cancel = AtomicBool::new(false);
        indexer.sync_incremental(&source, "test", &cancel).await.unwrap();

        let mut gone = note("a.md", "A", "invoice total");
        gone.trashed = true;
        source.set(vec![gone, note("b.md", "B", "weather")]);
        let run = indexer.sync_incremental(&source, "test", &cancel).await.unwrap();
        assert_eq!(run.counts.deleted, 1);
        assert!(store.get_item("notes", "a.md").await.unwrap().unwrap().trashed);
        let hits = store
            .keyword_candidates(&["invoice".to_string()], &SearchFilter::default())
            .await
            .unwrap();
        assert!(hits.is_empty());

        source.set(vec![note("a.md", "A", "invoice total"), note("b.md", "B", "weather")]);
        let run = indexer.sync_incremental(&source, "test", &cancel).await.unwrap();
        assert_eq!(run.counts.updated, 1);
        assert_eq!(run.counts.deleted, 0);
        assert!(!store.get_item("notes", "a.md").await.unwrap().unwrap().trashed);
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_reconciliation() {
        let (store, indexer) = setup();
        let source = VecSource::new(vec![note("a.md", "A", "alpha")]);
        indexer
            .sync_incremental(&source, "test", &AtomicBool::new(false))
            .await
            .unwrap();

        source.set(Vec::new());
        let run = indexer
            .sync_incremental(&source, "test", &AtomicBool::new(true))
            .await
            .unwrap();
        assert_eq!(run.status, SyncStatus::Cancelled);
        assert_eq!(run.counts.deleted, 0);
        assert!(!store.get_item("notes", "a.md").await.unwrap().unwrap().trashed);

        let runs = store.recent_sync_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);
    }

    #[tokio::test]
    async fn test_plan_sync_classifies_without_writing() {
        let (store, indexer) = setup();
        let source = VecSource::new(vec![
            note("keep.md", "K", "same"),
            note("edit.md", "E", "before"),
            note("drop.md", "D", "going away"),
        ]);
        indexer
            .sync_incremental(&source, "test", &AtomicBool::new(false))
            .await
            .unwrap();

        source.set(vec![
            note("keep.md", "K", "same"),
            note("edit.md", "E", "after"),
            note("new.md", "N", "fresh"),
        ]);
        let plan = indexer.plan_sync(&source).await.unwrap();
        assert_eq!(plan.count(PlanAction::Unchanged), 1);
        assert_eq!(plan.count(PlanAction::Update), 1);
        assert_eq!(plan.count(PlanAction::New), 1);
        assert_eq!(plan.count(PlanAction::Trash), 1);
        let edit = plan.entries.iter().find(|e| e.source_id == "edit.md").unwrap();
        assert_eq!(edit.state, ItemState::Stale);

        assert!(store.get_item("notes", "new.md").await.unwrap().is_none());
        assert!(!store.get_item("notes", "drop.md").await.unwrap().unwrap().trashed);
    }

    #[tokio::test]
    async fn test_unreadable_note_is_recorded_not_trashed() {
        let (store, indexer) = setup();
        let source = VecSource::new(vec![
            note("a.md", "A", "invoice total"),
            note("b.md", "B", "weather"),
        ]);
        let cancel = AtomicBool::new(false);
        indexer.sync_incremental(&source, "test", &cancel).await.unwrap();

        source.set(vec![note("b.md", "B", "weather")]);
        source.skip("a.md", "stream did not contain valid UTF-8");

        let plan = indexer.plan_sync(&source).await.unwrap();
        assert_eq!(plan.count(PlanAction::Skip), 1);
        assert_eq!(plan.count(PlanAction::Trash), 0);

        let run = indexer.sync_incremental(&source, "test", &cancel).await.unwrap();
        assert_eq!(run.status, SyncStatus::Completed);
        assert_eq!(run.counts.deleted, 0);
        assert_eq!(run.counts.total, 2);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.errors[0].source_id, "a.md");
        assert_eq!(run.errors[0].kind, ErrorKind::InvalidInput);
        assert!(!store.get_item("notes", "a.md").await.unwrap().unwrap().trashed);
    }
}
