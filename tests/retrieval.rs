//! End-to-end indexing and retrieval against a real SQLite database.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use companion_recall::config::NotesConnectorConfig;
use companion_recall::connector_fs::NotesConnector;
use companion_recall::db::connect_path;
use companion_recall::embedding::HashingProvider;
use companion_recall::migrate::migrate_pool;
use companion_recall::sqlite_store::SqliteStore;
use companion_recall_core::embedding::EmbeddingProvider;
use companion_recall_core::error::{ErrorKind, ProviderError};
use companion_recall_core::ingest::{IndexParams, Indexer, IngestStatus, NoteSource};
use companion_recall_core::models::{Representation, ScanReport, SyncStatus, UpstreamNote};
use companion_recall_core::search::{
    ContextOptions, RetrievalParams, Retriever, SearchMode, SearchOptions,
};
use companion_recall_core::store::{SearchFilter, Store};

const DIMS: usize = 128;

async fn setup() -> (TempDir, Arc<SqliteStore>) {
    let tmp = TempDir::new().unwrap();
    let pool = connect_path(&tmp.path().join("recall.sqlite")).await.unwrap();
    migrate_pool(&pool).await.unwrap();
    (tmp, Arc::new(SqliteStore::new(pool)))
}

fn indexer(store: &Arc<SqliteStore>, provider: Arc<dyn EmbeddingProvider>) -> Indexer {
    Indexer::new(store.clone(), provider, IndexParams::default())
}

fn hashing() -> Arc<dyn EmbeddingProvider> {
    Arc::new(HashingProvider::new(DIMS))
}

fn retriever(store: &Arc<SqliteStore>) -> Retriever {
    Retriever::new(store.clone(), hashing(), RetrievalParams::default())
}

fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
}

fn note(source_id: &str, title: &str, body: &str) -> UpstreamNote {
    UpstreamNote {
        source: "notes".to_string(),
        source_id: source_id.to_string(),
        title: title.to_string(),
        body: body.to_string(),
        updated_at: at(2024, 6, 1),
        trashed: false,
        tags: Vec::new(),
    }
}

/// A body of `words` words split into 100-word paragraphs.
fn long_body(words: usize, seed: &str) -> String {
    let vocab = [
        "garden", "soil", "compost", "seedling", "harvest", "tomato", "basil", "water", "shade",
        "trellis", "mulch", "frost",
    ];
    (0..words)
        .map(|i| {
            let word = format!("{}{}", vocab[i % vocab.len()], if i % 7 == 0 { seed } else { "" });
            if i > 0 && i % 100 == 0 {
                format!("\n\n{word}")
            } else {
                word
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hashing embedder that fails any call whose input contains `poison`.
struct FlakyProvider {
    inner: HashingProvider,
    poison: &'static str,
}

#[async_trait]
impl EmbeddingProvider for FlakyProvider {
    fn model_name(&self) -> &str {
        "flaky"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.iter().any(|t| t.contains(self.poison)) {
            return Err(ProviderError::Unavailable("simulated outage".to_string()));
        }
        self.inner.embed_batch(texts).await
    }
}

struct FixedSource {
    notes: Mutex<Vec<UpstreamNote>>,
}

impl FixedSource {
    fn new(notes: Vec<UpstreamNote>) -> Self {
        Self {
            notes: Mutex::new(notes),
        }
    }

    fn set(&self, notes: Vec<UpstreamNote>) {
        *self.notes.lock().unwrap() = notes;
    }
}

#[async_trait]
impl NoteSource for FixedSource {
    fn name(&self) -> &str {
        "notes"
    }

    async fn scan(&self) -> anyhow::Result<ScanReport> {
        Ok(self.notes.lock().unwrap().clone().into())
    }
}

#[tokio::test]
async fn test_short_note_is_embedded_inline() {
    let (_tmp, store) = setup().await;
    let indexer = indexer(&store, hashing());

    let report = indexer
        .ingest(&note("groceries.md", "Groceries", "eggs, milk and coffee beans"))
        .await;
    assert_eq!(report.status, IngestStatus::New);
    assert_eq!(report.embedded, 1);
    assert_eq!(report.chunks_created, 0);

    let item = store.get_item("notes", "groceries.md").await.unwrap().unwrap();
    match &item.representation {
        Representation::InlineEmbedded(v) => assert_eq!(v.len(), DIMS),
        other => panic!("expected inline, got {other:?}"),
    }
    assert!(!item.trashed);
}

#[tokio::test]
async fn test_long_note_is_chunked_in_order() {
    let (_tmp, store) = setup().await;
    let indexer = indexer(&store, hashing());

    let report = indexer
        .ingest(&note("garden.md", "Garden plan", &long_body(1200, "a")))
        .await;
    assert_eq!(report.status, IngestStatus::New);
    assert!(report.chunks_created >= 2);

    let item = store.get_item("notes", "garden.md").await.unwrap().unwrap();
    let Representation::Chunked {
        document_id,
        chunk_count,
    } = &item.representation
    else {
        panic!("expected chunked representation");
    };
    assert_eq!(*chunk_count, report.chunks_created);

    let doc = store.get_document(document_id).await.unwrap().unwrap();
    assert_eq!(doc.item_id, item.id);
    assert_eq!(doc.total_chunks, report.chunks_created);

    let chunks = store.get_chunks(document_id).await.unwrap();
    let indexes: Vec<i64> = chunks.iter().map(|c| c.chunk_index).collect();
    assert_eq!(indexes, (0..chunks.len() as i64).collect::<Vec<_>>());
    assert!(chunks.iter().all(|c| c.embedding.len() == DIMS));
}

#[tokio::test]
async fn test_reingest_unchanged_is_noop() {
    let (_tmp, store) = setup().await;
    let indexer = indexer(&store, hashing());
    let n = note("a.md", "A", "short note body");

    indexer.ingest(&n).await;
    let again = indexer.ingest(&n).await;
    assert_eq!(again.status, IngestStatus::Unchanged);
    assert_eq!(again.embedded, 0);
    assert!(again.transition.is_none());
}

#[tokio::test]
async fn test_representation_flips_both_ways() {
    let (_tmp, store) = setup().await;
    let indexer = indexer(&store, hashing());

    indexer.ingest(&note("flip.md", "Flip", "tiny")).await;
    let grown = indexer
        .ingest(&note("flip.md", "Flip", &long_body(900, "b")))
        .await;
    assert_eq!(grown.status, IngestStatus::Updated);

    let item = store.get_item("notes", "flip.md").await.unwrap().unwrap();
    let document_id = item.document_ref().unwrap().to_string();
    assert!(item.inline_embedding().is_none());
    assert!(!store.get_chunks(&document_id).await.unwrap().is_empty());

    let shrunk = indexer.ingest(&note("flip.md", "Flip", "tiny again")).await;
    assert_eq!(shrunk.status, IngestStatus::Updated);

    let item = store.get_item("notes", "flip.md").await.unwrap().unwrap();
    assert!(item.inline_embedding().is_some());
    assert!(item.document_ref().is_none());
    assert!(store.get_document(&document_id).await.unwrap().is_none());
    assert!(store.get_chunks(&document_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rechunk_reuses_document_and_replaces_chunks() {
    let (_tmp, store) = setup().await;
    let indexer = indexer(&store, hashing());

    indexer
        .ingest(&note("long.md", "Long", &long_body(1200, "x")))
        .await;
    let before = store.get_item("notes", "long.md").await.unwrap().unwrap();
    let doc_id = before.document_ref().unwrap().to_string();
    let old_ids: Vec<String> = store
        .get_chunks(&doc_id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();

    indexer
        .ingest(&note("long.md", "Long", &long_body(700, "y")))
        .await;
    let after = store.get_item("notes", "long.md").await.unwrap().unwrap();
    assert_eq!(after.document_ref(), Some(doc_id.as_str()));
    assert_eq!(after.id, before.id);

    let chunks = store.get_chunks(&doc_id).await.unwrap();
    assert!(chunks.iter().all(|c| !old_ids.contains(&c.id)));
    assert!(!chunks.is_empty());
    assert!(chunks.iter().all(|c| !c.content.contains('x')));
}

#[tokio::test]
async fn test_failed_note_does_not_block_others() {
    let (_tmp, store) = setup().await;
    let provider = Arc::new(FlakyProvider {
        inner: HashingProvider::new(DIMS),
        poison: "POISON",
    });
    let indexer = indexer(&store, provider);
    let source = FixedSource::new(vec![
        note("ok-1.md", "First", "plain words"),
        note("bad.md", "Broken", "contains POISON text"),
        note("ok-2.md", "Second", "more plain words"),
    ]);

    let run = indexer
        .sync_incremental(&source, "test", &AtomicBool::new(false))
        .await
        .unwrap();
    assert_eq!(run.status, SyncStatus::Completed);
    assert_eq!(run.counts.new, 2);
    assert_eq!(run.errors.len(), 1);
    assert_eq!(run.errors[0].source_id, "bad.md");
    assert_eq!(run.errors[0].kind, ErrorKind::Provider);
    assert!(store.get_item("notes", "bad.md").await.unwrap().is_none());

    let runs = store.recent_sync_runs(5).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id, run.id);
    assert_eq!(runs[0].status, SyncStatus::Completed);
    assert_eq!(runs[0].counts, run.counts);
    assert!(runs[0].completed_at.is_some());
}

#[tokio::test]
async fn test_all_failures_mark_run_failed() {
    let (_tmp, store) = setup().await;
    let provider = Arc::new(FlakyProvider {
        inner: HashingProvider::new(DIMS),
        poison: "",
    });
    let indexer = indexer(&store, provider);
    let source = FixedSource::new(vec![note("a.md", "A", "one"), note("b.md", "B", "two")]);

    let run = indexer
        .sync_incremental(&source, "test", &AtomicBool::new(false))
        .await
        .unwrap();
    assert_eq!(run.status, SyncStatus::Failed);
    assert_eq!(run.errors.len(), 2);
}

#[tokio::test]
async fn test_deleted_notes_are_trashed_and_restored() {
    let (_tmp, store) = setup().await;
    let indexer = indexer(&store, hashing());
    let keep = note("keep.md", "Keep", "lighthouse keeper notes");
    let gone = note("gone.md", "Gone", "lighthouse demolition plans");
    let source = FixedSource::new(vec![keep.clone(), gone.clone()]);
    let cancel = AtomicBool::new(false);

    indexer.sync_incremental(&source, "test", &cancel).await.unwrap();

    source.set(vec![keep.clone()]);
    let run = indexer.sync_incremental(&source, "test", &cancel).await.unwrap();
    assert_eq!(run.counts.deleted, 1);
    assert_eq!(run.counts.unchanged, 1);
    assert!(store.get_item("notes", "gone.md").await.unwrap().unwrap().trashed);

    let retriever = retriever(&store);
    let options = SearchOptions {
        mode: Some(SearchMode::Keyword),
        ..Default::default()
    };
    let hits = retriever.search("demolition", &options).await.unwrap();
    assert!(hits.results.is_empty());

    source.set(vec![keep, gone]);
    let run = indexer.sync_incremental(&source, "test", &cancel).await.unwrap();
    assert_eq!(run.counts.updated, 1);
    assert!(!store.get_item("notes", "gone.md").await.unwrap().unwrap().trashed);
    let hits = retriever.search("demolition", &options).await.unwrap();
    assert_eq!(hits.results.len(), 1);
}

#[tokio::test]
async fn test_unreadable_note_file_keeps_its_index() {
    let (tmp, store) = setup().await;
    let indexer = indexer(&store, hashing());
    let notes_dir = tmp.path().join("notes");
    std::fs::create_dir_all(&notes_dir).unwrap();
    std::fs::write(notes_dir.join("a.md"), "# Boiler\n\nboiler service every autumn").unwrap();
    std::fs::write(notes_dir.join("b.md"), "# Bikes\n\nchain oil and tyre pressure").unwrap();

    let connector = NotesConnector::new(NotesConnectorConfig {
        root: notes_dir.clone(),
        source: "notes".to_string(),
        include_globs: vec!["**/*.md".to_string()],
        exclude_globs: Vec::new(),
        trash_dir: ".trash".to_string(),
        follow_symlinks: false,
    });
    let cancel = AtomicBool::new(false);
    let run = indexer.sync_incremental(&connector, "test", &cancel).await.unwrap();
    assert_eq!(run.counts.new, 2);

    std::fs::write(notes_dir.join("a.md"), b"# Boiler\n\nboiler \xff service").unwrap();
    let run = indexer.sync_incremental(&connector, "test", &cancel).await.unwrap();
    assert_eq!(run.status, SyncStatus::Completed);
    assert_eq!(run.counts.deleted, 0);
    assert_eq!(run.errors.len(), 1);
    assert_eq!(run.errors[0].source_id, "a.md");
    assert_eq!(run.errors[0].kind, ErrorKind::InvalidInput);

    let item = store.get_item("notes", "a.md").await.unwrap().unwrap();
    assert!(!item.trashed);
    let options = SearchOptions {
        mode: Some(SearchMode::Keyword),
        ..Default::default()
    };
    let hits = retriever(&store).search("boiler", &options).await.unwrap();
    assert_eq!(hits.results.len(), 1);

    let recorded = store.recent_sync_runs(1).await.unwrap();
    assert_eq!(recorded[0].errors.len(), 1);
}

#[tokio::test]
async fn test_hybrid_search_ranks_matching_note_first() {
    let (_tmp, store) = setup().await;
    let indexer = indexer(&store, hashing());
    for n in [
        note(
            "roof.md",
            "Roof repair quote",
            "The contractor quoted for the roof repair. Work starts in May.",
        ),
        note("groceries.md", "Groceries", "eggs, milk, coffee beans, bread"),
        note("trip.md", "Trip ideas", "hiking in the alps, train tickets, hostel"),
        note("garden.md", "Garden", &long_body(800, "z")),
    ] {
        assert_ne!(indexer.ingest(&n).await.status, IngestStatus::Failed);
    }

    let retriever = retriever(&store);
    let response = retriever
        .search("roof contractor", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(response.mode_used, SearchMode::Hybrid);
    assert!(!response.degraded);
    let top = &response.results[0];
    assert_eq!(top.title, "Roof repair quote");
    assert!(top.vector_score.is_some());
    assert!(top.keyword_score.is_some());
    assert_eq!(top.rank_keyword, Some(1));

    let again = retriever
        .search("roof contractor", &SearchOptions::default())
        .await
        .unwrap();
    let ids: Vec<&str> = response.results.iter().map(|r| r.id.as_str()).collect();
    let ids_again: Vec<&str> = again.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ids_again);
}

#[tokio::test]
async fn test_keyword_search_finds_chunk_content() {
    let (_tmp, store) = setup().await;
    let indexer = indexer(&store, hashing());
    indexer
        .ingest(&note("garden.md", "Garden", &long_body(1200, "q")))
        .await;

    let retriever = retriever(&store);
    let response = retriever
        .search(
            "compostq",
            &SearchOptions {
                mode: Some(SearchMode::Keyword),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!response.results.is_empty());
    assert!(response.results.iter().all(|r| r.document_id.is_some()));
    assert!(response.results.iter().all(|r| r.vector_score.is_none()));
}

#[tokio::test]
async fn test_filters_restrict_results() {
    let (_tmp, store) = setup().await;
    let indexer = indexer(&store, hashing());

    let mut old = note("old.md", "Old budget", "budget review for the old year");
    old.updated_at = at(2022, 1, 10);
    let mut fresh = note("work/new.md", "New budget", "budget review for this year");
    fresh.tags = vec!["work".to_string()];
    indexer.ingest(&old).await;
    indexer.ingest(&fresh).await;

    let retriever = retriever(&store);
    let search = |filter: SearchFilter| {
        let retriever = &retriever;
        async move {
            retriever
                .search(
                    "budget review",
                    &SearchOptions {
                        filter,
                        ..Default::default()
                    },
                )
                .await
                .unwrap()
                .results
                .into_iter()
                .map(|r| r.title)
                .collect::<Vec<_>>()
        }
    };

    assert_eq!(search(SearchFilter::default()).await.len(), 2);
    assert_eq!(
        search(SearchFilter {
            since: Some(at(2024, 1, 1)),
            ..Default::default()
        })
        .await,
        vec!["New budget".to_string()]
    );
    assert_eq!(
        search(SearchFilter {
            tag: Some("work".to_string()),
            ..Default::default()
        })
        .await,
        vec!["New budget".to_string()]
    );
    assert!(search(SearchFilter {
        source: Some("mail".to_string()),
        ..Default::default()
    })
    .await
    .is_empty());
}

#[tokio::test]
async fn test_context_respects_budget() {
    let (_tmp, store) = setup().await;
    let indexer = indexer(&store, hashing());
    for i in 0..5 {
        indexer
            .ingest(&note(
                &format!("bike-{i}.md"),
                &format!("Bike log {i}"),
                "bicycle chain maintenance, cleaned and oiled the chain after the rainy ride",
            ))
            .await;
    }

    let retriever = retriever(&store);
    let wide = retriever
        .get_context("bicycle chain", &ContextOptions::default())
        .await
        .unwrap();
    assert!(wide.metadata.has_results);
    assert_eq!(wide.metadata.chunks_used, 5);
    assert!(!wide.metadata.budget_exceeded);
    assert!(wide.context.starts_with("[1] Bike log"));

    let narrow = retriever
        .get_context(
            "bicycle chain",
            &ContextOptions {
                max_tokens: Some(30),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(narrow.metadata.chunks_used < 5);
    assert!(narrow.metadata.chunks_used >= 1);
    assert_eq!(narrow.sources.len(), narrow.metadata.chunks_used);
}

#[tokio::test]
async fn test_schema_rejects_item_without_representation() {
    let (_tmp, store) = setup().await;
    let result = sqlx::query(
        r#"
        INSERT INTO items (id, source, source_id, title, content, content_hash, representation,
                           inline_embedding, document_id, search_text, created_at, updated_at)
        VALUES ('x', 'notes', 'bad.md', 't', 'c', 'h', 'inline', NULL, NULL, '', 0, 0)
        "#,
    )
    .execute(store.pool())
    .await;
    assert!(result.is_err());
}
