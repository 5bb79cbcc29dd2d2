//! SQLite implementation of the core [`Store`] trait.
//!
//! Vector similarity is computed in-process over the stored BLOBs.
//! Lexical candidates are found with `LIKE` over a lowercased
//! `search_text` column; BM25 scoring happens in the core crate.
//! `apply_index` runs in a single transaction, so readers never see a
//! document with its chunks half replaced.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use companion_recall_core::embedding::{blob_to_vec, similarity_score, vec_to_blob};
use companion_recall_core::error::{RecallError, Result};
use companion_recall_core::keyword::tokenize;
use companion_recall_core::models::{
    Chunk, CorpusStats, Document, IndexedContent, Representation, ScoredUnit, SearchUnit,
    SourceItem, SyncCounts, SyncRun, SyncStatus, UnitError,
};
use companion_recall_core::representation::{plan_transition, Transition};
use companion_recall_core::store::{lexical_text, IndexedRef, SearchFilter, Store};

use crate::config::Config;
use crate::db;

/// Map a sqlx failure: missing tables/columns become schema errors.
fn db_err(operation: &str, e: sqlx::Error) -> RecallError {
    let msg = e.to_string();
    if msg.contains("no such table") || msg.contains("no such column") {
        RecallError::schema(operation, format!("{msg} (run `recall init`)"))
    } else {
        RecallError::Storage(anyhow::Error::new(e).context(format!("{operation} failed")))
    }
}

trait DbResultExt<T> {
    fn during(self, operation: &str) -> Result<T>;
}

impl<T> DbResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn during(self, operation: &str) -> Result<T> {
        self.map_err(|e| db_err(operation, e))
    }
}

fn json_err(e: serde_json::Error) -> RecallError {
    RecallError::Storage(anyhow::Error::new(e).context("corrupt JSON column"))
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

const INLINE_UNITS: &str = r#"
    SELECT id, id AS item_id, NULL AS document_id, 0 AS chunk_index, title, source, content,
           inline_embedding AS embedding, token_count, created_at, updated_at, tags_json
    FROM items
    WHERE trashed = 0 AND representation = 'inline'
"#;

const CHUNK_UNITS: &str = r#"
    SELECT c.id, i.id AS item_id, c.document_id, c.chunk_index, i.title, i.source, c.content,
           c.embedding, c.token_count, c.created_at, i.updated_at, i.tags_json
    FROM chunks c
    JOIN items i ON i.document_id = c.document_id
    WHERE i.trashed = 0 AND i.representation = 'chunked'
"#;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(db::connect(config).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Searchable units passing `filter`, optionally restricted to those
    /// whose `search_text` contains one of `terms`.
    async fn fetch_units(
        &self,
        filter: &SearchFilter,
        terms: &[String],
        with_embedding: bool,
    ) -> Result<Vec<(SearchUnit, Vec<f32>)>> {
        let mut out = Vec::new();
        for (base, table) in [(INLINE_UNITS, ""), (CHUNK_UNITS, "c.")] {
            let mut sql = base.to_string();
            if filter.source.is_some() {
                sql.push_str(" AND source = ?");
            }
            if filter.since.is_some() {
                sql.push_str(" AND updated_at >= ?");
            }
            if !terms.is_empty() {
                let likes: Vec<String> = terms
                    .iter()
                    .map(|_| format!("{table}search_text LIKE ? ESCAPE '\\'"))
                    .collect();
                sql.push_str(&format!(" AND ({})", likes.join(" OR ")));
            }

            let mut query = sqlx::query(&sql);
            if let Some(source) = &filter.source {
                query = query.bind(source);
            }
            if let Some(since) = filter.since {
                query = query.bind(to_millis(since));
            }
            for term in terms {
                query = query.bind(like_pattern(term));
            }

            let rows = query.fetch_all(&self.pool).await.during("search units")?;
            for row in rows {
                let tags: Vec<String> =
                    serde_json::from_str(&row.try_get::<String, _>("tags_json").during("search units")?)
                        .map_err(json_err)?;
                let source: String = row.try_get("source").during("search units")?;
                let updated_at = from_millis(row.try_get("updated_at").during("search units")?);
                if !filter.matches(&source, updated_at, &tags) {
                    continue;
                }
                let embedding = if with_embedding {
                    let blob: Vec<u8> = row.try_get("embedding").during("search units")?;
                    blob_to_vec(&blob)
                } else {
                    Vec::new()
                };
                let token_count: i64 = row.try_get("token_count").during("search units")?;
                out.push((
                    SearchUnit {
                        id: row.try_get("id").during("search units")?,
                        item_id: row.try_get("item_id").during("search units")?,
                        document_id: row.try_get("document_id").during("search units")?,
                        chunk_index: row.try_get("chunk_index").during("search units")?,
                        title: row.try_get("title").during("search units")?,
                        source,
                        content: row.try_get("content").during("search units")?,
                        token_count: token_count.max(0) as usize,
                        created_at: from_millis(row.try_get("created_at").during("search units")?),
                    },
                    embedding,
                ));
            }
        }
        Ok(out)
    }
}

fn row_to_item(row: &SqliteRow) -> Result<SourceItem> {
    let op = "read item";
    let kind: String = row.try_get("representation").during(op)?;
    let representation = match kind.as_str() {
        "inline" => {
            let blob: Vec<u8> = row.try_get("inline_embedding").during(op)?;
            Representation::InlineEmbedded(blob_to_vec(&blob))
        }
        "chunked" => {
            let count: Option<i64> = row.try_get("total_chunks").during(op)?;
            Representation::Chunked {
                document_id: row.try_get("document_id").during(op)?,
                chunk_count: count.unwrap_or(0).max(0) as usize,
            }
        }
        other => {
            return Err(RecallError::schema(
                op,
                format!("unknown representation '{other}'"),
            ))
        }
    };
    let tags_json: String = row.try_get("tags_json").during(op)?;
    let trashed: i64 = row.try_get("trashed").during(op)?;

    Ok(SourceItem {
        id: row.try_get("id").during(op)?,
        source: row.try_get("source").during(op)?,
        source_id: row.try_get("source_id").during(op)?,
        title: row.try_get("title").during(op)?,
        content: row.try_get("content").during(op)?,
        content_hash: row.try_get("content_hash").during(op)?,
        representation,
        tags: serde_json::from_str(&tags_json).map_err(json_err)?,
        created_at: from_millis(row.try_get("created_at").during(op)?),
        updated_at: from_millis(row.try_get("updated_at").during(op)?),
        trashed: trashed != 0,
    })
}

fn row_to_run(row: &SqliteRow) -> Result<SyncRun> {
    let op = "read sync run";
    let counts: String = row.try_get("counts_json").during(op)?;
    let errors: String = row.try_get("errors_json").during(op)?;
    let status: String = row.try_get("status").during(op)?;
    let status = match status.as_str() {
        "running" => SyncStatus::Running,
        "completed" => SyncStatus::Completed,
        "failed" => SyncStatus::Failed,
        "cancelled" => SyncStatus::Cancelled,
        other => return Err(RecallError::schema(op, format!("unknown status '{other}'"))),
    };
    let completed_at: Option<i64> = row.try_get("completed_at").during(op)?;

    Ok(SyncRun {
        id: row.try_get("id").during(op)?,
        source: row.try_get("source").during(op)?,
        trigger: row.try_get("trigger").during(op)?,
        started_at: from_millis(row.try_get("started_at").during(op)?),
        completed_at: completed_at.map(from_millis),
        counts: serde_json::from_str::<SyncCounts>(&counts).map_err(json_err)?,
        errors: serde_json::from_str::<Vec<UnitError>>(&errors).map_err(json_err)?,
        status,
    })
}

const SELECT_ITEM: &str = r#"
    SELECT i.id, i.source, i.source_id, i.title, i.content, i.content_hash, i.representation,
           i.inline_embedding, i.document_id, i.tags_json, i.created_at, i.updated_at, i.trashed,
           d.total_chunks
    FROM items i
    LEFT JOIN documents d ON d.id = i.document_id
    WHERE i.source = ? AND i.source_id = ?
"#;

#[async_trait]
impl Store for SqliteStore {
    async fn get_item(&self, source: &str, source_id: &str) -> Result<Option<SourceItem>> {
        let row = sqlx::query(SELECT_ITEM)
            .bind(source)
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await
            .during("get item")?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn apply_index(&self, item: &SourceItem, content: &IndexedContent) -> Result<Transition> {
        let op = "apply index";
        if let IndexedContent::Chunked { document, chunks } = content {
            if document.item_id != item.id || chunks.iter().any(|c| c.document_id != document.id)
            {
                return Err(RecallError::InvalidInput(format!(
                    "document {} does not belong to item {}",
                    document.id, item.id
                )));
            }
        }

        let mut tx = self.pool.begin().await.during(op)?;

        let previous = sqlx::query(
            "SELECT representation, document_id FROM items WHERE source = ? AND source_id = ?",
        )
        .bind(&item.source)
        .bind(&item.source_id)
        .fetch_optional(&mut *tx)
        .await
        .during(op)?
        .map(|row| -> Result<Representation> {
            let kind: String = row.try_get("representation").during(op)?;
            let document_id: Option<String> = row.try_get("document_id").during(op)?;
            Ok(match (kind.as_str(), document_id) {
                ("chunked", Some(document_id)) => Representation::Chunked {
                    document_id,
                    chunk_count: 0,
                },
                _ => Representation::InlineEmbedded(Vec::new()),
            })
        })
        .transpose()?;

        let transition = plan_transition(previous.as_ref(), content);

        if let Some(old_doc) = transition.retired_document() {
            sqlx::query("DELETE FROM chunks WHERE document_id = ?")
                .bind(old_doc)
                .execute(&mut *tx)
                .await
                .during(op)?;
            let keep = matches!(
                content,
                IndexedContent::Chunked { document, .. } if document.id == old_doc
            );
            if !keep {
                sqlx::query("DELETE FROM documents WHERE id = ?")
                    .bind(old_doc)
                    .execute(&mut *tx)
                    .await
                    .during(op)?;
            }
        }

        let lexical = lexical_text(&item.title, &item.content, false);
        let (kind, inline_blob, document_id) = match content {
            IndexedContent::Inline { embedding } => ("inline", Some(vec_to_blob(embedding)), None),
            IndexedContent::Chunked { document, .. } => ("chunked", None, Some(document.id.clone())),
        };
        let tags_json = serde_json::to_string(&item.tags).map_err(json_err)?;

        sqlx::query(
            r#"
            INSERT INTO items (id, source, source_id, title, content, content_hash, representation,
                               inline_embedding, document_id, search_text, token_count, tags_json,
                               created_at, updated_at, trashed)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(source, source_id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                content_hash = excluded.content_hash,
                representation = excluded.representation,
                inline_embedding = excluded.inline_embedding,
                document_id = excluded.document_id,
                search_text = excluded.search_text,
                token_count = excluded.token_count,
                tags_json = excluded.tags_json,
                updated_at = excluded.updated_at,
                trashed = 0
            "#,
        )
        .bind(&item.id)
        .bind(&item.source)
        .bind(&item.source_id)
        .bind(&item.title)
        .bind(&item.content)
        .bind(&item.content_hash)
        .bind(kind)
        .bind(inline_blob)
        .bind(document_id)
        .bind(lexical.to_lowercase())
        .bind(tokenize(&lexical).len() as i64)
        .bind(&tags_json)
        .bind(to_millis(item.created_at))
        .bind(to_millis(item.updated_at))
        .execute(&mut *tx)
        .await
        .during(op)?;

        if let IndexedContent::Chunked { document, chunks } = content {
            sqlx::query(
                r#"
                INSERT INTO documents (id, item_id, title, total_chunks, tags_json, active)
                VALUES (?, ?, ?, ?, ?, 1)
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    total_chunks = excluded.total_chunks,
                    tags_json = excluded.tags_json,
                    active = 1
                "#,
            )
            .bind(&document.id)
            .bind(&document.item_id)
            .bind(&document.title)
            .bind(chunks.len() as i64)
            .bind(serde_json::to_string(&document.tags).map_err(json_err)?)
            .execute(&mut *tx)
            .await
            .during(op)?;

            for chunk in chunks {
                sqlx::query(
                    r#"
                    INSERT INTO chunks (id, document_id, chunk_index, content, embedding,
                                        search_text, token_count, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&chunk.id)
                .bind(&chunk.document_id)
                .bind(chunk.chunk_index)
                .bind(&chunk.content)
                .bind(vec_to_blob(&chunk.embedding))
                .bind(lexical_text(&item.title, &chunk.content, true).to_lowercase())
                .bind(tokenize(&chunk.content).len() as i64)
                .bind(to_millis(chunk.created_at))
                .execute(&mut *tx)
                .await
                .during(op)?;
            }
        }

        tx.commit().await.during(op)?;
        Ok(transition)
    }

    async fn set_trashed(&self, item_id: &str, trashed: bool) -> Result<()> {
        let op = "set trashed";
        let mut tx = self.pool.begin().await.during(op)?;
        let result = sqlx::query("UPDATE items SET trashed = ? WHERE id = ?")
            .bind(trashed as i64)
            .bind(item_id)
            .execute(&mut *tx)
            .await
            .during(op)?;
        if result.rows_affected() == 0 {
            return Err(RecallError::InvalidInput(format!("unknown item: {item_id}")));
        }
        sqlx::query("UPDATE documents SET active = ? WHERE item_id = ?")
            .bind(!trashed as i64)
            .bind(item_id)
            .execute(&mut *tx)
            .await
            .during(op)?;
        tx.commit().await.during(op)?;
        Ok(())
    }

    async fn list_indexed(&self, source: &str) -> Result<Vec<IndexedRef>> {
        let rows = sqlx::query(
            "SELECT id, source_id, trashed FROM items WHERE source = ? ORDER BY source_id",
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await
        .during("list items")?;

        rows.iter()
            .map(|row| {
                let trashed: i64 = row.try_get("trashed").during("list items")?;
                Ok(IndexedRef {
                    id: row.try_get("id").during("list items")?,
                    source_id: row.try_get("source_id").during("list items")?,
                    trashed: trashed != 0,
                })
            })
            .collect()
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let op = "get document";
        let row = sqlx::query(
            "SELECT id, item_id, title, total_chunks, tags_json, active FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .during(op)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let total: i64 = row.try_get("total_chunks").during(op)?;
        let active: i64 = row.try_get("active").during(op)?;
        let tags_json: String = row.try_get("tags_json").during(op)?;
        Ok(Some(Document {
            id: row.try_get("id").during(op)?,
            item_id: row.try_get("item_id").during(op)?,
            title: row.try_get("title").during(op)?,
            total_chunks: total.max(0) as usize,
            tags: serde_json::from_str(&tags_json).map_err(json_err)?,
            active: active != 0,
        }))
    }

    async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let op = "get chunks";
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, chunk_index, content, embedding, created_at
            FROM chunks WHERE document_id = ? ORDER BY chunk_index
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .during(op)?;

        rows.iter()
            .map(|row| {
                let blob: Vec<u8> = row.try_get("embedding").during(op)?;
                Ok(Chunk {
                    id: row.try_get("id").during(op)?,
                    document_id: row.try_get("document_id").during(op)?,
                    chunk_index: row.try_get("chunk_index").during(op)?,
                    content: row.try_get("content").during(op)?,
                    embedding: blob_to_vec(&blob),
                    created_at: from_millis(row.try_get("created_at").during(op)?),
                })
            })
            .collect()
    }

    async fn vector_candidates(
        &self,
        query_vec: &[f32],
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredUnit>> {
        Ok(self
            .fetch_units(filter, &[], true)
            .await?
            .into_iter()
            .map(|(unit, embedding)| ScoredUnit {
                score: similarity_score(query_vec, &embedding),
                unit,
            })
            .collect())
    }

    async fn keyword_candidates(
        &self,
        terms: &[String],
        filter: &SearchFilter,
    ) -> Result<Vec<SearchUnit>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .fetch_units(filter, terms, false)
            .await?
            .into_iter()
            .map(|(unit, _)| unit)
            .collect())
    }

    async fn corpus_stats(&self, filter: &SearchFilter) -> Result<CorpusStats> {
        let units = self.fetch_units(filter, &[], false).await?;
        if units.is_empty() {
            return Ok(CorpusStats::default());
        }
        let total: usize = units.iter().map(|(u, _)| u.token_count).sum();
        Ok(CorpusStats {
            unit_count: units.len(),
            avg_token_count: total as f64 / units.len() as f64,
        })
    }

    async fn record_sync_run(&self, run: &SyncRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs (id, source, trigger, started_at, completed_at, counts_json,
                                   errors_json, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                completed_at = excluded.completed_at,
                counts_json = excluded.counts_json,
                errors_json = excluded.errors_json,
                status = excluded.status
            "#,
        )
        .bind(&run.id)
        .bind(&run.source)
        .bind(&run.trigger)
        .bind(to_millis(run.started_at))
        .bind(run.completed_at.map(to_millis))
        .bind(serde_json::to_string(&run.counts).map_err(json_err)?)
        .bind(serde_json::to_string(&run.errors).map_err(json_err)?)
        .bind(run.status.as_str())
        .execute(&self.pool)
        .await
        .during("record sync run")?;
        Ok(())
    }

    async fn recent_sync_runs(&self, limit: usize) -> Result<Vec<SyncRun>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source, trigger, started_at, completed_at, counts_json, errors_json, status
            FROM sync_runs ORDER BY started_at DESC, rowid DESC LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .during("list sync runs")?;
        rows.iter().map(row_to_run).collect()
    }
}
