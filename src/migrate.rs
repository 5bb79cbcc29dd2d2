//! Idempotent schema migrations.
//!
//! Vectors are stored as little-endian f32 BLOBs. Timestamps are Unix
//! milliseconds. The `items` CHECK constraint enforces that an item is
//! embedded inline or chunked, never both and never neither.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[(&str, &str)] = &[
    (
        "items",
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            source_id TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            representation TEXT NOT NULL,
            inline_embedding BLOB,
            document_id TEXT,
            search_text TEXT NOT NULL,
            token_count INTEGER NOT NULL DEFAULT 0,
            tags_json TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            trashed INTEGER NOT NULL DEFAULT 0,
            UNIQUE(source, source_id),
            CHECK (
                (representation = 'inline' AND inline_embedding IS NOT NULL AND document_id IS NULL)
                OR (representation = 'chunked' AND inline_embedding IS NULL AND document_id IS NOT NULL)
            )
        )
        "#,
    ),
    (
        "documents",
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            title TEXT NOT NULL,
            total_chunks INTEGER NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '[]',
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY (item_id) REFERENCES items(id)
        )
        "#,
    ),
    (
        "chunks",
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            search_text TEXT NOT NULL,
            token_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "sync_runs",
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            trigger TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            counts_json TEXT NOT NULL,
            errors_json TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL
        )
        "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_items_source ON items(source)",
    "CREATE INDEX IF NOT EXISTS idx_items_updated_at ON items(updated_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_documents_item_id ON documents(item_id)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_sync_runs_started_at ON sync_runs(started_at DESC)",
];

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index on `pool` if missing.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    for (table, ddl) in SCHEMA {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create table {table}"))?;
    }
    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }
    tracing::debug!(tables = SCHEMA.len(), "schema up to date");
    Ok(())
}
