//! Document retrieval by ID.
//!
//! Fetches a chunked document and its chunks from the store. Used by the
//! `recall doc` command and the `GET /documents/{id}` endpoint.

use anyhow::Result;
use serde::Serialize;

use companion_recall_core::context::estimate_tokens;
use companion_recall_core::error::RecallError;
use companion_recall_core::store::Store;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub item_id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub active: bool,
    pub total_chunks: usize,
    pub chunks: Vec<ChunkResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkResponse {
    pub id: String,
    pub index: i64,
    pub tokens: usize,
    pub created_at: String,
    pub text: String,
}

/// Load document `id` with its chunks in index order.
///
/// An unknown id fails with [`RecallError::DocumentNotFound`].
pub async fn load_document(store: &dyn Store, id: &str) -> Result<DocumentResponse> {
    let Some(doc) = store.get_document(id).await? else {
        return Err(RecallError::DocumentNotFound(id.to_string()).into());
    };
    let chunks = store
        .get_chunks(id)
        .await?
        .into_iter()
        .map(|chunk| ChunkResponse {
            tokens: estimate_tokens(&chunk.content),
            created_at: chunk.created_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            id: chunk.id,
            index: chunk.chunk_index,
            text: chunk.content,
        })
        .collect();

    Ok(DocumentResponse {
        id: doc.id,
        item_id: doc.item_id,
        title: doc.title,
        tags: doc.tags,
        active: doc.active,
        total_chunks: doc.total_chunks,
        chunks,
    })
}

/// CLI entry point: prints the document and its chunks to stdout.
pub async fn run_doc(config: &Config, id: &str) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let doc = load_document(&store, id).await;
    store.pool().close().await;
    let doc = doc?;

    println!("--- Document ---");
    println!("id:       {}", doc.id);
    println!("item:     {}", doc.item_id);
    println!("title:    {}", doc.title);
    println!("tags:     {}", doc.tags.join(", "));
    println!("active:   {}", doc.active);
    println!();

    println!("--- Chunks ({}) ---", doc.chunks.len());
    for chunk in &doc.chunks {
        println!("[chunk {}] ~{} tokens", chunk.index, chunk.tokens);
        println!("{}", chunk.text);
        println!();
    }

    Ok(())
}
