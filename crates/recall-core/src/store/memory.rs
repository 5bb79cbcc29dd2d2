//! In-memory [`Store`] implementation for testing and WASM targets.
//!
//! All state lives behind one `std::sync::RwLock`, so [`Store::apply_index`]
//! retires the old representation and writes the new one under a single
//! write guard. Vector candidates are brute-force cosine similarity over
//! every stored embedding; keyword candidates are a substring scan.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::similarity_score;
use crate::error::{RecallError, Result};
use crate::keyword::tokenize;
use crate::models::{
    Chunk, CorpusStats, Document, IndexedContent, Representation, ScoredUnit, SearchUnit,
    SourceItem, SyncRun,
};
use crate::representation::{plan_transition, Transition};

use super::{lexical_text, IndexedRef, SearchFilter, Store};

#[derive(Default)]
struct State {
    items: HashMap<String, SourceItem>,
    /// `(source, source_id)` to item id.
    keys: HashMap<(String, String), String>,
    documents: HashMap<String, Document>,
    /// Document id to chunks ordered by index.
    chunks: HashMap<String, Vec<Chunk>>,
    runs: Vec<SyncRun>,
}

impl State {
    /// Every searchable unit of non-trashed items passing `filter`, with its embedding.
    fn units<'a>(&'a self, filter: &SearchFilter) -> Vec<(SearchUnit, &'a [f32])> {
        let mut out = Vec::new();
        for item in self.items.values() {
            if item.trashed || !filter.matches(&item.source, item.updated_at, &item.tags) {
                continue;
            }
            match &item.representation {
                Representation::InlineEmbedded(embedding) => {
                    let text = lexical_text(&item.title, &item.content, false);
                    out.push((
                        SearchUnit {
                            id: item.id.clone(),
                            item_id: item.id.clone(),
                            document_id: None,
                            chunk_index: 0,
                            title: item.title.clone(),
                            source: item.source.clone(),
                            content: item.content.clone(),
                            token_count: tokenize(&text).len(),
                            created_at: item.created_at,
                        },
                        embedding.as_slice(),
                    ));
                }
                Representation::Chunked { document_id, .. } => {
                    for chunk in self.chunks.get(document_id).into_iter().flatten() {
                        out.push((
                            SearchUnit {
                                id: chunk.id.clone(),
                                item_id: item.id.clone(),
                                document_id: Some(document_id.clone()),
                                chunk_index: chunk.chunk_index,
                                title: item.title.clone(),
                                source: item.source.clone(),
                                content: chunk.content.clone(),
                                token_count: tokenize(&chunk.content).len(),
                                created_at: chunk.created_at,
                            },
                            chunk.embedding.as_slice(),
                        ));
                    }
                }
            }
        }
        out
    }
}

/// In-memory store for tests and environments without SQLite.
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| RecallError::Storage(anyhow::anyhow!("in-memory store lock poisoned")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| RecallError::Storage(anyhow::anyhow!("in-memory store lock poisoned")))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_item(&self, source: &str, source_id: &str) -> Result<Option<SourceItem>> {
        let state = self.read()?;
        let key = (source.to_string(), source_id.to_string());
        Ok(state
            .keys
            .get(&key)
            .and_then(|id| state.items.get(id))
            .cloned())
    }

    async fn apply_index(&self, item: &SourceItem, content: &IndexedContent) -> Result<Transition> {
        if let IndexedContent::Chunked { document, chunks } = content {
            if document.item_id != item.id || chunks.iter().any(|c| c.document_id != document.id)
            {
                return Err(RecallError::InvalidInput(format!(
                    "document {} does not belong to item {}",
                    document.id, item.id
                )));
            }
        }

        let mut state = self.write()?;
        let key = (item.source.clone(), item.source_id.clone());
        let previous = state
            .keys
            .get(&key)
            .and_then(|id| state.items.get(id))
            .map(|p| p.representation.clone());
        let transition = plan_transition(previous.as_ref(), content);

        if let Some(old_doc) = transition.retired_document() {
            state.chunks.remove(old_doc);
            let keep = matches!(
                content,
                IndexedContent::Chunked { document, .. } if document.id == old_doc
            );
            if !keep {
                state.documents.remove(old_doc);
            }
        }

        if let IndexedContent::Chunked { document, chunks } = content {
            let mut ordered = chunks.clone();
            ordered.sort_by_key(|c| c.chunk_index);
            state.chunks.insert(document.id.clone(), ordered);
            state.documents.insert(document.id.clone(), document.clone());
        }

        let mut stored = item.clone();
        stored.representation = content.representation();
        state.keys.insert(key, stored.id.clone());
        state.items.insert(stored.id.clone(), stored);

        Ok(transition)
    }

    async fn set_trashed(&self, item_id: &str, trashed: bool) -> Result<()> {
        let mut state = self.write()?;
        let item = state
            .items
            .get_mut(item_id)
            .ok_or_else(|| RecallError::InvalidInput(format!("unknown item: {item_id}")))?;
        item.trashed = trashed;
        let doc_id = item.document_ref().map(str::to_string);
        if let Some(doc) = doc_id.and_then(|id| state.documents.get_mut(&id)) {
            doc.active = !trashed;
        }
        Ok(())
    }

    async fn list_indexed(&self, source: &str) -> Result<Vec<IndexedRef>> {
        let state = self.read()?;
        let mut refs: Vec<IndexedRef> = state
            .items
            .values()
            .filter(|i| i.source == source)
            .map(|i| IndexedRef {
                id: i.id.clone(),
                source_id: i.source_id.clone(),
                trashed: i.trashed,
            })
            .collect();
        refs.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(refs)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read()?.documents.get(id).cloned())
    }

    async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        Ok(self
            .read()?
            .chunks
            .get(document_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn vector_candidates(
        &self,
        query_vec: &[f32],
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredUnit>> {
        let state = self.read()?;
        Ok(state
            .units(filter)
            .into_iter()
            .map(|(unit, embedding)| ScoredUnit {
                score: similarity_score(query_vec, embedding),
                unit,
            })
            .collect())
    }

    async fn keyword_candidates(
        &self,
        terms: &[String],
        filter: &SearchFilter,
    ) -> Result<Vec<SearchUnit>> {
        let state = self.read()?;
        Ok(state
            .units(filter)
            .into_iter()
            .map(|(unit, _)| unit)
            .filter(|unit| {
                let text = unit.lexical_text().to_lowercase();
                terms.iter().any(|t| text.contains(t.as_str()))
            })
            .collect())
    }

    async fn corpus_stats(&self, filter: &SearchFilter) -> Result<CorpusStats> {
        let state = self.read()?;
        let units = state.units(filter);
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
        let mut state = self.write()?;
        match state.runs.iter_mut().find(|r| r.id == run.id) {
            Some(existing) => *existing = run.clone(),
            None => state.runs.push(run.clone()),
        }
        Ok(())
    }

    async fn recent_sync_runs(&self, limit: usize) -> Result<Vec<SyncRun>> {
        let state = self.read()?;
        let mut runs = state.runs.clone();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}
