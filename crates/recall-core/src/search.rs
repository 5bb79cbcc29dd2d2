//! Retrieval facade: vector, keyword and hybrid search plus context assembly.
//!
//! The [`Retriever`] operates entirely through the [`Store`] trait and an
//! injected [`EmbeddingProvider`], with no database or configuration
//! dependencies.
//!
//! # Hybrid retrieval
//!
//! 1. Fetch `candidate_k` keyword candidates (BM25).
//! 2. Embed the query and fetch `candidate_k` vector candidates (cosine).
//! 3. Fuse both lists with Reciprocal Rank Fusion.
//! 4. Truncate to `top_k`.
//!
//! If either signal fails in hybrid mode the other one is used alone and
//! the response is flagged `degraded`. Forcing `vector` mode propagates a
//! provider failure instead.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::{assemble, default_formatter, AssembledContext};
use crate::embedding::EmbeddingProvider;
use crate::error::{RecallError, Result};
use crate::fusion::{fuse, FusionParams};
use crate::keyword::keyword_search;
use crate::models::RankedResult;
use crate::store::{SearchFilter, Store};
use crate::vector::vector_search;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Vector,
    Keyword,
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Keyword => "keyword",
            Self::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SearchMode {
    type Err = RecallError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vector" => Ok(Self::Vector),
            "keyword" => Ok(Self::Keyword),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(RecallError::InvalidInput(format!(
                "unknown search mode '{other}', expected vector, keyword or hybrid"
            ))),
        }
    }
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    pub mode: SearchMode,
    pub top_k: usize,
    /// Candidates fetched per signal before fusion.
    pub candidate_k: usize,
    pub fusion: FusionParams,
    pub vector_threshold: f64,
    pub keyword_threshold: f64,
    pub max_tokens: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            mode: SearchMode::Hybrid,
            top_k: 8,
            candidate_k: 40,
            fusion: FusionParams::default(),
            vector_threshold: 0.0,
            keyword_threshold: 0.0,
            max_tokens: 1500,
        }
    }
}

/// Per-call overrides for [`Retriever::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub mode: Option<SearchMode>,
    pub top_k: Option<usize>,
    /// `(vector_weight, keyword_weight)` for hybrid fusion.
    pub weights: Option<(f64, f64)>,
    pub filter: SearchFilter,
}

/// Per-call overrides for [`Retriever::get_context`].
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub mode: Option<SearchMode>,
    pub top_k: Option<usize>,
    pub max_tokens: Option<usize>,
    pub filter: SearchFilter,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<RankedResult>,
    /// The mode that actually produced `results`.
    pub mode_used: SearchMode,
    pub degraded: bool,
}

pub struct Retriever {
    store: Arc<dyn Store>,
    provider: Arc<dyn EmbeddingProvider>,
    params: RetrievalParams,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn EmbeddingProvider>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            store,
            provider,
            params,
        }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Ranked results for `query`, best first.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResponse> {
        if query.trim().is_empty() {
            return Err(RecallError::InvalidInput("query must not be empty".to_string()));
        }
        let mode = options.mode.unwrap_or(self.params.mode);
        let top_k = options.top_k.unwrap_or(self.params.top_k);
        if top_k == 0 {
            return Err(RecallError::InvalidInput("top_k must be at least 1".to_string()));
        }
        let candidate_k = self.params.candidate_k.max(top_k);
        let fusion = match options.weights {
            Some((vector_weight, keyword_weight)) => {
                FusionParams::new(vector_weight, keyword_weight, self.params.fusion.k_const)
                    .map_err(|e| RecallError::InvalidInput(e.to_string()))?
            }
            None => self.params.fusion,
        };
        let filter = &options.filter;

        let (results, mode_used, degraded) = match mode {
            SearchMode::Vector => {
                let vector = self.vector(query, candidate_k, filter).await?;
                (
                    fuse(&vector, &[], &fusion.vector_only(), top_k),
                    SearchMode::Vector,
                    false,
                )
            }
            SearchMode::Keyword => {
                let keyword = self.keyword(query, candidate_k, filter).await?;
                (
                    fuse(&[], &keyword, &fusion.keyword_only(), top_k),
                    SearchMode::Keyword,
                    false,
                )
            }
            SearchMode::Hybrid => {
                let keyword = self.keyword(query, candidate_k, filter).await;
                let vector = self.vector(query, candidate_k, filter).await;
                match (vector, keyword) {
                    (Ok(v), Ok(k)) => (fuse(&v, &k, &fusion, top_k), SearchMode::Hybrid, false),
                    (Err(e), Ok(k)) => {
                        tracing::warn!(error = %e, "vector retrieval failed, using keyword only");
                        (
                            fuse(&[], &k, &fusion.keyword_only(), top_k),
                            SearchMode::Keyword,
                            true,
                        )
                    }
                    (Ok(v), Err(e)) => {
                        tracing::warn!(error = %e, "keyword retrieval failed, using vector only");
                        (
                            fuse(&v, &[], &fusion.vector_only(), top_k),
                            SearchMode::Vector,
                            true,
                        )
                    }
                    (Err(_), Err(e)) => return Err(e),
                }
            }
        };

        tracing::debug!(
            mode = %mode_used,
            degraded,
            results = results.len(),
            "search complete"
        );

        Ok(SearchResponse {
            results,
            mode_used,
            degraded,
        })
    }

    /// Retrieve for `query` and assemble a token-budgeted context.
    pub async fn get_context(
        &self,
        query: &str,
        options: &ContextOptions,
    ) -> Result<AssembledContext> {
        let max_tokens = options.max_tokens.unwrap_or(self.params.max_tokens);
        if max_tokens == 0 {
            return Err(RecallError::InvalidInput(
                "max_tokens must be at least 1".to_string(),
            ));
        }

        let response = self
            .search(
                query,
                &SearchOptions {
                    mode: options.mode,
                    top_k: options.top_k,
                    weights: None,
                    filter: options.filter.clone(),
                },
            )
            .await?;

        let mut assembled = assemble(&response.results, max_tokens, default_formatter);
        assembled.metadata.mode = Some(response.mode_used);
        assembled.metadata.degraded = response.degraded;
        Ok(assembled)
    }

    async fn vector(
        &self,
        query: &str,
        candidate_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<RankedResult>> {
        vector_search(
            self.store.as_ref(),
            self.provider.as_ref(),
            query,
            candidate_k,
            self.params.vector_threshold,
            filter,
        )
        .await
    }

    async fn keyword(
        &self,
        query: &str,
        candidate_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<RankedResult>> {
        keyword_search(
            self.store.as_ref(),
            query,
            candidate_k,
            self.params.keyword_threshold,
            filter,
        )
        .await
    }
}
