//! Token-budgeted context assembly with source attribution.
//!
//! Fused results are formatted and appended in rank order until the next
//! one would push the estimated token count past `max_tokens`. The top
//! result is always included, so a non-empty input never yields an empty
//! context; if that single result is over budget, `budget_exceeded` is set.

use serde::Serialize;

use crate::models::RankedResult;
use crate::search::SearchMode;

/// Approximate characters-per-token ratio used as the token proxy.
pub const CHARS_PER_TOKEN: usize = 4;

const SEPARATOR: &str = "\n\n---\n\n";

/// Estimated token count of `text`: `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Citation for one result included in the context.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    /// 1-based position, matching the `[n]` marker of the default formatter.
    pub position: usize,
    pub id: String,
    pub item_id: String,
    pub document_id: Option<String>,
    pub chunk_index: i64,
    pub title: String,
    pub source: String,
    pub fused_score: f64,
    pub vector_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextMetadata {
    pub has_results: bool,
    /// Candidates considered.
    pub chunks_found: usize,
    /// Candidates included.
    pub chunks_used: usize,
    /// Mean vector similarity of included results that have one.
    pub avg_similarity: Option<f64>,
    pub budget_exceeded: bool,
    pub estimated_tokens: usize,
    /// Retrieval mode that produced the candidates, when known.
    pub mode: Option<SearchMode>,
    /// Hybrid retrieval fell back to a single signal.
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssembledContext {
    pub context: String,
    pub sources: Vec<Source>,
    pub metadata: ContextMetadata,
}

/// Format a result as `[n] Title (part k)` followed by its content.
pub fn default_formatter(position: usize, result: &RankedResult) -> String {
    let title = if result.title.trim().is_empty() {
        "(untitled)"
    } else {
        result.title.trim()
    };
    let part = if result.document_id.is_some() {
        format!(" (part {})", result.chunk_index + 1)
    } else {
        String::new()
    };
    format!("[{}] {}{}\n{}", position, title, part, result.content.trim())
}

/// Greedily assemble `results` into a context string under `max_tokens`.
pub fn assemble<F>(results: &[RankedResult], max_tokens: usize, formatter: F) -> AssembledContext
where
    F: Fn(usize, &RankedResult) -> String,
{
    let mut context = String::new();
    let mut sources = Vec::new();
    let mut budget_exceeded = false;

    for (i, result) in results.iter().enumerate() {
        let piece = formatter(i + 1, result);
        let candidate = if context.is_empty() {
            piece
        } else {
            format!("{context}{SEPARATOR}{piece}")
        };

        if estimate_tokens(&candidate) > max_tokens {
            if context.is_empty() {
                context = candidate;
                sources.push(source_of(i + 1, result));
                budget_exceeded = true;
            }
            break;
        }

        context = candidate;
        sources.push(source_of(i + 1, result));
    }

    let similarities: Vec<f64> = results[..sources.len()]
        .iter()
        .filter_map(|r| r.vector_score)
        .collect();
    let avg_similarity = if similarities.is_empty() {
        None
    } else {
        Some(similarities.iter().sum::<f64>() / similarities.len() as f64)
    };

    let metadata = ContextMetadata {
        has_results: !sources.is_empty(),
        chunks_found: results.len(),
        chunks_used: sources.len(),
        avg_similarity,
        budget_exceeded,
        estimated_tokens: estimate_tokens(&context),
        mode: None,
        degraded: false,
    };

    AssembledContext {
        context,
        sources,
        metadata,
    }
}

fn source_of(position: usize, r: &RankedResult) -> Source {
    Source {
        position,
        id: r.id.clone(),
        item_id: r.item_id.clone(),
        document_id: r.document_id.clone(),
        chunk_index: r.chunk_index,
        title: r.title.clone(),
        source: r.source.clone(),
        fused_score: r.fused_score,
        vector_score: r.vector_score,
    }
}
