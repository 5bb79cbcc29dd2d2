//! Nearest-neighbor retrieval over stored embeddings.

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::models::RankedResult;
use crate::store::{SearchFilter, Store};

/// Embed `query` and return the `top_k` most similar units with score ≥ `threshold`.
///
/// Fails with [`RecallError::Provider`](crate::error::RecallError::Provider)
/// if the query cannot be embedded.
pub async fn vector_search<S: Store + ?Sized>(
    store: &S,
    provider: &dyn EmbeddingProvider,
    query: &str,
    top_k: usize,
    threshold: f64,
    filter: &SearchFilter,
) -> Result<Vec<RankedResult>> {
    if query.trim().is_empty() || top_k == 0 {
        return Ok(Vec::new());
    }
    let query_vec = provider.embed(query).await?;
    crate::embedding::validate_embeddings(
        std::slice::from_ref(&query_vec),
        1,
        provider.dims(),
    )?;
    vector_search_with(store, &query_vec, top_k, threshold, filter).await
}

/// Vector retrieval with a pre-computed query embedding.
///
/// Equal scores are ordered by chunk index, then creation time, then id,
/// so an unchanged index always yields the same ordering.
pub async fn vector_search_with<S: Store + ?Sized>(
    store: &S,
    query_vec: &[f32],
    top_k: usize,
    threshold: f64,
    filter: &SearchFilter,
) -> Result<Vec<RankedResult>> {
    let candidates = store.vector_candidates(query_vec, filter).await?;

    let mut results: Vec<RankedResult> = candidates
        .into_iter()
        .filter(|c| c.score >= threshold)
        .map(|c| {
            let mut r = RankedResult::from_unit(c.unit);
            r.vector_score = Some(c.score);
            r
        })
        .collect();

    results.sort_by(|a, b| {
        b.vector_score
            .partial_cmp(&a.vector_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.stable_order(b))
    });
    results.truncate(top_k);

    for (i, r) in results.iter_mut().enumerate() {
        r.rank_vector = Some(i + 1);
        r.fused_score = r.vector_score.unwrap_or(0.0);
    }

    tracing::debug!(results = results.len(), "vector search");
    Ok(results)
}
