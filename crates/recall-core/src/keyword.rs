//! Lexical relevance retrieval.
//!
//! Queries are tokenized on Unicode word boundaries (UAX #29), so mixed
//! script text works: Latin and Hangul words split on spaces, Han and
//! Hiragana characters become single-character terms. Candidates come
//! from the store's lexical lookup and are scored here with BM25:
//!
//! ```text
//! idf(t)   = ln(1 + (N - df + 0.5) / (df + 0.5))
//! score(d) = Σ idf(t) · tf·(k1 + 1) / (tf + k1·(1 - b + b·|d|/avgdl))
//! ```
//!
//! The raw score is mapped to `[0, 1)` with `s / (1 + s)` so thresholds
//! are comparable across queries. Units matching no query term score zero
//! and are excluded.

use std::collections::{HashMap, HashSet};

use unicode_segmentation::UnicodeSegmentation;

use crate::error::Result;
use crate::models::{CorpusStats, RankedResult, SearchUnit};
use crate::store::{SearchFilter, Store};

/// BM25 term-frequency saturation.
const K1: f64 = 1.2;
/// BM25 length normalization strength.
const B: f64 = 0.75;

/// Lowercased Unicode words of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(|w| w.to_lowercase()).collect()
}

/// Distinct query terms in first-occurrence order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Score candidate units against `terms`; zero-score units are dropped.
pub fn bm25_scores(
    terms: &[String],
    candidates: Vec<SearchUnit>,
    stats: CorpusStats,
) -> Vec<(SearchUnit, f64)> {
    if terms.is_empty() || candidates.is_empty() {
        return Vec::new();
    }

    let tokenized: Vec<(SearchUnit, HashMap<String, usize>, usize)> = candidates
        .into_iter()
        .map(|unit| {
            let tokens = tokenize(&unit.lexical_text());
            let len = tokens.len();
            let mut tf: HashMap<String, usize> = HashMap::new();
            for t in tokens {
                *tf.entry(t).or_insert(0) += 1;
            }
            (unit, tf, len)
        })
        .collect();

    let n = stats.unit_count.max(tokenized.len()) as f64;
    let avgdl = if stats.avg_token_count > 0.0 {
        stats.avg_token_count
    } else {
        tokenized.iter().map(|(_, _, len)| *len as f64).sum::<f64>() / tokenized.len() as f64
    }
    .max(1.0);

    let idf: HashMap<&str, f64> = terms
        .iter()
        .map(|term| {
            let df = tokenized
                .iter()
                .filter(|(_, tf, _)| tf.contains_key(term))
                .count() as f64;
            (term.as_str(), (1.0 + (n - df + 0.5) / (df + 0.5)).ln())
        })
        .collect();

    tokenized
        .into_iter()
        .filter_map(|(unit, tf, len)| {
            let norm = K1 * (1.0 - B + B * len as f64 / avgdl);
            let score: f64 = terms
                .iter()
                .filter_map(|term| {
                    let f = *tf.get(term)? as f64;
                    Some(idf[term.as_str()] * f * (K1 + 1.0) / (f + norm))
                })
                .sum();
            (score > 0.0).then_some((unit, score))
        })
        .collect()
}

/// Lexical retrieval: top `top_k` units by descending relevance.
///
/// `threshold` applies to the normalized score in `[0, 1)`.
pub async fn keyword_search<S: Store + ?Sized>(
    store: &S,
    query: &str,
    top_k: usize,
    threshold: f64,
    filter: &SearchFilter,
) -> Result<Vec<RankedResult>> {
    let terms = query_terms(query);
    if terms.is_empty() || top_k == 0 {
        return Ok(Vec::new());
    }

    let candidates = store.keyword_candidates(&terms, filter).await?;
    let stats = store.corpus_stats(filter).await?;

    let mut results: Vec<RankedResult> = bm25_scores(&terms, candidates, stats)
        .into_iter()
        .map(|(unit, raw)| {
            let mut r = RankedResult::from_unit(unit);
            r.keyword_score = Some(raw / (1.0 + raw));
            r
        })
        .filter(|r| r.keyword_score.unwrap_or(0.0) >= threshold)
        .collect();

    results.sort_by(|a, b| {
        b.keyword_score
            .partial_cmp(&a.keyword_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.stable_order(b))
    });
    results.truncate(top_k);

    for (i, r) in results.iter_mut().enumerate() {
        r.rank_keyword = Some(i + 1);
        r.fused_score = r.keyword_score.unwrap_or(0.0);
    }

    tracing::debug!(query, terms = terms.len(), results = results.len(), "keyword search");
    Ok(results)
}
