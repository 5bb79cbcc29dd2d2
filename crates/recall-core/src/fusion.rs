//! Reciprocal Rank Fusion of the vector and keyword result lists.
//!
//! RRF formula, with 1-based ranks:
//!
//! ```text
//! fused(id) = w_vec / (k + rank_vec(id)) + w_kw / (k + rank_kw(id))
//! ```
//!
//! A list that does not contain `id` contributes nothing for that term.
//! Only rank positions matter, never the raw scores of either signal,
//! except as a tie-break: on equal fused score the higher vector
//! similarity wins.

use std::collections::HashMap;

use thiserror::Error;

use crate::models::RankedResult;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("invalid fusion weights: must be finite, non-negative and not both zero")]
    InvalidWeights,

    #[error("invalid RRF constant: must be positive")]
    InvalidConstant,
}

/// Configuration for [`fuse`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    pub vector_weight: f64,
    pub keyword_weight: f64,
    /// RRF smoothing constant.
    pub k_const: f64,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            vector_weight: 0.5,
            keyword_weight: 0.5,
            k_const: 60.0,
        }
    }
}

impl FusionParams {
    pub fn new(vector_weight: f64, keyword_weight: f64, k_const: f64) -> Result<Self, FusionError> {
        let params = Self {
            vector_weight,
            keyword_weight,
            k_const,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), FusionError> {
        let valid = |w: f64| w.is_finite() && w >= 0.0;
        if !valid(self.vector_weight)
            || !valid(self.keyword_weight)
            || self.vector_weight + self.keyword_weight <= 0.0
        {
            return Err(FusionError::InvalidWeights);
        }
        if !(self.k_const.is_finite() && self.k_const > 0.0) {
            return Err(FusionError::InvalidConstant);
        }
        Ok(())
    }

    /// Pure-vector mode: keyword weight forced to zero.
    pub fn vector_only(self) -> Self {
        Self {
            vector_weight: 1.0,
            keyword_weight: 0.0,
            ..self
        }
    }

    /// Pure-keyword mode: vector weight forced to zero.
    pub fn keyword_only(self) -> Self {
        Self {
            vector_weight: 0.0,
            keyword_weight: 1.0,
            ..self
        }
    }
}

/// Merge two ranked lists into one, best first, capped at `limit`.
///
/// Each input list is ranked in the order given (position 1 first).
/// Entries whose fused score is zero (present only in a zero-weighted
/// list) are dropped.
pub fn fuse(
    vector_ranked: &[RankedResult],
    keyword_ranked: &[RankedResult],
    params: &FusionParams,
    limit: usize,
) -> Vec<RankedResult> {
    let mut merged: HashMap<String, RankedResult> = HashMap::new();

    for (i, r) in vector_ranked.iter().enumerate() {
        let rank = i + 1;
        let entry = merged
            .entry(r.id.clone())
            .or_insert_with(|| blank(r));
        entry.rank_vector = Some(rank);
        entry.vector_score = r.vector_score;
        entry.fused_score += params.vector_weight / (params.k_const + rank as f64);
    }

    for (i, r) in keyword_ranked.iter().enumerate() {
        let rank = i + 1;
        let entry = merged
            .entry(r.id.clone())
            .or_insert_with(|| blank(r));
        entry.rank_keyword = Some(rank);
        entry.keyword_score = r.keyword_score;
        entry.fused_score += params.keyword_weight / (params.k_const + rank as f64);
    }

    let mut fused: Vec<RankedResult> = merged
        .into_values()
        .filter(|r| r.fused_score > 0.0)
        .collect();

    fused.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.vector_score
                    .unwrap_or(f64::NEG_INFINITY)
                    .partial_cmp(&a.vector_score.unwrap_or(f64::NEG_INFINITY))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| best_rank(a).cmp(&best_rank(b)))
            .then_with(|| a.stable_order(b))
    });
    fused.truncate(limit);
    fused
}

fn blank(r: &RankedResult) -> RankedResult {
    RankedResult {
        vector_score: None,
        keyword_score: None,
        fused_score: 0.0,
        rank_vector: None,
        rank_keyword: None,
        ..r.clone()
    }
}

fn best_rank(r: &RankedResult) -> usize {
    r.rank_vector
        .unwrap_or(usize::MAX)
        .min(r.rank_keyword.unwrap_or(usize::MAX))
}
