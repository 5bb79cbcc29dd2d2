//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, plus pure helper functions for vector serialization,
//! validation and similarity computation.
//!
//! Concrete provider implementations (OpenAI, Ollama, hashing) and the
//! timeout wrapper live in the `companion-recall` app crate. Providers are
//! passed into the ingestion pipeline and retriever explicitly; there is
//! no process-wide client.

use async_trait::async_trait;

use crate::error::ProviderError;

/// Trait for embedding providers.
///
/// `embed_batch` returns one vector per input text, in input order. A
/// provider must fail with a [`ProviderError`] on timeout or unavailability
/// and never return a zero vector in place of a real embedding.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts in a single provider call.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Response("empty embedding response".to_string()))
    }
}

/// Check a provider response: count, dimensionality, finiteness, non-zero.
pub fn validate_embeddings(
    vectors: &[Vec<f32>],
    expected_count: usize,
    dims: usize,
) -> Result<(), ProviderError> {
    if vectors.len() != expected_count {
        return Err(ProviderError::Response(format!(
            "expected {} embeddings, got {}",
            expected_count,
            vectors.len()
        )));
    }
    for v in vectors {
        if v.len() != dims {
            return Err(ProviderError::DimensionMismatch {
                expected: dims,
                actual: v.len(),
            });
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(ProviderError::Response(
                "embedding contains non-finite values".to_string(),
            ));
        }
        if v.iter().all(|x| *x == 0.0) {
            return Err(ProviderError::ZeroVector);
        }
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use companion_recall_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors and
/// vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Similarity mapped into `[0, 1]`: negative cosine counts as unrelated.
pub fn similarity_score(a: &[f32], b: &[f32]) -> f64 {
    (cosine_similarity(a, b) as f64).clamp(0.0, 1.0)
}
