//! Concrete embedding providers.
//!
//! Implements the core [`EmbeddingProvider`] trait for:
//! - **[`DisabledProvider`]** — every call fails with [`ProviderError::Disabled`].
//! - **[`OpenAIProvider`]** — `POST /v1/embeddings` with batching, retry and backoff.
//! - **[`OllamaProvider`]** — a local Ollama instance's `/api/embed` endpoint.
//! - **[`HashingProvider`]** — offline, deterministic feature hashing of words.
//!
//! [`TimeoutProvider`] bounds every call with `tokio::time::timeout`. For
//! the HTTP providers the deadline covers every request of the call, each
//! retry attempt and the backoff sleeps between them, so it never cuts the
//! retry loop short. [`create_provider`] returns the configured provider
//! already wrapped.
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use companion_recall_core::embedding::EmbeddingProvider;
use companion_recall_core::error::ProviderError;
use companion_recall_core::keyword::tokenize;

use crate::config::EmbeddingConfig;

// ============ Disabled Provider ============

/// Used when `embedding.provider = "disabled"`. Hybrid search degrades to
/// keyword-only; sync records every item as a provider failure.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

// ============ Shared HTTP retry loop ============

/// POST `body` to `url`, retrying 429/5xx and network errors with backoff.
async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value, ProviderError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(backoff_delay(attempt)).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = bearer {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| {
                        ProviderError::Response(format!("{label} returned invalid JSON: {e}"))
                    });
                }

                let body_text = response.text().await.unwrap_or_default();

                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    tracing::debug!(provider = label, %status, attempt, "retrying embedding call");
                    last_err = Some(ProviderError::Unavailable(format!(
                        "{label} API error {status}: {body_text}"
                    )));
                    continue;
                }

                // Client error (not 429) — don't retry
                return Err(ProviderError::Response(format!(
                    "{label} API error {status}: {body_text}"
                )));
            }
            Err(e) => {
                last_err = Some(ProviderError::Unavailable(format!(
                    "{label} connection error ({url}): {e}"
                )));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        ProviderError::Unavailable(format!("{label} embedding failed after retries"))
    }))
}

/// Sleep before retry `attempt` (1-based): 1s, 2s, 4s, ... capped at 32s.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

fn parse_vector(value: &serde_json::Value, label: &str) -> Result<Vec<f32>, ProviderError> {
    value
        .as_array()
        .ok_or_else(|| ProviderError::Response(format!("{label}: embedding is not an array")))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| ProviderError::Response(format!("{label}: non-numeric component")))
        })
        .collect()
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable. Inputs larger than
/// `embedding.batch_size` are split into several API calls.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    api_key: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;

        // Verify API key is available
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) => key,
            Err(_) => bail!("OPENAI_API_KEY environment variable not set"),
        };

        Ok(Self {
            model,
            dims,
            api_key,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let json = post_json_with_retry(
                &self.client,
                "https://api.openai.com/v1/embeddings",
                Some(&self.api_key),
                &body,
                self.max_retries,
                "OpenAI",
            )
            .await?;
            out.extend(parse_openai_response(&json)?);
        }
        Ok(out)
    }
}

/// Extract `data[].embedding`, ordered by each entry's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| ProviderError::Response("OpenAI: missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(pos as u64);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| ProviderError::Response("OpenAI: missing embedding".to_string()))?;
        indexed.push((index, parse_vector(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default
/// `http://localhost:11434`). Requires an embedding model to be pulled,
/// e.g. `ollama pull nomic-embed-text`.
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let endpoint = format!("{}/api/embed", self.url);
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let json = post_json_with_retry(
                &self.client,
                &endpoint,
                None,
                &body,
                self.max_retries,
                "Ollama",
            )
            .await?;
            out.extend(parse_ollama_response(&json)?);
        }
        Ok(out)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| ProviderError::Response("Ollama: missing embeddings array".to_string()))?
        .iter()
        .map(|e| parse_vector(e, "Ollama"))
        .collect()
}

// ============ Hashing Provider ============

/// Offline embedder: each lowercased word increments one of `dims`
/// buckets chosen by SHA-256, and the vector is L2-normalized.
///
/// Texts sharing words get similar vectors. Useful without network
/// access and as a deterministic double in tests.
pub struct HashingProvider {
    dims: usize,
}

impl HashingProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(bytes) % self.dims as u64) as usize
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let tokens = tokenize(text);
        if tokens.is_empty() {
            v[self.bucket(text)] = 1.0;
            return v;
        }
        for token in &tokens {
            v[self.bucket(token)] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn model_name(&self) -> &str {
        "hashing"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ Timeout wrapper ============

/// Bounds each call of the wrapped provider; elapsed time becomes
/// [`ProviderError::Timeout`].
///
/// `attempt_timeout` bounds one request. When the inner provider splits
/// inputs into `batch_size` requests and retries each up to `max_retries`
/// times, the deadline of a call grows to fit all of them.
pub struct TimeoutProvider {
    inner: Box<dyn EmbeddingProvider>,
    attempt_timeout: Duration,
    max_retries: u32,
    batch_size: usize,
}

impl TimeoutProvider {
    /// Wrap a provider that answers each call with a single attempt.
    pub fn new(inner: Box<dyn EmbeddingProvider>, attempt_timeout: Duration) -> Self {
        Self {
            inner,
            attempt_timeout,
            max_retries: 0,
            batch_size: usize::MAX,
        }
    }

    /// Account for the inner provider's batching and retry schedule.
    pub fn with_retries(mut self, max_retries: u32, batch_size: usize) -> Self {
        self.max_retries = max_retries;
        self.batch_size = batch_size.max(1);
        self
    }

    /// Deadline for embedding `n` texts in one call.
    pub fn deadline(&self, n: usize) -> Duration {
        let requests = n.max(1).div_ceil(self.batch_size);
        let backoff: Duration = (1..=self.max_retries).map(backoff_delay).sum();
        self.attempt_timeout
            .checked_mul(self.max_retries.saturating_add(1))
            .and_then(|attempts| attempts.checked_add(backoff))
            .and_then(|per_request| per_request.checked_mul(u32::try_from(requests).ok()?))
            .unwrap_or(Duration::MAX)
    }
}

#[async_trait]
impl EmbeddingProvider for TimeoutProvider {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let deadline = self.deadline(texts.len());
        match tokio::time::timeout(deadline, self.inner.embed_batch(texts)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(
                u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }
}

/// Create the configured [`EmbeddingProvider`], wrapped in a [`TimeoutProvider`].
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"hashing"` | [`HashingProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let provider = match config.provider.as_str() {
        "disabled" => TimeoutProvider::new(Box::new(DisabledProvider), timeout),
        "openai" => TimeoutProvider::new(Box::new(OpenAIProvider::new(config)?), timeout)
            .with_retries(config.max_retries, config.batch_size),
        "ollama" => TimeoutProvider::new(Box::new(OllamaProvider::new(config)?), timeout)
            .with_retries(config.max_retries, config.batch_size),
        "hashing" => TimeoutProvider::new(
            Box::new(HashingProvider::new(config.dims.unwrap_or(256))),
            timeout,
        ),
        other => bail!("Unknown embedding provider: {}", other),
    };
    Ok(Arc::new(provider))
}
