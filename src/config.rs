//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to defaults.
//! The chunking and fusion constants are defaults, not fixed behavior.
//!
//! ```toml
//! [db]
//! path = "./data/recall.sqlite"
//!
//! [indexing]
//! chunk_threshold_words = 300
//! chunk_size_words = 500
//! overlap_words = 50
//!
//! [retrieval]
//! mode = "hybrid"
//! vector_weight = 0.5
//! keyword_weight = 0.5
//! rrf_k = 60
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [connectors.notes]
//! root = "~/notes"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use companion_recall_core::chunk::ChunkParams;
use companion_recall_core::fusion::FusionParams;
use companion_recall_core::ingest::IndexParams;
use companion_recall_core::search::{RetrievalParams, SearchMode};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexingConfig {
    pub chunk_threshold_words: usize,
    pub chunk_size_words: usize,
    pub overlap_words: usize,
    pub min_chunk_words: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            chunk_threshold_words: 300,
            chunk_size_words: 500,
            overlap_words: 50,
            min_chunk_words: 50,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub mode: String,
    pub top_k: usize,
    pub candidate_k: usize,
    pub vector_weight: f64,
    pub keyword_weight: f64,
    pub rrf_k: f64,
    pub vector_threshold: f64,
    pub keyword_threshold: f64,
    pub max_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: "hybrid".to_string(),
            top_k: 8,
            candidate_k: 40,
            vector_weight: 0.5,
            keyword_weight: 0.5,
            rrf_k: 60.0,
            vector_threshold: 0.0,
            keyword_threshold: 0.0,
            max_tokens: 1500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama defaults to `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Bound on one HTTP attempt; a whole call may take every retry.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `"info"` or `"companion_recall=debug"`.
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    pub notes: Option<NotesConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotesConnectorConfig {
    pub root: PathBuf,
    /// Source label stored on indexed items.
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Directory under `root` holding trashed notes.
    #[serde(default = "default_trash_dir")]
    pub trash_dir: String,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_source() -> String {
    "notes".to_string()
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

fn default_trash_dir() -> String {
    ".trash".to_string()
}

impl Config {
    pub fn index_params(&self) -> IndexParams {
        IndexParams {
            chunk_threshold_words: self.indexing.chunk_threshold_words,
            chunking: ChunkParams {
                chunk_size_words: self.indexing.chunk_size_words,
                overlap_words: self.indexing.overlap_words,
                min_chunk_words: self.indexing.min_chunk_words,
            },
        }
    }

    pub fn retrieval_params(&self) -> Result<RetrievalParams> {
        let r = &self.retrieval;
        let mode: SearchMode = r.mode.parse()?;
        let fusion = FusionParams::new(r.vector_weight, r.keyword_weight, r.rrf_k)
            .context("Invalid [retrieval] fusion settings")?;
        Ok(RetrievalParams {
            mode,
            top_k: r.top_k,
            candidate_k: r.candidate_k,
            fusion,
            vector_threshold: r.vector_threshold,
            keyword_threshold: r.keyword_threshold,
            max_tokens: r.max_tokens,
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate indexing
    let ix = &config.indexing;
    if ix.chunk_threshold_words == 0 {
        anyhow::bail!("indexing.chunk_threshold_words must be > 0");
    }
    if ix.chunk_size_words == 0 {
        anyhow::bail!("indexing.chunk_size_words must be > 0");
    }
    if ix.overlap_words >= ix.chunk_size_words {
        anyhow::bail!("indexing.overlap_words must be < indexing.chunk_size_words");
    }
    if ix.min_chunk_words > ix.chunk_size_words {
        anyhow::bail!("indexing.min_chunk_words must be <= indexing.chunk_size_words");
    }

    // Validate retrieval
    let r = &config.retrieval;
    if r.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if r.max_tokens < 1 {
        anyhow::bail!("retrieval.max_tokens must be >= 1");
    }
    for (name, value) in [
        ("vector_threshold", r.vector_threshold),
        ("keyword_threshold", r.keyword_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("retrieval.{} must be in [0.0, 1.0]", name);
        }
    }
    config.retrieval_params()?;

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "hashing" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or hashing.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        let remote = matches!(config.embedding.provider.as_str(), "openai" | "ollama");
        if remote && config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
        if config.embedding.timeout_secs == 0 {
            anyhow::bail!("embedding.timeout_secs must be > 0");
        }
    }

    Ok(())
}
