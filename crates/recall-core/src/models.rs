//! Core data models used throughout companion-recall.
//!
//! These types represent the notes, documents, chunks, ranked results and
//! sync bookkeeping that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Raw item produced by an upstream source before indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamNote {
    /// Source label, e.g. `"notes"`.
    pub source: String,
    /// Stable identifier within the source.
    pub source_id: String,
    pub title: String,
    pub body: String,
    /// Last-modified signal reported by the source.
    pub updated_at: DateTime<Utc>,
    /// Removal signal: the source moved this item to its trash.
    #[serde(default)]
    pub trashed: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A note the source saw but could not turn into an [`UpstreamNote`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedNote {
    pub source_id: String,
    pub reason: String,
}

/// Everything one upstream scan reported.
///
/// Skipped notes still exist upstream; they are never treated as removed.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub notes: Vec<UpstreamNote>,
    pub skipped: Vec<SkippedNote>,
}

impl From<Vec<UpstreamNote>> for ScanReport {
    fn from(notes: Vec<UpstreamNote>) -> Self {
        Self {
            notes,
            skipped: Vec::new(),
        }
    }
}

/// How an indexed item is represented for vector search.
///
/// An item is either embedded inline or split into a [`Document`] with
/// chunks, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum Representation {
    InlineEmbedded(Vec<f32>),
    Chunked { document_id: String, chunk_count: usize },
}

impl Representation {
    pub fn kind(&self) -> RepresentationKind {
        match self {
            Self::InlineEmbedded(_) => RepresentationKind::Inline,
            Self::Chunked { .. } => RepresentationKind::Chunked,
        }
    }
}

/// Tag-only view of a [`Representation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepresentationKind {
    Inline,
    Chunked,
}

impl RepresentationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Chunked => "chunked",
        }
    }
}

impl std::str::FromStr for RepresentationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inline" => Ok(Self::Inline),
            "chunked" => Ok(Self::Chunked),
            _ => Err(format!("unknown representation: {s}")),
        }
    }
}

/// An indexable unit of text as stored by the engine.
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub id: String,
    pub source: String,
    pub source_id: String,
    pub title: String,
    pub content: String,
    /// Digest of the last successfully embedded content.
    pub content_hash: String,
    pub representation: Representation,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub trashed: bool,
}

impl SourceItem {
    pub fn is_chunked(&self) -> bool {
        matches!(self.representation, Representation::Chunked { .. })
    }

    pub fn inline_embedding(&self) -> Option<&[f32]> {
        match &self.representation {
            Representation::InlineEmbedded(v) => Some(v),
            Representation::Chunked { .. } => None,
        }
    }

    pub fn document_ref(&self) -> Option<&str> {
        match &self.representation {
            Representation::Chunked { document_id, .. } => Some(document_id),
            Representation::InlineEmbedded(_) => None,
        }
    }
}

/// Grouping record created only for chunked items.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub item_id: String,
    pub title: String,
    pub total_chunks: usize,
    pub tags: Vec<String>,
    pub active: bool,
}

/// A positional slice of a chunked item's content with its embedding.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// Freshly computed index content, handed to the store in one write.
#[derive(Debug, Clone)]
pub enum IndexedContent {
    Inline { embedding: Vec<f32> },
    Chunked { document: Document, chunks: Vec<Chunk> },
}

impl IndexedContent {
    pub fn kind(&self) -> RepresentationKind {
        match self {
            Self::Inline { .. } => RepresentationKind::Inline,
            Self::Chunked { .. } => RepresentationKind::Chunked,
        }
    }

    /// The [`Representation`] an item carries once this content is stored.
    pub fn representation(&self) -> Representation {
        match self {
            Self::Inline { embedding } => Representation::InlineEmbedded(embedding.clone()),
            Self::Chunked { document, chunks } => Representation::Chunked {
                document_id: document.id.clone(),
                chunk_count: chunks.len(),
            },
        }
    }
}

/// One searchable unit: an inline item or a single chunk.
#[derive(Debug, Clone)]
pub struct SearchUnit {
    /// Item id for inline units, chunk id for chunks.
    pub id: String,
    pub item_id: String,
    pub document_id: Option<String>,
    pub chunk_index: i64,
    pub title: String,
    pub source: String,
    pub content: String,
    /// Number of lexical tokens in the unit's searchable text.
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
}

/// A unit scored by similarity to a query vector.
#[derive(Debug, Clone)]
pub struct ScoredUnit {
    pub unit: SearchUnit,
    pub score: f64,
}

/// Corpus-wide lexical statistics used for BM25 length normalization.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorpusStats {
    pub unit_count: usize,
    pub avg_token_count: f64,
}

/// A retrieval result, from a single signal or fused.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub id: String,
    pub item_id: String,
    pub document_id: Option<String>,
    pub chunk_index: i64,
    pub title: String,
    pub source: String,
    pub content: String,
    pub vector_score: Option<f64>,
    pub keyword_score: Option<f64>,
    pub fused_score: f64,
    pub rank_vector: Option<usize>,
    pub rank_keyword: Option<usize>,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
}

impl RankedResult {
    pub(crate) fn from_unit(unit: SearchUnit) -> Self {
        Self {
            id: unit.id,
            item_id: unit.item_id,
            document_id: unit.document_id,
            chunk_index: unit.chunk_index,
            title: unit.title,
            source: unit.source,
            content: unit.content,
            vector_score: None,
            keyword_score: None,
            fused_score: 0.0,
            rank_vector: None,
            rank_keyword: None,
            created_at: unit.created_at,
        }
    }

    /// Secondary ordering for equal scores: chunk index, creation time, id.
    pub fn stable_order(&self, other: &Self) -> std::cmp::Ordering {
        self.chunk_index
            .cmp(&other.chunk_index)
            .then(self.created_at.cmp(&other.created_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Lifecycle status of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed unit inside a batch: one item or one chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitError {
    pub source_id: String,
    /// `"item"` or `"chunk N"`.
    pub unit: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Counters of a sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub total: usize,
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub embedded: usize,
    pub chunks_created: usize,
}

/// Bookkeeping record for one incremental sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: String,
    pub source: String,
    pub trigger: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub counts: SyncCounts,
    pub errors: Vec<UnitError>,
    pub status: SyncStatus,
}
