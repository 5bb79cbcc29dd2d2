//! Representation lifecycle of an indexed item.
//!
//! ```text
//!              first ingest              threshold crossed
//! Unindexed ───────────────▶ InlineEmbedded ◀──────────▶ Chunked
//!                                 │   upstream hash differs   │
//!                                 └────────▶ Stale ◀──────────┘
//!                     upstream removal (from any state) ──▶ Trashed
//! ```
//!
//! [`plan_transition`] is the single place that decides how stored state
//! changes when new content is indexed; stores apply the resulting
//! [`Transition`] inside one write so an item is never both inline and
//! chunked, and never neither.

use serde::Serialize;

use crate::models::{IndexedContent, Representation, RepresentationKind, SourceItem};

/// Observable state of an item from the engine's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Unindexed,
    InlineEmbedded,
    Chunked,
    /// Indexed, but the upstream content no longer matches the stored hash.
    Stale,
    Trashed,
}

/// Classify a stored item against the hash of its current upstream content.
///
/// Pass `None` for `upstream_hash` to get the state as stored.
pub fn item_state(stored: Option<&SourceItem>, upstream_hash: Option<&str>) -> ItemState {
    let Some(item) = stored else {
        return ItemState::Unindexed;
    };
    if item.trashed {
        return ItemState::Trashed;
    }
    if let Some(hash) = upstream_hash {
        if hash != item.content_hash {
            return ItemState::Stale;
        }
    }
    match item.representation.kind() {
        RepresentationKind::Inline => ItemState::InlineEmbedded,
        RepresentationKind::Chunked => ItemState::Chunked,
    }
}

/// The storage change implied by writing new content for an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// No previous representation: write the new one.
    Fresh,
    /// Inline stays inline: overwrite the embedding.
    ReembedInline,
    /// Chunked stays chunked: delete every chunk of the document, insert the new set.
    ReplaceChunks { document_id: String },
    /// Inline becomes chunked: clear the inline embedding, create document and chunks.
    InlineToChunked,
    /// Chunked becomes inline: drop document and chunks, store the inline embedding.
    ChunkedToInline { document_id: String },
}

impl Transition {
    /// The previous document whose chunks must be removed, if any.
    pub fn retired_document(&self) -> Option<&str> {
        match self {
            Self::ReplaceChunks { document_id } | Self::ChunkedToInline { document_id } => {
                Some(document_id)
            }
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::ReembedInline => "reembed_inline",
            Self::ReplaceChunks { .. } => "replace_chunks",
            Self::InlineToChunked => "inline_to_chunked",
            Self::ChunkedToInline { .. } => "chunked_to_inline",
        }
    }
}

/// Decide the transition from a stored representation to new content.
pub fn plan_transition(previous: Option<&Representation>, next: &IndexedContent) -> Transition {
    match (previous, next) {
        (None, _) => Transition::Fresh,
        (Some(Representation::InlineEmbedded(_)), IndexedContent::Inline { .. }) => {
            Transition::ReembedInline
        }
        (Some(Representation::InlineEmbedded(_)), IndexedContent::Chunked { .. }) => {
            Transition::InlineToChunked
        }
        (Some(Representation::Chunked { document_id, .. }), IndexedContent::Chunked { .. }) => {
            Transition::ReplaceChunks {
                document_id: document_id.clone(),
            }
        }
        (Some(Representation::Chunked { document_id, .. }), IndexedContent::Inline { .. }) => {
            Transition::ChunkedToInline {
                document_id: document_id.clone(),
            }
        }
    }
}
