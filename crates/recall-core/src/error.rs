//! Error taxonomy for ingestion and retrieval.
//!
//! [`ProviderError`] covers every way an embedding call can fail. It is
//! retryable per unit and never fatal to a batch. [`RecallError`] is the
//! error type of the [`Store`](crate::store::Store) trait and of the
//! retrieval facade.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of an embedding provider call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Deadline in milliseconds.
    #[error("embedding call timed out after {0}ms")]
    Timeout(u64),

    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("invalid embedding response: {0}")]
    Response(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding provider returned a zero vector")]
    ZeroVector,

    #[error("embedding provider is disabled")]
    Disabled,
}

/// Main error type for store and retrieval operations.
#[derive(Error, Debug)]
pub enum RecallError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// An expected table, column or capability is missing in storage.
    #[error("schema error during {operation}: {detail}")]
    Schema { operation: String, detail: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// The upstream note source could not be scanned.
    #[error("upstream source {source_name} failed: {detail}")]
    Upstream { source_name: String, detail: String },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl RecallError {
    pub fn schema(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Schema {
            operation: operation.into(),
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider(_) => ErrorKind::Provider,
            Self::Schema { .. } => ErrorKind::Schema,
            Self::InvalidInput(_) | Self::DocumentNotFound(_) => ErrorKind::InvalidInput,
            Self::Upstream { .. } => ErrorKind::Upstream,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// Classification recorded alongside each failed unit of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Provider,
    Schema,
    InvalidInput,
    Upstream,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Provider => "provider",
            ErrorKind::Schema => "schema",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Storage => "storage",
        }
    }
}

pub type Result<T> = std::result::Result<T, RecallError>;
