//! # Companion Recall Core
//!
//! Runtime-agnostic logic for the companion-recall ingestion and hybrid
//! retrieval engine: data models, chunking, the representation state
//! machine, the store abstraction, the ingestion pipeline, keyword and
//! vector search, rank fusion and context assembly.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Storage and embedding backends are injected
//! through the [`store::Store`] and [`embedding::EmbeddingProvider`]
//! traits.

pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod ingest;
pub mod keyword;
pub mod models;
pub mod representation;
pub mod search;
pub mod store;
pub mod vector;
