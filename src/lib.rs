//! # Companion Recall
//!
//! Incremental indexing of a personal notes directory and hybrid
//! (vector + BM25) retrieval over it, backed by SQLite.
//!
//! The storage-agnostic core (chunking, representation transitions,
//! scoring, fusion, context assembly) lives in `companion-recall-core`.
//! This crate supplies the application around it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │ Notes dir   │──▶│   Indexer    │──▶│  SQLite   │
//! │ (connector) │   │ chunk+embed  │   │  store    │
//! └─────────────┘   └──────────────┘   └─────┬─────┘
//!                                            │
//!                        ┌───────────────────┤
//!                        ▼                   ▼
//!                   ┌──────────┐       ┌──────────┐
//!                   │   CLI    │       │   HTTP   │
//!                   │ (recall) │       │   API    │
//!                   └──────────┘       └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`connector_fs`] | Notes-directory connector |
//! | [`embedding`] | OpenAI, Ollama and offline hashing providers |
//! | [`sqlite_store`] | SQLite implementation of the core store |
//! | [`sync`] | Sync orchestration and run history |
//! | [`search`] | Search and context commands |
//! | [`get`] | Document lookup |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod connector_fs;
pub mod db;
pub mod embedding;
pub mod get;
pub mod migrate;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod sync;
