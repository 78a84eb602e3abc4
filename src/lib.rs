//! # docsync
//!
//! Keeps a relational metadata table consistent with a vector index while
//! files are added, updated and deleted, and answers questions over the
//! indexed documents.
//!
//! ## Architecture
//!
//! ```text
//!   HTTP (axum) / CLI (clap)
//!            │
//!            ▼
//!     ┌─────────────┐      ┌───────────────┐
//!     │ SyncManager │─────▶│  VectorIndex  │  insert / upsert / delete_by_id
//!     │  per-file   │      └───────────────┘
//!     │   locks     │      ┌───────────────┐
//!     │             │─────▶│ MetadataStore │  one row per document_id
//!     └─────────────┘      └───────────────┘
//!            │
//!            ▼
//!       FileStore (staged writes in the data directory)
//!
//!     Assistant ──▶ VectorIndex::query ──▶ CompletionService ──▶ QualityEvaluator
//! ```
//!
//! Writes go to the index first and the metadata table second; deletes go
//! the other way round (index, metadata, file). A metadata failure after a
//! successful index write surfaces as
//! [`SyncError::PersistenceFailure`](error::SyncError::PersistenceFailure)
//! with the orphaned id, which [`SyncManager::reconcile`](sync::SyncManager::reconcile)
//! repairs.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration |
//! | [`models`] | Shared data types |
//! | [`metadata`] | Metadata store trait and SQLite / in-memory stores |
//! | [`index`] | Vector index trait and SQLite / in-memory indexes |
//! | [`sync`] | The sync manager |
//! | [`files`] | Upload directory with staged writes |
//! | [`evaluator`] | Answer quality rubric |
//! | [`assistant`] | Retrieval + completion |
//! | [`tools`] | `read_file` and `calculate` tools |
//! | [`server`] | HTTP API |

pub mod app;
pub mod assistant;
pub mod bootstrap;
pub mod calc;
pub mod chunk;
pub mod commands;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod evaluator;
pub mod files;
pub mod http;
pub mod index;
pub mod locks;
pub mod metadata;
pub mod migrate;
pub mod models;
pub mod prompts;
pub mod server;
pub mod sync;
pub mod tools;
