//! Core data models shared by the stores, the sync manager and the server.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One metadata row per logical source file.
///
/// `document_id` is assigned by the index on first insert and never changes
/// afterwards; `filename` is unique among live records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub filename: String,
    pub mime_type: String,
    pub source_path: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

/// Fields changed on an existing record when its file is resubmitted.
///
/// `source_path` moves to the committed upload, so a record that started
/// out pointing into the bootstrap source directory follows its new file.
#[derive(Debug, Clone)]
pub struct RecordUpdate {
    pub mime_type: String,
    pub source_path: String,
    pub size_bytes: i64,
    pub modified_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

/// Content handed to the vector index.
#[derive(Debug, Clone)]
pub struct IndexDocument {
    pub filename: String,
    pub content: String,
}

/// A chunk of an indexed document's text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A retrieved chunk with its relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct Passage {
    pub document_id: String,
    pub filename: String,
    pub chunk_index: i64,
    pub text: String,
    pub score: f64,
}
