//! Metadata store: one [`DocumentRecord`] per logical document.
//!
//! Rows are keyed by `document_id` and unique by `filename`. The sync
//! manager is the only writer.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{DocumentRecord, RecordUpdate};

pub use memory::InMemoryMetadataStore;
pub use sqlite::SqliteMetadataStore;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new row. Fails if the id or the filename is already taken.
    async fn insert(&self, record: &DocumentRecord) -> Result<()>;

    async fn get_by_filename(&self, filename: &str) -> Result<Option<DocumentRecord>>;

    async fn get_by_id(&self, document_id: &str) -> Result<Option<DocumentRecord>>;

    /// Apply `update` to an existing row. Returns `false` if no row matched.
    async fn update(&self, document_id: &str, update: &RecordUpdate) -> Result<bool>;

    /// Remove a row. Returns `false` if no row matched.
    async fn delete(&self, document_id: &str) -> Result<bool>;

    /// All rows ordered by filename.
    async fn list(&self) -> Result<Vec<DocumentRecord>>;

    async fn list_filenames(&self) -> Result<Vec<String>> {
        Ok(self.list().await?.into_iter().map(|r| r.filename).collect())
    }
}
