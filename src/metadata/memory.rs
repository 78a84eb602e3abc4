//! In-memory [`MetadataStore`] for tests.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::MetadataStore;
use crate::models::{DocumentRecord, RecordUpdate};

/// Rows keyed by document id; filename uniqueness is enforced on insert.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    rows: RwLock<BTreeMap<String, DocumentRecord>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn insert(&self, record: &DocumentRecord) -> Result<()> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&record.document_id) {
            bail!("duplicate document_id: {}", record.document_id);
        }
        if rows.values().any(|r| r.filename == record.filename) {
            bail!("duplicate filename: {}", record.filename);
        }
        rows.insert(record.document_id.clone(), record.clone());
        Ok(())
    }

    async fn get_by_filename(&self, filename: &str) -> Result<Option<DocumentRecord>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|r| r.filename == filename)
            .cloned())
    }

    async fn get_by_id(&self, document_id: &str) -> Result<Option<DocumentRecord>> {
        Ok(self.rows.read().await.get(document_id).cloned())
    }

    async fn update(&self, document_id: &str, update: &RecordUpdate) -> Result<bool> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(document_id) {
            Some(row) => {
                row.mime_type = update.mime_type.clone();
                row.source_path = update.source_path.clone();
                row.size_bytes = update.size_bytes;
                row.modified_at = update.modified_at;
                row.accessed_at = update.accessed_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, document_id: &str) -> Result<bool> {
        Ok(self.rows.write().await.remove(document_id).is_some())
    }

    async fn list(&self) -> Result<Vec<DocumentRecord>> {
        let mut rows: Vec<DocumentRecord> = self.rows.read().await.values().cloned().collect();
        rows.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(rows)
    }
}
