//! SQLite [`MetadataStore`] over the `document_metadata` table.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::MetadataStore;
use crate::models::{DocumentRecord, RecordUpdate};

const COLUMNS: &str = "document_id, filename, mime_type, source_path, size_bytes, created_at, modified_at, accessed_at";

pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn row_to_record(row: &SqliteRow) -> DocumentRecord {
    DocumentRecord {
        document_id: row.get("document_id"),
        filename: row.get("filename"),
        mime_type: row.get("mime_type"),
        source_path: row.get("source_path"),
        size_bytes: row.get("size_bytes"),
        created_at: ts(row.get("created_at")),
        modified_at: ts(row.get("modified_at")),
        accessed_at: ts(row.get("accessed_at")),
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert(&self, record: &DocumentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO document_metadata (document_id, filename, mime_type, source_path,
                                           size_bytes, created_at, modified_at, accessed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.document_id)
        .bind(&record.filename)
        .bind(&record.mime_type)
        .bind(&record.source_path)
        .bind(record.size_bytes)
        .bind(record.created_at.timestamp())
        .bind(record.modified_at.timestamp())
        .bind(record.accessed_at.timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| format!("inserting metadata for {}", record.filename))?;
        Ok(())
    }

    async fn get_by_filename(&self, filename: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM document_metadata WHERE filename = ?",
            COLUMNS
        ))
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn get_by_id(&self, document_id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM document_metadata WHERE document_id = ?",
            COLUMNS
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn update(&self, document_id: &str, update: &RecordUpdate) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE document_metadata
            SET mime_type = ?, source_path = ?, size_bytes = ?, modified_at = ?, accessed_at = ?
            WHERE document_id = ?
            "#,
        )
        .bind(&update.mime_type)
        .bind(&update.source_path)
        .bind(update.size_bytes)
        .bind(update.modified_at.timestamp())
        .bind(update.accessed_at.timestamp())
        .bind(document_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, document_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM document_metadata WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM document_metadata ORDER BY filename",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn list_filenames(&self) -> Result<Vec<String>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT filename FROM document_metadata ORDER BY filename")
                .fetch_all(&self.pool)
                .await?;
        Ok(names)
    }
}
