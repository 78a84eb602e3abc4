//! Error taxonomy of the sync manager.
//!
//! Stores and providers return `anyhow::Result`; [`SyncManager`](crate::sync::SyncManager)
//! classifies those failures into [`SyncError`] at its boundary so callers
//! (HTTP, CLI) can map each case to a status code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("document already exists: {filename}")]
    AlreadyExists { filename: String },

    #[error("document not found: {filename}")]
    NotFound { filename: String },

    #[error("indexing failed for {filename}: {message}")]
    IndexingFailure { filename: String, message: String },

    #[error("index deletion failed for {filename}: {message}")]
    IndexDeletionFailure { filename: String, message: String },

    /// The index write succeeded but the metadata write did not. The
    /// index now holds `document_id` without a matching record.
    #[error("metadata write failed for {filename} (document_id {document_id}): {message}")]
    PersistenceFailure {
        filename: String,
        document_id: String,
        message: String,
    },

    #[error("index is not ready")]
    NotReady,

    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("content of {filename} is not valid UTF-8 text")]
    InvalidContent { filename: String },

    /// A metadata read failed before anything was written.
    #[error("metadata store unavailable: {message}")]
    MetadataUnavailable { message: String },

    #[error("file storage failed for {filename}: {message}")]
    StorageFailure { filename: String, message: String },

    #[error("bootstrap failed: {message}")]
    BootstrapFailure { message: String },
}

impl SyncError {
    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::AlreadyExists { .. } => "already_exists",
            SyncError::NotFound { .. } => "not_found",
            SyncError::IndexingFailure { .. } => "indexing_failure",
            SyncError::IndexDeletionFailure { .. } => "index_deletion_failure",
            SyncError::PersistenceFailure { .. } => "persistence_failure",
            SyncError::NotReady => "not_ready",
            SyncError::InvalidFilename(_) => "invalid_filename",
            SyncError::InvalidContent { .. } => "invalid_content",
            SyncError::MetadataUnavailable { .. } => "metadata_unavailable",
            SyncError::StorageFailure { .. } => "storage_failure",
            SyncError::BootstrapFailure { .. } => "bootstrap_failure",
        }
    }

    /// The orphaned index id carried by a persistence failure.
    pub fn document_id(&self) -> Option<&str> {
        match self {
            SyncError::PersistenceFailure { document_id, .. } => Some(document_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_failure_carries_document_id() {
        let err = SyncError::PersistenceFailure {
            filename: "a.txt".into(),
            document_id: "doc-1".into(),
            message: "disk full".into(),
        };
        assert_eq!(err.code(), "persistence_failure");
        assert_eq!(err.document_id(), Some("doc-1"));
        assert!(err.to_string().contains("doc-1"));
        assert_eq!(SyncError::NotReady.document_id(), None);
    }
}
