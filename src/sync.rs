//! Keeps the metadata store and the vector index in step.
//!
//! Every indexed document has exactly one [`DocumentRecord`] carrying the id
//! the index assigned to it, and every record points at a live index entry.
//! The two stores fail independently, so each operation orders its writes
//! to keep the damage of a partial failure observable and recoverable:
//!
//! | Operation | Order | Partial failure |
//! |-----------|-------|-----------------|
//! | add | stage file, index insert, commit file, metadata insert | [`SyncError::PersistenceFailure`] (index ahead; see [`SyncManager::reconcile`]) |
//! | update | stage file, index upsert, commit file, metadata update | [`SyncError::PersistenceFailure`] |
//! | delete | index delete, metadata delete, file removal | [`SyncError::IndexDeletionFailure`] leaves everything in place |
//!
//! Operations on one filename are serialized by [`FilenameLocks`]; every
//! store call runs under the configured timeout and a timeout counts as a
//! failure of that store.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::OwnedMutexGuard;

use crate::bootstrap::{scan_source, BootstrapReport, SourceFile};
use crate::config::{BootstrapConfig, Config};
use crate::error::SyncError;
use crate::files::{guess_mime, is_valid_filename, FileStore};
use crate::index::VectorIndex;
use crate::locks::FilenameLocks;
use crate::metadata::MetadataStore;
use crate::models::{DocumentRecord, IndexDocument, RecordUpdate};

const PENDING: u8 = 0;
const BOOTSTRAPPING: u8 = 1;
const READY: u8 = 2;

/// Readiness of the sync manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Pending,
    Bootstrapping,
    Ready,
}

pub struct SyncManager {
    index: Arc<dyn VectorIndex>,
    metadata: Arc<dyn MetadataStore>,
    files: FileStore,
    locks: FilenameLocks,
    call_timeout: Duration,
    source_dir: PathBuf,
    bootstrap: BootstrapConfig,
    state: AtomicU8,
}

enum BootstrapOutcome {
    Indexed,
    Reindexed,
    Skipped,
}

impl SyncManager {
    /// A manager over the given stores. Bootstrap reads from the data
    /// directory unless [`with_bootstrap`](Self::with_bootstrap) says otherwise.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        metadata: Arc<dyn MetadataStore>,
        files: FileStore,
    ) -> Self {
        let source_dir = files.data_dir().to_path_buf();
        Self {
            index,
            metadata,
            files,
            locks: FilenameLocks::new(),
            call_timeout: Duration::from_secs(120),
            source_dir,
            bootstrap: BootstrapConfig::default(),
            state: AtomicU8::new(PENDING),
        }
    }

    pub fn from_config(
        config: &Config,
        index: Arc<dyn VectorIndex>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self::new(index, metadata, FileStore::new(&config.storage.data_dir))
            .with_call_timeout(config.sync.call_timeout())
            .with_bootstrap(config.source_dir(), config.bootstrap.clone())
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_bootstrap(mut self, source_dir: impl Into<PathBuf>, config: BootstrapConfig) -> Self {
        self.source_dir = source_dir.into();
        self.bootstrap = config;
        self
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn state(&self) -> BootstrapState {
        match self.state.load(Ordering::Acquire) {
            READY => BootstrapState::Ready,
            BOOTSTRAPPING => BootstrapState::Bootstrapping,
            _ => BootstrapState::Pending,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == BootstrapState::Ready
    }

    // ============ Writes ============

    /// Index a new file and record it. The index assigns the document id.
    pub async fn add_document(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<DocumentRecord, SyncError> {
        let content = validate_upload(filename, bytes)?;
        self.require_ready()?;
        let _guard = self.lock(filename).await;

        if self.lookup(filename).await?.is_some() {
            return Err(SyncError::AlreadyExists {
                filename: filename.to_string(),
            });
        }

        let staged = self
            .files
            .stage(filename, bytes)
            .await
            .map_err(|e| storage_failure(filename, e))?;

        let doc = IndexDocument {
            filename: filename.to_string(),
            content: content.to_string(),
        };
        let document_id = match self.guarded(self.index.insert(&doc)).await {
            Ok(id) => id,
            Err(e) => {
                self.files.discard(staged).await;
                tracing::warn!(filename, backend = self.index.backend(), error = %e, "index insert failed");
                return Err(SyncError::IndexingFailure {
                    filename: filename.to_string(),
                    message: format!("{:#}", e),
                });
            }
        };

        let size = staged.size() as i64;
        let path = match self.files.commit(staged).await {
            Ok(path) => path,
            Err(e) => {
                // Nothing references the new id yet; take it back out of the index.
                if let Err(undo) = self.guarded(self.index.delete_by_id(&document_id)).await {
                    tracing::error!(
                        event = "store_divergence",
                        filename,
                        document_id = %document_id,
                        error = %undo,
                        "could not remove index entry after failed file commit"
                    );
                }
                return Err(storage_failure(filename, e));
            }
        };

        let now = now_secs();
        let record = DocumentRecord {
            document_id: document_id.clone(),
            filename: filename.to_string(),
            mime_type: guess_mime(filename).to_string(),
            source_path: path.display().to_string(),
            size_bytes: size,
            created_at: now,
            modified_at: now,
            accessed_at: now,
        };

        if let Err(e) = self.guarded(self.metadata.insert(&record)).await {
            return Err(persistence_failure(filename, &document_id, e));
        }

        tracing::info!(filename, document_id = %document_id, size_bytes = size, "document added");
        Ok(record)
    }

    /// Replace the content of an existing document, keeping its id.
    pub async fn update_document(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<DocumentRecord, SyncError> {
        let content = validate_upload(filename, bytes)?;
        self.require_ready()?;
        let _guard = self.lock(filename).await;

        let existing = self.lookup(filename).await?.ok_or_else(|| SyncError::NotFound {
            filename: filename.to_string(),
        })?;

        let staged = self
            .files
            .stage(filename, bytes)
            .await
            .map_err(|e| storage_failure(filename, e))?;

        let doc = IndexDocument {
            filename: filename.to_string(),
            content: content.to_string(),
        };
        if let Err(e) = self
            .guarded(self.index.upsert(&existing.document_id, &doc))
            .await
        {
            self.files.discard(staged).await;
            tracing::warn!(filename, document_id = %existing.document_id, error = %e, "index upsert failed");
            return Err(SyncError::IndexingFailure {
                filename: filename.to_string(),
                message: format!("{:#}", e),
            });
        }

        let size = staged.size() as i64;
        let path = match self.files.commit(staged).await {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(
                    event = "store_divergence",
                    filename,
                    document_id = %existing.document_id,
                    error = %e,
                    "index holds new content but the file was not replaced"
                );
                return Err(storage_failure(filename, e));
            }
        };

        let now = now_secs();
        let modified_at = if now > existing.modified_at {
            now
        } else {
            existing.modified_at + chrono::Duration::seconds(1)
        };
        let update = RecordUpdate {
            mime_type: guess_mime(filename).to_string(),
            source_path: path.display().to_string(),
            size_bytes: size,
            modified_at,
            accessed_at: now.max(modified_at),
        };

        match self
            .guarded(self.metadata.update(&existing.document_id, &update))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return Err(persistence_failure(
                    filename,
                    &existing.document_id,
                    anyhow::anyhow!("metadata row disappeared during update"),
                ))
            }
            Err(e) => return Err(persistence_failure(filename, &existing.document_id, e)),
        }

        tracing::info!(filename, document_id = %existing.document_id, size_bytes = size, "document updated");
        Ok(DocumentRecord {
            mime_type: update.mime_type,
            source_path: update.source_path,
            size_bytes: update.size_bytes,
            modified_at: update.modified_at,
            accessed_at: update.accessed_at,
            ..existing
        })
    }

    /// Remove a document from the index, then its record, then its file.
    pub async fn delete_document(&self, filename: &str) -> Result<DocumentRecord, SyncError> {
        validate_filename(filename)?;
        self.require_ready()?;
        let _guard = self.lock(filename).await;

        let existing = self.lookup(filename).await?.ok_or_else(|| SyncError::NotFound {
            filename: filename.to_string(),
        })?;

        if let Err(e) = self
            .guarded(self.index.delete_by_id(&existing.document_id))
            .await
        {
            tracing::warn!(filename, document_id = %existing.document_id, error = %e, "index delete failed");
            return Err(SyncError::IndexDeletionFailure {
                filename: filename.to_string(),
                message: format!("{:#}", e),
            });
        }

        if let Err(e) = self
            .guarded(self.metadata.delete(&existing.document_id))
            .await
        {
            return Err(persistence_failure(filename, &existing.document_id, e));
        }

        let path = Path::new(&existing.source_path);
        match self.files.remove(path).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(path = %path.display(), "file outside data directory or already gone; left in place")
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove file"),
        }

        tracing::info!(filename, document_id = %existing.document_id, "document deleted");
        Ok(existing)
    }

    /// Re-create the metadata row for a document the index already holds,
    /// after an add ended in [`SyncError::PersistenceFailure`]. Never
    /// touches the index.
    pub async fn reconcile(
        &self,
        filename: &str,
        document_id: &str,
    ) -> Result<DocumentRecord, SyncError> {
        validate_filename(filename)?;
        self.require_ready()?;
        let _guard = self.lock(filename).await;

        if let Some(existing) = self.lookup(filename).await? {
            if existing.document_id == document_id {
                return Ok(existing);
            }
            return Err(SyncError::AlreadyExists {
                filename: filename.to_string(),
            });
        }

        let bound = self
            .guarded(self.metadata.get_by_id(document_id))
            .await
            .map_err(metadata_unavailable)?;
        if let Some(other) = bound {
            tracing::warn!(filename, document_id, bound_to = %other.filename, "document id already recorded");
            return Err(SyncError::AlreadyExists {
                filename: other.filename,
            });
        }

        let in_index = self
            .guarded(self.index.contains(document_id))
            .await
            .map_err(|e| SyncError::IndexingFailure {
                filename: filename.to_string(),
                message: format!("{:#}", e),
            })?;
        if !in_index {
            tracing::warn!(filename, document_id, "index does not hold document id");
            return Err(SyncError::NotFound {
                filename: filename.to_string(),
            });
        }

        let path = self.files.path_for(filename);
        let size = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta.len() as i64,
            _ => {
                return Err(SyncError::NotFound {
                    filename: filename.to_string(),
                })
            }
        };

        let now = now_secs();
        let record = DocumentRecord {
            document_id: document_id.to_string(),
            filename: filename.to_string(),
            mime_type: guess_mime(filename).to_string(),
            source_path: path.display().to_string(),
            size_bytes: size,
            created_at: now,
            modified_at: now,
            accessed_at: now,
        };
        if let Err(e) = self.guarded(self.metadata.insert(&record)).await {
            return Err(persistence_failure(filename, document_id, e));
        }

        tracing::info!(filename, document_id, "metadata reconciled");
        Ok(record)
    }

    // ============ Reads ============

    pub async fn get_document_id(&self, filename: &str) -> Result<Option<String>, SyncError> {
        Ok(self.get_document(filename).await?.map(|r| r.document_id))
    }

    pub async fn get_document(&self, filename: &str) -> Result<Option<DocumentRecord>, SyncError> {
        self.require_ready()?;
        self.lookup(filename).await
    }

    pub async fn list_filenames(&self) -> Result<Vec<String>, SyncError> {
        self.require_ready()?;
        self.guarded(self.metadata.list_filenames())
            .await
            .map_err(metadata_unavailable)
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>, SyncError> {
        self.require_ready()?;
        self.guarded(self.metadata.list())
            .await
            .map_err(metadata_unavailable)
    }

    // ============ Bootstrap ============

    /// Attach to a populated index, or build one from the source directory.
    ///
    /// Runs at most once at a time. A second caller during the run gets
    /// [`SyncError::NotReady`]; a caller after success gets a report with
    /// `already_ready` set. A failed run returns the manager to pending so
    /// it can be retried.
    pub async fn load_or_create_index(&self) -> Result<BootstrapReport, SyncError> {
        match self
            .state
            .compare_exchange(PENDING, BOOTSTRAPPING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(READY) => {
                return Ok(BootstrapReport {
                    attached: true,
                    already_ready: true,
                    ..BootstrapReport::default()
                })
            }
            Err(_) => return Err(SyncError::NotReady),
        }

        match self.run_bootstrap().await {
            Ok(report) => {
                self.state.store(READY, Ordering::Release);
                Ok(report)
            }
            Err(e) => {
                self.state.store(PENDING, Ordering::Release);
                tracing::error!(error = %e, "bootstrap failed");
                Err(e)
            }
        }
    }

    async fn run_bootstrap(&self) -> Result<BootstrapReport, SyncError> {
        let count = self
            .guarded(self.index.document_count())
            .await
            .map_err(bootstrap_failure)?;
        if count > 0 {
            tracing::info!(backend = self.index.backend(), documents = count, "attached to existing index");
            return Ok(BootstrapReport {
                attached: true,
                document_count: count,
                ..BootstrapReport::default()
            });
        }

        tokio::fs::create_dir_all(&self.source_dir)
            .await
            .map_err(|e| bootstrap_failure(anyhow::Error::new(e)))?;
        let sources = scan_source(&self.source_dir, &self.bootstrap).map_err(bootstrap_failure)?;
        tracing::info!(source = %self.source_dir.display(), files = sources.len(), "bootstrapping index");

        let mut report = BootstrapReport::default();
        let mut seen = std::collections::HashSet::new();

        for source in &sources {
            if !seen.insert(source.filename.clone()) {
                tracing::warn!(path = %source.path.display(), "duplicate file name, skipping");
                report.skipped += 1;
                continue;
            }
            match self.bootstrap_file(source).await {
                Ok(BootstrapOutcome::Indexed) => report.indexed += 1,
                Ok(BootstrapOutcome::Reindexed) => report.reindexed += 1,
                Ok(BootstrapOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(path = %source.path.display(), error = %format!("{:#}", e), "bootstrap file failed");
                    report.failed += 1;
                }
            }
        }

        // Records whose files live outside the source directory still need
        // their index entries back.
        let records = self
            .guarded(self.metadata.list())
            .await
            .map_err(bootstrap_failure)?;
        for record in records.into_iter().filter(|r| !seen.contains(&r.filename)) {
            match self.reindex_record(&record).await {
                Ok(true) => report.reindexed += 1,
                Ok(false) => {
                    tracing::warn!(filename = %record.filename, path = %record.source_path, "recorded file missing, index entry not restored");
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(filename = %record.filename, error = %format!("{:#}", e), "re-indexing record failed");
                    report.failed += 1;
                }
            }
        }

        report.document_count = self
            .guarded(self.index.document_count())
            .await
            .map_err(bootstrap_failure)?;
        tracing::info!(
            indexed = report.indexed,
            reindexed = report.reindexed,
            skipped = report.skipped,
            failed = report.failed,
            "bootstrap complete"
        );
        Ok(report)
    }

    async fn bootstrap_file(&self, source: &SourceFile) -> anyhow::Result<BootstrapOutcome> {
        if !is_valid_filename(&source.filename) {
            return Ok(BootstrapOutcome::Skipped);
        }
        let bytes = tokio::fs::read(&source.path).await?;
        let content = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => {
                tracing::debug!(path = %source.path.display(), "not UTF-8 text, skipping");
                return Ok(BootstrapOutcome::Skipped);
            }
        };
        let doc = IndexDocument {
            filename: source.filename.clone(),
            content,
        };

        if let Some(existing) = self
            .guarded(self.metadata.get_by_filename(&source.filename))
            .await?
        {
            // An updated document lives in the data directory now; its
            // source copy is stale.
            if Path::new(&existing.source_path) != source.path {
                return Ok(if self.reindex_record(&existing).await? {
                    BootstrapOutcome::Reindexed
                } else {
                    BootstrapOutcome::Skipped
                });
            }
            self.guarded(self.index.upsert(&existing.document_id, &doc))
                .await?;
            return Ok(BootstrapOutcome::Reindexed);
        }

        let document_id = self.guarded(self.index.insert(&doc)).await?;
        let now = now_secs();
        let record = DocumentRecord {
            document_id: document_id.clone(),
            filename: source.filename.clone(),
            mime_type: guess_mime(&source.filename).to_string(),
            source_path: source.path.display().to_string(),
            size_bytes: doc.content.len() as i64,
            created_at: now,
            modified_at: now,
            accessed_at: now,
        };
        if let Err(e) = self.guarded(self.metadata.insert(&record)).await {
            tracing::error!(
                event = "store_divergence",
                filename = %source.filename,
                document_id = %document_id,
                error = %e,
                "index written but metadata insert failed"
            );
            return Err(e);
        }
        Ok(BootstrapOutcome::Indexed)
    }

    async fn reindex_record(&self, record: &DocumentRecord) -> anyhow::Result<bool> {
        let content = match tokio::fs::read_to_string(&record.source_path).await {
            Ok(text) => text,
            Err(_) => return Ok(false),
        };
        let doc = IndexDocument {
            filename: record.filename.clone(),
            content,
        };
        self.guarded(self.index.upsert(&record.document_id, &doc))
            .await?;
        Ok(true)
    }

    // ============ Helpers ============

    fn require_ready(&self) -> Result<(), SyncError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(SyncError::NotReady)
        }
    }

    async fn lock(&self, filename: &str) -> OwnedMutexGuard<()> {
        self.locks.acquire(filename).await
    }

    async fn lookup(&self, filename: &str) -> Result<Option<DocumentRecord>, SyncError> {
        self.guarded(self.metadata.get_by_filename(filename))
            .await
            .map_err(metadata_unavailable)
    }

    /// Runs a store call under the call timeout.
    async fn guarded<T>(&self, call: impl Future<Output = anyhow::Result<T>>) -> anyhow::Result<T> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "timed out after {}s",
                self.call_timeout.as_secs_f64()
            )),
        }
    }
}

fn validate_filename(filename: &str) -> Result<(), SyncError> {
    if is_valid_filename(filename) {
        Ok(())
    } else {
        Err(SyncError::InvalidFilename(filename.to_string()))
    }
}

fn validate_upload<'a>(filename: &str, bytes: &'a [u8]) -> Result<&'a str, SyncError> {
    validate_filename(filename)?;
    std::str::from_utf8(bytes).map_err(|_| SyncError::InvalidContent {
        filename: filename.to_string(),
    })
}

/// Current time at the one-second resolution the metadata store keeps.
fn now_secs() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

fn persistence_failure(filename: &str, document_id: &str, err: anyhow::Error) -> SyncError {
    tracing::error!(
        event = "store_divergence",
        filename,
        document_id,
        error = %format!("{:#}", err),
        "metadata write failed; stores diverged"
    );
    SyncError::PersistenceFailure {
        filename: filename.to_string(),
        document_id: document_id.to_string(),
        message: format!("{:#}", err),
    }
}

fn storage_failure(filename: &str, err: anyhow::Error) -> SyncError {
    SyncError::StorageFailure {
        filename: filename.to_string(),
        message: format!("{:#}", err),
    }
}

fn metadata_unavailable(err: anyhow::Error) -> SyncError {
    SyncError::MetadataUnavailable {
        message: format!("{:#}", err),
    }
}

fn bootstrap_failure(err: anyhow::Error) -> SyncError {
    SyncError::BootstrapFailure {
        message: format!("{:#}", err),
    }
}
