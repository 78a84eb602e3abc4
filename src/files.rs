//! Upload directory with staged writes.
//!
//! New content is first written to a hidden staging file next to its final
//! path. The sync manager commits (renames) it only after the index accepted
//! the document, so a failed index write never leaves a half-replaced file.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const STAGING_SUFFIX: &str = ".staging";

/// Glob matching staging files, excluded from bootstrap walks.
pub const STAGING_GLOB: &str = "**/.*.staging";

#[derive(Debug, Clone)]
pub struct FileStore {
    data_dir: PathBuf,
}

/// A written but not yet committed upload.
#[derive(Debug)]
pub struct StagedFile {
    staged: PathBuf,
    target: PathBuf,
    size: u64,
}

impl StagedFile {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Final location of `filename` inside the data directory.
    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.data_dir.join(filename)
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .with_context(|| format!("creating data directory {}", self.data_dir.display()))
    }

    pub async fn stage(&self, filename: &str, bytes: &[u8]) -> Result<StagedFile> {
        self.ensure_dir().await?;
        let staged = self.data_dir.join(format!(
            ".{}.{}{}",
            filename,
            Uuid::new_v4().simple(),
            STAGING_SUFFIX
        ));
        tokio::fs::write(&staged, bytes)
            .await
            .with_context(|| format!("staging {}", staged.display()))?;
        Ok(StagedFile {
            staged,
            target: self.path_for(filename),
            size: bytes.len() as u64,
        })
    }

    /// Move a staged file over its final path.
    pub async fn commit(&self, staged: StagedFile) -> Result<PathBuf> {
        tokio::fs::rename(&staged.staged, &staged.target)
            .await
            .with_context(|| format!("committing {}", staged.target.display()))?;
        Ok(staged.target)
    }

    pub async fn discard(&self, staged: StagedFile) {
        if let Err(e) = tokio::fs::remove_file(&staged.staged).await {
            tracing::warn!(path = %staged.staged.display(), error = %e, "failed to discard staged file");
        }
    }

    pub async fn read(&self, filename: &str) -> Result<Vec<u8>> {
        let path = self.path_for(filename);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))
    }

    /// Whether `path` lies inside the data directory.
    pub fn owns(&self, path: &Path) -> bool {
        match (self.data_dir.canonicalize(), path.canonicalize()) {
            (Ok(root), Ok(p)) => p.starts_with(root),
            _ => path.starts_with(&self.data_dir),
        }
    }

    /// Remove `path` if it belongs to the data directory. Files elsewhere
    /// (bootstrap sources) are left alone and reported as `false`.
    pub async fn remove(&self, path: &Path) -> Result<bool> {
        if !self.owns(path) {
            return Ok(false);
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }
}

/// A filename must be a single, visible path component.
pub fn is_valid_filename(filename: &str) -> bool {
    !filename.trim().is_empty()
        && filename != "."
        && filename != ".."
        && !filename.starts_with('.')
        && !filename.contains(['/', '\\', '\0'])
}

/// MIME type from the file extension.
pub fn guess_mime(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("md") | Some("markdown") => "text/markdown",
        Some("html") | Some("htm") => "text/html",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("toml") => "application/toml",
        Some("yaml") | Some("yml") => "application/yaml",
        Some("xml") => "application/xml",
        _ => "text/plain",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_filename_validation() {
        assert!(is_valid_filename("notes.txt"));
        assert!(is_valid_filename("report 2024.md"));
        assert!(!is_valid_filename(""));
        assert!(!is_valid_filename("  "));
        assert!(!is_valid_filename(".."));
        assert!(!is_valid_filename(".hidden"));
        assert!(!is_valid_filename("a/b.txt"));
        assert!(!is_valid_filename("..\\b.txt"));
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime("a.MD"), "text/markdown");
        assert_eq!(guess_mime("a.json"), "application/json");
        assert_eq!(guess_mime("README"), "text/plain");
    }

    #[tokio::test]
    async fn test_stage_commit_replaces_file() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("data"));

        let staged = store.stage("a.txt", b"one").await.unwrap();
        assert!(!store.path_for("a.txt").exists());
        store.commit(staged).await.unwrap();
        assert_eq!(store.read("a.txt").await.unwrap(), b"one");

        let staged = store.stage("a.txt", b"two").await.unwrap();
        assert_eq!(staged.size(), 3);
        store.commit(staged).await.unwrap();
        assert_eq!(store.read("a.txt").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_discard_leaves_original() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());
        let staged = store.stage("a.txt", b"one").await.unwrap();
        store.commit(staged).await.unwrap();

        let staged = store.stage("a.txt", b"two").await.unwrap();
        store.discard(staged).await;

        assert_eq!(store.read("a.txt").await.unwrap(), b"one");
        let entries = std::fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_remove_only_inside_data_dir() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("data"));
        store.ensure_dir().await.unwrap();

        let outside = tmp.path().join("source.txt");
        std::fs::write(&outside, "keep").unwrap();
        assert!(!store.remove(&outside).await.unwrap());
        assert!(outside.exists());

        let inside = store.path_for("gone.txt");
        std::fs::write(&inside, "bye").unwrap();
        assert!(store.remove(&inside).await.unwrap());
        assert!(!inside.exists());
    }
}
