//! Source directory scan used by the initial bulk load.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::BootstrapConfig;
use crate::files::STAGING_GLOB;

/// A candidate file found under the bootstrap root.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Base name, used as the document filename.
    pub filename: String,
    /// Path relative to the root, used for ordering and glob matching.
    pub relative: String,
    pub path: PathBuf,
}

/// Outcome counters of one bootstrap run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BootstrapReport {
    /// The index already held documents and was used as is.
    pub attached: bool,
    /// Bootstrap had completed earlier; nothing was done.
    pub already_ready: bool,
    /// New documents inserted into both stores.
    pub indexed: usize,
    /// Documents re-sent to the index under their existing id.
    pub reindexed: usize,
    /// Files ignored (non-text, duplicate base name, invalid name).
    pub skipped: usize,
    pub failed: usize,
    /// Index size once bootstrap finished.
    pub document_count: u64,
}

/// Lists the files under `root` selected by the include/exclude globs,
/// sorted by relative path.
pub fn scan_source(root: &Path, config: &BootstrapConfig) -> Result<Vec<SourceFile>> {
    if !root.is_dir() {
        bail!("bootstrap source is not a directory: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
        STAGING_GLOB.to_string(),
    ];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();

        if exclude_set.is_match(&relative) || !include_set.is_match(&relative) {
            continue;
        }

        let filename = entry.file_name().to_string_lossy().to_string();
        files.push(SourceFile {
            filename,
            relative,
            path: path.to_path_buf(),
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(include: &[&str], exclude: &[&str]) -> BootstrapConfig {
        BootstrapConfig {
            include_globs: include.iter().map(|s| s.to_string()).collect(),
            exclude_globs: exclude.iter().map(|s| s.to_string()).collect(),
            ..BootstrapConfig::default()
        }
    }

    #[test]
    fn test_scan_sorts_and_applies_globs() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("nested")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("b.md"), "b").unwrap();
        std::fs::write(root.join("a.md"), "a").unwrap();
        std::fs::write(root.join("nested/c.md"), "c").unwrap();
        std::fs::write(root.join("skip.log"), "x").unwrap();
        std::fs::write(root.join(".git/HEAD"), "ref").unwrap();
        std::fs::write(root.join(".a.md.123.staging"), "partial").unwrap();

        let files = scan_source(root, &config(&["**/*.md"], &[])).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(names, vec!["a.md", "b.md", "nested/c.md"]);
        assert_eq!(files[2].filename, "c.md");
    }

    #[test]
    fn test_user_excludes() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("keep.txt"), "k").unwrap();
        std::fs::write(tmp.path().join("drop.txt"), "d").unwrap();

        let files = scan_source(tmp.path(), &config(&["**/*"], &["drop.*"])).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "keep.txt");
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(scan_source(&tmp.path().join("nope"), &BootstrapConfig::default()).is_err());
    }
}
