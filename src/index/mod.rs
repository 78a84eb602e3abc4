//! Vector index adapter.
//!
//! The sync manager treats the index as a black box keyed by document id:
//! it can insert a document (and get a fresh id back), replace the content
//! behind an existing id, delete by id, and ask questions of it. Chunking,
//! embedding and ranking are the implementation's business.
//!
//! | Implementation | Use |
//! |----------------|-----|
//! | [`SqliteVectorIndex`] | default; chunks + optional embeddings in SQLite, FTS5 fallback |
//! | [`InMemoryVectorIndex`] | tests and embedding-free experiments |

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{IndexDocument, Passage};

pub use memory::InMemoryVectorIndex;
pub use sqlite::SqliteVectorIndex;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Backend label used in logs.
    fn backend(&self) -> &str;

    /// Index a new document and return its freshly assigned id.
    async fn insert(&self, doc: &IndexDocument) -> Result<String>;

    /// Replace the content stored under `document_id`.
    ///
    /// Creates the entry if the id is unknown, which is how a wiped index
    /// is re-populated from existing metadata.
    async fn upsert(&self, document_id: &str, doc: &IndexDocument) -> Result<()>;

    /// Remove every chunk of `document_id`. Deleting an unknown id succeeds.
    async fn delete_by_id(&self, document_id: &str) -> Result<()>;

    async fn contains(&self, document_id: &str) -> Result<bool>;

    /// Number of documents held; `0` means the index needs bootstrapping.
    async fn document_count(&self) -> Result<u64>;

    /// Top `top_k` passages for `text`, best first.
    async fn search(&self, text: &str, top_k: usize) -> Result<Vec<Passage>>;

    /// Retrieved context for `text`, rendered for a completion prompt.
    async fn query(&self, text: &str, top_k: usize) -> Result<String> {
        let passages = self.search(text, top_k).await?;
        Ok(format_passages(&passages))
    }
}

/// Renders passages as numbered, source-tagged blocks.
pub fn format_passages(passages: &[Passage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[{}] ({}#{})\n{}", i + 1, p.filename, p.chunk_index, p.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Lowercased alphanumeric terms of a free-text query.
pub(crate) fn query_terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_terms_strip_punctuation() {
        assert_eq!(
            query_terms("What's in alpha.md?"),
            vec!["what", "s", "in", "alpha", "md"]
        );
        assert!(query_terms("?!").is_empty());
    }

    #[test]
    fn test_format_passages() {
        let passages = vec![Passage {
            document_id: "d1".into(),
            filename: "a.txt".into(),
            chunk_index: 0,
            text: "hello".into(),
            score: 1.0,
        }];
        assert_eq!(format_passages(&passages), "[1] (a.txt#0)\nhello");
        assert_eq!(format_passages(&[]), "");
    }
}
