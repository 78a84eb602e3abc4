//! In-memory [`VectorIndex`] for tests and embedding-free setups.
//!
//! Stores whole documents in a `HashMap` behind a `tokio::sync::RwLock`.
//! Search scores each document by the number of query terms it contains.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{query_terms, VectorIndex};
use crate::models::{IndexDocument, Passage};

#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    docs: RwLock<HashMap<String, IndexDocument>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current content stored under `document_id`.
    pub async fn content_of(&self, document_id: &str) -> Option<String> {
        self.docs
            .read()
            .await
            .get(document_id)
            .map(|d| d.content.clone())
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn insert(&self, doc: &IndexDocument) -> Result<String> {
        let document_id = Uuid::new_v4().to_string();
        self.docs
            .write()
            .await
            .insert(document_id.clone(), doc.clone());
        Ok(document_id)
    }

    async fn upsert(&self, document_id: &str, doc: &IndexDocument) -> Result<()> {
        self.docs
            .write()
            .await
            .insert(document_id.to_string(), doc.clone());
        Ok(())
    }

    async fn delete_by_id(&self, document_id: &str) -> Result<()> {
        self.docs.write().await.remove(document_id);
        Ok(())
    }

    async fn contains(&self, document_id: &str) -> Result<bool> {
        Ok(self.docs.read().await.contains_key(document_id))
    }

    async fn document_count(&self) -> Result<u64> {
        Ok(self.docs.read().await.len() as u64)
    }

    async fn search(&self, text: &str, top_k: usize) -> Result<Vec<Passage>> {
        let terms = query_terms(text);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let docs = self.docs.read().await;
        let mut passages: Vec<Passage> = docs
            .iter()
            .filter_map(|(id, doc)| {
                let doc_terms = query_terms(&doc.content);
                let matches = terms.iter().filter(|t| doc_terms.contains(t)).count();
                (matches > 0).then(|| Passage {
                    document_id: id.clone(),
                    filename: doc.filename.clone(),
                    chunk_index: 0,
                    text: doc.content.clone(),
                    score: matches as f64,
                })
            })
            .collect();

        passages.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        passages.truncate(top_k);
        Ok(passages)
    }
}
