//! SQLite-backed [`VectorIndex`].
//!
//! Documents are split with [`chunk_text`] and stored in `index_chunks`
//! with an FTS5 shadow table. When an embedding provider is enabled each
//! chunk also carries its vector as a BLOB and search is brute-force cosine
//! similarity; otherwise search ranks by FTS5 `bm25`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use super::{query_terms, VectorIndex};
use crate::chunk::{chunk_text, content_hash};
use crate::embedding::{blob_to_vec, cosine_similarity, embed_query, vec_to_blob, EmbeddingProvider};
use crate::models::{Chunk, IndexDocument, Passage};

pub struct SqliteVectorIndex {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
    max_tokens: usize,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn EmbeddingProvider>, max_tokens: usize) -> Self {
        Self {
            pool,
            embedder,
            max_tokens,
        }
    }

    async fn write_document(&self, document_id: &str, doc: &IndexDocument) -> Result<()> {
        let chunks = chunk_text(document_id, &doc.content, self.max_tokens);

        // Embed before opening the transaction; a provider failure writes nothing.
        let vectors = if self.embedder.is_enabled() {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != chunks.len() {
                bail!(
                    "embedding provider returned {} vectors for {} chunks",
                    vectors.len(),
                    chunks.len()
                );
            }
            Some(vectors)
        } else {
            None
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO index_documents (document_id, filename, content_hash, indexed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                filename = excluded.filename,
                content_hash = excluded.content_hash,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(document_id)
        .bind(&doc.filename)
        .bind(content_hash(&doc.content))
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM index_chunks_fts WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM index_chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for (i, chunk) in chunks.iter().enumerate() {
            let blob = vectors.as_ref().map(|v| vec_to_blob(&v[i]));
            insert_chunk(&mut tx, chunk, blob).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn vector_search(&self, text: &str, top_k: usize) -> Result<Vec<Passage>> {
        let query_vec = embed_query(self.embedder.as_ref(), text).await?;

        let rows = sqlx::query(
            r#"
            SELECT c.document_id, c.chunk_index, c.text, c.embedding, d.filename
            FROM index_chunks c
            JOIN index_documents d ON d.document_id = c.document_id
            WHERE c.embedding IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut passages: Vec<Passage> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                Passage {
                    document_id: row.get("document_id"),
                    filename: row.get("filename"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    score: cosine_similarity(&query_vec, &blob_to_vec(&blob)) as f64,
                }
            })
            .collect();

        passages.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        passages.truncate(top_k);
        Ok(passages)
    }

    async fn keyword_search(&self, text: &str, top_k: usize) -> Result<Vec<Passage>> {
        let terms = query_terms(text);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        // Quote every term so user punctuation never reaches the FTS5 parser.
        let fts_query = terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR ");

        let rows = sqlx::query(
            r#"
            SELECT m.document_id, c.chunk_index, c.text, d.filename, m.rank AS rank
            FROM (
                SELECT chunk_id, document_id, rank
                FROM index_chunks_fts
                WHERE index_chunks_fts MATCH ?
                ORDER BY rank
                LIMIT ?
            ) m
            JOIN index_chunks c ON c.id = m.chunk_id
            JOIN index_documents d ON d.document_id = m.document_id
            ORDER BY m.rank
            "#,
        )
        .bind(&fts_query)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                Passage {
                    document_id: row.get("document_id"),
                    filename: row.get("filename"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    score: -rank, // negate so higher = better
                }
            })
            .collect())
    }
}

async fn insert_chunk(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    chunk: &Chunk,
    embedding: Option<Vec<u8>>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO index_chunks (id, document_id, chunk_index, text, hash, embedding) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&chunk.id)
    .bind(&chunk.document_id)
    .bind(chunk.chunk_index)
    .bind(&chunk.text)
    .bind(&chunk.hash)
    .bind(embedding)
    .execute(&mut **tx)
    .await?;

    sqlx::query("INSERT INTO index_chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(&chunk.text)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    fn backend(&self) -> &str {
        "sqlite"
    }

    async fn insert(&self, doc: &IndexDocument) -> Result<String> {
        let document_id = Uuid::new_v4().to_string();
        self.write_document(&document_id, doc).await?;
        Ok(document_id)
    }

    async fn upsert(&self, document_id: &str, doc: &IndexDocument) -> Result<()> {
        self.write_document(document_id, doc).await
    }

    async fn delete_by_id(&self, document_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM index_chunks_fts WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM index_chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM index_documents WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn contains(&self, document_id: &str) -> Result<bool> {
        let found: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM index_documents WHERE document_id = ?",
        )
        .bind(document_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn document_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn search(&self, text: &str, top_k: usize) -> Result<Vec<Passage>> {
        if text.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        if self.embedder.is_enabled() {
            self.vector_search(text, top_k).await
        } else {
            self.keyword_search(text, top_k).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledProvider;
    use crate::migrate::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_index() -> SqliteVectorIndex {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteVectorIndex::new(pool, Arc::new(DisabledProvider), 700)
    }

    fn doc(name: &str, content: &str) -> IndexDocument {
        IndexDocument {
            filename: name.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_then_keyword_search() {
        let index = memory_index().await;
        let id = index
            .insert(&doc("rust.md", "Ownership and borrowing in Rust."))
            .await
            .unwrap();
        index
            .insert(&doc("py.md", "Python has a garbage collector."))
            .await
            .unwrap();

        let hits = index.search("How does borrowing work?", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, id);
        assert_eq!(hits[0].filename, "rust.md");
        assert_eq!(index.document_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_replaces_content() {
        let index = memory_index().await;
        let id = index.insert(&doc("a.txt", "old words")).await.unwrap();
        index.upsert(&id, &doc("a.txt", "new content")).await.unwrap();

        assert!(index.search("old", 5).await.unwrap().is_empty());
        assert_eq!(index.search("new", 5).await.unwrap().len(), 1);
        assert_eq!(index.document_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_id_is_idempotent() {
        let index = memory_index().await;
        let id = index.insert(&doc("a.txt", "alpha")).await.unwrap();
        assert!(index.contains(&id).await.unwrap());

        index.delete_by_id(&id).await.unwrap();
        index.delete_by_id(&id).await.unwrap();
        assert!(!index.contains(&id).await.unwrap());
        assert!(index.search("alpha", 5).await.unwrap().is_empty());
    }

    /// Returns a single vector no matter how many texts it is given.
    struct OneVectorProvider;

    #[async_trait]
    impl EmbeddingProvider for OneVectorProvider {
        fn model_name(&self) -> &str {
            "one-vector"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0, 0.0]])
        }
    }

    #[tokio::test]
    async fn test_short_embedding_batch_writes_nothing() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        let index = SqliteVectorIndex::new(pool, Arc::new(OneVectorProvider), 8);

        let content = "word ".repeat(200);
        assert!(chunk_text("doc", &content, 8).len() > 1);
        let err = index.insert(&doc("long.txt", &content)).await.unwrap_err();
        assert!(err.to_string().contains("vectors for"), "{}", err);
        assert_eq!(index.document_count().await.unwrap(), 0);

        let id = index.insert(&doc("short.txt", "tiny")).await.unwrap();
        assert!(index.contains(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_punctuation_only_query_returns_nothing() {
        let index = memory_index().await;
        index.insert(&doc("a.txt", "alpha")).await.unwrap();
        assert!(index.search("?? !!", 5).await.unwrap().is_empty());
    }
}
