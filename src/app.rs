//! Wiring of the production components from a [`Config`].

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::assistant::Assistant;
use crate::completion::{create_completion_service, CompletionService};
use crate::config::Config;
use crate::db;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::index::{SqliteVectorIndex, VectorIndex};
use crate::metadata::{MetadataStore, SqliteMetadataStore};
use crate::migrate::run_migrations;
use crate::sync::SyncManager;
use crate::tools::{ToolContext, ToolRegistry};

/// Everything the CLI and the server operate on.
pub struct App {
    pub pool: SqlitePool,
    pub sync: Arc<SyncManager>,
    pub assistant: Arc<Assistant>,
    pub tools: Arc<ToolRegistry>,
    pub tool_context: Arc<ToolContext>,
}

impl App {
    /// Opens the database (migrating it if needed) and builds the index,
    /// metadata store, providers and sync manager.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        run_migrations(&pool).await?;

        let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);
        let index: Arc<dyn VectorIndex> = Arc::new(SqliteVectorIndex::new(
            pool.clone(),
            embedder,
            config.chunking.max_tokens,
        ));
        let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new(pool.clone()));
        let completion: Arc<dyn CompletionService> =
            Arc::from(create_completion_service(&config.completion)?);

        let sync = Arc::new(SyncManager::from_config(config, index.clone(), metadata));
        let assistant = Arc::new(Assistant::new(
            index,
            completion,
            config.retrieval.top_k,
            Duration::from_secs(config.completion.timeout_secs),
        ));
        let tool_context = Arc::new(ToolContext::new(sync.files().clone()));

        Ok(Self {
            pool,
            sync,
            assistant,
            tools: Arc::new(ToolRegistry::with_builtins()),
            tool_context,
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
