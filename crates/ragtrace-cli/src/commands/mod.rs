pub mod chat;
pub mod eval;
pub mod ingest;
pub mod mcp_server;

use std::sync::Arc;

use anyhow::{Context, Result};
use ragtrace_ai::embedding::OpenAIEmbedding;
use ragtrace_core::{KbConfig, KnowledgeBase, Settings, paths};
use redb::Database;

/// Open the knowledge base with the embedder configured in settings.
pub(crate) fn open_knowledge_base(settings: &Settings) -> Result<KnowledgeBase> {
    let data_dir = paths::data_dir(settings)?;
    let db = Arc::new(
        Database::create(paths::kb_database_path(&data_dir))
            .context("Failed to open knowledge base database")?,
    );

    let mut embedder = OpenAIEmbedding::new(
        settings.embedding.api_key.clone().unwrap_or_default(),
        Some(settings.embedding.model.clone()),
    )
    .with_dimension(settings.embedding.dimension);
    if let Some(base_url) = &settings.embedding.base_url {
        embedder = embedder.with_base_url(base_url);
    }

    KnowledgeBase::open(
        db,
        Arc::new(embedder),
        KbConfig {
            dimension: settings.embedding.dimension,
            document_prefix: settings.embedding.document_prefix.clone(),
            search_prefix: settings.embedding.search_prefix.clone(),
        },
    )
}
