//! Collaborator construction from configuration.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use codemend_index::{
    AnyChunkStore, CodeIndexer, InMemoryChunkStore, IndexerConfig, ProviderEmbedder,
    SqliteChunkStore,
};
use codemend_llm::any::AnyProvider;
use codemend_llm::claude::ClaudeProvider;
use codemend_llm::ollama::OllamaProvider;
use codemend_llm::provider::ChatOptions;

use crate::config::{Config, IndexBackend, ProviderKind};

/// Embeddings always come from Ollama, whatever the chat backend.
pub type Embedder = ProviderEmbedder<OllamaProvider>;

pub type Indexer = CodeIndexer<AnyChunkStore, Embedder>;

/// Build the chat provider selected by `llm.provider`.
///
/// # Errors
///
/// Returns an error if Claude is selected without an API key.
pub fn create_provider(config: &Config) -> anyhow::Result<AnyProvider> {
    match config.llm.provider {
        ProviderKind::Ollama => Ok(AnyProvider::Ollama(OllamaProvider::new(
            &config.llm.base_url,
            config.llm.model.clone(),
            config.llm.embedding_model.clone(),
        ))),
        ProviderKind::Claude => {
            let api_key = config
                .secrets
                .claude_api_key
                .as_ref()
                .context("Claude API key not found: set ANTHROPIC_API_KEY or CODEMEND_CLAUDE_API_KEY")?
                .expose()
                .to_owned();
            let options = ChatOptions {
                max_tokens: config.llm.max_tokens,
                temperature: config.llm.temperature,
            };
            Ok(AnyProvider::Claude(ClaudeProvider::new(
                api_key,
                config.llm.model.clone(),
                options,
            )))
        }
    }
}

#[must_use]
pub fn create_embedder(config: &Config) -> Embedder {
    let ollama = OllamaProvider::new(
        &config.llm.base_url,
        config.llm.model.clone(),
        config.llm.embedding_model.clone(),
    );
    ProviderEmbedder::new(Arc::new(ollama), config.index.embedding_dimension)
}

/// Open the chunk store selected by `index.backend` for `project_root`.
///
/// # Errors
///
/// Returns an error if the SQLite index cannot be opened or migrated.
pub async fn open_store(config: &Config, project_root: &Path) -> anyhow::Result<AnyChunkStore> {
    match config.index.backend {
        IndexBackend::Sqlite => {
            let store = SqliteChunkStore::open_for_project(project_root)
                .await
                .with_context(|| {
                    format!(
                        "failed to open index at {}",
                        SqliteChunkStore::db_path(project_root).display()
                    )
                })?;
            Ok(AnyChunkStore::Sqlite(store))
        }
        IndexBackend::Memory => Ok(AnyChunkStore::Memory(InMemoryChunkStore::new())),
    }
}

#[must_use]
pub fn indexer_config(config: &Config) -> IndexerConfig {
    IndexerConfig {
        extensions: config.index.extensions.clone(),
        concurrency: config.index.concurrency,
    }
}

/// Store, embedder and indexer wired for one project.
///
/// # Errors
///
/// Returns an error if the store cannot be opened.
pub async fn build_indexer(config: &Config, project_root: &Path) -> anyhow::Result<Indexer> {
    let store = open_store(config, project_root).await?;
    Ok(CodeIndexer::new(
        Arc::new(store),
        Arc::new(create_embedder(config)),
        indexer_config(config),
    ))
}

/// Log whether the Ollama endpoint answers. Embeddings silently degrade to
/// zero vectors when it does not.
pub async fn health_check(config: &Config) {
    let ollama = OllamaProvider::new(
        &config.llm.base_url,
        config.llm.model.clone(),
        config.llm.embedding_model.clone(),
    );
    match ollama.health_check().await {
        Ok(()) => tracing::info!(url = %config.llm.base_url, "ollama health check passed"),
        Err(e) => tracing::warn!(
            url = %config.llm.base_url,
            "ollama unreachable, retrieval quality will degrade: {e}"
        ),
    }
}
