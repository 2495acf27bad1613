//! Top-k semantic retrieval and prompt-context rendering.

use std::fmt::Write;
use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::store::{ChunkStore, SearchHit};

/// Number of records returned when the caller has no preference.
pub const DEFAULT_TOP_K: usize = 5;

/// Embeds a query and returns the nearest stored records.
///
/// There is no similarity cutoff: the best `k` records come back even when
/// every score is low. An empty result means the store is empty.
pub struct CodeRetriever<S, E> {
    store: Arc<S>,
    embedder: Arc<E>,
}

impl<S, E> Clone for CodeRetriever<S, E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            embedder: Arc::clone(&self.embedder),
        }
    }
}

impl<S: ChunkStore, E: EmbeddingProvider> CodeRetriever<S, E> {
    #[must_use]
    pub fn new(store: Arc<S>, embedder: Arc<E>) -> Self {
        Self { store, embedder }
    }

    /// Up to `k` records ranked by descending similarity to `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let vector = self.embedder.embed(query).await;
        let hits = self.store.query(&vector, k).await?;
        tracing::debug!(k, found = hits.len(), "retrieved chunks");
        Ok(hits)
    }
}

/// Render retrieved chunks as the code context of a generation prompt.
#[must_use]
pub fn format_as_context(hits: &[SearchHit]) -> String {
    let mut out = String::new();
    for (i, hit) in hits.iter().enumerate() {
        if i > 0 {
            out.push_str("\n---\n\n");
        }
        let c = &hit.chunk;
        let _ = writeln!(out, "File: {}", c.file_path);
        let _ = writeln!(out, "Type: {}", c.chunk_type);
        let _ = writeln!(out, "Name: {}", c.name);
        let _ = writeln!(out, "Lines: {}-{}", c.start_line, c.end_line);
        let _ = writeln!(out, "Content:\n```\n{}\n```", c.content);
    }
    out
}
