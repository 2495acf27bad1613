//! Fixed-dimension embedding with a zero-vector fallback.

use std::future::Future;
use std::sync::Arc;

use codemend_llm::provider::LlmProvider;

/// Default embedding width (all-MiniLM-L6-v2).
pub const DEFAULT_DIMENSION: usize = 384;

/// Turns text into a vector of exactly [`dimension`](Self::dimension) floats.
///
/// Implementations never fail: a backend error yields the zero vector, whose
/// cosine similarity to anything is 0.
pub trait EmbeddingProvider: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> impl Future<Output = Vec<f32>> + Send;
}

/// Adapts an [`LlmProvider`] embedding endpoint to [`EmbeddingProvider`].
#[derive(Debug)]
pub struct ProviderEmbedder<P> {
    provider: Arc<P>,
    dimension: usize,
}

impl<P> Clone for ProviderEmbedder<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            dimension: self.dimension,
        }
    }
}

impl<P: LlmProvider> ProviderEmbedder<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, dimension: usize) -> Self {
        Self {
            provider,
            dimension,
        }
    }
}

impl<P: LlmProvider> EmbeddingProvider for ProviderEmbedder<P> {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Vec<f32> {
        match self.provider.embed(text).await {
            Ok(vector) if vector.len() == self.dimension => vector,
            Ok(vector) => {
                tracing::warn!(
                    provider = self.provider.name(),
                    expected = self.dimension,
                    got = vector.len(),
                    "embedding dimension mismatch, using zero vector"
                );
                vec![0.0; self.dimension]
            }
            Err(e) => {
                tracing::warn!(
                    provider = self.provider.name(),
                    "embedding failed, using zero vector: {e}"
                );
                vec![0.0; self.dimension]
            }
        }
    }
}
