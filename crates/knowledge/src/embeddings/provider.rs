//! Embedding provider trait.

use crate::error::{KnowledgeError, KnowledgeResult};

/// Trait for embedding backends.
///
/// Implementations own the transport (in-process, local server, remote API).
/// Retry, fallback and timeouts live in `EmbeddingService`, not here.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Get provider name (e.g., "mock", "openai", "ollama")
    fn provider_name(&self) -> &str;

    /// Get model identifier
    fn model_name(&self) -> &str;

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Generate embeddings for multiple texts in a batch.
    async fn embed_batch(&self, texts: &[String]) -> KnowledgeResult<Vec<Vec<f32>>>;

    /// Generate embedding for a single text (convenience method).
    async fn embed(&self, text: &str) -> KnowledgeResult<Vec<f32>> {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        results.pop().ok_or(KnowledgeError::EmbeddingEmpty)
    }
}
