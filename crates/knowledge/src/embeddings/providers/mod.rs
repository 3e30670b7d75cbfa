//! Embedding backends.

pub mod mock;
pub mod ollama;
pub mod openai;

use std::sync::Arc;

use crate::embeddings::{Device, EmbeddingConfig, EmbeddingProvider};
use crate::error::{KnowledgeError, KnowledgeResult};

/// Default vector size of the mock provider
pub const MOCK_DIMENSIONS: usize = 384;

/// Create an embedding provider based on configuration.
///
/// Remote providers are probed before they are returned, so a successful
/// result means the backend answered on `device`.
pub async fn create_provider(
    config: EmbeddingConfig,
    device: Device,
) -> KnowledgeResult<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(mock::MockProvider::new(
            config.effective_model(),
            config.dimensions.unwrap_or(MOCK_DIMENSIONS),
        ))),

        "ollama" => Ok(Arc::new(ollama::OllamaProvider::new(&config, device).await?)),

        "openai" => Ok(Arc::new(openai::OpenAiProvider::new(&config).await?)),

        other => Err(KnowledgeError::EmbeddingUnavailable(format!(
            "Unknown embedding provider: '{}'. Supported providers: mock, ollama, openai",
            other
        ))),
    }
}
