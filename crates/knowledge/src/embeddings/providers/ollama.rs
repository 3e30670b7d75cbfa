//! Ollama embedding provider.
//!
//! Talks to a local Ollama server (`POST /api/embeddings`). The compute device
//! is chosen per request through `options.num_gpu`: `0` keeps the model on the
//! CPU, omitting it lets the server offload to the GPU.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::embeddings::{Device, EmbeddingConfig, EmbeddingProvider};
use crate::error::{KnowledgeError, KnowledgeResult};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const EMBEDDING_ENDPOINT: &str = "/api/embeddings";

/// Attempts per text before the call is reported as failed
const MAX_RETRIES: u32 = 3;

const INITIAL_BACKOFF_MS: u64 = 100;

/// Error fragments that point at the compute device rather than the request
const DEVICE_ERROR_HINTS: &[&str] = &["cuda", "gpu", "device", "out of memory", "meta tensor"];

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    device: Device,
    dimensions: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<RequestOptions>,
}

#[derive(Debug, Serialize)]
struct RequestOptions {
    num_gpu: u32,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl OllamaProvider {
    /// Connect to Ollama and verify the model answers on the requested device.
    ///
    /// The probe embedding also fixes the vector dimensions when the
    /// configuration leaves them unset.
    pub async fn new(config: &EmbeddingConfig, device: Device) -> KnowledgeResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| {
                KnowledgeError::EmbeddingUnavailable(format!("Failed to create HTTP client: {}", e))
            })?;

        let base_url = config
            .base_url
            .clone()
            .or_else(|| std::env::var("OLLAMA_URL").ok())
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());

        let mut provider = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.effective_model(),
            device,
            dimensions: config.dimensions.unwrap_or(0),
        };

        let probe = provider.embed_with_retries("test connection").await?;
        if provider.dimensions == 0 {
            provider.dimensions = probe.len();
        } else if probe.len() != provider.dimensions {
            return Err(KnowledgeError::EmbeddingUnavailable(format!(
                "Ollama model '{}' returned {} dimensions, expected {}",
                provider.model,
                probe.len(),
                provider.dimensions
            )));
        }

        debug!(
            "Ollama model '{}' ready on {} ({} dims)",
            provider.model, provider.device, provider.dimensions
        );
        Ok(provider)
    }

    #[instrument(skip(self, text), fields(text_len = text.len(), model = %self.model))]
    async fn embed_with_retries(&self, text: &str) -> KnowledgeResult<Vec<f32>> {
        let mut attempt = 0;

        loop {
            match self.embed_single(text).await {
                Ok(embedding) => return Ok(embedding),
                // Device failures are handled by the service's fallback.
                Err(e @ KnowledgeError::EmbeddingDevice(_)) => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_RETRIES {
                        return Err(e);
                    }
                    let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt);
                    warn!(
                        "Embedding failed (attempt {}/{}), retrying in {}ms: {}",
                        attempt, MAX_RETRIES, backoff_ms, e
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
            }
        }
    }

    async fn embed_single(&self, text: &str) -> KnowledgeResult<Vec<f32>> {
        let url = format!("{}{}", self.base_url, EMBEDDING_ENDPOINT);
        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
            options: match self.device {
                Device::Cpu => Some(RequestOptions { num_gpu: 0 }),
                Device::Auto | Device::Gpu => None,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                KnowledgeError::EmbeddingUnavailable(format!(
                    "Failed to reach Ollama at {}: {}",
                    self.base_url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|r| r.error)
                .unwrap_or(body);
            return Err(classify_error(status.as_u16(), &message));
        }

        let body: EmbeddingResponse = response.json().await.map_err(|e| {
            KnowledgeError::EmbeddingUnavailable(format!("Failed to parse Ollama response: {}", e))
        })?;

        if body.embedding.is_empty() {
            return Err(KnowledgeError::EmbeddingEmpty);
        }
        Ok(body.embedding)
    }
}

fn classify_error(status: u16, message: &str) -> KnowledgeError {
    let lower = message.to_lowercase();
    if DEVICE_ERROR_HINTS.iter().any(|hint| lower.contains(hint)) {
        KnowledgeError::EmbeddingDevice(format!("Ollama ({}): {}", status, message))
    } else {
        KnowledgeError::EmbeddingUnavailable(format!("Ollama API error ({}): {}", status, message))
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[instrument(skip(self, texts), fields(batch_size = texts.len(), model = %self.model))]
    async fn embed_batch(&self, texts: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        // The endpoint takes one prompt per request.
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed_with_retries(text).await?);
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_request_disables_gpu_layers() {
        let request = EmbeddingRequest {
            model: "nomic-embed-text",
            prompt: "hello",
            options: Some(RequestOptions { num_gpu: 0 }),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["options"]["num_gpu"], 0);

        let request = EmbeddingRequest {
            model: "nomic-embed-text",
            prompt: "hello",
            options: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("options").is_none());
    }

    #[test]
    fn test_classify_device_errors() {
        let err = classify_error(500, "CUDA error: out of memory");
        assert!(matches!(err, KnowledgeError::EmbeddingDevice(_)));

        let err = classify_error(404, "model 'foo' not found, try pulling it first");
        assert!(matches!(err, KnowledgeError::EmbeddingUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            base_url: Some("http://127.0.0.1:9".to_string()),
            request_timeout_secs: 1,
            ..Default::default()
        };

        let result = OllamaProvider::new(&config, Device::Cpu).await;
        assert!(matches!(
            result,
            Err(KnowledgeError::EmbeddingUnavailable(_))
        ));
    }
}
