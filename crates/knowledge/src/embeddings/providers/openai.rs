//! OpenAI-compatible embedding provider.
//!
//! Sends batches to `POST {base_url}/embeddings`. Works with OpenAI and with
//! gateways that mirror its API (Azure proxies, LiteLLM, vLLM).
//!
//! Retry strategy:
//! - HTTP 429 or 5xx: retry with exponential backoff
//! - other 4xx: fail immediately
//! - network error: retry

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::embeddings::{EmbeddingConfig, EmbeddingProvider};
use crate::error::{KnowledgeError, KnowledgeResult};

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl OpenAiProvider {
    /// Build the client and probe the model once.
    pub async fn new(config: &EmbeddingConfig) -> KnowledgeResult<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            KnowledgeError::EmbeddingUnavailable(format!("{} not set", config.api_key_env))
        })?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| {
                KnowledgeError::EmbeddingUnavailable(format!("Failed to create HTTP client: {}", e))
            })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());

        let mut provider = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.effective_model(),
            dimensions: config.dimensions.unwrap_or(0),
        };

        let probe = provider.request(&["test".to_string()]).await?;
        let probe_len = probe.first().map(Vec::len).unwrap_or(0);
        if probe_len == 0 {
            return Err(KnowledgeError::EmbeddingEmpty);
        }
        if provider.dimensions == 0 {
            provider.dimensions = probe_len;
        } else if provider.dimensions != probe_len {
            return Err(KnowledgeError::EmbeddingUnavailable(format!(
                "Model '{}' returned {} dimensions, expected {}",
                provider.model, probe_len, provider.dimensions
            )));
        }

        debug!("OpenAI-compatible model '{}' ready", provider.model);
        Ok(provider)
    }

    #[instrument(skip(self, texts), fields(batch_size = texts.len(), model = %self.model))]
    async fn request(&self, texts: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut last_err = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1));
                warn!("Retrying embeddings request in {:?}", delay);
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
                            KnowledgeError::EmbeddingUnavailable(format!(
                                "Invalid embeddings response: {}",
                                e
                            ))
                        })?;
                        return Ok(into_ordered(parsed));
                    }

                    let text = response.text().await.unwrap_or_default();
                    let err = KnowledgeError::EmbeddingUnavailable(format!(
                        "Embeddings API error {}: {}",
                        status, text
                    ));

                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(KnowledgeError::EmbeddingUnavailable(format!(
                        "Failed to reach {}: {}",
                        self.base_url, e
                    )));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            KnowledgeError::EmbeddingUnavailable("Embedding failed after retries".to_string())
        }))
    }
}

/// Vectors in input order; the API tags each item with its position.
fn into_ordered(response: EmbeddingResponse) -> Vec<Vec<f32>> {
    let mut data = response.data;
    data.sort_by_key(|d| d.index);
    data.into_iter().map(|d| d.embedding).collect()
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_reordered_by_index() {
        let json = r#"{"data":[
            {"embedding":[0.2,0.2],"index":1},
            {"embedding":[0.1,0.1],"index":0}
        ],"model":"text-embedding-3-small"}"#;
        let response: EmbeddingResponse = serde_json::from_str(json).unwrap();
        let ordered = into_ordered(response);
        assert_eq!(ordered, vec![vec![0.1, 0.1], vec![0.2, 0.2]]);
    }

    #[tokio::test]
    async fn test_missing_api_key_is_unavailable() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            api_key_env: "DOCQA_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..Default::default()
        };
        let result = OpenAiProvider::new(&config).await;
        assert!(matches!(
            result,
            Err(KnowledgeError::EmbeddingUnavailable(msg)) if msg.contains("not set")
        ));
    }
}
