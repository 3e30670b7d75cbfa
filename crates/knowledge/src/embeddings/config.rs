//! Embedding configuration types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Compute device requested from the embedding backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Let the backend pick (GPU when available)
    #[default]
    Auto,
    Cpu,
    Gpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Device::Auto => "auto",
            Device::Cpu => "cpu",
            Device::Gpu => "gpu",
        };
        f.write_str(name)
    }
}

/// Embedding backend configuration (`knowledge.embedding` in config.yaml).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Provider name: "mock", "ollama", "openai"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model identifier; each provider has its own default
    #[serde(default)]
    pub model: Option<String>,

    /// Expected vector dimensions; remote providers learn it when unset
    #[serde(default)]
    pub dimensions: Option<usize>,

    #[serde(default)]
    pub device: Device,

    /// Model to switch to when initialisation keeps failing on CPU
    #[serde(default)]
    pub fallback_model: Option<String>,

    /// Backend base URL override
    #[serde(default)]
    pub base_url: Option<String>,

    /// Environment variable holding the API key (openai)
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Maximum texts per backend call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Upper bound on a single backend call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_init_attempts")]
    pub max_init_attempts: u32,

    /// Fixed delay between initialisation attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_batch_size() -> usize {
    32
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_init_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dimensions: None,
            device: Device::default(),
            fallback_model: None,
            base_url: None,
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            request_timeout_secs: default_request_timeout_secs(),
            max_init_attempts: default_max_init_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl EmbeddingConfig {
    /// Configured model, or the provider's default.
    pub fn effective_model(&self) -> String {
        if let Some(model) = &self.model {
            return model.clone();
        }
        match self.provider.as_str() {
            "ollama" => "nomic-embed-text",
            "openai" => "text-embedding-3-small",
            _ => "trigram-v1",
        }
        .to_string()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.provider, "mock");
        assert_eq!(config.effective_model(), "trigram-v1");
        assert_eq!(config.device, Device::Auto);
        assert_eq!(config.max_init_attempts, 3);
        assert_eq!(config.retry_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_provider_default_models() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            ..Default::default()
        };
        assert_eq!(config.effective_model(), "nomic-embed-text");

        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            model: Some("text-embedding-3-large".to_string()),
            ..Default::default()
        };
        assert_eq!(config.effective_model(), "text-embedding-3-large");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "provider: ollama\ndevice: cpu\nfallback_model: all-minilm\n";
        let config: EmbeddingConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.device, Device::Cpu);
        assert_eq!(config.fallback_model.as_deref(), Some("all-minilm"));
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn test_device_display() {
        assert_eq!(Device::Cpu.to_string(), "cpu");
        assert_eq!(Device::Auto.to_string(), "auto");
    }
}
