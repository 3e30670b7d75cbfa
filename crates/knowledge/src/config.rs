//! Knowledge store configuration.
//!
//! Read from the `knowledge:` section of `.docqa/config.yaml`; every field has
//! a default, so the section (or the whole file) may be absent.

use docqa_core::{AppConfig, AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chunker::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::embeddings::EmbeddingConfig;

/// Default vector index directory, relative to the data directory.
pub const DEFAULT_INDEX_DIR: &str = "vector_index";

/// Default metadata file, relative to the data directory.
pub const DEFAULT_METADATA_FILE: &str = "processed_files.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeConfig {
    /// Maximum chunk length in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters repeated between consecutive chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Vector index directory; relative paths resolve against the data directory
    #[serde(default)]
    pub index_dir: Option<PathBuf>,

    /// Metadata file; relative paths resolve against the data directory
    #[serde(default)]
    pub metadata_file: Option<PathBuf>,

    /// How long SQLite waits on a locked index before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub sqlite_busy_timeout_ms: u64,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Workspace data directory (`.docqa`), set at load time
    #[serde(skip)]
    pub data_dir: PathBuf,
}

/// Defaults for consumer-facing retrieval calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,

    /// Preferred minimum length of a random context
    #[serde(default = "default_min_context_length")]
    pub min_context_length: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_k() -> usize {
    5
}

fn default_min_context_length() -> usize {
    200
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            min_context_length: default_min_context_length(),
        }
    }
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            index_dir: None,
            metadata_file: None,
            sqlite_busy_timeout_ms: default_busy_timeout_ms(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            data_dir: PathBuf::from(docqa_core::config::DATA_DIR_NAME),
        }
    }
}

impl KnowledgeConfig {
    /// Defaults rooted at `data_dir`.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Build from the application config: the YAML section first, then the
    /// embedding overrides from environment or flags.
    pub fn from_app_config(app: &AppConfig) -> AppResult<Self> {
        let mut config: Self = match &app.knowledge {
            Some(section) => serde_yaml::from_value(section.clone()).map_err(|e| {
                AppError::Config(format!("Invalid knowledge configuration: {}", e))
            })?,
            None => Self::default(),
        };

        config.data_dir = app.data_dir();

        if let Some(provider) = &app.embedding_provider {
            config.embedding.provider = provider.clone();
        }
        if let Some(model) = &app.embedding_model {
            config.embedding.model = Some(model.clone());
        }

        if config.chunk_overlap >= config.chunk_size {
            tracing::warn!(
                "chunk_overlap ({}) must be smaller than chunk_size ({}); it will be clamped",
                config.chunk_overlap,
                config.chunk_size
            );
        }

        Ok(config)
    }

    pub fn index_dir(&self) -> PathBuf {
        self.resolve(self.index_dir.as_deref(), DEFAULT_INDEX_DIR)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.resolve(self.metadata_file.as_deref(), DEFAULT_METADATA_FILE)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.sqlite_busy_timeout_ms)
    }

    fn resolve(&self, configured: Option<&Path>, default: &str) -> PathBuf {
        match configured {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => self.data_dir.join(path),
            None => self.data_dir.join(default),
        }
    }
}
