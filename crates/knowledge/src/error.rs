//! Typed errors for the knowledge store.
//!
//! Internal components return `KnowledgeResult`. The public `KnowledgeStore`
//! and `Retriever` surfaces translate these into structured results or empty
//! values, so callers only ever see an `ErrorKind` tag and a message.

use docqa_core::AppError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised inside the knowledge subsystem.
#[derive(Error, Debug)]
pub enum KnowledgeError {
    /// Backend unreachable, failed after retries, or timed out
    #[error("Embedding model not ready: {0}")]
    EmbeddingUnavailable(String),

    /// Backend answered with no usable vector
    #[error("Embedding backend returned an empty vector")]
    EmbeddingEmpty,

    /// Backend failed for a device-related reason (GPU init, out of memory)
    #[error("Embedding device error: {0}")]
    EmbeddingDevice(String),

    /// The loader has no reader for this extension
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// A supported file could not be decoded
    #[error("Failed to extract text from {file}: {reason}")]
    Extraction { file: String, reason: String },

    /// The vector index could not be built or written
    #[error("Vector index creation failed: {0}")]
    IndexCreation(String),

    /// The persisted vector index could not be opened
    #[error("Vector index could not be loaded: {0}")]
    IndexLoad(String),

    /// The metadata file exists but cannot be read or parsed
    #[error("Metadata file is corrupt: {0}")]
    MetadataCorrupt(String),

    /// In-memory documents and the persisted index disagree
    #[error(
        "Knowledge store out of sync: {in_memory} chunks in memory, {indexed} in the index; rebuild the index"
    )]
    ConsistencyDrift { in_memory: usize, indexed: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Copyable error tag surfaced to callers in structured results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmbeddingUnavailable,
    EmbeddingEmpty,
    UnsupportedFileType,
    Extraction,
    IndexCreation,
    IndexLoad,
    MetadataCorrupt,
    ConsistencyDrift,
    Io,
}

impl KnowledgeError {
    /// The tag reported to callers for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            // A device failure that survived fallback is just "not ready".
            KnowledgeError::EmbeddingUnavailable(_) | KnowledgeError::EmbeddingDevice(_) => {
                ErrorKind::EmbeddingUnavailable
            }
            KnowledgeError::EmbeddingEmpty => ErrorKind::EmbeddingEmpty,
            KnowledgeError::UnsupportedFileType(_) => ErrorKind::UnsupportedFileType,
            KnowledgeError::Extraction { .. } => ErrorKind::Extraction,
            KnowledgeError::IndexCreation(_) => ErrorKind::IndexCreation,
            KnowledgeError::IndexLoad(_) => ErrorKind::IndexLoad,
            KnowledgeError::MetadataCorrupt(_) => ErrorKind::MetadataCorrupt,
            KnowledgeError::ConsistencyDrift { .. } => ErrorKind::ConsistencyDrift,
            KnowledgeError::Io(_) | KnowledgeError::Serialization(_) => ErrorKind::Io,
        }
    }

    /// Whether this error means the embedding backend cannot serve requests.
    pub fn is_embedding_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::EmbeddingUnavailable | ErrorKind::EmbeddingEmpty
        )
    }
}

impl From<rusqlite::Error> for KnowledgeError {
    fn from(err: rusqlite::Error) -> Self {
        KnowledgeError::IndexCreation(err.to_string())
    }
}

impl From<KnowledgeError> for AppError {
    fn from(err: KnowledgeError) -> Self {
        if err.is_embedding_failure() {
            AppError::Embedding(err.to_string())
        } else {
            AppError::Knowledge(err.to_string())
        }
    }
}

/// Convenience type alias for Results with KnowledgeError.
pub type KnowledgeResult<T> = Result<T, KnowledgeError>;
