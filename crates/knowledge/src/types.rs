//! Knowledge store type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{ErrorKind, KnowledgeError};

/// Per-chunk metadata.
///
/// The typed fields are required on every chunk; `extra` carries open-ended
/// values such as character offsets. Serialized flat, so an exported chunk's
/// metadata is a single JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Content hash of the originating file, or a synthetic id for raw text
    pub source_id: String,

    /// Display filename or label
    pub source_name: String,

    /// Lowercase extension ("pdf", "txt", "docx") or "text" for raw text
    pub file_type: String,

    /// When the source was ingested
    pub processed_at: DateTime<Utc>,

    /// Size of the originating file
    pub file_size_bytes: u64,

    /// Position of this chunk within its source (0-indexed)
    pub chunk_index: u32,

    /// Backend-specific extras
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A unit of retrievable text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique chunk identifier (UUID v4)
    pub id: String,

    /// Chunk text, never empty
    pub content: String,

    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Create a chunk with a fresh id.
    pub fn new(content: String, metadata: ChunkMetadata) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content,
            metadata,
        }
    }

    /// Length in characters (not bytes).
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }

    pub fn source_id(&self) -> &str {
        &self.metadata.source_id
    }

    /// Content and metadata without the internal id.
    pub fn to_view(&self) -> ChunkView {
        ChunkView {
            content: self.content.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Processing record for one ingested source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Hex SHA-256 of the raw bytes (or synthetic id for raw text)
    pub content_hash: String,

    pub filename: String,

    pub file_type: String,

    pub size_bytes: u64,

    /// Number of chunks created from this source
    pub chunk_count: u32,

    pub processed_at: DateTime<Utc>,
}

impl SourceRecord {
    /// Size in megabytes, rounded to two decimals.
    pub fn size_mb(&self) -> f64 {
        (self.size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }
}

/// An uploaded file as handed over by the UI.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl RawFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Content hash used as the dedup key.
    pub fn content_hash(&self) -> String {
        crate::metadata::content_hash(&self.bytes)
    }

    /// Lowercase extension, empty when the name has none.
    pub fn extension(&self) -> String {
        crate::loader::extension_of(&self.name)
    }
}

/// Outcome of an ingestion call. Ingestion never returns an error; failures
/// are reported here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestResult {
    pub success: bool,

    /// Sources newly indexed by this call
    pub new_count: usize,

    /// Sources skipped because identical bytes were already processed
    pub skipped_count: usize,

    pub skipped_names: Vec<String>,

    /// Files that produced no chunks (unsupported or unreadable)
    pub failed_names: Vec<String>,

    /// Chunks indexed by this call
    pub total_chunks: usize,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl IngestResult {
    pub(crate) fn failure(
        err: &KnowledgeError,
        message: impl Into<String>,
        skipped_names: Vec<String>,
        failed_names: Vec<String>,
    ) -> Self {
        Self {
            success: false,
            new_count: 0,
            skipped_count: skipped_names.len(),
            skipped_names,
            failed_names,
            total_chunks: 0,
            message: message.into(),
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }
}

/// Derived statistics over the in-memory document list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeStats {
    /// Distinct sources
    pub doc_count: usize,

    pub chunk_count: usize,

    /// Total characters across chunks
    pub total_chars: usize,

    /// Average chunk length in characters
    pub avg_chunk_size: usize,

    /// Sorted distinct source names
    pub source_names: Vec<String>,
}

impl KnowledgeStats {
    pub(crate) fn from_chunks(chunks: &[Chunk]) -> Self {
        if chunks.is_empty() {
            return Self::default();
        }

        let total_chars: usize = chunks.iter().map(Chunk::char_len).sum();
        let sources: BTreeSet<&str> = chunks.iter().map(Chunk::source_id).collect();
        let names: BTreeSet<&str> = chunks
            .iter()
            .map(|c| c.metadata.source_name.as_str())
            .collect();

        Self {
            doc_count: sources.len(),
            chunk_count: chunks.len(),
            total_chars,
            avg_chunk_size: total_chars / chunks.len(),
            source_names: names.into_iter().map(str::to_string).collect(),
        }
    }
}

/// A chunk paired with its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,

    /// Cosine similarity, higher is more relevant
    pub score: f32,
}

/// A similarity search result as seen by chat/quiz consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    pub metadata: ChunkMetadata,
    pub relevance_score: f32,
}

impl From<ScoredChunk> for SearchHit {
    fn from(scored: ScoredChunk) -> Self {
        Self {
            content: scored.chunk.content,
            metadata: scored.chunk.metadata,
            relevance_score: scored.score,
        }
    }
}

/// Content and metadata of a chunk, used for bulk retrieval and export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkView {
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Full dump of the in-memory document list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeExport {
    pub documents: Vec<ChunkView>,
    pub stats: KnowledgeStats,
}

/// Entry in a consumer's document selection list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentOption {
    /// Source id, or `"all"` for the catch-all entry
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Startup and consistency state of the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreloadStatus {
    /// A persisted index was found and read back at startup
    pub is_preloaded: bool,

    /// A source was removed and the index still holds its chunks
    pub needs_rebuild: bool,

    pub in_memory_chunks: usize,

    pub indexed_chunks: usize,
}

impl PreloadStatus {
    /// Whether the in-memory list and the index disagree.
    pub fn is_out_of_sync(&self) -> bool {
        self.needs_rebuild || self.in_memory_chunks != self.indexed_chunks
    }
}
