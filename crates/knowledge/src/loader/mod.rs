//! Document loading: extraction, splitting and metadata tagging.

pub mod extract;

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::chunker::{RecursiveSplitter, TextSpan};
use crate::error::KnowledgeResult;
use crate::metadata::content_hash;
use crate::types::{Chunk, ChunkMetadata};

pub use extract::SUPPORTED_EXTENSIONS;

/// File type recorded for raw text sources.
pub const TEXT_FILE_TYPE: &str = "text";

/// Lowercase extension of `name`, empty when there is none.
pub fn extension_of(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

/// Whether the loader has a reader for `name`.
pub fn is_supported(name: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&extension_of(name).as_str())
}

/// Identity stamped onto every chunk of one source.
#[derive(Debug, Clone)]
pub struct SourceTag {
    pub source_id: String,
    pub source_name: String,
    pub file_type: String,
    pub file_size_bytes: u64,
    pub processed_at: DateTime<Utc>,
}

impl SourceTag {
    /// Tag for raw text, with a fresh synthetic id.
    pub fn for_text(source_name: &str, text: &str) -> Self {
        Self {
            source_id: format!("text-{}", uuid::Uuid::new_v4()),
            source_name: source_name.to_string(),
            file_type: TEXT_FILE_TYPE.to_string(),
            file_size_bytes: text.len() as u64,
            processed_at: Utc::now(),
        }
    }
}

/// Turns uploaded bytes into tagged chunks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentLoader {
    splitter: RecursiveSplitter,
}

impl DocumentLoader {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            splitter: RecursiveSplitter::new(chunk_size, chunk_overlap),
        }
    }

    /// Extract, split and tag a file. Fails on unsupported or unreadable
    /// input.
    pub fn load_and_chunk(&self, bytes: &[u8], filename: &str) -> KnowledgeResult<Vec<Chunk>> {
        let extension = extension_of(filename);
        let text = extract::extract_text(bytes, &extension, filename)?;

        let tag = SourceTag {
            source_id: content_hash(bytes),
            source_name: filename.to_string(),
            file_type: extension,
            file_size_bytes: bytes.len() as u64,
            processed_at: Utc::now(),
        };

        let chunks = self.chunk_tagged(&text, &tag);
        debug!("Loaded {} into {} chunks", filename, chunks.len());
        Ok(chunks)
    }

    /// Like `load_and_chunk`, but logs failures and returns an empty list.
    pub fn load(&self, bytes: &[u8], filename: &str) -> Vec<Chunk> {
        match self.load_and_chunk(bytes, filename) {
            Ok(chunks) => chunks,
            Err(e) => {
                error!("Error loading document {}: {}", filename, e);
                Vec::new()
            }
        }
    }

    /// Split raw text under a new synthetic source.
    pub fn chunk_text(&self, text: &str, source_name: &str) -> Vec<Chunk> {
        self.chunk_tagged(text, &SourceTag::for_text(source_name, text))
    }

    /// Split text and stamp every piece with `tag`. Indices are sequential
    /// over the kept chunks.
    pub fn chunk_tagged(&self, text: &str, tag: &SourceTag) -> Vec<Chunk> {
        self.splitter
            .split(text)
            .into_iter()
            .enumerate()
            .map(|(index, span)| to_chunk(span, index as u32, tag))
            .collect()
    }
}

fn to_chunk(span: TextSpan, chunk_index: u32, tag: &SourceTag) -> Chunk {
    let mut extra = serde_json::Map::new();
    extra.insert("start_char".to_string(), span.start_char.into());
    extra.insert("end_char".to_string(), span.end_char.into());

    Chunk::new(
        span.text,
        ChunkMetadata {
            source_id: tag.source_id.clone(),
            source_name: tag.source_name.clone(),
            file_type: tag.file_type.clone(),
            processed_at: tag.processed_at,
            file_size_bytes: tag.file_size_bytes,
            chunk_index,
            extra,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KnowledgeError;

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("Report.PDF"), "pdf");
        assert_eq!(extension_of("archive.tar.gz"), "gz");
        assert_eq!(extension_of("README"), "");
        assert!(is_supported("notes.Docx"));
        assert!(!is_supported("sheet.xlsx"));
    }

    #[test]
    fn test_load_txt_tags_chunks() {
        let loader = DocumentLoader::default();
        let bytes = "a".repeat(3000).into_bytes();
        let chunks = loader.load_and_chunk(&bytes, "a.txt").unwrap();

        assert_eq!(chunks.len(), 4);
        let hash = content_hash(&bytes);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata.source_id, hash);
            assert_eq!(chunk.metadata.source_name, "a.txt");
            assert_eq!(chunk.metadata.file_type, "txt");
            assert_eq!(chunk.metadata.file_size_bytes, 3000);
            assert_eq!(chunk.metadata.chunk_index, i as u32);
        }
        assert_eq!(chunks[1].metadata.extra["start_char"], 800);
    }

    #[test]
    fn test_load_docx() {
        let bytes = extract::tests::docx_bytes(&["Cells are the unit of life."]);
        let chunks = DocumentLoader::default()
            .load_and_chunk(&bytes, "bio.docx")
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("unit of life"));
        assert_eq!(chunks[0].metadata.file_type, "docx");
    }

    #[test]
    fn test_unsupported_file() {
        let loader = DocumentLoader::default();
        let err = loader.load_and_chunk(b"x", "image.png").unwrap_err();
        assert!(matches!(err, KnowledgeError::UnsupportedFileType(_)));
        assert!(loader.load(b"x", "image.png").is_empty());
    }

    #[test]
    fn test_chunk_text_synthetic_source() {
        let loader = DocumentLoader::new(100, 20);
        let chunks = loader.chunk_text(&"word ".repeat(100), "pasted notes");

        assert!(chunks.len() > 1);
        let source = &chunks[0].metadata.source_id;
        assert!(source.starts_with("text-"));
        assert!(chunks.iter().all(|c| &c.metadata.source_id == source));
        assert!(chunks.iter().all(|c| c.metadata.file_type == TEXT_FILE_TYPE));
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        let loader = DocumentLoader::default();
        assert!(loader.load_and_chunk(b"", "empty.txt").unwrap().is_empty());
        assert!(loader.chunk_text("  \n ", "blank").is_empty());
    }
}
