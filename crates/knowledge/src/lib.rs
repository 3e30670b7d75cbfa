//! Document knowledge store.
//!
//! Ingests uploaded documents (PDF, TXT, DOCX) and pasted text, splits them
//! into overlapping chunks, embeds them and keeps them in a persistent vector
//! index. Chat and quiz consumers query it through the read-only
//! [`Retriever`].

pub mod chunker;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod loader;
pub mod metadata;
pub mod retriever;
pub mod store;
pub mod types;
pub mod vector_store;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::{KnowledgeConfig, RetrievalConfig};
pub use embeddings::{Device, EmbeddingConfig, EmbeddingProvider, EmbeddingService};
pub use error::{ErrorKind, KnowledgeError, KnowledgeResult};
pub use retriever::Retriever;
pub use store::{KnowledgeStore, SharedKnowledgeStore};
pub use types::{
    Chunk, ChunkMetadata, ChunkView, DocumentOption, IngestResult, KnowledgeExport,
    KnowledgeStats, PreloadStatus, RawFile, SearchHit, SourceRecord,
};
pub use vector_store::{ChunkFilter, ALL_SOURCES};

use docqa_core::{AppConfig, AppError, AppResult};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Open the knowledge store of the configured workspace.
pub async fn open_workspace(app: &AppConfig) -> AppResult<KnowledgeStore> {
    app.ensure_data_dir()?;
    let config = KnowledgeConfig::from_app_config(app)?;

    tracing::debug!(
        "Opening knowledge store (index: {:?}, metadata: {:?})",
        config.index_dir(),
        config.metadata_path()
    );

    Ok(KnowledgeStore::open(config).await)
}

/// Read files for ingestion.
///
/// Files named explicitly are always read, so unsupported ones are reported
/// by ingestion. Directories are walked recursively and only supported files
/// are picked up. Paths containing any `exclude` pattern are skipped.
pub fn collect_files(paths: &[PathBuf], exclude: &[String]) -> AppResult<Vec<RawFile>> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            files.push(read_raw_file(path)?);
        } else if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let entry_path = entry.path();
                if entry_path.is_file()
                    && loader::is_supported(&entry_path.to_string_lossy())
                    && !is_excluded(entry_path, exclude)
                {
                    files.push(read_raw_file(entry_path)?);
                }
            }
        } else {
            return Err(AppError::Config(format!(
                "Path does not exist: {}",
                path.display()
            )));
        }
    }

    tracing::debug!("Collected {} files for ingestion", files.len());
    Ok(files)
}

fn is_excluded(path: &Path, exclude: &[String]) -> bool {
    let path_str = path.to_string_lossy();
    exclude.iter().any(|pattern| path_str.contains(pattern.as_str()))
}

fn read_raw_file(path: &Path) -> AppResult<RawFile> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(RawFile::new(name, std::fs::read(path)?))
}
