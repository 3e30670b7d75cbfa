//! Knowledge store: ties loader, embeddings, vector index and source
//! metadata together.
//!
//! The in-memory document list mirrors the vector index. At startup the
//! index is the source of truth: documents are read back from it and the
//! metadata table is reconciled against what the index actually holds.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::KnowledgeConfig;
use crate::embeddings::EmbeddingService;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::loader::{DocumentLoader, TEXT_FILE_TYPE};
use crate::metadata::{MetadataStore, SourceTable};
use crate::types::{
    Chunk, IngestResult, KnowledgeExport, KnowledgeStats, PreloadStatus, RawFile, SourceRecord,
};
use crate::vector_store::{ChunkFilter, VectorStore};

/// Store handle shared between the UI and retrieval consumers. Writers take
/// the write lock for a whole ingest, so readers never see a half-built index.
pub type SharedKnowledgeStore = Arc<RwLock<KnowledgeStore>>;

#[derive(Debug)]
pub struct KnowledgeStore {
    config: KnowledgeConfig,
    loader: DocumentLoader,
    embedder: Arc<EmbeddingService>,
    vector_store: VectorStore,
    metadata: MetadataStore,
    sources: SourceTable,
    documents: Vec<Chunk>,
    is_preloaded: bool,
    needs_rebuild: bool,
}

impl KnowledgeStore {
    /// Open the store and preload any persisted index.
    pub async fn open(config: KnowledgeConfig) -> Self {
        let embedder = Arc::new(EmbeddingService::new(config.embedding.clone()));
        Self::open_with_embedder(config, embedder).await
    }

    /// Open with an existing embedding service.
    pub async fn open_with_embedder(
        config: KnowledgeConfig,
        embedder: Arc<EmbeddingService>,
    ) -> Self {
        let vector_store = VectorStore::new(
            config.index_dir(),
            Arc::clone(&embedder),
            config.busy_timeout(),
        );

        let mut store = Self {
            loader: DocumentLoader::new(config.chunk_size, config.chunk_overlap),
            metadata: MetadataStore::new(config.metadata_path()),
            config,
            embedder,
            vector_store,
            sources: SourceTable::new(),
            documents: Vec::new(),
            is_preloaded: false,
            needs_rebuild: false,
        };
        store.preload_on_startup().await;
        store
    }

    pub fn into_shared(self) -> SharedKnowledgeStore {
        Arc::new(RwLock::new(self))
    }

    pub fn config(&self) -> &KnowledgeConfig {
        &self.config
    }

    pub fn embedder(&self) -> &Arc<EmbeddingService> {
        &self.embedder
    }

    pub fn vector_store(&self) -> &VectorStore {
        &self.vector_store
    }

    /// In-memory document list, in ingestion order.
    pub fn documents(&self) -> &[Chunk] {
        &self.documents
    }

    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    /// Read the persisted index back into memory and reconcile the metadata
    /// table with it. Never fails; problems are logged and leave an empty
    /// store.
    pub async fn preload_on_startup(&mut self) {
        self.documents.clear();
        self.is_preloaded = false;
        self.needs_rebuild = false;

        let table = match self.metadata.load_checked() {
            Ok(table) => table,
            Err(e) => {
                warn!("{}; rebuilding it from the vector index", e);
                SourceTable::new()
            }
        };

        match self.vector_store.load_existing().await {
            Ok(true) => match self.vector_store.get_all() {
                Ok(chunks) => {
                    self.documents = chunks;
                    self.is_preloaded = true;
                    info!(
                        "Preloaded {} chunks from {} sources",
                        self.documents.len(),
                        KnowledgeStats::from_chunks(&self.documents).doc_count
                    );
                }
                Err(e) => error!("Failed to read preloaded vector index: {}", e),
            },
            Ok(false) => info!("No existing vector index found to preload"),
            Err(e) => error!("Error preloading vector index: {}", e),
        }

        self.drop_removed_sources();

        let (reconciled, changed) = reconcile(table, &self.documents);
        self.sources = reconciled;

        if changed || (!self.metadata.exists() && !self.sources.is_empty()) {
            info!(
                "Reconciled source metadata with vector index ({} sources)",
                self.sources.len()
            );
            if let Err(e) = self.metadata.save(&self.sources) {
                error!("Failed to save reconciled metadata: {}", e);
            }
        }
    }

    /// Ingest uploaded files. Files whose bytes were already processed are
    /// skipped, so repeating a call is a no-op. Never returns an error.
    pub async fn ingest_files(&mut self, files: &[RawFile]) -> IngestResult {
        let mut seen = HashSet::new();
        let mut skipped_names = Vec::new();
        let mut new_files = Vec::new();

        for file in files {
            let hash = file.content_hash();
            if self.sources.contains(&hash) || !seen.insert(hash.clone()) {
                info!("Skipping already processed file: {}", file.name);
                skipped_names.push(file.name.clone());
            } else {
                new_files.push((file, hash));
            }
        }

        if new_files.is_empty() {
            return IngestResult {
                success: true,
                skipped_count: skipped_names.len(),
                skipped_names,
                message: format!("All {} files were already processed", files.len()),
                ..Default::default()
            };
        }

        let mut chunks = Vec::new();
        let mut records = Vec::new();
        let mut failed_names = Vec::new();
        let mut last_error = None;

        for (file, hash) in new_files {
            match self.loader.load_and_chunk(&file.bytes, &file.name) {
                Ok(file_chunks) if !file_chunks.is_empty() => {
                    records.push(record_for(hash, &file_chunks));
                    chunks.extend(file_chunks);
                }
                Ok(_) => {
                    warn!("No text could be extracted from {}", file.name);
                    failed_names.push(file.name.clone());
                }
                Err(e) => {
                    error!("Error loading document {}: {}", file.name, e);
                    failed_names.push(file.name.clone());
                    last_error = Some(e);
                }
            }
        }

        if chunks.is_empty() {
            let err = last_error.unwrap_or_else(|| KnowledgeError::Extraction {
                file: failed_names.join(", "),
                reason: "no text content".to_string(),
            });
            return IngestResult::failure(
                &err,
                "No documents could be processed",
                skipped_names,
                failed_names,
            );
        }

        if !self.embedder.is_ready().await {
            let err = KnowledgeError::EmbeddingUnavailable(
                "embedding model is not ready".to_string(),
            );
            return IngestResult::failure(
                &err,
                "Cannot process documents without embedding model.",
                skipped_names,
                failed_names,
            );
        }

        if let Err(e) = self.index_chunks(&chunks).await {
            error!("Error creating vector index: {}", e);
            return IngestResult::failure(
                &e,
                "Failed to create vector database.",
                skipped_names,
                failed_names,
            );
        }

        let new_count = records.len();
        let total_chunks = chunks.len();
        self.documents.extend(chunks);
        for record in records {
            self.sources.put(record);
        }
        self.save_metadata();

        info!(
            "Successfully processed {} new files ({} chunks)",
            new_count, total_chunks
        );

        IngestResult {
            success: true,
            new_count,
            skipped_count: skipped_names.len(),
            skipped_names,
            failed_names,
            total_chunks,
            message: format!(
                "Successfully processed {} new files ({} chunks)",
                new_count, total_chunks
            ),
            ..Default::default()
        }
    }

    /// Ingest pasted text as a new source. Raw text is never deduplicated.
    pub async fn ingest_text(&mut self, text: &str, source_name: &str) -> bool {
        let chunks = self.loader.chunk_text(text, source_name);
        let Some(first) = chunks.first() else {
            warn!("No content to index in text source {}", source_name);
            return false;
        };
        let record = record_for(first.metadata.source_id.clone(), &chunks);

        if !self.embedder.is_ready().await {
            error!("Cannot process text without embedding model");
            return false;
        }

        if let Err(e) = self.index_chunks(&chunks).await {
            error!("Error processing text content: {}", e);
            return false;
        }

        info!(
            "Processed text source {} ({} chunks)",
            source_name,
            chunks.len()
        );
        self.documents.extend(chunks);
        self.sources.put(record);
        self.save_metadata();
        true
    }

    pub fn is_already_processed(&self, file: &RawFile) -> bool {
        self.sources.contains(&file.content_hash())
    }

    /// Forget a source. Its chunks leave the in-memory list immediately; the
    /// index keeps them until `rebuild_index`, and records the removal so it
    /// survives a restart.
    pub fn remove_source(&mut self, content_hash: &str) -> bool {
        let known = self.sources.remove(content_hash).is_some();
        let before = self.documents.len();
        self.documents.retain(|c| c.source_id() != content_hash);
        let removed = before - self.documents.len();

        if !known && removed == 0 {
            debug!("Unknown source {}", content_hash);
            return false;
        }

        if let Err(e) = self.vector_store.mark_removed(content_hash) {
            error!("Failed to record removal of {}: {}", content_hash, e);
        }
        self.save_metadata();

        if self.documents.is_empty() {
            if let Err(e) = self.vector_store.clear_all() {
                error!("Failed to clear vector index: {}", e);
                self.needs_rebuild = true;
            } else {
                self.needs_rebuild = false;
            }
        } else {
            self.needs_rebuild = true;
        }

        info!("Removed source {} ({} chunks)", content_hash, removed);
        true
    }

    /// Rebuild the index from the in-memory document list. Fails closed: when
    /// there is nothing to index or no embedder, the index is left as it was.
    pub async fn rebuild_index(&mut self) -> bool {
        if self.documents.is_empty() {
            warn!("No documents to rebuild the vector index from");
            return false;
        }
        if !self.embedder.is_ready().await {
            error!("Cannot rebuild vector index without embedding model");
            return false;
        }

        let result = match self.vector_store.create(&self.documents).await {
            Ok(_) => self.vector_store.persist(),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.needs_rebuild = false;
                info!("Rebuilt vector index with {} chunks", self.documents.len());
                true
            }
            Err(e) => {
                error!("Error rebuilding vector index: {}", e);
                false
            }
        }
    }

    /// Drop every document, every source record and the persisted index.
    pub fn clear_all(&mut self) -> bool {
        self.documents.clear();
        self.sources.clear();
        self.is_preloaded = false;
        self.needs_rebuild = false;

        let mut ok = true;
        if let Err(e) = self.vector_store.clear_all() {
            error!("Failed to clear vector index: {}", e);
            ok = false;
        }
        if let Err(e) = self.metadata.delete_file() {
            error!("Failed to delete source metadata: {}", e);
            ok = false;
        }

        info!("Cleared all knowledge base data");
        ok
    }

    pub fn get_stats(&self) -> KnowledgeStats {
        KnowledgeStats::from_chunks(&self.documents)
    }

    pub fn preload_status(&self) -> PreloadStatus {
        PreloadStatus {
            is_preloaded: self.is_preloaded,
            needs_rebuild: self.needs_rebuild,
            in_memory_chunks: self.documents.len(),
            indexed_chunks: self.vector_store.count().unwrap_or(0),
        }
    }

    /// Error when the in-memory list and the index disagree.
    pub fn check_consistency(&self) -> KnowledgeResult<()> {
        let indexed = self.vector_store.count()?;
        if self.needs_rebuild || indexed != self.documents.len() {
            return Err(KnowledgeError::ConsistencyDrift {
                in_memory: self.documents.len(),
                indexed,
            });
        }
        Ok(())
    }

    /// Processing records, sorted by filename.
    pub fn list_sources(&self) -> Vec<SourceRecord> {
        self.sources.records()
    }

    /// Sorted distinct source names of the in-memory documents.
    pub fn source_names(&self) -> Vec<String> {
        self.get_stats().source_names
    }

    /// Filter for a consumer's selection that also hides sources removed
    /// since the last rebuild.
    pub fn selection_filter(&self, selected: &[String]) -> ChunkFilter {
        let base = ChunkFilter::from_selection(selected);
        if !self.needs_rebuild {
            return base;
        }

        let live: HashSet<&str> = self.documents.iter().map(Chunk::source_id).collect();
        if base.is_all() {
            ChunkFilter::sources(live)
        } else {
            ChunkFilter::sources(
                selected
                    .iter()
                    .filter(|id| live.contains(id.as_str()))
                    .cloned(),
            )
        }
    }

    pub fn export(&self) -> KnowledgeExport {
        KnowledgeExport {
            documents: self.documents.iter().map(Chunk::to_view).collect(),
            stats: self.get_stats(),
        }
    }

    /// Write `export()` as pretty JSON.
    pub fn export_to_file(&self, path: &Path) -> KnowledgeResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.export())?;
        std::fs::write(path, json)?;
        info!("Knowledge base exported to {}", path.display());
        Ok(())
    }

    /// Append to an open, up-to-date index. Otherwise build a fresh one from
    /// the in-memory documents plus `chunks`, which also drops the rows of
    /// removed sources.
    async fn index_chunks(&mut self, chunks: &[Chunk]) -> KnowledgeResult<()> {
        if self.vector_store.is_open() && !self.needs_rebuild {
            self.vector_store.add(chunks).await?;
        } else {
            let mut all = self.documents.clone();
            all.extend_from_slice(chunks);
            self.vector_store.create(&all).await?;
            self.needs_rebuild = false;
        }
        self.vector_store.persist()
    }

    /// Hide the preloaded chunks of sources removed before the last shutdown.
    fn drop_removed_sources(&mut self) {
        let removed = match self.vector_store.removed_sources() {
            Ok(removed) if !removed.is_empty() => removed,
            Ok(_) => return,
            Err(e) => {
                error!("Failed to read removed sources: {}", e);
                return;
            }
        };

        let before = self.documents.len();
        self.documents.retain(|c| !removed.contains(c.source_id()));
        if self.documents.len() == before {
            return;
        }

        info!(
            "{} sources were removed without a rebuild; hiding {} stale chunks",
            removed.len(),
            before - self.documents.len()
        );
        if self.documents.is_empty() {
            self.is_preloaded = false;
            if let Err(e) = self.vector_store.clear_all() {
                error!("Failed to clear vector index: {}", e);
                self.needs_rebuild = true;
            }
        } else {
            self.needs_rebuild = true;
        }
    }

    fn save_metadata(&self) {
        if let Err(e) = self.metadata.save(&self.sources) {
            error!("Failed to save source metadata: {}", e);
        }
    }
}

fn record_for(content_hash: String, chunks: &[Chunk]) -> SourceRecord {
    let first = &chunks[0].metadata;
    SourceRecord {
        content_hash,
        filename: first.source_name.clone(),
        file_type: first.file_type.clone(),
        size_bytes: first.file_size_bytes,
        chunk_count: chunks.len() as u32,
        processed_at: first.processed_at,
    }
}

/// Align `table` with the sources present in `documents`: records without
/// chunks are dropped, sources without records are synthesized from chunk
/// metadata. Returns whether anything changed.
fn reconcile(mut table: SourceTable, documents: &[Chunk]) -> (SourceTable, bool) {
    let mut by_source: BTreeMap<&str, (&Chunk, u32)> = BTreeMap::new();
    for chunk in documents {
        by_source
            .entry(chunk.source_id())
            .and_modify(|(_, count)| *count += 1)
            .or_insert((chunk, 1));
    }

    let before = table.len();
    table.retain(|hash| by_source.contains_key(hash));
    let mut changed = table.len() != before;

    for (source_id, (chunk, count)) in by_source {
        match table.get(source_id) {
            Some(record) if record.chunk_count == count => {}
            Some(record) => {
                let mut record = record.clone();
                record.chunk_count = count;
                table.put(record);
                changed = true;
            }
            None => {
                let meta = &chunk.metadata;
                let file_type = if meta.file_type.is_empty() {
                    TEXT_FILE_TYPE.to_string()
                } else {
                    meta.file_type.clone()
                };
                table.put(SourceRecord {
                    content_hash: source_id.to_string(),
                    filename: meta.source_name.clone(),
                    file_type,
                    size_bytes: meta.file_size_bytes,
                    chunk_count: count,
                    processed_at: meta.processed_at,
                });
                changed = true;
            }
        }
    }

    (table, changed)
}
