//! SQLite-backed vector index.
//!
//! One `chunks` table holds content, metadata JSON and the embedding as a
//! little-endian f32 BLOB. Search is brute-force cosine similarity over the
//! (optionally filtered) rows, ordered by descending score with ties kept in
//! insertion order.
//!
//! Removing a source only records it in `removed_sources`; its rows stay until
//! the next `create`, which drops them together with the record.

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::embeddings::EmbeddingService;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::types::{Chunk, ChunkMetadata, ScoredChunk};

/// File name of the index inside the vector index directory.
pub const INDEX_FILE_NAME: &str = "index.sqlite";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    source_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,
    metadata TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_id);

CREATE TABLE IF NOT EXISTS index_info (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS removed_sources (
    source_id TEXT PRIMARY KEY
);
"#;

/// Lifecycle of the index handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// Nothing opened yet, or the persisted index was absent or unusable
    Unopened,
    /// Built in this session by `create`
    Created,
    /// Read back from disk by `load_existing`
    Loaded,
    /// Emptied by `clear_all`; the next write must `create`
    Cleared,
}

impl IndexState {
    /// Whether reads and appends are served.
    pub fn is_open(self) -> bool {
        matches!(self, IndexState::Created | IndexState::Loaded)
    }
}

/// Restricts which chunks a query may return.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkFilter {
    sources: Option<BTreeSet<String>>,
    file_types: Option<BTreeSet<String>>,
}

/// Selection entry meaning "every document".
pub const ALL_SOURCES: &str = "all";

impl ChunkFilter {
    /// No restriction.
    pub fn all() -> Self {
        Self::default()
    }

    /// Only chunks whose `source_id` is in `ids`.
    pub fn sources<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sources: Some(ids.into_iter().map(Into::into).collect()),
            file_types: None,
        }
    }

    /// Additionally restrict by file type.
    pub fn with_file_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Filter for a consumer's document selection. An empty selection or one
    /// containing `"all"` means no restriction.
    pub fn from_selection(selected: &[String]) -> Self {
        if selected.is_empty() || selected.iter().any(|s| s == ALL_SOURCES) {
            Self::all()
        } else {
            Self::sources(selected.iter().cloned())
        }
    }

    pub fn is_all(&self) -> bool {
        self.sources.is_none() && self.file_types.is_none()
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        let source_ok = self
            .sources
            .as_ref()
            .map_or(true, |ids| ids.contains(&metadata.source_id));
        let type_ok = self
            .file_types
            .as_ref()
            .map_or(true, |types| types.contains(&metadata.file_type));
        source_ok && type_ok
    }
}

struct StoredRow {
    chunk: Chunk,
    embedding: Vec<f32>,
}

/// Persistent vector index with an explicit lifecycle.
pub struct VectorStore {
    dir: PathBuf,
    embedder: Arc<EmbeddingService>,
    busy_timeout: Duration,
    conn: Option<Mutex<Connection>>,
    state: IndexState,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("dir", &self.dir)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl VectorStore {
    pub fn new(
        dir: impl Into<PathBuf>,
        embedder: Arc<EmbeddingService>,
        busy_timeout: Duration,
    ) -> Self {
        Self {
            dir: dir.into(),
            embedder,
            busy_timeout,
            conn: None,
            state: IndexState::Unopened,
        }
    }

    pub fn state(&self) -> IndexState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE_NAME)
    }

    pub fn embedder(&self) -> &Arc<EmbeddingService> {
        &self.embedder
    }

    /// Build a fresh index from `chunks`, replacing any existing rows.
    pub async fn create(&mut self, chunks: &[Chunk]) -> KnowledgeResult<usize> {
        if chunks.is_empty() {
            return Err(KnowledgeError::IndexCreation(
                "No chunks to index".to_string(),
            ));
        }

        let vectors = self.embed_chunks(chunks).await?;

        if self.conn.is_none() {
            self.conn = Some(Mutex::new(self.open_fresh()?));
        }
        let dimensions = vectors.first().map(Vec::len).unwrap_or(0);

        {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM chunks", [])?;
            tx.execute("DELETE FROM index_info", [])?;
            tx.execute("DELETE FROM removed_sources", [])?;
            insert_rows(&tx, chunks, &vectors)?;
            tx.execute(
                "INSERT INTO index_info (key, value) VALUES ('dimensions', ?1)",
                params![dimensions.to_string()],
            )?;
            tx.commit()?;
        }

        self.state = IndexState::Created;
        info!("Created new vector index with {} chunks", chunks.len());
        Ok(chunks.len())
    }

    /// Open the persisted index. Returns `false` when there is none, or when
    /// it is unreadable or was built with different vector dimensions.
    pub async fn load_existing(&mut self) -> KnowledgeResult<bool> {
        let path = self.index_path();
        if !path.exists() {
            debug!("No vector index at {}", path.display());
            return Ok(false);
        }

        let (conn, count, dimensions) = match self.open_checked(&path) {
            Ok(opened) => opened,
            Err(e) => {
                warn!("Vector index exists but may be corrupted: {}", e);
                self.conn = None;
                self.state = IndexState::Unopened;
                return Ok(false);
            }
        };

        if count == 0 {
            debug!("Vector index at {} is empty", path.display());
            self.conn = Some(Mutex::new(conn));
            self.state = IndexState::Unopened;
            return Ok(false);
        }

        match (dimensions, self.embedder.dimensions().await) {
            (Some(stored), Ok(current)) if stored != current => {
                warn!(
                    "{}",
                    KnowledgeError::IndexLoad(format!(
                        "index has {}-dim vectors, embedder produces {}",
                        stored, current
                    ))
                );
                self.conn = Some(Mutex::new(conn));
                self.state = IndexState::Unopened;
                return Ok(false);
            }
            (_, Err(e)) => {
                warn!("Loading index without dimension check: {}", e);
            }
            _ => {}
        }

        self.conn = Some(Mutex::new(conn));
        self.state = IndexState::Loaded;
        info!("Loaded existing vector index ({} chunks)", count);
        Ok(true)
    }

    /// Append chunks to an open index. No-op when the index is not open.
    pub async fn add(&mut self, chunks: &[Chunk]) -> KnowledgeResult<usize> {
        if !self.is_open() || chunks.is_empty() {
            return Ok(0);
        }

        let vectors = self.embed_chunks(chunks).await?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        insert_rows(&tx, chunks, &vectors)?;
        tx.commit()?;

        info!("Added {} new chunks to existing vector index", chunks.len());
        Ok(chunks.len())
    }

    /// Top `k` chunks by cosine similarity to `query` among those matching
    /// `filter`.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: &ChunkFilter,
    ) -> KnowledgeResult<Vec<ScoredChunk>> {
        if !self.is_open() || k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_query(query).await?;

        let mut scored: Vec<ScoredChunk> = self
            .read_rows(filter)?
            .into_iter()
            .map(|row| ScoredChunk {
                score: cosine_similarity(&query_vector, &row.embedding),
                chunk: row.chunk,
            })
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        debug!("Retrieved {} chunks (requested top-{})", scored.len(), k);
        Ok(scored)
    }

    /// All chunks matching `filter`, in insertion order.
    pub fn get_by_filter(&self, filter: &ChunkFilter) -> KnowledgeResult<Vec<Chunk>> {
        if !self.is_open() {
            return Ok(Vec::new());
        }
        Ok(self
            .read_rows(filter)?
            .into_iter()
            .map(|row| row.chunk)
            .collect())
    }

    pub fn get_all(&self) -> KnowledgeResult<Vec<Chunk>> {
        self.get_by_filter(&ChunkFilter::all())
    }

    /// Number of indexed chunks; zero when not open.
    pub fn count(&self) -> KnowledgeResult<usize> {
        if !self.is_open() {
            return Ok(0);
        }
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Record that `source_id` was removed. Its rows are kept until the next
    /// `create`. No-op when the index is not open.
    pub fn mark_removed(&self, source_id: &str) -> KnowledgeResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO removed_sources (source_id) VALUES (?1)",
            params![source_id],
        )?;
        debug!("Marked source {} as removed", source_id);
        Ok(())
    }

    /// Sources removed since the index was last created.
    pub fn removed_sources(&self) -> KnowledgeResult<HashSet<String>> {
        if !self.is_open() {
            return Ok(HashSet::new());
        }
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT source_id FROM removed_sources")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    /// Delete every indexed chunk. Safe on an empty or unopened index; an
    /// unreadable file is removed outright.
    pub fn clear_all(&mut self) -> KnowledgeResult<()> {
        let cleared = match &self.conn {
            Some(conn) => {
                let conn = conn
                    .lock()
                    .map_err(|_| KnowledgeError::IndexCreation("index lock poisoned".into()))?;
                conn.execute_batch(
                    "DELETE FROM chunks; DELETE FROM index_info; DELETE FROM removed_sources;",
                )
                .is_ok()
            }
            None => !self.index_path().exists(),
        };

        if !cleared {
            self.conn = None;
            self.remove_files()?;
        }

        self.state = IndexState::Cleared;
        info!("Cleared all data from vector index");
        Ok(())
    }

    /// Flush the write-ahead log into the index file.
    pub fn persist(&self) -> KnowledgeResult<()> {
        if let Some(conn) = &self.conn {
            let conn = conn
                .lock()
                .map_err(|_| KnowledgeError::IndexCreation("index lock poisoned".into()))?;
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
            debug!("Checkpointed vector index");
        }
        Ok(())
    }

    /// Embed chunk contents, giving each empty vector one more try.
    async fn embed_chunks(&self, chunks: &[Chunk]) -> KnowledgeResult<Vec<Vec<f32>>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let mut vectors = self.embedder.embed_documents(&texts).await?;

        if vectors.len() != chunks.len() {
            return Err(KnowledgeError::IndexCreation(format!(
                "Embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        for (vector, chunk) in vectors.iter_mut().zip(chunks) {
            if !vector.is_empty() {
                continue;
            }
            warn!(
                "Empty embedding for chunk {} of {}, retrying",
                chunk.metadata.chunk_index, chunk.metadata.source_name
            );
            *vector = self.embedder.embed_query(&chunk.content).await.map_err(|e| {
                KnowledgeError::IndexCreation(format!(
                    "No embedding for chunk {} of {}: {}",
                    chunk.metadata.chunk_index, chunk.metadata.source_name, e
                ))
            })?;
        }

        Ok(vectors)
    }

    fn lock(&self) -> KnowledgeResult<MutexGuard<'_, Connection>> {
        self.conn
            .as_ref()
            .ok_or_else(|| KnowledgeError::IndexCreation("Vector index is not open".to_string()))?
            .lock()
            .map_err(|_| KnowledgeError::IndexCreation("index lock poisoned".to_string()))
    }

    fn read_rows(&self, filter: &ChunkFilter) -> KnowledgeResult<Vec<StoredRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, content, embedding, metadata FROM chunks ORDER BY seq",
        )?;

        let rows = stmt
            .query_map([], |row| {
                let metadata_json: String = row.get(3)?;
                let metadata: ChunkMetadata =
                    serde_json::from_str(&metadata_json).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            3,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;
                let blob: Vec<u8> = row.get(2)?;

                Ok(StoredRow {
                    chunk: Chunk {
                        id: row.get(0)?,
                        content: row.get(1)?,
                        metadata,
                    },
                    embedding: blob_to_vec(&blob),
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| KnowledgeError::IndexLoad(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter(|row| filter.matches(&row.chunk.metadata))
            .collect())
    }

    fn open(&self, path: &Path) -> KnowledgeResult<Connection> {
        std::fs::create_dir_all(&self.dir)?;

        let conn = Connection::open(path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    /// Open for writing; an unreadable file is replaced.
    fn open_fresh(&self) -> KnowledgeResult<Connection> {
        let path = self.index_path();
        match self.open(&path) {
            Ok(conn) => Ok(conn),
            Err(e) => {
                warn!("Replacing unreadable vector index: {}", e);
                self.remove_files()?;
                self.open(&path)
            }
        }
    }

    fn open_checked(&self, path: &Path) -> KnowledgeResult<(Connection, usize, Option<usize>)> {
        let conn = self
            .open(path)
            .map_err(|e| KnowledgeError::IndexLoad(e.to_string()))?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(|e| KnowledgeError::IndexLoad(e.to_string()))?;

        let dimensions: Option<String> = conn
            .query_row(
                "SELECT value FROM index_info WHERE key = 'dimensions'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| KnowledgeError::IndexLoad(e.to_string()))?;

        Ok((
            conn,
            count as usize,
            dimensions.and_then(|d| d.parse().ok()),
        ))
    }

    fn remove_files(&self) -> KnowledgeResult<()> {
        let path = self.index_path();
        for suffix in ["", "-wal", "-shm"] {
            let mut name = path.clone().into_os_string();
            name.push(suffix);
            let file = PathBuf::from(name);
            if file.exists() {
                std::fs::remove_file(&file)?;
            }
        }
        Ok(())
    }
}

fn insert_rows(tx: &Transaction<'_>, chunks: &[Chunk], vectors: &[Vec<f32>]) -> KnowledgeResult<()> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO chunks (id, source_id, chunk_index, content, embedding, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;

    for (chunk, vector) in chunks.iter().zip(vectors) {
        let metadata_json = serde_json::to_string(&chunk.metadata)?;
        stmt.execute(params![
            chunk.id,
            chunk.metadata.source_id,
            chunk.metadata.chunk_index as i64,
            chunk.content,
            vec_to_blob(vector),
            metadata_json,
        ])?;
    }

    Ok(())
}

fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity; 0.0 for empty, zero or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
