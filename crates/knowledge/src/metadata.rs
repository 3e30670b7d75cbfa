//! Processed-source tracking.
//!
//! Persists a JSON object mapping content hash to `SourceRecord`. Writes go to
//! a temporary sibling file which is synced and renamed over the target, so a
//! crash never leaves a half-written table behind.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::error::{KnowledgeError, KnowledgeResult};
use crate::types::SourceRecord;

/// Hex SHA-256 of raw bytes; the deduplication key.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// In-memory view of the metadata file, keyed by content hash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceTable(BTreeMap<String, SourceRecord>);

impl SourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.0.contains_key(hash)
    }

    pub fn get(&self, hash: &str) -> Option<&SourceRecord> {
        self.0.get(hash)
    }

    /// Insert or replace the record under its own hash.
    pub fn put(&mut self, record: SourceRecord) {
        self.0.insert(record.content_hash.clone(), record);
    }

    pub fn remove(&mut self, hash: &str) -> Option<SourceRecord> {
        self.0.remove(hash)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.0.retain(|hash, _| keep(hash));
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn hashes(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Records sorted by filename, then hash.
    pub fn records(&self) -> Vec<SourceRecord> {
        let mut records: Vec<SourceRecord> = self.0.values().cloned().collect();
        records.sort_by(|a, b| {
            a.filename
                .cmp(&b.filename)
                .then_with(|| a.content_hash.cmp(&b.content_hash))
        });
        records
    }
}

/// Reads and writes the metadata file.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the table. A missing file is an empty table; so is a corrupt one,
    /// after logging the problem.
    pub fn load(&self) -> SourceTable {
        match self.load_checked() {
            Ok(table) => table,
            Err(e) => {
                error!("Error loading metadata: {}", e);
                SourceTable::new()
            }
        }
    }

    /// Load the table, reporting an unreadable file as `MetadataCorrupt`.
    pub fn load_checked(&self) -> KnowledgeResult<SourceTable> {
        if !self.path.exists() {
            info!("No existing metadata found, starting fresh");
            return Ok(SourceTable::new());
        }

        let contents = fs::read_to_string(&self.path).map_err(|e| {
            KnowledgeError::MetadataCorrupt(format!("{}: {}", self.path.display(), e))
        })?;

        let table: SourceTable = serde_json::from_str(&contents).map_err(|e| {
            KnowledgeError::MetadataCorrupt(format!("{}: {}", self.path.display(), e))
        })?;

        info!("Loaded metadata for {} processed files", table.len());
        Ok(table)
    }

    /// Atomically replace the file with `table`.
    pub fn save(&self, table: &SourceTable) -> KnowledgeResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(table)?;
        let tmp_path = self.tmp_path();

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        debug!("Saved metadata for {} processed files", table.len());
        Ok(())
    }

    /// Remove the file if present.
    pub fn delete_file(&self) -> KnowledgeResult<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            debug!("Deleted {}", self.path.display());
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
