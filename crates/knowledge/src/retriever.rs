//! Read-only retrieval interface for chat and quiz consumers.
//!
//! The retriever only ever takes the store's read lock, so consumers holding
//! one cannot mutate the knowledge base. Failures are logged and surface as
//! empty results.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, error, warn};

use crate::store::{KnowledgeStore, SharedKnowledgeStore};
use crate::types::{Chunk, ChunkView, DocumentOption, SearchHit};
use crate::vector_store::{ChunkFilter, ALL_SOURCES};

pub struct Retriever {
    store: SharedKnowledgeStore,
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever").finish_non_exhaustive()
    }
}

impl Retriever {
    pub fn new(store: SharedKnowledgeStore) -> Self {
        Self::with_rng(store, StdRng::from_entropy())
    }

    /// Use a caller-supplied random source.
    pub fn with_rng(store: SharedKnowledgeStore, rng: StdRng) -> Self {
        Self {
            store,
            rng: Mutex::new(rng),
        }
    }

    /// Deterministic random context selection.
    pub fn with_seed(store: SharedKnowledgeStore, seed: u64) -> Self {
        Self::with_rng(store, StdRng::seed_from_u64(seed))
    }

    /// Top `k` chunks for `query`, restricted to `selected_sources`. An empty
    /// selection or one containing `"all"` searches everything.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        selected_sources: &[String],
    ) -> Vec<SearchHit> {
        let store = self.store.read().await;
        let filter = store.selection_filter(selected_sources);

        match store
            .vector_store()
            .similarity_search(query, k, &filter)
            .await
        {
            Ok(scored) => scored.into_iter().map(SearchHit::from).collect(),
            Err(e) => {
                error!("Error in similarity search: {}", e);
                Vec::new()
            }
        }
    }

    /// Content of one random chunk from the selection, preferring chunks of
    /// at least `min_length` characters. `None` when nothing is selected.
    pub async fn get_random_context(
        &self,
        min_length: usize,
        selected_sources: &[String],
    ) -> Option<String> {
        let store = self.store.read().await;
        let candidates = selected_documents(&store, selected_sources);
        if candidates.is_empty() {
            debug!("No documents available for random context");
            return None;
        }

        let long_enough: Vec<&Chunk> = candidates
            .iter()
            .copied()
            .filter(|c| c.char_len() >= min_length)
            .collect();
        let pool = if long_enough.is_empty() {
            warn!(
                "No chunk reaches {} characters; using any chunk",
                min_length
            );
            &candidates
        } else {
            &long_enough
        };

        let mut rng = match self.rng.lock() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        };
        pool.choose(&mut *rng).map(|chunk| chunk.content.clone())
    }

    /// Every chunk in the selection. Never truncated.
    pub async fn get_all_chunks(&self, selected_sources: &[String]) -> Vec<ChunkView> {
        let store = self.store.read().await;
        selected_documents(&store, selected_sources)
            .into_iter()
            .map(Chunk::to_view)
            .collect()
    }

    /// Contents of the `k` chunks most relevant to `topic`.
    pub async fn get_context_by_topic(
        &self,
        topic: &str,
        k: usize,
        selected_sources: &[String],
    ) -> Vec<String> {
        self.similarity_search(topic, k, selected_sources)
            .await
            .into_iter()
            .map(|hit| hit.content)
            .collect()
    }

    /// Selection list entries: the catch-all first, then one per source.
    pub async fn available_documents(&self) -> Vec<DocumentOption> {
        let store = self.store.read().await;
        let sources = store.list_sources();

        let mut options = Vec::with_capacity(sources.len() + 1);
        options.push(DocumentOption {
            id: ALL_SOURCES.to_string(),
            name: "All documents".to_string(),
            description: format!("Use all {} documents", sources.len()),
        });
        options.extend(sources.into_iter().map(|source| DocumentOption {
            description: format!(
                "{} | {} chunks | {:.2} MB",
                source.file_type.to_uppercase(),
                source.chunk_count,
                source.size_mb()
            ),
            id: source.content_hash,
            name: source.filename,
        }));
        options
    }
}

fn selected_documents<'a>(store: &'a KnowledgeStore, selected: &[String]) -> Vec<&'a Chunk> {
    let filter = ChunkFilter::from_selection(selected);
    store
        .documents()
        .iter()
        .filter(|chunk| filter.matches(&chunk.metadata))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KnowledgeConfig;
    use crate::types::RawFile;
    use tempfile::TempDir;

    async fn shared_store(temp: &TempDir, files: &[RawFile]) -> SharedKnowledgeStore {
        let config = KnowledgeConfig::for_data_dir(temp.path().join(".docqa"));
        let mut store = KnowledgeStore::open(config).await;
        if !files.is_empty() {
            assert!(store.ingest_files(files).await.success);
        }
        store.into_shared()
    }

    #[tokio::test]
    async fn test_empty_store_is_safe() {
        let temp = TempDir::new().unwrap();
        let retriever = Retriever::new(shared_store(&temp, &[]).await);

        assert!(retriever.similarity_search("anything", 5, &[]).await.is_empty());
        assert!(retriever.get_random_context(200, &[]).await.is_none());
        assert!(retriever.get_all_chunks(&[]).await.is_empty());
        assert!(retriever.get_context_by_topic("x", 3, &[]).await.is_empty());
        assert_eq!(retriever.available_documents().await.len(), 1);
    }

    #[tokio::test]
    async fn test_random_context_prefers_long_chunks() {
        let temp = TempDir::new().unwrap();
        let long = "A long passage about photosynthesis in green plants. ".repeat(6);
        let files = [
            RawFile::new("short.txt", "Tiny."),
            RawFile::new("long.txt", long.clone()),
        ];
        let retriever = Retriever::with_seed(shared_store(&temp, &files).await, 7);

        for _ in 0..10 {
            let context = retriever.get_random_context(200, &[]).await.unwrap();
            assert_eq!(context, long);
        }

        let short_id = files[0].content_hash();
        let context = retriever.get_random_context(200, &[short_id]).await;
        assert_eq!(context.as_deref(), Some("Tiny."));
    }

    #[tokio::test]
    async fn test_seeded_retrievers_agree() {
        let temp = TempDir::new().unwrap();
        let files: Vec<RawFile> = (0..6)
            .map(|i| RawFile::new(format!("f{}.txt", i), format!("Document number {}.", i)))
            .collect();
        let store = shared_store(&temp, &files).await;

        let first = Retriever::with_seed(store.clone(), 42);
        let second = Retriever::with_seed(store, 42);
        for _ in 0..5 {
            assert_eq!(
                first.get_random_context(0, &[]).await,
                second.get_random_context(0, &[]).await
            );
        }
    }

    #[tokio::test]
    async fn test_selection_restricts_results() {
        let temp = TempDir::new().unwrap();
        let files = [
            RawFile::new("rust.txt", "Rust ownership and borrowing rules."),
            RawFile::new("tea.txt", "Brewing green tea at low temperature."),
        ];
        let retriever = Retriever::new(shared_store(&temp, &files).await);
        let tea = vec![files[1].content_hash()];

        let hits = retriever.similarity_search("rust ownership", 5, &tea).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.source_name, "tea.txt");

        let all = vec!["all".to_string()];
        assert_eq!(retriever.get_all_chunks(&all).await.len(), 2);
        assert_eq!(retriever.get_all_chunks(&tea).await.len(), 1);

        let options = retriever.available_documents().await;
        assert_eq!(options.len(), 3);
        assert_eq!(options[0].id, "all");
        assert_eq!(options[1].name, "rust.txt");
    }
}
