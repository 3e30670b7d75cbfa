//! End-to-end behaviour of the knowledge store with the mock embedder.

use docqa_knowledge::{KnowledgeConfig, KnowledgeStore, RawFile, Retriever};
use std::collections::HashSet;
use tempfile::TempDir;

fn config(temp: &TempDir) -> KnowledgeConfig {
    KnowledgeConfig::for_data_dir(temp.path().join(".docqa"))
}

fn txt(name: &str, body: &str) -> RawFile {
    RawFile::new(name, body.as_bytes().to_vec())
}

fn corpus() -> Vec<RawFile> {
    vec![
        txt(
            "astronomy.txt",
            &"Stars form inside collapsing clouds of gas and dust. ".repeat(40),
        ),
        txt(
            "cooking.txt",
            &"Fresh pasta needs flour, eggs and patient kneading. ".repeat(40),
        ),
        txt(
            "history.txt",
            &"The printing press spread books across Europe quickly. ".repeat(40),
        ),
    ]
}

#[tokio::test]
async fn ingestion_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let mut store = KnowledgeStore::open(config(&temp)).await;
    let files = corpus();

    let first = store.ingest_files(&files).await;
    assert!(first.success);
    assert_eq!(first.new_count, 3);
    let stats = store.get_stats();
    let indexed = store.vector_store().count().unwrap();

    let second = store.ingest_files(&files).await;
    assert!(second.success);
    assert_eq!(second.new_count, 0);
    assert_eq!(second.skipped_count, 3);
    assert_eq!(store.get_stats(), stats);
    assert_eq!(store.vector_store().count().unwrap(), indexed);
}

#[tokio::test]
async fn dedup_is_by_content_not_name() {
    let temp = TempDir::new().unwrap();
    let mut store = KnowledgeStore::open(config(&temp)).await;

    let result = store
        .ingest_files(&[txt("a.txt", "identical body"), txt("b.txt", "identical body")])
        .await;
    assert_eq!(result.new_count, 1);
    assert_eq!(result.skipped_count, 1);

    let renamed = store.ingest_files(&[txt("c.txt", "identical body")]).await;
    assert_eq!(renamed.new_count, 0);

    let changed = store.ingest_files(&[txt("a.txt", "identical body!")]).await;
    assert_eq!(changed.new_count, 1);
}

#[tokio::test]
async fn three_thousand_chars_make_four_overlapping_chunks() {
    let temp = TempDir::new().unwrap();
    let mut store = KnowledgeStore::open(config(&temp)).await;

    let body = "x".repeat(3000);
    let result = store.ingest_files(&[txt("long.txt", &body)]).await;
    assert!(result.success);
    assert_eq!(result.total_chunks, 4);
    assert_eq!(store.get_stats().chunk_count, 4);

    let chunks = store.documents();
    for pair in chunks.windows(2) {
        let prev: Vec<char> = pair[0].content.chars().collect();
        let next: Vec<char> = pair[1].content.chars().collect();
        assert_eq!(prev[prev.len() - 200..], next[..200]);
    }
    let indices: Vec<u32> = chunks.iter().map(|c| c.metadata.chunk_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn preload_round_trip() {
    let temp = TempDir::new().unwrap();
    let files = corpus();

    let (stats, hits_before) = {
        let mut store = KnowledgeStore::open(config(&temp)).await;
        store.ingest_files(&files).await;
        let stats = store.get_stats();
        let retriever = Retriever::new(store.into_shared());
        let hits = retriever.similarity_search("clouds of gas", 3, &[]).await;
        (stats, hits)
    };

    let store = KnowledgeStore::open(config(&temp)).await;
    assert!(store.preload_status().is_preloaded);
    assert_eq!(store.get_stats(), stats);
    store.check_consistency().unwrap();

    let retriever = Retriever::new(store.into_shared());
    let hits_after = retriever.similarity_search("clouds of gas", 3, &[]).await;
    assert_eq!(hits_before, hits_after);
}

#[tokio::test]
async fn filter_returns_only_selected_sources() {
    let temp = TempDir::new().unwrap();
    let mut store = KnowledgeStore::open(config(&temp)).await;
    let files = corpus();
    store.ingest_files(&files).await;

    let selected = vec![files[1].content_hash()];
    let retriever = Retriever::new(store.into_shared());

    let hits = retriever.similarity_search("stars and gas", 10, &selected).await;
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.metadata.source_id == selected[0]));

    let chunks = retriever.get_all_chunks(&selected).await;
    assert!(chunks.iter().all(|c| c.metadata.source_id == selected[0]));

    let context = retriever.get_random_context(200, &selected).await.unwrap();
    assert!(context.contains("pasta"));
}

#[tokio::test]
async fn empty_store_is_safe() {
    let temp = TempDir::new().unwrap();
    let store = KnowledgeStore::open(config(&temp)).await;
    assert_eq!(store.get_stats().chunk_count, 0);

    let retriever = Retriever::new(store.into_shared());
    assert!(retriever.similarity_search("anything", 4, &[]).await.is_empty());
    assert!(retriever.get_random_context(200, &[]).await.is_none());
    assert!(retriever.get_all_chunks(&[]).await.is_empty());
}

#[tokio::test]
async fn removal_cascades_after_rebuild() {
    let temp = TempDir::new().unwrap();
    let mut store = KnowledgeStore::open(config(&temp)).await;
    let files = corpus();
    store.ingest_files(&files).await;

    let removed = files[0].content_hash();
    assert!(store.remove_source(&removed));
    assert!(store.rebuild_index().await);
    assert!(store.documents().iter().all(|c| c.source_id() != removed));

    let shared = store.into_shared();
    let retriever = Retriever::new(shared.clone());
    let hits = retriever.similarity_search("stars clouds gas dust", 50, &[]).await;
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.metadata.source_id != removed));

    drop(retriever);
    drop(shared);
    let reopened = KnowledgeStore::open(config(&temp)).await;
    let sources: HashSet<&str> = reopened.documents().iter().map(|c| c.source_id()).collect();
    assert_eq!(sources.len(), 2);
    assert!(!sources.contains(removed.as_str()));
}

#[tokio::test]
async fn reingest_after_removal_is_stored_once() {
    let temp = TempDir::new().unwrap();
    let files = corpus();
    let removed = files[0].content_hash();
    {
        let mut store = KnowledgeStore::open(config(&temp)).await;
        store.ingest_files(&files).await;
        let total = store.documents().len();

        assert!(store.remove_source(&removed));
        let result = store.ingest_files(&files[..1]).await;
        assert_eq!(result.new_count, 1);
        assert_eq!(store.documents().len(), total);
        assert_eq!(store.vector_store().count().unwrap(), total);
        store.check_consistency().unwrap();
    }

    let reopened = KnowledgeStore::open(config(&temp)).await;
    reopened.check_consistency().unwrap();
    let record = reopened
        .list_sources()
        .into_iter()
        .find(|r| r.content_hash == removed)
        .unwrap();
    let chunks = reopened
        .documents()
        .iter()
        .filter(|c| c.source_id() == removed)
        .count();
    assert_eq!(record.chunk_count as usize, chunks);
    assert_eq!(reopened.vector_store().count().unwrap(), reopened.documents().len());
}

#[tokio::test]
async fn removal_survives_restart_until_rebuild() {
    let temp = TempDir::new().unwrap();
    let files = corpus();
    let removed = files[0].content_hash();
    {
        let mut store = KnowledgeStore::open(config(&temp)).await;
        store.ingest_files(&files).await;
        assert!(store.remove_source(&removed));
    }

    let mut store = KnowledgeStore::open(config(&temp)).await;
    assert!(!store.is_already_processed(&files[0]));
    assert_eq!(store.list_sources().len(), 2);
    assert!(store.preload_status().needs_rebuild);
    assert!(store.documents().iter().all(|c| c.source_id() != removed));

    assert!(store.rebuild_index().await);
    store.check_consistency().unwrap();

    let shared = store.into_shared();
    let retriever = Retriever::new(shared.clone());
    let hits = retriever.similarity_search("stars clouds gas dust", 50, &[]).await;
    assert!(hits.iter().all(|h| h.metadata.source_id != removed));

    drop(retriever);
    drop(shared);
    let reopened = KnowledgeStore::open(config(&temp)).await;
    assert!(!reopened.preload_status().needs_rebuild);
    assert!(reopened.documents().iter().all(|c| c.source_id() != removed));
}

#[tokio::test]
async fn corrupt_metadata_is_repaired_from_index() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp);
    let files = corpus();
    {
        let mut store = KnowledgeStore::open(config.clone()).await;
        store.ingest_files(&files).await;
    }

    std::fs::write(config.metadata_path(), "{ not json").unwrap();

    let mut store = KnowledgeStore::open(config.clone()).await;
    assert_eq!(store.list_sources().len(), 3);
    assert!(files.iter().all(|f| store.is_already_processed(f)));

    let result = store.ingest_files(&files).await;
    assert_eq!(result.new_count, 0);
    assert_eq!(store.vector_store().count().unwrap(), store.documents().len());

    let saved = std::fs::read_to_string(config.metadata_path()).unwrap();
    assert!(serde_json::from_str::<serde_json::Value>(&saved).is_ok());
}

#[tokio::test]
async fn corrupt_index_is_treated_as_absent() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp);
    {
        let mut store = KnowledgeStore::open(config.clone()).await;
        store.ingest_files(&corpus()).await;
    }

    let index = config.index_dir().join("index.sqlite");
    std::fs::write(&index, b"definitely not sqlite").unwrap();
    for suffix in ["-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", index.display(), suffix));
    }

    let mut store = KnowledgeStore::open(config).await;
    assert!(!store.preload_status().is_preloaded);
    assert!(store.documents().is_empty());
    assert!(store.list_sources().is_empty());

    let result = store.ingest_files(&corpus()).await;
    assert_eq!(result.new_count, 3);
    store.check_consistency().unwrap();
}
