//! Tests for similarity ranking correctness.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use crate::embeddings::{EmbeddingConfig, EmbeddingProvider, EmbeddingService};
use crate::error::KnowledgeResult;
use crate::types::{Chunk, ChunkMetadata};
use crate::vector_store::{ChunkFilter, VectorStore};

/// Backend mapping known texts to fixed vectors.
#[derive(Debug)]
struct FixedProvider {
    vectors: HashMap<String, Vec<f32>>,
}

#[async_trait::async_trait]
impl EmbeddingProvider for FixedProvider {
    fn provider_name(&self) -> &str {
        "fixed"
    }

    fn model_name(&self) -> &str {
        "fixed-v1"
    }

    fn dimensions(&self) -> usize {
        3
    }

    async fn embed_batch(&self, texts: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                self.vectors
                    .get(t)
                    .cloned()
                    .unwrap_or_else(|| normalize(&[0.1, 0.1, 0.1]))
            })
            .collect())
    }
}

/// Helper to create a normalized embedding.
fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

fn chunk(source_id: &str, text: &str) -> Chunk {
    Chunk::new(
        text.to_string(),
        ChunkMetadata {
            source_id: source_id.to_string(),
            source_name: format!("{}.txt", source_id),
            file_type: "txt".to_string(),
            processed_at: Utc::now(),
            file_size_bytes: 100,
            chunk_index: 0,
            extra: Default::default(),
        },
    )
}

/// Build an index whose chunks and queries embed to the given vectors.
async fn index_with(temp: &TempDir, entries: &[(&str, &str, [f32; 3])]) -> VectorStore {
    let vectors = entries
        .iter()
        .map(|(_, text, v)| (text.to_string(), normalize(v)))
        .collect();
    let service = EmbeddingService::with_provider(
        EmbeddingConfig::default(),
        Arc::new(FixedProvider { vectors }),
    );

    let mut store = VectorStore::new(temp.path(), Arc::new(service), Duration::from_secs(5));
    let chunks: Vec<Chunk> = entries
        .iter()
        .filter(|(source, _, _)| !source.is_empty())
        .map(|(source, text, _)| chunk(source, text))
        .collect();
    if !chunks.is_empty() {
        store.create(&chunks).await.unwrap();
    }
    store
}

#[tokio::test]
async fn test_relevant_query_returns_high_scores() {
    let temp = TempDir::new().unwrap();
    let store = index_with(
        &temp,
        &[
            ("s1", "Rust is a systems programming language", [1.0, 0.5, 0.2]),
            ("s1", "Cooking recipes for pasta", [-0.3, -0.8, 0.4]),
            ("", "rust programming", [0.9, 0.4, 0.3]),
        ],
    )
    .await;

    let results = store
        .similarity_search("rust programming", 5, &ChunkFilter::all())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(
        results[0].chunk.content, "Rust is a systems programming language",
        "Most relevant chunk should be first"
    );
    assert!(
        results[0].score > 0.8,
        "Relevant chunk score should be high: {}",
        results[0].score
    );
    assert!(results[0].score > results[1].score, "Scores should be ordered");
}

#[tokio::test]
async fn test_scores_are_ordered_descending() {
    let temp = TempDir::new().unwrap();
    let store = index_with(
        &temp,
        &[
            ("s1", "Text A", [1.0, 0.0, 0.0]),
            ("s1", "Text B", [0.7, 0.7, 0.0]),
            ("s1", "Text C", [0.0, 1.0, 0.0]),
            ("s1", "Text D", [-1.0, 0.0, 0.0]),
            ("", "query", [1.0, 0.0, 0.0]),
        ],
    )
    .await;

    let results = store
        .similarity_search("query", 10, &ChunkFilter::all())
        .await
        .unwrap();

    for pair in results.windows(2) {
        assert!(
            pair[0].score >= pair[1].score,
            "Scores should be ordered: {} >= {}",
            pair[0].score,
            pair[1].score
        );
    }
    assert_eq!(results[0].chunk.content, "Text A");
    assert!(results[0].score > 0.99, "Perfect match should score near 1.0");

    let last = results.last().unwrap();
    assert_eq!(last.chunk.content, "Text D");
    assert!(
        last.score > -1.01 && last.score < -0.99,
        "Opposite vectors should score near -1.0"
    );
}

#[tokio::test]
async fn test_top_k_limit_respected() {
    let temp = TempDir::new().unwrap();
    let texts: Vec<String> = (0..10).map(|i| format!("Text {}", i)).collect();
    let mut entries: Vec<(&str, &str, [f32; 3])> = texts
        .iter()
        .enumerate()
        .map(|(i, t)| ("s1", t.as_str(), [1.0, i as f32 / 10.0, 0.0]))
        .collect();
    entries.push(("", "query", [1.0, 0.0, 0.0]));

    let store = index_with(&temp, &entries).await;
    let results = store
        .similarity_search("query", 3, &ChunkFilter::all())
        .await
        .unwrap();

    assert_eq!(results.len(), 3, "Should return exactly top_k results");
    assert_eq!(results[0].chunk.content, "Text 0");
}

#[tokio::test]
async fn test_filter_applies_before_ranking() {
    let temp = TempDir::new().unwrap();
    let store = index_with(
        &temp,
        &[
            ("best", "Exact match", [1.0, 0.0, 0.0]),
            ("other", "Weak match", [0.2, 1.0, 0.0]),
            ("", "query", [1.0, 0.0, 0.0]),
        ],
    )
    .await;

    let results = store
        .similarity_search("query", 1, &ChunkFilter::sources(["other"]))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.source_id(), "other");
}

#[tokio::test]
async fn test_empty_index_returns_no_results() {
    let temp = TempDir::new().unwrap();
    let store = index_with(&temp, &[("", "query", [1.0, 0.0, 0.0])]).await;

    let results = store
        .similarity_search("query", 5, &ChunkFilter::all())
        .await
        .unwrap();
    assert!(results.is_empty(), "Empty index should return no results");
}
