//! Deterministic offline embedding provider.

use crate::embeddings::provider::EmbeddingProvider;
use crate::error::KnowledgeResult;
use unicode_segmentation::UnicodeSegmentation;

const STOP_WORDS: &[&str] = &[
    "the", "is", "at", "which", "on", "an", "as", "are", "was", "were", "for", "to", "of", "in",
    "and", "or", "but", "with", "by", "from", "this", "that", "be", "have", "has", "had", "it",
    "its", "their", "they", "them",
];

/// Hashed bag-of-trigrams embeddings.
///
/// Every word contributes its whole-word hash and its boundary-padded
/// character trigrams to a signed feature vector, which is then normalized.
/// Not semantic, but stable across runs and content-dependent, which is all
/// tests and offline demos need.
#[derive(Debug)]
pub struct MockProvider {
    model: String,
    dimensions: usize,
}

impl MockProvider {
    pub fn new(model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            model: model.into(),
            dimensions: dimensions.max(1),
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lower = text.to_lowercase();

        for word in lower.unicode_words() {
            if STOP_WORDS.contains(&word) {
                continue;
            }

            self.accumulate(&mut vector, word.as_bytes(), 1.0);

            let padded: Vec<char> = std::iter::once('^')
                .chain(word.chars())
                .chain(std::iter::once('$'))
                .collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                self.accumulate(&mut vector, trigram.as_bytes(), 0.5);
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }

    /// Signed feature hashing: low bits pick the slot, the top bit the sign.
    fn accumulate(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(feature);
        let slot = (hash % self.dimensions as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[slot] += sign * weight;
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait::async_trait]
impl EmbeddingProvider for MockProvider {
    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.vectorize(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_mock_provider_unit_length() {
        let provider = MockProvider::new("trigram-v1", 384);
        let embedding = provider.embed("photosynthesis converts light").await.unwrap();

        assert_eq!(embedding.len(), 384);
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_mock_provider_deterministic() {
        let provider = MockProvider::new("trigram-v1", 128);
        let first = provider.embed("deterministic test").await.unwrap();
        let second = provider.embed("deterministic test").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_mock_provider_related_texts_score_higher() {
        let provider = MockProvider::new("trigram-v1", 384);
        let query = provider.embed("mitochondria energy").await.unwrap();
        let related = provider
            .embed("The mitochondria produce energy for the cell")
            .await
            .unwrap();
        let unrelated = provider
            .embed("Medieval castles had thick stone walls")
            .await
            .unwrap();

        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[tokio::test]
    async fn test_mock_provider_stop_words_only() {
        let provider = MockProvider::new("trigram-v1", 64);
        let embedding = provider.embed("the and of").await.unwrap();

        assert_eq!(embedding.len(), 64);
        assert!(embedding.iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn test_mock_provider_batch_utf8() {
        let provider = MockProvider::new("trigram-v1", 64);
        let texts = vec![
            "Gamedex é um aplicativo 🎮 brasileiro".to_string(),
            "こんにちは 世界".to_string(),
        ];
        let embeddings = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert!(embeddings.iter().all(|e| e.len() == 64));
    }
}
