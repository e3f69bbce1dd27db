use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tracing::debug;

use crate::error::StoreError;
use crate::sparse::{feature_hash, tokenize};

/// Text embedding capability used by semantic ingestion and query.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts. The result has one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError>;

    /// Length of every vector this embedder produces.
    fn dimension(&self) -> usize;
}

/// Deterministic signed feature-hashing embedder.
///
/// Needs no model or network, so it is the default when no embedding service
/// is configured. Texts sharing vocabulary land close in cosine space.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let hash = feature_hash(&token);
            let index = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Caches embeddings by exact text in front of another embedder.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Cache<String, Arc<Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: u64, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError> {
        let mut out: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses: Vec<String> = Vec::new();
        let mut miss_slots: Vec<usize> = Vec::new();

        for (slot, text) in texts.iter().enumerate() {
            match self.cache.get(text).await {
                Some(hit) => out.push(Some(hit.as_ref().clone())),
                None => {
                    out.push(None);
                    misses.push(text.clone());
                    miss_slots.push(slot);
                }
            }
        }

        if !misses.is_empty() {
            debug!(
                hits = texts.len() - misses.len(),
                misses = misses.len(),
                "Embedding cache lookup"
            );
            let fresh = self.inner.embed(&misses).await?;
            if fresh.len() != misses.len() {
                return Err(StoreError::Embedding(format!(
                    "embedder returned {} vectors for {} texts",
                    fresh.len(),
                    misses.len()
                )));
            }
            for ((slot, text), vector) in miss_slots.into_iter().zip(misses).zip(fresh) {
                self.cache.insert(text, Arc::new(vector.clone())).await;
                out[slot] = Some(vector);
            }
        }

        out.into_iter()
            .map(|v| v.ok_or_else(|| StoreError::Embedding("missing embedding".to_string())))
            .collect()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::fusion::cosine_similarity;

    struct CountingEmbedder {
        inner: HashingEmbedder,
        texts_seen: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError> {
            self.texts_seen.fetch_add(texts.len(), Ordering::SeqCst);
            self.inner.embed(texts).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    #[tokio::test]
    async fn hashing_embedder_is_deterministic_and_normalised() {
        let embedder = HashingEmbedder::new(64);
        let texts = vec!["Apple earnings beat".to_string()];
        let a = embedder.embed(&texts).await.unwrap();
        let b = embedder.embed(&texts).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
        let norm: f32 = a[0].iter().map(|v| v * v).sum();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn similar_texts_score_higher() {
        let embedder = HashingEmbedder::new(384);
        let query = embedder.embed_one("nvidia datacenter revenue");
        let close = embedder.embed_one("Nvidia reports record datacenter revenue");
        let far = embedder.embed_one("treasury auction demand weak");
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[test]
    fn empty_text_embeds_to_zero() {
        let embedder = HashingEmbedder::new(8);
        assert!(embedder.embed_one("").iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn cached_embedder_only_embeds_misses() {
        let counting = Arc::new(CountingEmbedder {
            inner: HashingEmbedder::new(32),
            texts_seen: AtomicUsize::new(0),
        });
        let cached = CachedEmbedder::new(counting.clone(), 100, Duration::from_secs(60));

        let first = cached
            .embed(&["a b".to_string(), "c d".to_string()])
            .await
            .unwrap();
        let second = cached
            .embed(&["c d".to_string(), "e f".to_string()])
            .await
            .unwrap();

        assert_eq!(counting.texts_seen.load(Ordering::SeqCst), 3);
        assert_eq!(first[1], second[0]);
        assert_eq!(cached.dimension(), 32);
    }
}
