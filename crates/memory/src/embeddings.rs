//! Embedding cache.
//!
//! Wraps any `Embedder` with a content-addressed cache so repeated text
//! hits the upstream service exactly once.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use domovoy_core::{Embedder, Result};

pub struct CachingEmbedder {
    inner: Arc<dyn Embedder>,
    cache: DashMap<String, Vec<f32>>,
}

impl CachingEmbedder {
    pub fn new(inner: Arc<dyn Embedder>) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[async_trait]
impl Embedder for CachingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.cache.get(text) {
            return Ok(hit.clone());
        }
        let vector = self.inner.embed(text).await?;
        self.cache.insert(text.to_string(), vector.clone());
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// L2-normalize a vector in place. Zero vectors stay zero.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity of two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Convert a store-reported distance into a similarity. Assumes the
/// backing index works over L2-normalized vectors; adjust here if the
/// underlying metric ever changes so the `min_similarity` threshold
/// keeps its meaning.
pub fn distance_to_similarity(distance: f32) -> f32 {
    1.0 - distance
}
