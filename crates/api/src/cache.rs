use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use index::EmbeddingService;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Embedding service that remembers vectors by text hash.
///
/// Cache misses of one batch are sent to the inner service together, so a
/// batch still costs at most one inner call.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingService>,
    embeddings: DashMap<String, Vec<f32>>,
    max_entries: usize,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingService>, max_entries: usize) -> Self {
        Self {
            inner,
            embeddings: DashMap::new(),
            max_entries,
        }
    }

    fn set_embedding(&self, key: String, embedding: Vec<f32>) {
        if self.max_entries == 0 {
            return;
        }
        if self.embeddings.len() >= self.max_entries {
            // Simple eviction: clear 25% when full
            let to_remove: Vec<_> = self
                .embeddings
                .iter()
                .take((self.max_entries / 4).max(1))
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.embeddings.remove(&key);
            }
        }
        self.embeddings.insert(key, embedding);
    }

    fn hash_text(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            embeddings_cached: self.embeddings.len(),
            max_entries: self.max_entries,
        }
    }

    pub fn clear(&self) {
        self.embeddings.clear();
    }
}

#[async_trait]
impl EmbeddingService for CachedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let keys: Vec<String> = texts.iter().map(|t| Self::hash_text(t)).collect();

        let mut found: HashMap<&str, Vec<f32>> = HashMap::new();
        let mut misses: Vec<String> = Vec::new();
        let mut miss_keys: Vec<&str> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::with_capacity(keys.len());
        for (text, key) in texts.iter().zip(&keys) {
            if !seen.insert(key.as_str()) {
                continue;
            }
            match self.embeddings.get(key) {
                Some(hit) => {
                    found.insert(key.as_str(), hit.value().clone());
                }
                None => {
                    misses.push(text.clone());
                    miss_keys.push(key.as_str());
                }
            }
        }

        if !misses.is_empty() {
            debug!(hits = found.len(), misses = misses.len(), "Embedding cache lookup");
            let fresh = self.inner.embed(&misses).await?;
            if fresh.len() != misses.len() {
                anyhow::bail!(
                    "Embedding count mismatch: sent {}, received {}",
                    misses.len(),
                    fresh.len()
                );
            }
            for (key, embedding) in miss_keys.into_iter().zip(fresh) {
                self.set_embedding(key.to_string(), embedding.clone());
                found.insert(key, embedding);
            }
        }

        keys.iter()
            .map(|key| {
                found
                    .get(key.as_str())
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("Missing embedding for cached batch"))
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub embeddings_cached: usize,
    pub max_entries: usize,
}
