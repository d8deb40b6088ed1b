use anyhow::{Context, Result};
use async_trait::async_trait;
use extract::{RetryPolicy, StatusError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Turns texts into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed a batch in one call. Output order matches input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .pop()
            .context("Embedding service returned no vector")
    }
}

#[derive(Clone)]
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn default() -> Self {
        Self::new(
            "http://localhost:11434".to_string(),
            "nomic-embed-text".to_string(),
        )
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn embed_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send embedding request")?;

        if !response.status().is_success() {
            return Err(StatusError::new("Ollama embedding", response.status()).into());
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        if embed_response.embeddings.len() != texts.len() {
            anyhow::bail!(
                "Embedding count mismatch: sent {}, received {}",
                texts.len(),
                embed_response.embeddings.len()
            );
        }

        Ok(embed_response.embeddings)
    }
}

#[async_trait]
impl EmbeddingService for OllamaEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.retry
            .retry("ollama_embed", || self.embed_once(texts))
            .await
    }
}

/// Deterministic embedder for offline runs and tests.
///
/// Texts registered with [`FixedEmbedder::with`] get their vector; anything
/// else is hashed into a vector of the configured dimension. Every batch is
/// recorded.
pub struct FixedEmbedder {
    dimension: usize,
    table: HashMap<String, Vec<f32>>,
    batches: Mutex<Vec<Vec<String>>>,
}

impl FixedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            table: HashMap::new(),
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn with(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.table.insert(text.into(), vector);
        self
    }

    /// Batches received so far, one entry per `embed` call.
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }

    fn hashed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        if self.dimension == 0 {
            return vector;
        }
        for (i, byte) in text.bytes().enumerate() {
            vector[(i + byte as usize) % self.dimension] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingService for FixedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(texts.to_vec());
        }
        Ok(texts
            .iter()
            .map(|t| self.table.get(t).cloned().unwrap_or_else(|| self.hashed(t)))
            .collect())
    }
}
