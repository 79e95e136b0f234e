//! Embedding: chunk text to fixed-dimension vectors.
//!
//! [`EmbeddingProvider`] is the vendor seam; [`Embedder`] adds batching,
//! bounded retry with backoff, and a per-call timeout on top of any
//! provider. Output order always matches input order.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::EmbedderConfig;
use crate::error::VaultError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds a batch of texts, one vector per input, order preserved.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VaultError>;

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Deterministic bag-of-words embedding for tests and offline wiring.
///
/// Each word hashes to a dimension bucket, so texts sharing vocabulary get
/// genuinely higher cosine similarity. Same text, same vector, always.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self { dimension: 64 }
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        use unicode_segmentation::UnicodeSegmentation;

        let mut vector = vec![0.0f32; self.dimension];
        for word in text.to_lowercase().unicode_words() {
            let digest = Sha256::digest(word.as_bytes());
            let bucket = u64::from_be_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dimension;
            vector[bucket] += 1.0;
        }
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VaultError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "mock-bag-of-words"
    }
}

/// Hosted embedding endpoint speaking the feature-extraction protocol:
/// POST `{"inputs": [...]}`, response is an array of vectors. Vectors are
/// L2-normalized before use so cosine scores are comparable across calls.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(endpoint: Url, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key: None,
            model: model.into(),
            dimension,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VaultError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .json(&serde_json::json!({ "inputs": texts }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| VaultError::Embedding(err.to_string()))?
            .error_for_status()
            .map_err(|err| VaultError::Embedding(err.to_string()))?;

        let mut vectors: Vec<Vec<f32>> = response
            .json()
            .await
            .map_err(|err| VaultError::Embedding(err.to_string()))?;

        if vectors.len() != texts.len() {
            return Err(VaultError::Embedding(format!(
                "provider returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        for vector in &mut vectors {
            if vector.len() != self.dimension {
                return Err(VaultError::Embedding(format!(
                    "provider returned dimension {} (expected {})",
                    vector.len(),
                    self.dimension
                )));
            }
            l2_normalize(vector);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Batching, retry, and timeout wrapper over a provider.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    config: EmbedderConfig,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: EmbedderConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embeds all texts in order, batch by batch. A batch that keeps
    /// failing after the bounded attempts fails the whole call, which
    /// marks the enclosing document sync `failed`.
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VaultError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            out.extend(self.embed_batch_with_retry(batch).await?);
        }
        Ok(out)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, VaultError> {
        let mut vectors = self.embed_batch_with_retry(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| VaultError::Embedding("empty result for query".into()))
    }

    async fn embed_batch_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, VaultError> {
        let mut backoff = self.config.backoff;
        let mut last_error = None;

        for attempt in 1..=self.config.max_attempts {
            let call = self.provider.embed_batch(batch);
            match tokio::time::timeout(self.config.timeout, call).await {
                Ok(Ok(vectors)) => return Ok(vectors),
                Ok(Err(err)) => {
                    tracing::warn!(
                        attempt,
                        provider = self.provider.name(),
                        error = %err,
                        "embedding batch failed"
                    );
                    last_error = Some(err);
                }
                Err(_) => {
                    tracing::warn!(
                        attempt,
                        provider = self.provider.name(),
                        "embedding batch timed out"
                    );
                    last_error = Some(VaultError::Embedding(format!(
                        "timed out after {:?}",
                        self.config.timeout
                    )));
                }
            }
            if attempt < self.config.max_attempts {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        Err(last_error.unwrap_or_else(|| VaultError::Embedding("no attempts made".into())))
    }
}
