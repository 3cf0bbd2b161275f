//! Embedding providers
//!
//! The embedding model is a pluggable external component exposing
//! `embed(text) -> vector`. Two implementations ship here: an HTTP provider
//! for OpenAI-style endpoints and a deterministic local feature-hash
//! embedder used for tests and offline runs. Both return unit-normalized
//! f32 vectors. A content-addressed disk cache can wrap either.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use promptloom_core::error::{Error, Result};
use promptloom_core::vector::l2_normalize;

/// Retry schedule for transient provider failures (seconds).
const BACKOFF_SECS: [u64; 3] = [1, 2, 4];

/// Pluggable embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text into a unit-normalized vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed many texts. The default implementation loops.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Output dimension of this model.
    fn dim(&self) -> usize;

    /// Model identifier recorded with cached vectors.
    fn model_name(&self) -> &str;
}

/// Deterministic local embedder: hashed bag-of-tokens with bigram features,
/// unit-normalized. No model download, no network, pure function of the
/// input text.
pub struct HashEmbedder {
    dim: usize,
    model_name: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            model_name: format!("hash-{}", dim),
        }
    }

    fn bucket(&self, feature: &str) -> usize {
        let h = feature
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(1099511628211) ^ b as u64);
        (h % self.dim as u64) as usize
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dim];
        let tokens: Vec<&str> = text.split_whitespace().collect();

        for token in &tokens {
            vec[self.bucket(token)] += 1.0;
        }
        // Bigrams separate texts that share vocabulary but not phrasing
        for pair in tokens.windows(2) {
            let feature = format!("{} {}", pair[0], pair[1]);
            vec[self.bucket(&feature)] += 0.5;
        }

        l2_normalize(&vec)
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

/// HTTP provider for OpenAI-style `/embeddings` endpoints.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dim: usize,
}

impl HttpEmbedder {
    pub fn new(endpoint: String, api_key: Option<String>, model: String, dim: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Embedding(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model,
            dim,
        })
    }

    async fn request(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut last_error = None;
        for (attempt, backoff) in BACKOFF_SECS.iter().enumerate() {
            let mut req = self.client.post(&self.endpoint).json(&body);
            if let Some(ref key) = self.api_key {
                req = req.bearer_auth(key);
            }

            match req.send().await {
                Ok(response) if response.status().is_success() => {
                    let parsed: EmbeddingResponse = response
                        .json()
                        .await
                        .map_err(|e| Error::Embedding(format!("Malformed response: {}", e)))?;
                    let mut out = Vec::with_capacity(parsed.data.len());
                    for item in parsed.data {
                        if item.embedding.len() != self.dim {
                            return Err(Error::DimensionMismatch {
                                expected: self.dim,
                                actual: item.embedding.len(),
                            });
                        }
                        out.push(l2_normalize(&item.embedding));
                    }
                    return Ok(out);
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    last_error = Some(Error::Embedding(format!("HTTP {}: {}", status, text)));
                }
                Err(e) => {
                    last_error = Some(Error::Embedding(format!("Request failed: {}", e)));
                }
            }

            if attempt + 1 < BACKOFF_SECS.len() {
                warn!(
                    "Embedding call failed (attempt {}/{}), retrying in {}s",
                    attempt + 1,
                    BACKOFF_SECS.len(),
                    backoff
                );
                tokio::time::sleep(Duration::from_secs(*backoff)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Embedding("exhausted retries".to_string())))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vecs = self.request(vec![text]).await?;
        vecs.pop()
            .ok_or_else(|| Error::Embedding("Empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let refs: Vec<&str> = texts.iter().map(|t| t.as_str()).collect();
        let vecs = self.request(refs).await?;
        if vecs.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                vecs.len()
            )));
        }
        Ok(vecs)
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    model: String,
    embedding: Vec<f32>,
}

/// Content-addressed disk cache around an embedder.
///
/// Keys are SHA-256 of the input text; entries record the model name so a
/// model change invalidates stale vectors. Writes are idempotent, so
/// concurrent workers racing on the same text are harmless.
pub struct CachedEmbedder<E> {
    inner: E,
    cache_dir: PathBuf,
}

impl<E: Embedder> CachedEmbedder<E> {
    pub fn new(inner: E, cache_dir: PathBuf) -> Self {
        Self { inner, cache_dir }
    }

    fn cache_path(&self, text: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        self.cache_dir
            .join(format!("embedding_{}.json", hex::encode(hasher.finalize())))
    }

    fn load(&self, text: &str) -> Option<Vec<f32>> {
        let raw = std::fs::read_to_string(self.cache_path(text)).ok()?;
        let entry: CacheEntry = serde_json::from_str(&raw).ok()?;
        if entry.model == self.inner.model_name() {
            Some(entry.embedding)
        } else {
            None
        }
    }

    fn save(&self, text: &str, embedding: &[f32]) {
        if std::fs::create_dir_all(&self.cache_dir).is_err() {
            return;
        }
        let entry = CacheEntry {
            model: self.inner.model_name().to_string(),
            embedding: embedding.to_vec(),
        };
        if let Ok(raw) = serde_json::to_string(&entry) {
            if let Err(e) = std::fs::write(self.cache_path(text), raw) {
                warn!("Failed to write embedding cache entry: {}", e);
            }
        }
    }
}

#[async_trait]
impl<E: Embedder> Embedder for CachedEmbedder<E> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.load(text) {
            debug!("Embedding cache hit");
            return Ok(cached);
        }
        let embedding = self.inner.embed(text).await?;
        self.save(text, &embedding);
        Ok(embedding)
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptloom_core::vector::cosine_similarity;

    #[tokio::test]
    async fn test_hash_embedder_deterministic_and_normalized() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("write a python script").await.unwrap();
        let b = embedder.embed("write a python script").await.unwrap();
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_hash_embedder_separates_topics() {
        let embedder = HashEmbedder::default();
        let code = embedder
            .embed("write a python script to scrape a website")
            .await
            .unwrap();
        let code2 = embedder
            .embed("write a python script to parse a file")
            .await
            .unwrap();
        let food = embedder
            .embed("compare quinoa and brown rice nutritionally")
            .await
            .unwrap();

        assert!(cosine_similarity(&code, &code2) > cosine_similarity(&code, &food));
    }

    #[tokio::test]
    async fn test_cache_roundtrip_and_model_check() {
        let dir = tempfile::tempdir().unwrap();
        let cached = CachedEmbedder::new(HashEmbedder::default(), dir.path().to_path_buf());

        let first = cached.embed("cache me").await.unwrap();
        let second = cached.embed("cache me").await.unwrap();
        assert_eq!(first, second);

        // A different model ignores the stale entry
        let other = CachedEmbedder::new(HashEmbedder::new(128), dir.path().to_path_buf());
        let third = other.embed("cache me").await.unwrap();
        assert_eq!(third.len(), 128);
    }
}
