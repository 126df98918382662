//! Embedding capability: the seam between the engine and the model that
//! turns text into fixed-dimension vectors.
//!
//! The engine never assumes anything about the backing model beyond the
//! [`EmbeddingProvider`] contract. [`HttpEmbeddingProvider`] speaks the
//! OpenAI-style `/embeddings` JSON protocol; [`MockEmbeddingProvider`]
//! produces deterministic vectors for tests and offline runs.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::error::{ConfigurationError, EmbeddingError};

/// Maps text to a fixed-dimension numeric vector; may batch.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier used in logs and telemetry.
    fn name(&self) -> &str;

    /// Output dimensionality, fixed for the provider's lifetime.
    fn dimensions(&self) -> usize;

    /// Embeds a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embeds a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            EmbeddingError::MalformedResponse("backend returned an empty batch".into())
        })
    }
}

/// Deterministic in-process embedder.
///
/// Tokens are hashed into buckets and the vector is L2-normalized, so
/// identical texts embed identically and token overlap correlates with
/// cosine similarity. Useful for tests; not a real embedding model.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EmbeddingError::MalformedInput(
                "cannot embed empty text".into(),
            ));
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for token in trimmed.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let digest = hasher.finish();
            vector[(digest as usize) % self.dimensions] += 1.0;
            vector[((digest >> 32) as usize) % self.dimensions] += 0.5;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new(16)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|text| self.embed_text(text)).collect()
    }
}

/// Client for an OpenAI-compatible embeddings endpoint.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsDatum>,
}

#[derive(Deserialize)]
struct EmbeddingsDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    /// Builds a client for the given endpoint with a bounded per-call
    /// timeout. A timeout counts as a backend failure and rides the
    /// caller's retry policy.
    pub fn new(
        endpoint: Url,
        model: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        if dimensions == 0 {
            return Err(ConfigurationError::new(
                "embedding dimensions must be non-zero",
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| {
                ConfigurationError::new(format!("cannot build embeddings HTTP client: {err}"))
            })?;
        Ok(Self {
            client,
            endpoint,
            model: model.into(),
            api_key: None,
            dimensions,
        })
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(bad) = texts.iter().find(|text| text.trim().is_empty()) {
            return Err(EmbeddingError::MalformedInput(format!(
                "cannot embed empty text (input {:?})",
                bad
            )));
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| EmbeddingError::Backend(err.to_string()))?;

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|err| EmbeddingError::MalformedResponse(err.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::MalformedResponse(format!(
                "expected {} vectors, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let mut data = parsed.data;
        data.sort_by_key(|datum| datum.index);
        let mut vectors = Vec::with_capacity(data.len());
        for datum in data {
            if datum.embedding.len() != self.dimensions {
                return Err(EmbeddingError::MalformedResponse(format!(
                    "vector {} has {} dimensions, expected {}",
                    datum.index,
                    datum.embedding.len(),
                    self.dimensions
                )));
            }
            vectors.push(datum.embedding);
        }
        Ok(vectors)
    }
}
