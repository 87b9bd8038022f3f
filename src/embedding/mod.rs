//! Text embedding layer.
//!
//! Queries and catalog rows share one encoder identity; the service only
//! depends on the [`Embedder`] capability so tests can script vectors.
//! Implementations must not block the async scheduler — CPU-bound encoders
//! belong on a worker pool (`spawn_blocking`), network encoders await.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::{LlmConfig, RequestConfig};
use crate::error::{EmbedError, EmbedResult};
use crate::store::EMBEDDING_DIM;

/// Capability interface for text -> 384-dim unit vector encoding.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Encode whitespace-normalized text. Output is L2-unit and stable for
    /// byte-identical input.
    async fn embed(&self, text: &str) -> EmbedResult<Vec<f32>>;
}

/// Collapse runs of whitespace and trim, so formatting differences do not
/// change the encoded vector.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Scale a vector to unit L2 norm. Zero vectors are returned unchanged.
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Embedder backed by an OpenAI-compatible `/v1/embeddings` endpoint.
pub struct HttpEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(config: &LlmConfig, request: &RequestConfig) -> EmbedResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request.timeout_ms))
            .build()
            .map_err(EmbedError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "all-minilm-l6-v2".to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> EmbedResult<Vec<f32>> {
        let input = normalize_text(text);

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "input": [input],
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Unavailable {
                message: format!("{status}: {body}"),
            });
        }

        let parsed: EmbeddingResponse =
            response.json().await.map_err(|e| EmbedError::Unavailable {
                message: format!("malformed embeddings response: {e}"),
            })?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or_else(|| EmbedError::Unavailable {
                message: "empty embeddings response".to_string(),
            })?;

        if vector.len() != EMBEDDING_DIM {
            return Err(EmbedError::Dimension {
                got: vector.len(),
                expected: EMBEDDING_DIM,
            });
        }

        debug!(dim = vector.len(), "embedded query text");
        Ok(l2_normalize(vector))
    }
}
