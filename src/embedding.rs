//! Embedding backends and vector utilities.
//!
//! Defines the [`Embedder`] trait and two HTTP implementations:
//! - **[`OllamaEmbedder`]** — `POST {url}/api/embed` on an Ollama instance.
//! - **[`OpenAIEmbedder`]** — `POST {url}/v1/embeddings` (OpenAI-compatible).
//!
//! Each call is a single attempt bounded by the configured timeout. Retry
//! policy belongs to the caller: the index build retries, queries do not.
//!
//! Also provides the vector helpers used by the semantic index and its
//! SQLite cache:
//! - [`cosine_similarity`] — similarity between two embedding vectors
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes for a BLOB column
//! - [`blob_to_vec`] — decode such a BLOB back into a `Vec<f32>`

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, RagResult};

const BACKEND: &str = "embedding";

/// Turns text into a fixed-dimension vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier; part of the vector cache key.
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> RagResult<Vec<f32>>;
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::from_http(BACKEND, e))?;

        let json = read_json(response).await?;
        parse_ollama_response(&json)?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::backend(BACKEND, "empty embedding response"))
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> RagResult<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| RagError::backend(BACKEND, "invalid Ollama response: missing embeddings"))?;

    embeddings
        .iter()
        .map(|embedding| {
            let values = embedding.as_array().ok_or_else(|| {
                RagError::backend(BACKEND, "invalid Ollama response: embedding is not an array")
            })?;
            to_f32_vec(values)
        })
        .collect()
}

// ============ OpenAI ============

pub struct OpenAIEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
}

impl OpenAIEmbedder {
    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::from_http(BACKEND, e))?;

        let json = read_json(response).await?;
        parse_openai_response(&json)?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::backend(BACKEND, "empty embedding response"))
    }
}

fn parse_openai_response(json: &serde_json::Value) -> RagResult<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::backend(BACKEND, "invalid OpenAI response: missing data array"))?;

    data.iter()
        .map(|item| {
            let values = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| RagError::backend(BACKEND, "invalid OpenAI response: missing embedding"))?;
            to_f32_vec(values)
        })
        .collect()
}

// ============ Shared helpers ============

fn to_f32_vec(values: &[serde_json::Value]) -> RagResult<Vec<f32>> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                RagError::backend(BACKEND, format!("non-numeric embedding element at index {}: {}", i, v))
            })
        })
        .collect()
}

async fn read_json(response: reqwest::Response) -> RagResult<serde_json::Value> {
    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(RagError::backend(
            BACKEND,
            format!("HTTP {}: {}", status, body_text),
        ));
    }
    response
        .json()
        .await
        .map_err(|e| RagError::from_http(BACKEND, e))
}

/// Build the configured embedder, or `None` when embeddings are disabled.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Option<Arc<dyn Embedder>>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "ollama" => {
            let model = config
                .model
                .clone()
                .unwrap_or_else(|| "nomic-embed-text".to_string());
            let url = config
                .url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("embedding.url required for Ollama provider"))?;
            let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(url, model, timeout)?);
            Ok(Some(embedder))
        }
        "openai" => {
            let model = config
                .model
                .clone()
                .unwrap_or_else(|| "text-embedding-3-small".to_string());
            let url = config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string());
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
            let embedder: Arc<dyn Embedder> =
                Arc::new(OpenAIEmbedder::new(url, model, api_key, timeout)?);
            Ok(Some(embedder))
        }
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-norm operand.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
