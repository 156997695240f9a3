//! Text-generation backends.
//!
//! - **[`OllamaGenerator`]** — `POST {url}/api/generate` with `stream: false`.
//! - **[`OpenAIGenerator`]** — `POST {url}/v1/chat/completions`.
//!
//! Generation calls are never retried: a retry repeats expensive inference
//! and is not guaranteed to produce the same text. Timeouts and transport
//! failures surface as [`RagError::BackendUnavailable`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::{RagError, RagResult};

const BACKEND: &str = "generation";

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str, temperature: f32) -> RagResult<String>;
}

pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaGenerator {
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
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, temperature: f32) -> RagResult<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": temperature },
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::from_http(BACKEND, e))?;

        let json = read_json(response).await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| RagError::backend(BACKEND, "invalid Ollama response: missing response"))
    }
}

pub struct OpenAIGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
}

impl OpenAIGenerator {
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
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, temperature: f32) -> RagResult<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::from_http(BACKEND, e))?;

        let json = read_json(response).await?;
        parse_chat_completion(&json)
    }
}

fn parse_chat_completion(json: &serde_json::Value) -> RagResult<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| RagError::backend(BACKEND, "invalid OpenAI response: missing choices[0].message.content"))
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

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match config.provider.as_str() {
        "ollama" => {
            let model = config.model.clone().unwrap_or_else(|| "mistral".to_string());
            let url = config
                .url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("generation.url required for Ollama provider"))?;
            let generator: Arc<dyn Generator> = Arc::new(OllamaGenerator::new(url, model, timeout)?);
            Ok(generator)
        }
        "openai" => {
            let model = config
                .model
                .clone()
                .unwrap_or_else(|| "gpt-4.1-nano".to_string());
            let url = config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string());
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
            let generator: Arc<dyn Generator> =
                Arc::new(OpenAIGenerator::new(url, model, api_key, timeout)?);
            Ok(generator)
        }
        other => bail!("Unknown generation provider: {}", other),
    }
}
