//! TOML configuration for the FAQ service.
//!
//! The configuration is resolved once at startup and handed to the
//! components that need it. Backend endpoints are always supplied here;
//! nothing in the crate inspects the environment to guess them.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeConfig {
    pub path: PathBuf,
    #[serde(default = "default_question_marker")]
    pub question_marker: String,
    #[serde(default = "default_answer_marker")]
    pub answer_marker: String,
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_question_marker() -> String {
    "Q:".to_string()
}
fn default_answer_marker() -> String {
    "A:".to_string()
}
fn default_separator() -> String {
    "---".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    /// Fan-out factor: each signal is queried for `top_k * candidate_multiplier`.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Below this top fused score the fixed fallback answer is returned.
    #[serde(default)]
    pub relevance_threshold: f64,
    /// Raw cosine floor; semantic candidates under it are dropped before
    /// fusion. Min-max normalization lifts the best semantic hit to 1.0,
    /// so without a floor every question has candidates and never falls
    /// back. `-1.0` keeps every candidate.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: Option<f32>,
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f64,
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            lexical_weight: default_lexical_weight(),
            candidate_multiplier: default_candidate_multiplier(),
            top_k: default_top_k(),
            relevance_threshold: 0.0,
            min_similarity: default_min_similarity(),
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
        }
    }
}

fn default_semantic_weight() -> f64 {
    0.6
}
fn default_lexical_weight() -> f64 {
    0.4
}
fn default_min_similarity() -> Option<f32> {
    Some(0.35)
}
fn default_candidate_multiplier() -> usize {
    3
}
fn default_top_k() -> usize {
    3
}
fn default_bm25_k1() -> f64 {
    1.2
}
fn default_bm25_b() -> f64 {
    0.75
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries used while building the index at startup. Query-time
    /// embedding is never retried.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            url: None,
            timeout_secs: default_embedding_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_temperature() -> f32 {
    0.3
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_limit")]
    pub default_limit: i64,
    #[serde(default = "default_history_max")]
    pub max_limit: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_history_limit(),
            max_limit: default_history_max(),
        }
    }
}

fn default_history_limit() -> i64 {
    10
}
fn default_history_max() -> i64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let r = &config.retrieval;
    if r.semantic_weight < 0.0 || r.lexical_weight < 0.0 {
        anyhow::bail!("retrieval weights must be >= 0.0");
    }
    if r.semantic_weight + r.lexical_weight <= 0.0 {
        anyhow::bail!("retrieval.semantic_weight and retrieval.lexical_weight cannot both be 0");
    }
    if r.candidate_multiplier < 1 {
        anyhow::bail!("retrieval.candidate_multiplier must be >= 1");
    }
    if r.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if r.min_similarity.is_some_and(|floor| !(-1.0..=1.0).contains(&floor)) {
        anyhow::bail!("retrieval.min_similarity must be in [-1.0, 1.0]");
    }
    if r.bm25_k1 < 0.0 || !(0.0..=1.0).contains(&r.bm25_b) {
        anyhow::bail!("retrieval.bm25_k1 must be >= 0 and retrieval.bm25_b in [0.0, 1.0]");
    }

    let k = &config.knowledge;
    if k.question_marker.trim().is_empty() || k.answer_marker.trim().is_empty() {
        anyhow::bail!("knowledge markers must not be empty");
    }

    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }

    if config.history.default_limit < 1 || config.history.max_limit < config.history.default_limit
    {
        anyhow::bail!("history.default_limit must be >= 1 and <= history.max_limit");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, ollama, or openai.",
            other
        ),
    }

    match config.generation.provider.as_str() {
        "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be ollama or openai.",
            other
        ),
    }

    Ok(())
}
