//! Configuration parsing and validation.
//!
//! `lakebridge` is configured via a TOML file (default: `config/lakebridge.toml`).
//! The config defines the source roots to ingest, the transformation worker
//! pool sizing, the batch executor, embedding/chunking parameters, and the
//! connection details for the four external collaborators: the source
//! repository, the content lake, the extraction service, and the
//! embedding/chat model endpoints.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub sources: Vec<SourceRootConfig>,
    #[serde(default)]
    pub exclude: ExcludeConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    pub embedding: EmbeddingConfig,
    pub chat: ChatConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    pub lake: LakeConfig,
    pub transform_service: TransformServiceConfig,
    pub source: SourceConnectionConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub semantic_search: SemanticSearchConfig,
    pub server: ServerConfig,
}

/// One root folder in the source repository to ingest from.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceRootConfig {
    pub path: String,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub mime_types: Vec<String>,
}

/// Exclusion rules applied during discovery (spec §4.4).
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ExcludeConfig {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub aspects: Vec<String>,
}

/// Transformation worker pool sizing (spec §4.7).
#[derive(Debug, Deserialize, Clone)]
pub struct TransformConfig {
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_worker_threads() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    1000
}

/// Embedding/chunking parameters (spec §4.8/§4.9).
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub model_name: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    100
}

/// Chat model connection, used by the RAG orchestrator (spec §4.11).
#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    pub endpoint: String,
    pub model_name: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Batch-ingestion executor sizing (spec §5/§6).
#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default)]
    pub executor: BatchExecutorConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            executor: BatchExecutorConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchExecutorConfig {
    #[serde(default = "default_core_size")]
    pub core_size: usize,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_await_termination_secs")]
    pub await_termination_seconds: u64,
}

impl Default for BatchExecutorConfig {
    fn default() -> Self {
        Self {
            core_size: default_core_size(),
            max_size: default_max_size(),
            queue_capacity: default_queue_capacity(),
            await_termination_seconds: default_await_termination_secs(),
        }
    }
}

fn default_core_size() -> usize {
    1
}
fn default_max_size() -> usize {
    1
}
fn default_await_termination_secs() -> u64 {
    5
}

/// Content lake connection (spec §4.2).
#[derive(Debug, Deserialize, Clone)]
pub struct LakeConfig {
    pub url: String,
    pub repository_id: String,
    pub target_path: String,
    pub idp: IdpConfig,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub model: LakeModelConfig,
}

/// OAuth2 Resource-Owner-Password credentials for the lake (spec §5).
#[derive(Debug, Deserialize, Clone)]
pub struct IdpConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LakeModelConfig {
    #[serde(default)]
    pub bootstrap: LakeModelBootstrapConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LakeModelBootstrapConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub fragments: Vec<String>,
}

impl Default for LakeModelBootstrapConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fragments: Vec::new(),
        }
    }
}

/// Text-extraction service connection (spec §4.3).
#[derive(Debug, Deserialize, Clone)]
pub struct TransformServiceConfig {
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// Source repository connection (spec §4.1).
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConnectionConfig {
    pub url: String,
    pub security: SourceSecurityConfig,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceSecurityConfig {
    pub basic_auth: BasicAuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

/// RAG orchestration defaults (spec §4.11).
#[derive(Debug, Deserialize, Clone)]
pub struct RagConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_min_score")]
    pub default_min_score: f64,
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,
    #[serde(default = "default_system_prompt")]
    pub default_system_prompt: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            default_min_score: default_min_score(),
            max_context_length: default_max_context_length(),
            default_system_prompt: default_system_prompt(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_min_score() -> f64 {
    0.5
}
fn default_max_context_length() -> usize {
    12000
}
fn default_system_prompt() -> String {
    "Answer strictly from the given context; cite sources by their label; state when \
     the context is insufficient; be concise."
        .to_string()
}

/// Semantic search endpoint defaults (spec §4.10).
#[derive(Debug, Deserialize, Clone)]
pub struct SemanticSearchConfig {
    #[serde(default = "default_min_score")]
    pub default_min_score: f64,
}

impl Default for SemanticSearchConfig {
    fn default() -> Self {
        Self {
            default_min_score: default_min_score(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.embedding.chunk_size == 0 {
        anyhow::bail!("embedding.chunk_size must be > 0");
    }
    if config.embedding.chunk_overlap >= config.embedding.chunk_size {
        anyhow::bail!("embedding.chunk_overlap must be < embedding.chunk_size");
    }
    if config.transform.worker_threads == 0 {
        anyhow::bail!("transform.worker_threads must be > 0");
    }
    if config.transform.queue_capacity == 0 {
        anyhow::bail!("transform.queue_capacity must be > 0");
    }
    if config.rag.default_top_k == 0 {
        anyhow::bail!("rag.default_top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.rag.default_min_score) {
        anyhow::bail!("rag.default_min_score must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.semantic_search.default_min_score) {
        anyhow::bail!("semantic_search.default_min_score must be in [0.0, 1.0]");
    }
    if config.lake.model.bootstrap.enabled && config.lake.model.bootstrap.fragments.is_empty() {
        anyhow::bail!("lake.model.bootstrap.fragments must be non-empty when bootstrap is enabled");
    }

    Ok(config)
}
