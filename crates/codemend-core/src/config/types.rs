use std::fmt;

use serde::{Deserialize, Serialize};

/// Chat backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Claude,
    Ollama,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chunk store backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// `.codebase_index/chunks.db` inside the project.
    #[default]
    Sqlite,
    /// Process-local, rebuilt on every run.
    Memory,
}

/// A value that never shows up in `Debug` or `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub patch: PatchConfig,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

#[derive(Debug, Default)]
pub struct ResolvedSecrets {
    pub claude_api_key: Option<Secret>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    /// Ollama endpoint, used for embeddings and for chat when
    /// `provider = "ollama"`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_provider() -> ProviderKind {
    ProviderKind::Claude
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_model() -> String {
    "claude-3-5-sonnet-latest".into()
}

fn default_embedding_model() -> String {
    "all-minilm".into()
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_temperature() -> f32 {
    0.1
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub backend: IndexBackend,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_embedding_dimension() -> usize {
    codemend_index::embedding::DEFAULT_DIMENSION
}

fn default_top_k() -> usize {
    codemend_index::retriever::DEFAULT_TOP_K
}

fn default_concurrency() -> usize {
    4
}

fn default_extensions() -> Vec<String> {
    codemend_index::indexer::DEFAULT_EXTENSIONS
        .iter()
        .map(ToString::to_string)
        .collect()
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::default(),
            embedding_dimension: default_embedding_dimension(),
            top_k: default_top_k(),
            concurrency: default_concurrency(),
            extensions: default_extensions(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PatchConfig {
    /// Apply proposals without asking.
    #[serde(default)]
    pub auto_approve: bool,
}
