//! Configuration.
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables. Every section has defaults, so an empty file (or none) is a
//! valid local setup against Ollama and an on-disk SQLite index.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::error::{SiftError, SiftResult};
use crate::fusion::{ExpansionMode, FusionSettings};
use crate::model::DEFAULT_QUALITY_SCORE;
use crate::retry::RetryPolicy;

/// Default config file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".sift/config.toml";

/// Default Ollama API URL.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default Qdrant gRPC URL.
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";

/// Default arXiv query endpoint.
pub const DEFAULT_ARXIV_URL: &str = "http://export.arxiv.org/api/query";

/// Which generation service to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationProvider {
    Ollama,
    Anthropic,
    OpenAi,
    AzureOpenAi,
}

impl FromStr for GenerationProvider {
    type Err = SiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "anthropic" => Ok(Self::Anthropic),
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "azure" | "azure_openai" | "azure_open_ai" => Ok(Self::AzureOpenAi),
            other => Err(SiftError::config(format!(
                "Unknown generation provider '{}'. Use: ollama, anthropic, openai, azure_openai",
                other
            ))),
        }
    }
}

/// Where the similarity index lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    Sqlite,
    Qdrant,
}

impl FromStr for IndexBackend {
    type Err = SiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "qdrant" => Ok(Self::Qdrant),
            other => Err(SiftError::config(format!(
                "Unknown index backend '{}'. Use: sqlite, qdrant",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: GenerationProvider,
    /// Base URL (Ollama, OpenAI-compatible) or Azure endpoint.
    pub base_url: Option<String>,
    /// Model name, or deployment name for Azure. Unset means the
    /// provider's default.
    pub model: Option<String>,
    /// Azure `api-version` query parameter.
    pub api_version: Option<String>,
    /// Read from the environment, never written back out.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: GenerationProvider::Ollama,
            base_url: None,
            model: None,
            api_version: None,
            api_key: None,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            model: "nomic-embed-text".to_string(),
            dimension: 768,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    /// SQLite database file.
    pub path: PathBuf,
    pub qdrant_url: String,
    pub collection: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Sqlite,
            path: PathBuf::from(".sift/index.db"),
            qdrant_url: DEFAULT_QDRANT_URL.to_string(),
            collection: "sift_documents".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub arxiv_url: String,
    pub max_results: usize,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            arxiv_url: DEFAULT_ARXIV_URL.to_string(),
            max_results: 10,
            timeout_secs: 30,
        }
    }
}

/// Budgets for the generation-backed stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tokens of document content sent per generation call.
    pub content_token_budget: usize,
    pub summary_max_tokens: u32,
    /// How many leading documents the analyst sees.
    pub analysis_documents: usize,
    pub analysis_max_tokens: u32,
    pub coordinate_max_tokens: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            content_token_budget: 1_000,
            summary_max_tokens: 400,
            analysis_documents: 3,
            analysis_max_tokens: 500,
            coordinate_max_tokens: 400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub default_quality: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            default_quality: DEFAULT_QUALITY_SCORE,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftConfig {
    pub generation: GenerationConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub search: SearchConfig,
    pub fusion: FusionSettings,
    pub pipeline: PipelineConfig,
    pub retry: RetryPolicy,
    pub scoring: ScoringConfig,
}

impl SiftConfig {
    /// Parse TOML text.
    pub fn from_toml(text: &str) -> SiftResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from `path` if it exists (defaults otherwise), then apply the
    /// process environment.
    pub fn load(path: Option<&Path>) -> SiftResult<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let mut config = if path.exists() {
            debug!(path = %path.display(), "Loading config file");
            Self::from_toml(&std::fs::read_to_string(path)?)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> SiftResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("SIFT_GENERATION_PROVIDER") {
            self.generation.provider = provider.parse()?;
        }
        if let Some(url) = lookup("OLLAMA_URL") {
            self.embedding.base_url = url.clone();
            if self.generation.provider == GenerationProvider::Ollama {
                self.generation.base_url = Some(url);
            }
        }
        if let Some(model) = lookup("OLLAMA_EMBED_MODEL") {
            self.embedding.model = model;
        }

        match self.generation.provider {
            GenerationProvider::Ollama => {
                if let Some(model) = lookup("OLLAMA_GEN_MODEL") {
                    self.generation.model = Some(model);
                }
            }
            GenerationProvider::Anthropic => {
                if let Some(key) = lookup("ANTHROPIC_API_KEY") {
                    self.generation.api_key = Some(key);
                }
                if let Some(model) = lookup("ANTHROPIC_MODEL") {
                    self.generation.model = Some(model);
                }
            }
            GenerationProvider::OpenAi => {
                if let Some(key) = lookup("OPENAI_API_KEY") {
                    self.generation.api_key = Some(key);
                }
                if let Some(model) = lookup("OPENAI_MODEL") {
                    self.generation.model = Some(model);
                }
            }
            GenerationProvider::AzureOpenAi => {
                if let Some(key) = lookup("AZURE_OPENAI_API_KEY") {
                    self.generation.api_key = Some(key);
                }
                if let Some(endpoint) = lookup("AZURE_OPENAI_ENDPOINT") {
                    self.generation.base_url = Some(endpoint);
                }
                if let Some(deployment) = lookup("AZURE_OPENAI_DEPLOYMENT") {
                    self.generation.model = Some(deployment);
                }
                if let Some(version) = lookup("AZURE_OPENAI_API_VERSION") {
                    self.generation.api_version = Some(version);
                }
            }
        }

        if let Some(backend) = lookup("SIFT_INDEX_BACKEND") {
            self.index.backend = backend.parse()?;
        }
        if let Some(path) = lookup("SIFT_INDEX_PATH") {
            self.index.path = PathBuf::from(path);
        }
        if let Some(url) = lookup("QDRANT_URL") {
            self.index.qdrant_url = url;
        }
        if let Some(k) = lookup("SIFT_FUSION_K") {
            self.fusion.k = parse_number("SIFT_FUSION_K", &k)?;
        }
        if let Some(n) = lookup("SIFT_MAX_RESULTS") {
            self.search.max_results = parse_number("SIFT_MAX_RESULTS", &n)?;
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> SiftResult<()> {
        if self.fusion.k == 0 {
            return Err(SiftError::config("fusion.k must be at least 1"));
        }
        if self.embedding.dimension == 0 {
            return Err(SiftError::config("embedding.dimension must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.scoring.default_quality) {
            return Err(SiftError::config("scoring.default_quality must be within [0, 1]"));
        }
        if self.fusion.expansion == ExpansionMode::Generated && self.fusion.variant_count == 0 {
            return Err(SiftError::config(
                "fusion.variant_count must be at least 1 when expansion = \"generated\"",
            ));
        }
        match self.generation.provider {
            GenerationProvider::Anthropic | GenerationProvider::OpenAi
                if self.generation.api_key.is_none() =>
            {
                Err(SiftError::config(format!(
                    "{:?} generation requires an API key in the environment",
                    self.generation.provider
                )))
            }
            GenerationProvider::AzureOpenAi
                if self.generation.api_key.is_none()
                    || self.generation.base_url.is_none()
                    || self.generation.model.is_none() =>
            {
                Err(SiftError::config(
                    "Azure OpenAI generation requires AZURE_OPENAI_API_KEY, AZURE_OPENAI_ENDPOINT and AZURE_OPENAI_DEPLOYMENT",
                ))
            }
            _ => Ok(()),
        }
    }

    /// Render as TOML, without secrets.
    pub fn to_toml(&self) -> SiftResult<String> {
        toml::to_string_pretty(self).map_err(|e| SiftError::config(e.to_string()))
    }
}

fn parse_number(key: &str, value: &str) -> SiftResult<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| SiftError::config(format!("{} must be a positive integer, got '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = SiftConfig::default();
        assert_eq!(config.fusion.k, 10);
        assert_eq!(config.fusion.variant_count, 3);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.search.max_results, 10);
        assert_eq!(config.index.backend, IndexBackend::Sqlite);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SiftConfig::from_toml(
            r#"
            [fusion]
            k = 4

            [index]
            backend = "qdrant"
            collection = "papers"

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.fusion.k, 4);
        assert_eq!(config.fusion.variant_count, 3);
        assert_eq!(config.index.backend, IndexBackend::Qdrant);
        assert_eq!(config.index.collection, "papers");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 500);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SIFT_GENERATION_PROVIDER", "azure"),
            ("AZURE_OPENAI_API_KEY", "secret"),
            ("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com"),
            ("AZURE_OPENAI_DEPLOYMENT", "gpt-4o"),
            ("SIFT_FUSION_K", "7"),
            ("OLLAMA_URL", "http://gpu-box:11434"),
        ]
        .into_iter()
        .collect();

        let mut config = SiftConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.generation.provider, GenerationProvider::AzureOpenAi);
        assert_eq!(config.generation.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.generation.api_key.as_deref(), Some("secret"));
        assert_eq!(config.fusion.k, 7);
        assert_eq!(config.embedding.base_url, "http://gpu-box:11434");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let mut config = SiftConfig::default();
        let err = config
            .apply_env(|key| (key == "SIFT_INDEX_BACKEND").then(|| "faiss".to_string()))
            .unwrap_err();
        assert!(matches!(err, SiftError::Config(_)));

        let mut config = SiftConfig::default();
        config.generation.provider = GenerationProvider::Anthropic;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_is_not_serialized() {
        let mut config = SiftConfig::default();
        config.generation.api_key = Some("top-secret".to_string());
        let text = config.to_toml().unwrap();
        assert!(!text.contains("top-secret"));
    }
}
