//! # Sift LLM
//!
//! Text generation clients. Each implements [`sift_core::Generator`] and
//! routes its calls through a [`sift_core::RetryPolicy`].

pub mod anthropic;
mod http;
pub mod ollama;
pub mod openai;

use anyhow::{Context, Result};
use sift_core::config::{GenerationConfig, GenerationProvider, DEFAULT_OLLAMA_URL};
use sift_core::{Generator, RetryPolicy};
use std::sync::Arc;

pub use anthropic::AnthropicGenerator;
pub use ollama::OllamaGenerator;
pub use openai::OpenAiGenerator;

/// Build the configured generator.
pub fn from_config(config: &GenerationConfig, retry: &RetryPolicy) -> Result<Arc<dyn Generator>> {
    let timeout = config.timeout_secs;
    let generator: Arc<dyn Generator> = match config.provider {
        GenerationProvider::Ollama => Arc::new(
            OllamaGenerator::new(
                config.base_url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL),
                config.model.as_deref().unwrap_or(ollama::DEFAULT_GEN_MODEL),
                timeout,
            )
            .with_retry(retry.clone()),
        ),
        GenerationProvider::Anthropic => {
            let key = config
                .api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is not set")?;
            let mut generator = AnthropicGenerator::new(
                key,
                config.model.as_deref().unwrap_or(anthropic::DEFAULT_MODEL),
                timeout,
            )
            .with_retry(retry.clone());
            if let Some(url) = &config.base_url {
                generator = generator.with_url(url);
            }
            Arc::new(generator)
        }
        GenerationProvider::OpenAi => {
            let key = config
                .api_key
                .as_deref()
                .context("OPENAI_API_KEY is not set")?;
            Arc::new(
                OpenAiGenerator::openai(
                    config.base_url.as_deref().unwrap_or(openai::DEFAULT_OPENAI_URL),
                    key,
                    config.model.as_deref().unwrap_or(openai::DEFAULT_OPENAI_MODEL),
                    timeout,
                )
                .with_retry(retry.clone()),
            )
        }
        GenerationProvider::AzureOpenAi => {
            let key = config
                .api_key
                .as_deref()
                .context("AZURE_OPENAI_API_KEY is not set")?;
            let endpoint = config
                .base_url
                .as_deref()
                .context("AZURE_OPENAI_ENDPOINT is not set")?;
            let deployment = config
                .model
                .as_deref()
                .context("AZURE_OPENAI_DEPLOYMENT is not set")?;
            Arc::new(
                OpenAiGenerator::azure(
                    endpoint,
                    key,
                    deployment,
                    config
                        .api_version
                        .as_deref()
                        .unwrap_or(openai::DEFAULT_AZURE_API_VERSION),
                    timeout,
                )
                .with_retry(retry.clone()),
            )
        }
    };
    Ok(generator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_an_error() {
        let config = GenerationConfig {
            provider: GenerationProvider::OpenAi,
            ..GenerationConfig::default()
        };
        let err = from_config(&config, &RetryPolicy::default()).err().unwrap();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_default_config_builds_ollama() {
        assert!(from_config(&GenerationConfig::default(), &RetryPolicy::default()).is_ok());
    }
}
