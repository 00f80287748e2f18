//! Ollama generation client (`/api/generate`, non-streaming).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sift_core::{CollaboratorError, GenerationRequest, Generator, RetryPolicy};
use tracing::debug;

use crate::http::{client, empty_response, send_json};

/// Default Ollama API URL.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default generation model.
pub const DEFAULT_GEN_MODEL: &str = "llama3.1";

#[derive(Clone)]
pub struct OllamaGenerator {
    base_url: String,
    model: String,
    retry: RetryPolicy,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: Options,
}

#[derive(Serialize)]
struct Options {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaGenerator {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            retry: RetryPolicy::default(),
            client: client(timeout_secs),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn generate_once(&self, request: &GenerationRequest) -> Result<String, CollaboratorError> {
        let body = GenerateRequest {
            model: &self.model,
            system: &request.system,
            prompt: &request.user,
            stream: false,
            options: Options {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };
        let result: GenerateResponse = send_json(
            self.client
                .post(format!("{}/api/generate", self.base_url))
                .json(&body),
            "Ollama",
        )
        .await?;

        let text = result.response.trim();
        if text.is_empty() {
            return Err(empty_response("Ollama"));
        }
        debug!(model = %self.model, chars = text.len(), "Ollama generation");
        Ok(text.to_string())
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, CollaboratorError> {
        self.retry
            .run("ollama.generate", || self.generate_once(&request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body() {
        let body = serde_json::to_value(GenerateRequest {
            model: "llama3.1",
            system: "sys",
            prompt: "hello",
            stream: false,
            options: Options {
                temperature: 0.5,
                num_predict: 64,
            },
        })
        .unwrap();
        assert_eq!(body["stream"], false);
        assert_eq!(body["prompt"], "hello");
        assert_eq!(body["options"]["num_predict"], 64);
    }

    #[test]
    fn test_response_parsing_tolerates_extra_fields() {
        let parsed: GenerateResponse =
            serde_json::from_str(r#"{"model":"llama3.1","response":" hi ","done":true}"#).unwrap();
        assert_eq!(parsed.response, " hi ");
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let generator =
            OllamaGenerator::new("http://127.0.0.1:9", DEFAULT_GEN_MODEL, 1).with_retry(RetryPolicy::none());
        let err = generator
            .generate(GenerationRequest::new("s", "u"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
