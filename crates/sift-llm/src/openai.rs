//! OpenAI-compatible chat completions, including Azure OpenAI deployments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sift_core::{CollaboratorError, GenerationRequest, Generator, RetryPolicy};
use tracing::debug;

use crate::http::{client, empty_response, send_json};

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-06-01";

#[derive(Debug, Clone, PartialEq)]
enum Flavor {
    /// `Authorization: Bearer`, model in the body.
    OpenAi,
    /// `api-key` header, deployment in the path.
    Azure,
}

#[derive(Clone)]
pub struct OpenAiGenerator {
    flavor: Flavor,
    url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiGenerator {
    /// OpenAI (or a compatible server) at `base_url`, e.g. `https://api.openai.com/v1`.
    pub fn openai(base_url: &str, api_key: &str, model: &str, timeout_secs: u64) -> Self {
        Self {
            flavor: Flavor::OpenAi,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
            retry: RetryPolicy::default(),
            client: client(timeout_secs),
        }
    }

    /// Azure OpenAI deployment on `endpoint`.
    pub fn azure(
        endpoint: &str,
        api_key: &str,
        deployment: &str,
        api_version: &str,
        timeout_secs: u64,
    ) -> Self {
        Self {
            flavor: Flavor::Azure,
            url: format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint.trim_end_matches('/'),
                deployment,
                api_version
            ),
            api_key: api_key.to_string(),
            model: deployment.to_string(),
            retry: RetryPolicy::default(),
            client: client(timeout_secs),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn service(&self) -> &'static str {
        match self.flavor {
            Flavor::OpenAi => "OpenAI",
            Flavor::Azure => "Azure OpenAI",
        }
    }

    fn body<'a>(&'a self, request: &'a GenerationRequest) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &request.system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.user,
        });
        ChatRequest {
            model: (self.flavor == Flavor::OpenAi).then_some(self.model.as_str()),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }

    async fn generate_once(&self, request: &GenerationRequest) -> Result<String, CollaboratorError> {
        let builder = self.client.post(&self.url).json(&self.body(request));
        let builder = match self.flavor {
            Flavor::OpenAi => builder.bearer_auth(&self.api_key),
            Flavor::Azure => builder.header("api-key", &self.api_key),
        };

        debug!(service = self.service(), model = %self.model, "Calling chat completions");
        let response: ChatResponse = send_json(builder, self.service()).await?;
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let text = text.trim();
        if text.is_empty() {
            return Err(empty_response(self.service()));
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, CollaboratorError> {
        self.retry
            .run("openai.chat", || self.generate_once(&request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_azure_url_and_body() {
        let generator = OpenAiGenerator::azure(
            "https://contoso.openai.azure.com/",
            "key",
            "gpt-4o",
            DEFAULT_AZURE_API_VERSION,
            30,
        );
        assert_eq!(
            generator.url,
            "https://contoso.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-06-01"
        );

        let request = GenerationRequest::new("be brief", "hello");
        let body = serde_json::to_value(generator.body(&request)).unwrap();
        assert!(body.get("model").is_none());
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
    }

    #[test]
    fn test_openai_body_carries_model() {
        let generator = OpenAiGenerator::openai(DEFAULT_OPENAI_URL, "key", "gpt-4o-mini", 30);
        let request = GenerationRequest::new("", "hello");
        let body = serde_json::to_value(generator.body(&request)).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_response_parsing() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"- step"}}]}"#,
        )
        .unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("- step"));
    }
}
