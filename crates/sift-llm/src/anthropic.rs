//! Anthropic Messages API client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sift_core::{CollaboratorError, GenerationRequest, Generator, RetryPolicy};
use tracing::debug;

use crate::http::{client, empty_response, send_json};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default model when none is configured.
pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

#[derive(Clone)]
pub struct AnthropicGenerator {
    api_key: String,
    model: String,
    url: String,
    retry: RetryPolicy,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "is_blank")]
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

fn is_blank(s: &&str) -> bool {
    s.trim().is_empty()
}

impl MessagesResponse {
    /// Concatenated text blocks.
    fn text(&self) -> String {
        self.content
            .iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}

impl AnthropicGenerator {
    pub fn new(api_key: &str, model: &str, timeout_secs: u64) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            url: ANTHROPIC_API_URL.to_string(),
            retry: RetryPolicy::default(),
            client: client(timeout_secs),
        }
    }

    /// Point at a proxy or compatible endpoint instead of api.anthropic.com.
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn generate_once(&self, request: &GenerationRequest) -> Result<String, CollaboratorError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: &request.system,
            messages: vec![Message {
                role: "user",
                content: &request.user,
            }],
        };

        debug!(model = %self.model, "Calling Anthropic Messages API");
        let response: MessagesResponse = send_json(
            self.client
                .post(&self.url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body),
            "Anthropic",
        )
        .await?;

        let text = response.text();
        let text = text.trim();
        if text.is_empty() {
            return Err(empty_response("Anthropic"));
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl Generator for AnthropicGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, CollaboratorError> {
        self.retry
            .run("anthropic.messages", || self.generate_once(&request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_omits_empty_system() {
        let body = serde_json::to_value(MessagesRequest {
            model: DEFAULT_MODEL,
            max_tokens: 500,
            temperature: 0.3,
            system: "",
            messages: vec![Message {
                role: "user",
                content: "hi",
            }],
        })
        .unwrap();
        assert!(body.get("system").is_none());
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], 500);
    }

    #[test]
    fn test_text_blocks_are_joined() {
        let response: MessagesResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"Hello "},{"type":"tool_use","id":"x"},{"type":"text","text":"world"}]}"#,
        )
        .unwrap();
        assert_eq!(response.text(), "Hello world");
    }
}
