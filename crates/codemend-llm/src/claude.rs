use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::{ChatOptions, LlmProvider, Message, Role};
use crate::retry::send_with_retry;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct ClaudeProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    options: ChatOptions,
    api_url: String,
}

impl fmt::Debug for ClaudeProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaudeProvider")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("options", &self.options)
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl ClaudeProvider {
    #[must_use]
    pub fn new(api_key: String, model: String, options: ChatOptions) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            options,
            api_url: API_URL.to_owned(),
        }
    }

    /// Point the provider at a different messages endpoint.
    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, messages: &[Message]) -> reqwest::RequestBuilder {
        let (system, chat_messages) = split_messages(messages);

        let body = RequestBody {
            model: &self.model,
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
            system: system.as_deref(),
            messages: &chat_messages,
        };

        self.client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
    }
}

impl LlmProvider for ClaudeProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        let response =
            send_with_retry("claude", MAX_RETRIES, || self.build_request(messages).send()).await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            tracing::error!("Claude API error {status}: {text}");
            return Err(LlmError::Api {
                provider: "claude",
                status: status.as_u16(),
            });
        }

        let resp: ApiResponse = serde_json::from_str(&text)?;

        if let Some(ref usage) = resp.usage {
            tracing::debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Claude API usage"
            );
        }

        let content: String = resp
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect();

        if content.is_empty() {
            return Err(LlmError::EmptyResponse { provider: "claude" });
        }
        Ok(content)
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
        Err(LlmError::EmbedUnsupported { provider: "claude" })
    }

    fn supports_embeddings(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "claude"
    }
}

fn split_messages(messages: &[Message]) -> (Option<String>, Vec<ApiMessage<'_>>) {
    let mut system_parts = Vec::new();
    let mut chat = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(msg.content.as_str()),
            Role::User => chat.push(ApiMessage {
                role: "user",
                content: &msg.content,
            }),
            Role::Assistant => chat.push(ApiMessage {
                role: "assistant",
                content: &msg.content,
            }),
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    (system, chat)
}

#[derive(Serialize)]
struct RequestBody<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [ApiMessage<'a>],
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}
