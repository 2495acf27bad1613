use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling options forwarded to the backend on every chat call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChatOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            temperature: 0.1,
        }
    }
}

pub trait LlmProvider: Send + Sync {
    /// Send messages to the LLM and return the assistant response.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails to communicate or the response is invalid.
    fn chat(&self, messages: &[Message]) -> impl Future<Output = Result<String, LlmError>> + Send;

    /// Embed `text` into a vector.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::EmbedUnsupported` for chat-only backends, or the
    /// transport error of the embedding request.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;

    fn supports_embeddings(&self) -> bool;

    fn name(&self) -> &'static str;
}
