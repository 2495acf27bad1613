//! Test-only mock LLM provider.

use std::sync::{Arc, Mutex};

use crate::error::LlmError;
use crate::provider::{LlmProvider, Message};

/// Scripted provider: replays queued chat responses and produces deterministic
/// bag-of-words embeddings so similarity tests have a meaningful ranking.
#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<String>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
    pub default_response: String,
    pub dimension: usize,
    pub fail_chat: bool,
    pub fail_embed: bool,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock response".into(),
            dimension: 384,
            fail_chat: false,
            fail_embed: false,
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_chat: true,
            fail_embed: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Messages received by `chat`, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if the request log mutex is poisoned.
    #[must_use]
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }

    /// Hashes lowercase alphanumeric tokens into `dimension` buckets.
    #[must_use]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        if self.dimension == 0 {
            return vector;
        }
        for token in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
        {
            let hash = blake3::hash(token.to_lowercase().as_bytes());
            let bytes = hash.as_bytes();
            let bucket = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]);
            #[allow(clippy::cast_possible_truncation)]
            let idx = (bucket % self.dimension as u64) as usize;
            vector[idx] += 1.0;
        }
        vector
    }
}

impl LlmProvider for MockProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        if self.fail_chat {
            return Err(LlmError::Other("mock LLM error".into()));
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(self.default_response.clone())
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        if self.fail_embed {
            return Err(LlmError::Unavailable);
        }
        Ok(self.embed_text(text))
    }

    fn supports_embeddings(&self) -> bool {
        !self.fail_embed
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
