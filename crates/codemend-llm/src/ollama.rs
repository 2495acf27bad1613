use ollama_rs::Ollama;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};

use crate::error::LlmError;
use crate::provider::{LlmProvider, Message, Role};

const DEFAULT_PORT: u16 = 11434;

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Ollama,
    model: String,
    embedding_model: String,
}

impl OllamaProvider {
    #[must_use]
    pub fn new(base_url: &str, model: String, embedding_model: String) -> Self {
        let (host, port) = parse_host_port(base_url);
        Self {
            client: Ollama::new(host, port),
            model,
            embedding_model,
        }
    }

    /// Check if Ollama is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection to Ollama fails.
    pub async fn health_check(&self) -> Result<(), LlmError> {
        self.client
            .list_local_models()
            .await
            .map_err(|e| LlmError::Other(format!("failed to connect to Ollama: {e}")))?;
        Ok(())
    }
}

impl LlmProvider for OllamaProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        let ollama_messages: Vec<ChatMessage> = messages.iter().map(convert_message).collect();
        let request = ChatMessageRequest::new(self.model.clone(), ollama_messages);

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| LlmError::Other(format!("Ollama chat request failed: {e}")))?;

        Ok(response.message.content)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let request = GenerateEmbeddingsRequest::new(
            self.embedding_model.clone(),
            EmbeddingsInput::from(text),
        );

        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| LlmError::Other(format!("Ollama embedding request failed: {e}")))?;

        response
            .embeddings
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse { provider: "ollama" })
    }

    fn supports_embeddings(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

fn convert_message(msg: &Message) -> ChatMessage {
    match msg.role {
        Role::System => ChatMessage::system(msg.content.clone()),
        Role::User => ChatMessage::user(msg.content.clone()),
        Role::Assistant => ChatMessage::assistant(msg.content.clone()),
    }
}

fn parse_host_port(url: &str) -> (String, u16) {
    let url = url.trim_end_matches('/');
    if let Some(colon_pos) = url.rfind(':')
        && let Ok(port) = url[colon_pos + 1..].parse::<u16>()
    {
        return (url[..colon_pos].to_owned(), port);
    }
    (url.to_owned(), DEFAULT_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_port_with_port() {
        let (host, port) = parse_host_port("http://localhost:11434");
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11434);
    }

    #[test]
    fn parse_host_port_without_port_uses_default() {
        let (host, port) = parse_host_port("http://ollama.internal/");
        assert_eq!(host, "http://ollama.internal");
        assert_eq!(port, DEFAULT_PORT);
    }

    #[test]
    fn convert_message_keeps_role() {
        let msg = convert_message(&Message::system("rules"));
        assert_eq!(msg.content, "rules");
    }

    #[tokio::test]
    async fn embed_with_unreachable_endpoint_errors() {
        let provider =
            OllamaProvider::new("http://127.0.0.1:1", "test-model".into(), "embed".into());
        assert!(provider.embed("test text").await.is_err());
    }

    #[tokio::test]
    async fn health_check_with_unreachable_endpoint_errors() {
        let provider =
            OllamaProvider::new("http://127.0.0.1:1", "test-model".into(), "embed".into());
        assert!(provider.health_check().await.is_err());
    }
}
