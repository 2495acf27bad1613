use crate::claude::ClaudeProvider;
use crate::error::LlmError;
#[cfg(feature = "mock")]
use crate::mock::MockProvider;
use crate::ollama::OllamaProvider;
use crate::provider::{LlmProvider, Message};

/// Generates a match over all `AnyProvider` variants, binding the inner provider
/// and evaluating the given expression for each arm.
macro_rules! delegate_provider {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyProvider::Ollama($p) => $expr,
            AnyProvider::Claude($p) => $expr,
            #[cfg(feature = "mock")]
            AnyProvider::Mock($p) => $expr,
        }
    };
}

/// Provider chosen at runtime from configuration.
#[derive(Debug, Clone)]
pub enum AnyProvider {
    Ollama(OllamaProvider),
    Claude(ClaudeProvider),
    #[cfg(feature = "mock")]
    Mock(MockProvider),
}

impl LlmProvider for AnyProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        delegate_provider!(self, |p| p.chat(messages).await)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        delegate_provider!(self, |p| p.embed(text).await)
    }

    fn supports_embeddings(&self) -> bool {
        delegate_provider!(self, |p| p.supports_embeddings())
    }

    fn name(&self) -> &'static str {
        delegate_provider!(self, |p| p.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatOptions;

    #[test]
    fn delegates_name_and_capabilities() {
        let claude = AnyProvider::Claude(ClaudeProvider::new(
            "k".into(),
            "m".into(),
            ChatOptions::default(),
        ));
        assert_eq!(claude.name(), "claude");
        assert!(!claude.supports_embeddings());

        let ollama = AnyProvider::Ollama(OllamaProvider::new(
            "http://localhost:11434",
            "llama3".into(),
            "nomic-embed-text".into(),
        ));
        assert_eq!(ollama.name(), "ollama");
        assert!(ollama.supports_embeddings());
    }

    #[tokio::test]
    async fn claude_variant_rejects_embedding() {
        let claude = AnyProvider::Claude(ClaudeProvider::new(
            "k".into(),
            "m".into(),
            ChatOptions::default(),
        ));
        assert!(claude.embed("x").await.is_err());
    }
}
