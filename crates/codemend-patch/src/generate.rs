//! Generation service: turns a query and retrieved code into a model reply
//! that should carry edit proposals.

use std::fmt::Write;
use std::future::Future;
use std::sync::Arc;

use codemend_index::SearchHit;
use codemend_index::retriever::format_as_context;
use codemend_llm::provider::{LlmProvider, Message};

use crate::error::Result;

/// System prompt used when the caller supplies none.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a code modification assistant. \
Based on the user's query and the relevant code context, generate specific code changes.";

const INSTRUCTIONS: &str = "\
IMPORTANT INSTRUCTIONS:
1. Make MINIMAL changes - only modify what is necessary to address the query
2. Preserve existing imports, class/function signatures, and overall structure
3. If adding new code, add it without replacing existing working code
4. Be extremely careful with indentation and syntax; match the surrounding style
5. Only modify the specific lines that need to change
6. Do not rewrite entire functions unless absolutely necessary
7. Preserve all existing functionality

For each change, provide:
1. file_path: the file to modify, exactly as shown in the context
2. start_line: first line to replace (use the line numbers from the context)
3. end_line: last line to replace, inclusive
4. new_content: the code that replaces ONLY the specified lines
5. reasoning: why this specific change is needed

Respond with a single JSON object in this format:
{
  \"changes\": [
    {
      \"file_path\": \"path/to/file.py\",
      \"start_line\": 10,
      \"end_line\": 10,
      \"new_content\": \"    # only the line(s) that change\",
      \"reasoning\": \"explanation of change\"
    }
  ]
}

If nothing should change, respond with {\"changes\": []}.";

/// Produces the raw model reply for a query.
pub trait GenerationService: Send + Sync {
    /// # Errors
    ///
    /// Returns `PatchError::Generation` when the backend call fails.
    fn generate(
        &self,
        system_context: &str,
        query: &str,
        retrieved: &[SearchHit],
        history: &[Message],
    ) -> impl Future<Output = Result<String>> + Send;
}

/// [`GenerationService`] backed by any chat-capable [`LlmProvider`].
#[derive(Debug)]
pub struct LlmGenerator<P> {
    provider: Arc<P>,
}

impl<P: LlmProvider> LlmGenerator<P> {
    #[must_use]
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }
}

impl<P: LlmProvider> GenerationService for LlmGenerator<P> {
    async fn generate(
        &self,
        system_context: &str,
        query: &str,
        retrieved: &[SearchHit],
        history: &[Message],
    ) -> Result<String> {
        let system = if system_context.trim().is_empty() {
            DEFAULT_SYSTEM_PROMPT
        } else {
            system_context
        };

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system));
        messages.extend_from_slice(history);
        messages.push(Message::user(build_prompt(query, retrieved)));

        tracing::debug!(
            provider = self.provider.name(),
            chunks = retrieved.len(),
            history = history.len(),
            "requesting changes"
        );
        let reply = self.provider.chat(&messages).await?;
        Ok(reply)
    }
}

/// User turn carrying the query, the retrieved code and the reply contract.
#[must_use]
pub fn build_prompt(query: &str, retrieved: &[SearchHit]) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "User Query: {query}\n");
    let _ = writeln!(prompt, "Relevant Code Context:\n{}", format_as_context(retrieved));
    prompt.push_str(INSTRUCTIONS);
    prompt.push_str(
        "\n\nCRITICAL: Only suggest changes that directly address the user's query. \
Be precise with line numbers. Make the smallest possible changes. Do not rewrite working code.",
    );
    prompt
}
