//! Query pipeline: retrieve, generate, review and apply.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use codemend_index::{ChunkStore, CodeIndexer, CodeRetriever, EmbeddingProvider};
use codemend_llm::provider::Message;
use codemend_patch::{
    ApplyReport, GenerationService, PatchApplier, PatchSession, generate::DEFAULT_SYSTEM_PROMPT,
    parse_proposals,
};

/// Messages kept for follow-up queries; older turns are dropped first.
const MAX_HISTORY: usize = 20;

/// Reviews rendered proposals before anything is written.
pub trait Confirmer: Send + Sync {
    /// Returns `true` to apply the whole batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the reviewer could not be asked.
    fn confirm(&self, previews: &[String]) -> impl Future<Output = anyhow::Result<bool>> + Send;
}

/// Approves every batch. Used for `--yes` and `patch.auto_approve`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

impl Confirmer for AutoApprove {
    async fn confirm(&self, previews: &[String]) -> anyhow::Result<bool> {
        tracing::info!(changes = previews.len(), "auto-approving changes");
        Ok(true)
    }
}

#[derive(Debug)]
pub enum QueryOutcome {
    /// The index returned no chunks for the query.
    NothingRelevant,
    GenerationFailed(String),
    /// The reply carried no usable proposal.
    NoChanges,
    Cancelled,
    Applied(ApplyReport),
}

/// Runs queries against one indexed project, keeping conversation history
/// between them.
pub struct QueryProcessor<S, E, G> {
    retriever: CodeRetriever<S, E>,
    generator: G,
    applier: PatchApplier<CodeIndexer<S, E>>,
    top_k: usize,
    system_prompt: String,
    history: Vec<Message>,
}

impl<S, E, G> QueryProcessor<S, E, G>
where
    S: ChunkStore,
    E: EmbeddingProvider,
    G: GenerationService,
{
    pub fn new(
        root: impl AsRef<Path>,
        indexer: Arc<CodeIndexer<S, E>>,
        generator: G,
        top_k: usize,
    ) -> Self {
        let retriever = CodeRetriever::new(
            Arc::clone(indexer.store()),
            Arc::clone(indexer.embedder()),
        );
        Self {
            retriever,
            generator,
            applier: PatchApplier::new(root.as_ref(), indexer),
            top_k,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            history: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.applier.root()
    }

    /// Run one query end to end.
    ///
    /// Generation failures and an empty retrieval are reported as outcomes,
    /// not errors.
    ///
    /// # Errors
    ///
    /// Returns an error if retrieval fails, the confirmer fails, or the patch
    /// session is driven out of order.
    pub async fn process<C: Confirmer>(
        &mut self,
        query: &str,
        confirmer: &C,
    ) -> anyhow::Result<QueryOutcome> {
        let retrieved = self
            .retriever
            .retrieve(query, self.top_k)
            .await
            .context("retrieval failed")?;
        if retrieved.is_empty() {
            tracing::info!("no relevant code found");
            return Ok(QueryOutcome::NothingRelevant);
        }

        let reply = match self
            .generator
            .generate(&self.system_prompt, query, &retrieved, &self.history)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("generation failed: {e}");
                return Ok(QueryOutcome::GenerationFailed(e.to_string()));
            }
        };
        self.remember(query, &reply);

        let proposals = parse_proposals(&reply);
        if proposals.is_empty() {
            tracing::info!("model proposed no changes");
            return Ok(QueryOutcome::NoChanges);
        }
        tracing::info!(proposals = proposals.len(), "changes proposed");

        let mut session = PatchSession::new(proposals);
        let previews = session.preview(self.applier.root()).await?;
        let approved = confirmer
            .confirm(&previews)
            .await
            .context("confirmation failed")?;
        session.confirm(approved)?;
        if !approved {
            return Ok(QueryOutcome::Cancelled);
        }

        let report = session.apply(&self.applier).await?;
        tracing::info!(
            applied = report.applied(),
            failed = report.failed(),
            stale = report.stale(),
            state = ?session.state(),
            "changes processed"
        );
        Ok(QueryOutcome::Applied(report))
    }

    fn remember(&mut self, query: &str, reply: &str) {
        self.history.push(Message::user(query));
        self.history.push(Message::assistant(reply));
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
    }
}
