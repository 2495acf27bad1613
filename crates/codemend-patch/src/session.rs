//! Batch state machine: propose → preview → confirm → apply → reindex.

use std::collections::HashMap;
use std::fmt::Write;
use std::path::Path;

use crate::applier::{ContentWriter, PatchApplier, Reindexer, check_bounds, normalize_relative};
use crate::error::{PatchError, Result};
use crate::proposal::EditProposal;

/// Lifecycle of a batch and of each proposal in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchState {
    Proposed,
    Previewed,
    Confirmed,
    Applied,
    Reindexed,
    Cancelled,
    Failed,
}

impl PatchState {
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Proposed, Self::Previewed)
                | (Self::Previewed, Self::Confirmed | Self::Cancelled)
                | (Self::Confirmed, Self::Applied | Self::Failed)
                | (Self::Applied, Self::Reindexed)
        )
    }

    /// # Errors
    ///
    /// Returns `PatchError::InvalidTransition` when `next` is not reachable
    /// from `self`.
    pub fn transition(&mut self, next: Self) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(PatchError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Reindexed | Self::Cancelled | Self::Failed)
    }
}

/// What happened to one proposal of a confirmed batch.
#[derive(Debug)]
pub struct ProposalOutcome {
    pub proposal: EditProposal,
    /// `Reindexed` on full success, `Applied` when the edit is on disk but the
    /// index is stale, `Failed` when nothing was written.
    pub state: PatchState,
    /// Range replaced in the file as it was at application time.
    pub applied_range: Option<(usize, usize)>,
    pub chunks_reindexed: usize,
    pub error: Option<PatchError>,
}

/// Outcomes of a confirmed batch in input order.
#[derive(Debug)]
pub struct ApplyReport {
    pub outcomes: Vec<ProposalOutcome>,
}

impl ApplyReport {
    /// Proposals whose edit reached disk, reindexed or not.
    #[must_use]
    pub fn applied(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.state, PatchState::Applied | PatchState::Reindexed))
            .count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state == PatchState::Failed)
            .count()
    }

    /// Proposals applied but left with stale index records.
    #[must_use]
    pub fn stale(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state == PatchState::Applied)
            .count()
    }
}

/// Edits already applied to one file in this batch, in original coordinates.
#[derive(Debug, Default)]
struct FileLedger {
    /// `(start_line, end_line, line_delta)` as proposed.
    applied: Vec<(usize, usize, isize)>,
}

impl FileLedger {
    /// Translate a range proposed against the original file into the file as
    /// it is now. Ranges overlapping an earlier edit cannot be translated.
    fn resolve(&self, start: usize, end: usize) -> std::result::Result<(usize, usize), String> {
        if let Some((s, e, _)) = self
            .applied
            .iter()
            .find(|(s, e, _)| start <= *e && *s <= end)
        {
            return Err(format!("overlaps lines {s}-{e} changed earlier in this batch"));
        }

        let shift: isize = self
            .applied
            .iter()
            .filter(|(_, e, _)| *e < start)
            .map(|(_, _, delta)| delta)
            .sum();

        let shifted = |line: usize| {
            isize::try_from(line)
                .ok()
                .and_then(|l| l.checked_add(shift))
                .and_then(|l| usize::try_from(l).ok())
                .filter(|l| *l >= 1)
        };
        match (shifted(start), shifted(end)) {
            (Some(s), Some(e)) => Ok((s, e)),
            _ => Err("range no longer exists after earlier changes".to_owned()),
        }
    }
}

/// One batch of proposals for a single query.
#[derive(Debug)]
pub struct PatchSession {
    proposals: Vec<EditProposal>,
    state: PatchState,
}

impl PatchSession {
    #[must_use]
    pub fn new(proposals: Vec<EditProposal>) -> Self {
        Self {
            proposals,
            state: PatchState::Proposed,
        }
    }

    #[must_use]
    pub fn state(&self) -> PatchState {
        self.state
    }

    #[must_use]
    pub fn proposals(&self) -> &[EditProposal] {
        &self.proposals
    }

    /// Render each proposal against the current file contents.
    ///
    /// Problems with a proposal (missing file, bad range) are rendered as an
    /// error line instead of failing the preview.
    ///
    /// # Errors
    ///
    /// Returns `PatchError::InvalidTransition` unless the session is
    /// `Proposed`.
    pub async fn preview(&mut self, root: &Path) -> Result<Vec<String>> {
        self.state.transition(PatchState::Previewed)?;

        let mut previews = Vec::with_capacity(self.proposals.len());
        for (i, proposal) in self.proposals.iter().enumerate() {
            previews.push(render_preview(root, i + 1, proposal).await);
        }
        Ok(previews)
    }

    /// Record the review decision. `false` cancels the batch; no file is
    /// touched.
    ///
    /// # Errors
    ///
    /// Returns `PatchError::InvalidTransition` unless the session is
    /// `Previewed`.
    pub fn confirm(&mut self, approved: bool) -> Result<()> {
        let next = if approved {
            PatchState::Confirmed
        } else {
            PatchState::Cancelled
        };
        self.state.transition(next)?;
        if !approved {
            tracing::info!(proposals = self.proposals.len(), "changes cancelled");
        }
        Ok(())
    }

    /// Apply every proposal in order. One failing proposal does not stop the
    /// rest.
    ///
    /// Line numbers are proposed against the files as they were before the
    /// batch. Earlier edits to the same file shift later ranges by their line
    /// delta; a later range overlapping an earlier edit is rejected.
    ///
    /// The session ends `Reindexed` when every proposal was applied and
    /// reindexed, `Failed` when none was applied, and `Applied` otherwise.
    ///
    /// # Errors
    ///
    /// Returns `PatchError::InvalidTransition` unless the session is
    /// `Confirmed`.
    pub async fn apply<R, W>(&mut self, applier: &PatchApplier<R, W>) -> Result<ApplyReport>
    where
        R: Reindexer,
        W: ContentWriter,
    {
        if !self.state.can_transition_to(PatchState::Applied) {
            return Err(PatchError::InvalidTransition {
                from: self.state,
                to: PatchState::Applied,
            });
        }

        let mut ledgers: HashMap<String, FileLedger> = HashMap::new();
        let mut outcomes = Vec::with_capacity(self.proposals.len());

        for proposal in &self.proposals {
            let outcome = apply_tracked(applier, proposal, &mut ledgers).await;
            if let (PatchState::Failed, Some(err)) = (outcome.state, &outcome.error) {
                tracing::warn!(
                    file = %proposal.file_path,
                    lines = format_args!("{}-{}", proposal.start_line, proposal.end_line),
                    "change skipped: {err}"
                );
            }
            outcomes.push(outcome);
        }

        let report = ApplyReport { outcomes };
        if report.applied() == 0 && !report.outcomes.is_empty() {
            self.state.transition(PatchState::Failed)?;
        } else {
            self.state.transition(PatchState::Applied)?;
            if report.stale() == 0 && report.failed() == 0 {
                self.state.transition(PatchState::Reindexed)?;
            }
        }
        Ok(report)
    }
}

async fn apply_tracked<R: Reindexer, W: ContentWriter>(
    applier: &PatchApplier<R, W>,
    proposal: &EditProposal,
    ledgers: &mut HashMap<String, FileLedger>,
) -> ProposalOutcome {
    let mut state = PatchState::Confirmed;
    let failed = |err: PatchError| ProposalOutcome {
        proposal: proposal.clone(),
        state: PatchState::Failed,
        applied_range: None,
        chunks_reindexed: 0,
        error: Some(err),
    };

    let key = normalize_relative(&proposal.file_path).unwrap_or_else(|| proposal.file_path.clone());
    let ledger = ledgers.entry(key).or_default();

    let (start, end) = match ledger.resolve(proposal.start_line, proposal.end_line) {
        Ok(range) => range,
        Err(reason) => {
            return failed(PatchError::InvalidProposal {
                file_path: proposal.file_path.clone(),
                start_line: proposal.start_line,
                end_line: proposal.end_line,
                reason,
            });
        }
    };
    let resolved = EditProposal {
        start_line: start,
        end_line: end,
        ..proposal.clone()
    };

    match applier.apply_one(&resolved).await {
        Ok(edit) => {
            ledger
                .applied
                .push((proposal.start_line, proposal.end_line, edit.line_delta));
            let _ = state.transition(PatchState::Applied);
            if edit.reindex_error.is_none() {
                let _ = state.transition(PatchState::Reindexed);
            }
            ProposalOutcome {
                proposal: proposal.clone(),
                state,
                applied_range: Some((edit.start_line, edit.end_line)),
                chunks_reindexed: edit.chunks_reindexed,
                error: edit.reindex_error,
            }
        }
        Err(err) => failed(err),
    }
}

async fn render_preview(root: &Path, index: usize, proposal: &EditProposal) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Change {index}:");
    let _ = writeln!(out, "File: {}", proposal.file_path);
    let _ = writeln!(out, "Lines: {}-{}", proposal.start_line, proposal.end_line);
    if !proposal.reasoning.is_empty() {
        let _ = writeln!(out, "Reasoning: {}", proposal.reasoning);
    }

    let Some(rel) = normalize_relative(&proposal.file_path) else {
        let _ = writeln!(out, "error: path escapes the project root");
        return out;
    };
    let current = match tokio::fs::read_to_string(root.join(&rel)).await {
        Ok(text) => text,
        Err(e) => {
            let _ = writeln!(out, "error: cannot read file: {e}");
            return out;
        }
    };

    let lines: Vec<&str> = current.lines().collect();
    if let Some(reason) = check_bounds(proposal.start_line, proposal.end_line, lines.len()) {
        let _ = writeln!(out, "error: {reason}");
        return out;
    }

    out.push_str("\nCurrent code:\n");
    for n in proposal.start_line..=proposal.end_line {
        let _ = writeln!(out, "{n:>3}: {}", lines[n - 1]);
    }
    out.push_str("\nNew code:\n");
    for (n, line) in (proposal.start_line..).zip(proposal.new_content.lines()) {
        let _ = writeln!(out, "{n:>3}: {line}");
    }
    if proposal.new_content.lines().next().is_none() {
        out.push_str("(lines deleted)\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use codemend_index::memory_store::InMemoryChunkStore;
    use codemend_index::{ChunkStore, CodeIndexer, IndexerConfig, ProviderEmbedder};
    use codemend_llm::mock::MockProvider;
    use tempfile::TempDir;

    use super::*;

    type TestIndexer = CodeIndexer<InMemoryChunkStore, ProviderEmbedder<MockProvider>>;

    fn indexer() -> Arc<TestIndexer> {
        let embedder = ProviderEmbedder::new(Arc::new(MockProvider::default()), 384);
        Arc::new(CodeIndexer::new(
            Arc::new(InMemoryChunkStore::new()),
            Arc::new(embedder),
            IndexerConfig::default(),
        ))
    }

    fn proposal(file: &str, start: usize, end: usize, new_content: &str) -> EditProposal {
        EditProposal {
            file_path: file.into(),
            start_line: start,
            end_line: end,
            new_content: new_content.into(),
            reasoning: "test".into(),
        }
    }

    fn numbered(n: usize) -> String {
        (1..=n).map(|i| format!("v{i} = {i}\n")).collect()
    }

    #[test]
    fn transitions_follow_the_lifecycle() {
        let mut state = PatchState::Proposed;
        state.transition(PatchState::Previewed).unwrap();
        state.transition(PatchState::Confirmed).unwrap();
        state.transition(PatchState::Applied).unwrap();
        state.transition(PatchState::Reindexed).unwrap();
        assert!(state.is_terminal());

        let mut early = PatchState::Proposed;
        assert!(matches!(
            early.transition(PatchState::Confirmed),
            Err(PatchError::InvalidTransition { .. })
        ));
        assert_eq!(early, PatchState::Proposed);
        assert!(!PatchState::Cancelled.can_transition_to(PatchState::Confirmed));
        assert!(PatchState::Confirmed.can_transition_to(PatchState::Failed));
    }

    #[test]
    fn ledger_shifts_ranges_below_earlier_edits() {
        let ledger = FileLedger {
            applied: vec![(2, 3, 2)],
        };
        assert_eq!(ledger.resolve(5, 6), Ok((7, 8)));
        assert_eq!(ledger.resolve(1, 1), Ok((1, 1)));
        assert!(ledger.resolve(3, 4).is_err());
    }

    #[tokio::test]
    async fn apply_before_confirm_is_rejected() {
        let dir = TempDir::new().unwrap();
        let applier = PatchApplier::new(dir.path(), indexer());
        let mut session = PatchSession::new(vec![proposal("a.py", 1, 1, "x")]);

        let err = session.apply(&applier).await.unwrap_err();
        assert!(matches!(
            err,
            PatchError::InvalidTransition {
                from: PatchState::Proposed,
                to: PatchState::Applied
            }
        ));
    }

    #[tokio::test]
    async fn preview_shows_current_and_new_lines() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), numbered(10)).unwrap();
        let mut session = PatchSession::new(vec![
            proposal("a.py", 3, 4, "x = 1"),
            proposal("a.py", 9, 12, "y"),
            proposal("missing.py", 1, 1, "z"),
        ]);

        let previews = session.preview(dir.path()).await.unwrap();
        assert_eq!(session.state(), PatchState::Previewed);
        assert!(previews[0].contains("Current code:\n  3: v3 = 3\n  4: v4 = 4\n"));
        assert!(previews[0].contains("New code:\n  3: x = 1\n"));
        assert!(previews[1].contains("error: end_line is beyond the file's 10 lines"));
        assert!(previews[2].contains("error: cannot read file"));
    }

    #[tokio::test]
    async fn cancel_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let original = numbered(5);
        std::fs::write(dir.path().join("a.py"), &original).unwrap();
        let applier = PatchApplier::new(dir.path(), indexer());
        let mut session = PatchSession::new(vec![proposal("a.py", 1, 1, "changed = 1")]);

        session.preview(dir.path()).await.unwrap();
        session.confirm(false).unwrap();
        assert_eq!(session.state(), PatchState::Cancelled);
        assert!(session.apply(&applier).await.is_err());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.py")).unwrap(),
            original
        );
    }

    #[tokio::test]
    async fn later_proposals_follow_line_drift() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), numbered(10)).unwrap();
        let applier = PatchApplier::new(dir.path(), indexer());
        let mut session = PatchSession::new(vec![
            proposal("a.py", 2, 2, "a = 1\nb = 2\nc = 3"),
            proposal("a.py", 8, 8, "eight = 8"),
            proposal("a.py", 5, 6, ""),
        ]);

        session.preview(dir.path()).await.unwrap();
        session.confirm(true).unwrap();
        let report = session.apply(&applier).await.unwrap();
        assert_eq!(report.applied(), 3);
        assert_eq!(session.state(), PatchState::Reindexed);
        assert_eq!(report.outcomes[1].applied_range, Some((10, 10)));
        assert_eq!(report.outcomes[2].applied_range, Some((7, 8)));

        let after = std::fs::read_to_string(dir.path().join("a.py")).unwrap();
        let expected = "v1 = 1\na = 1\nb = 2\nc = 3\nv3 = 3\nv4 = 4\nv7 = 7\neight = 8\nv9 = 9\nv10 = 10\n";
        assert_eq!(after, expected);
    }

    #[tokio::test]
    async fn overlapping_proposal_is_rejected_and_batch_continues() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), numbered(6)).unwrap();
        std::fs::write(dir.path().join("b.py"), numbered(3)).unwrap();
        let applier = PatchApplier::new(dir.path(), indexer());
        let mut session = PatchSession::new(vec![
            proposal("a.py", 2, 4, "mid = 0"),
            proposal("a.py", 4, 5, "late = 0"),
            proposal("b.py", 1, 1, "first = 0"),
        ]);

        session.preview(dir.path()).await.unwrap();
        session.confirm(true).unwrap();
        let report = session.apply(&applier).await.unwrap();

        assert_eq!(report.applied(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.outcomes[1].state, PatchState::Failed);
        assert!(matches!(
            report.outcomes[1].error,
            Some(PatchError::InvalidProposal { .. })
        ));
        assert_eq!(session.state(), PatchState::Applied);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("b.py")).unwrap(),
            "first = 0\nv2 = 2\nv3 = 3\n"
        );
    }

    #[tokio::test]
    async fn all_invalid_batch_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), numbered(3)).unwrap();
        let applier = PatchApplier::new(dir.path(), indexer());
        let mut session = PatchSession::new(vec![proposal("a.py", 4, 2, "x")]);

        session.preview(dir.path()).await.unwrap();
        session.confirm(true).unwrap();
        let report = session.apply(&applier).await.unwrap();
        assert_eq!(report.failed(), 1);
        assert_eq!(session.state(), PatchState::Failed);
    }

    #[tokio::test]
    async fn applied_lines_are_reindexed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("svc.py"),
            "def handler():\n    return 1\n\n\ndef other():\n    return 2\n",
        )
        .unwrap();
        let indexer = indexer();
        indexer.index_project(dir.path()).await.unwrap();
        let applier = PatchApplier::new(dir.path(), Arc::clone(&indexer));

        let mut session =
            PatchSession::new(vec![proposal("svc.py", 2, 2, "    return compute()")]);
        session.preview(dir.path()).await.unwrap();
        session.confirm(true).unwrap();
        let report = session.apply(&applier).await.unwrap();
        assert_eq!(report.outcomes[0].state, PatchState::Reindexed);

        let located = indexer.store().locate("svc.py", 2).await.unwrap().unwrap();
        assert!(located.content.contains("return compute()"));
        assert!(!located.content.contains("return 1"));
    }
}
