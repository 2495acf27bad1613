//! Error types for codemend-patch.

use crate::session::PatchState;

/// Errors produced while generating, validating or applying edit proposals.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// Proposal rejected before any byte was written.
    #[error("invalid proposal for {file_path} lines {start_line}-{end_line}: {reason}")]
    InvalidProposal {
        file_path: String,
        start_line: usize,
        end_line: usize,
        reason: String,
    },

    /// Writing the patched file failed; the original was restored.
    #[error("write to {path} failed, original restored: {source}")]
    WriteFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing failed and the original could not be restored. The backup
    /// file is left in place.
    #[error("write to {path} failed and restore from {backup} failed: {source}")]
    RollbackFailure {
        path: String,
        backup: String,
        #[source]
        source: std::io::Error,
    },

    /// The generation service call failed.
    #[error("generation failed: {0}")]
    Generation(#[from] codemend_llm::LlmError),

    /// The file was patched but its index records could not be refreshed.
    #[error("reindex of {path} failed: {source}")]
    Reindex {
        path: String,
        #[source]
        source: codemend_index::IndexError,
    },

    #[error("invalid patch state transition from {from:?} to {to:?}")]
    InvalidTransition { from: PatchState, to: PatchState },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using `PatchError`.
pub type Result<T> = std::result::Result<T, PatchError>;
