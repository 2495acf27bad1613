//! Error types for codemend-index.

use std::num::TryFromIntError;

/// Errors that can occur during chunk extraction, storage and indexing.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files or the index directory.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Chunk store backend failure.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Schema migration failure while opening the store.
    #[error("storage migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Source could not be parsed into a syntax tree.
    #[error("parse failed for {path}: {reason}")]
    Parse { path: String, reason: String },

    /// File content is binary or not valid UTF-8.
    #[error("cannot decode {path} as UTF-8 text")]
    Decode { path: String },

    /// Stored embedding blob has an unexpected length.
    #[error("corrupt embedding for chunk {content_hash}")]
    CorruptEmbedding { content_hash: String },

    /// Line numbers that do not fit the storage integer type.
    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] TryFromIntError),
}

impl IndexError {
    /// Errors that must abort the whole operation rather than a single file.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Migrate(_) | Self::CorruptEmbedding { .. }
        )
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
