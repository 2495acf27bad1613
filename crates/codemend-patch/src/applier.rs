//! Line-range patching of project files with backup, rollback and reindex.

use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use codemend_index::{ChunkStore, CodeIndexer, EmbeddingProvider, IndexError};
use tokio::io::AsyncWriteExt as _;

use crate::error::{PatchError, Result};
use crate::lock::FileLocks;
use crate::proposal::EditProposal;

const BACKUP_SUFFIX: &str = ".backup";
const TEMP_SUFFIX: &str = ".codemend-tmp";

/// Refreshes the index records of one project file.
pub trait Reindexer: Send + Sync {
    /// # Errors
    ///
    /// Returns the index error that prevented the refresh.
    fn reindex(
        &self,
        root: &Path,
        rel_path: &str,
    ) -> impl Future<Output = std::result::Result<usize, IndexError>> + Send;
}

impl<S: ChunkStore, E: EmbeddingProvider> Reindexer for CodeIndexer<S, E> {
    async fn reindex(&self, root: &Path, rel_path: &str) -> std::result::Result<usize, IndexError> {
        self.reindex_file(root, rel_path).await
    }
}

/// Replaces a file's bytes.
pub trait ContentWriter: Send + Sync {
    /// # Errors
    ///
    /// Returns the IO error of the failed write. The target may be left in any
    /// state; the applier restores it from the backup.
    fn write(&self, path: &Path, contents: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
}

/// Writes and syncs a temporary sibling, then renames it over the target.
/// The sibling is removed again if any step fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct RenameWriter;

impl ContentWriter for RenameWriter {
    async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let tmp = sibling(path, TEMP_SUFFIX);
        let result = replace_via(&tmp, path, contents).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        result
    }
}

async fn replace_via(tmp: &Path, path: &Path, contents: &[u8]) -> io::Result<()> {
    {
        let mut file = tokio::fs::File::create(tmp).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
    }
    if let Ok(meta) = tokio::fs::metadata(path).await {
        tokio::fs::set_permissions(tmp, meta.permissions()).await?;
    }
    tokio::fs::rename(tmp, path).await
}

/// A proposal that reached disk.
#[derive(Debug)]
pub struct AppliedEdit {
    /// Normalized project-relative path.
    pub rel_path: String,
    /// Range actually replaced, after drift adjustment.
    pub start_line: usize,
    pub end_line: usize,
    /// Line count after the edit minus line count before.
    pub line_delta: isize,
    /// Records written by the reindex, when it succeeded.
    pub chunks_reindexed: usize,
    /// Set when the edit is on disk but the index could not be refreshed.
    pub reindex_error: Option<PatchError>,
}

/// Applies single proposals under per-file locks.
pub struct PatchApplier<R, W = RenameWriter> {
    root: PathBuf,
    reindexer: Arc<R>,
    writer: W,
    locks: Arc<FileLocks>,
}

impl<R, W> std::fmt::Debug for PatchApplier<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchApplier")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl<R: Reindexer> PatchApplier<R> {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, reindexer: Arc<R>) -> Self {
        Self {
            root: root.into(),
            reindexer,
            writer: RenameWriter,
            locks: Arc::new(FileLocks::new()),
        }
    }
}

impl<R: Reindexer, W: ContentWriter> PatchApplier<R, W> {
    #[must_use]
    pub fn with_writer<W2: ContentWriter>(self, writer: W2) -> PatchApplier<R, W2> {
        PatchApplier {
            root: self.root,
            reindexer: self.reindexer,
            writer,
            locks: self.locks,
        }
    }

    /// Share locks with other appliers working on the same tree.
    #[must_use]
    pub fn with_locks(mut self, locks: Arc<FileLocks>) -> Self {
        self.locks = locks;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate and apply one proposal whose line numbers refer to the file as
    /// it is now.
    ///
    /// The file lock is held from the read through the reindex. A reindex
    /// failure does not undo the edit; it is returned in
    /// [`AppliedEdit::reindex_error`].
    ///
    /// # Errors
    ///
    /// - `InvalidProposal` when the path leaves the project, the file is
    ///   missing or not UTF-8 text, the range is out of bounds, or a
    ///   `<file>.backup` already exists. Nothing is written.
    /// - `WriteFailure` when the write failed and the original was restored.
    /// - `RollbackFailure` when the restore failed too.
    pub async fn apply_one(&self, proposal: &EditProposal) -> Result<AppliedEdit> {
        let (abs_path, rel_path) = resolve_target(&self.root, proposal).await?;

        let _guard = self.locks.acquire(&abs_path).await;

        let original = tokio::fs::read(&abs_path).await?;
        let text = std::str::from_utf8(&original)
            .map_err(|_| invalid(proposal, "file is not UTF-8 text"))?;

        let line_count = text.lines().count();
        if let Some(reason) = check_bounds(proposal.start_line, proposal.end_line, line_count) {
            return Err(invalid(proposal, &reason));
        }

        let patched = splice(
            text,
            proposal.start_line,
            proposal.end_line,
            &proposal.new_content,
        );
        let line_delta = proposal.line_delta();

        let backup = sibling(&abs_path, BACKUP_SUFFIX);
        if tokio::fs::try_exists(&backup).await? {
            return Err(invalid(
                proposal,
                &format!("backup path {} already exists", backup.display()),
            ));
        }

        self.write_with_backup(&abs_path, &backup, &patched).await?;
        tracing::info!(
            file = %rel_path,
            lines = format_args!("{}-{}", proposal.start_line, proposal.end_line),
            line_delta,
            "change applied"
        );

        let (chunks_reindexed, reindex_error) =
            match self.reindexer.reindex(&self.root, &rel_path).await {
                Ok(n) => (n, None),
                Err(source) => {
                    tracing::warn!(file = %rel_path, "reindex failed, index is stale: {source}");
                    (
                        0,
                        Some(PatchError::Reindex {
                            path: rel_path.clone(),
                            source,
                        }),
                    )
                }
            };

        Ok(AppliedEdit {
            rel_path,
            start_line: proposal.start_line,
            end_line: proposal.end_line,
            line_delta,
            chunks_reindexed,
            reindex_error,
        })
    }

    async fn write_with_backup(&self, path: &Path, backup: &Path, contents: &str) -> Result<()> {
        tokio::fs::copy(path, backup).await?;

        match self.writer.write(path, contents.as_bytes()).await {
            Ok(()) => {
                if let Err(e) = tokio::fs::remove_file(backup).await {
                    tracing::warn!(backup = %backup.display(), "could not remove backup: {e}");
                }
                Ok(())
            }
            Err(source) => {
                let path_str = path.display().to_string();
                if let Err(restore) = tokio::fs::rename(backup, path).await {
                    tracing::error!(
                        file = %path_str,
                        backup = %backup.display(),
                        "write failed and restore failed: {restore}"
                    );
                    return Err(PatchError::RollbackFailure {
                        path: path_str,
                        backup: backup.display().to_string(),
                        source: restore,
                    });
                }
                tracing::warn!(file = %path_str, "write failed, original restored: {source}");
                Err(PatchError::WriteFailure {
                    path: path_str,
                    source,
                })
            }
        }
    }
}

/// Reject paths that are absolute or climb out of `root`, including through
/// symlinks. Returns the canonical target and its normalized relative path.
async fn resolve_target(root: &Path, proposal: &EditProposal) -> Result<(PathBuf, String)> {
    let rel_path = normalize_relative(&proposal.file_path)
        .ok_or_else(|| invalid(proposal, "path escapes the project root"))?;

    let canonical_root = tokio::fs::canonicalize(root).await?;
    let target = match tokio::fs::canonicalize(root.join(&rel_path)).await {
        Ok(p) => p,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(invalid(proposal, "file not found"));
        }
        Err(e) => return Err(e.into()),
    };
    if !target.starts_with(&canonical_root) {
        return Err(invalid(proposal, "path escapes the project root"));
    }
    if !target.is_file() {
        return Err(invalid(proposal, "not a regular file"));
    }
    Ok((target, rel_path))
}

/// `/`-joined normal components of a relative path; `None` for absolute
/// paths, `..` segments, or an empty path.
pub(crate) fn normalize_relative(path: &str) -> Option<String> {
    let mut parts = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Reason the 1-based inclusive range cannot apply to a file of
/// `line_count` lines.
pub(crate) fn check_bounds(start: usize, end: usize, line_count: usize) -> Option<String> {
    if start == 0 {
        Some("line numbers start at 1".to_owned())
    } else if start > end {
        Some("start_line is after end_line".to_owned())
    } else if end > line_count {
        Some(format!("end_line is beyond the file's {line_count} lines"))
    } else {
        None
    }
}

/// Replace lines `start..=end` of `text` with the lines of `replacement`,
/// keeping the file's line terminator and trailing-newline convention.
pub(crate) fn splice(text: &str, start: usize, end: usize, replacement: &str) -> String {
    let eol = if text.contains("\r\n") { "\r\n" } else { "\n" };
    let trailing = text.ends_with('\n');

    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    out.extend_from_slice(&lines[..start - 1]);
    out.extend(replacement.lines());
    out.extend_from_slice(&lines[end..]);

    if out.is_empty() {
        return String::new();
    }
    let mut joined = out.join(eol);
    if trailing {
        joined.push_str(eol);
    }
    joined
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn invalid(proposal: &EditProposal, reason: &str) -> PatchError {
    PatchError::InvalidProposal {
        file_path: proposal.file_path.clone(),
        start_line: proposal.start_line,
        end_line: proposal.end_line,
        reason: reason.to_owned(),
    }
}
