//! Project indexing orchestrator: walk → extract → embed → store.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;

use crate::chunker::extract;
use crate::embedding::EmbeddingProvider;
use crate::error::{IndexError, Result};
use crate::languages::detect_language;
use crate::store::{ChunkStore, INDEX_DIR_NAME};

/// Extensions indexed when the configuration does not override them.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "py", "js", "jsx", "ts", "tsx", "java", "c", "h", "cpp", "cc", "hpp", "rs", "go",
];

/// Directory names never descended into, in addition to dot-directories.
pub const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    "__pycache__",
    "venv",
    "env",
    "target",
    "build",
    "dist",
];

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// File extensions (without the dot) eligible for indexing.
    pub extensions: Vec<String>,
    /// Files extracted and embedded at the same time.
    pub concurrency: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(ToString::to_string).collect(),
            concurrency: 4,
        }
    }
}

/// Summary of an indexing run.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub files_scanned: usize,
    /// Files that contributed at least one new record.
    pub files_indexed: usize,
    /// Binary or non-UTF-8 files.
    pub files_skipped: usize,
    pub chunks_created: usize,
    /// Chunks whose content hash was already stored.
    pub chunks_skipped: usize,
    /// Records dropped because their file disappeared.
    pub chunks_removed: usize,
    /// Per-file failures as `path: error`.
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Directory holding the persisted index of `root`.
#[must_use]
pub fn index_dir(root: &Path) -> PathBuf {
    root.join(INDEX_DIR_NAME)
}

/// Whether `root` already has a persisted index.
#[must_use]
pub fn index_exists(root: &Path) -> bool {
    index_dir(root).is_dir()
}

/// Orchestrates code indexing over a project tree.
pub struct CodeIndexer<S, E> {
    store: Arc<S>,
    embedder: Arc<E>,
    config: IndexerConfig,
}

impl<S, E> std::fmt::Debug for CodeIndexer<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeIndexer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: ChunkStore, E: EmbeddingProvider> CodeIndexer<S, E> {
    #[must_use]
    pub fn new(store: Arc<S>, embedder: Arc<E>, config: IndexerConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    #[must_use]
    pub fn embedder(&self) -> &Arc<E> {
        &self.embedder
    }

    /// Relative, `/`-separated paths of every indexable file under `root`,
    /// sorted.
    ///
    /// Dot-directories and [`SKIPPED_DIRS`] are pruned; a file is dropped
    /// when any `.gitignore` line occurs literally inside its relative path.
    #[must_use]
    pub fn discover_files(&self, root: &Path) -> Vec<String> {
        let patterns = load_gitignore(root);

        let mut files: Vec<String> = ignore::WalkBuilder::new(root)
            .standard_filters(false)
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_some_and(|ft| ft.is_dir()) {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !name.starts_with('.') && !SKIPPED_DIRS.contains(&&*name)
            })
            .build()
            .flatten()
            .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()))
            .filter_map(|e| relative_path(root, e.path()))
            .filter(|rel| self.passes_filters(rel, &patterns))
            .collect();

        files.sort();
        files
    }

    /// Whether [`Self::discover_files`] would return `rel_path`, judged from
    /// the path alone.
    #[must_use]
    pub fn is_indexable(&self, root: &Path, rel_path: &str) -> bool {
        self.passes_filters(rel_path, &load_gitignore(root))
    }

    /// Index every discovered file, skipping chunks already stored, then drop
    /// records of files that no longer exist.
    ///
    /// # Errors
    ///
    /// Returns the first fatal store error; per-file failures are recorded in
    /// [`IndexReport::errors`] instead.
    pub async fn index_project(&self, root: &Path) -> Result<IndexReport> {
        let start = std::time::Instant::now();
        let mut report = IndexReport::default();

        let files = self.discover_files(root);
        let total = files.len();
        tracing::info!(total, root = %root.display(), "indexing started");

        let current: HashSet<String> = files.iter().cloned().collect();

        let mut results = futures::stream::iter(files)
            .map(|rel_path| async move {
                let result = self.index_file(root, &rel_path).await;
                (rel_path, result)
            })
            .buffer_unordered(self.config.concurrency.max(1));

        let mut done = 0usize;
        while let Some((rel_path, result)) = results.next().await {
            done += 1;
            report.files_scanned += 1;
            match result {
                Ok((created, skipped)) => {
                    if created > 0 {
                        report.files_indexed += 1;
                    }
                    report.chunks_created += created;
                    report.chunks_skipped += skipped;
                    tracing::info!(
                        file = %rel_path,
                        progress = format_args!("{done}/{total}"),
                        created,
                        skipped,
                    );
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e @ IndexError::Decode { .. }) => {
                    report.files_skipped += 1;
                    tracing::warn!(file = %rel_path, "skipped: {e}");
                }
                Err(e) => {
                    tracing::warn!(file = %rel_path, "indexing failed: {e}");
                    report.errors.push(format!("{rel_path}: {e}"));
                }
            }
        }

        for old_file in self.store.indexed_files().await? {
            if !current.contains(&old_file) {
                let removed = self.store.delete_all_for(&old_file).await?;
                tracing::debug!(file = %old_file, removed, "dropped stale records");
                report.chunks_removed += removed;
            }
        }

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            files = report.files_scanned,
            created = report.chunks_created,
            skipped = report.chunks_skipped,
            removed = report.chunks_removed,
            duration_ms = report.duration_ms,
            "indexing finished"
        );
        Ok(report)
    }

    /// Replace the records of one file with a fresh extraction. A file that
    /// no longer exists, or that discovery would exclude, ends up with no
    /// records.
    ///
    /// Returns the number of records written.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the file cannot be read.
    pub async fn reindex_file(&self, root: &Path, rel_path: &str) -> Result<usize> {
        let removed = self.store.delete_all_for(rel_path).await?;

        if !self.is_indexable(root, rel_path) {
            tracing::debug!(file = rel_path, removed, "excluded from the index, not reindexed");
            return Ok(0);
        }

        match self.index_file(root, rel_path).await {
            Ok((created, skipped)) => {
                tracing::debug!(file = rel_path, removed, created, skipped, "reindexed");
                Ok(created)
            }
            Err(IndexError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(file = rel_path, removed, "file gone, records dropped");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    async fn index_file(&self, root: &Path, rel_path: &str) -> Result<(usize, usize)> {
        let abs_path = root.join(rel_path);
        let source = read_source(&abs_path, rel_path).await?;
        let chunks = extract(rel_path, &source, detect_language(&abs_path));

        let mut created = 0usize;
        let mut skipped = 0usize;

        for chunk in &chunks {
            if self.store.exists(&chunk.content_hash).await? {
                skipped += 1;
                continue;
            }

            let vector = self.embedder.embed(&chunk.content).await;
            if self.store.put(chunk, &vector).await? {
                created += 1;
            } else {
                skipped += 1;
            }
        }

        tracing::debug!("{rel_path}: {created} chunks indexed, {skipped} unchanged");
        Ok((created, skipped))
    }

    fn passes_filters(&self, rel_path: &str, gitignore: &[String]) -> bool {
        let path = Path::new(rel_path);
        let in_pruned_dir = path
            .parent()
            .into_iter()
            .flat_map(Path::components)
            .any(|c| match c {
                Component::Normal(name) => {
                    let name = name.to_string_lossy();
                    name.starts_with('.') || SKIPPED_DIRS.contains(&&*name)
                }
                _ => true,
            });

        !in_pruned_dir
            && self.has_indexed_extension(path)
            && !gitignore.iter().any(|p| rel_path.contains(p.as_str()))
    }

    fn has_indexed_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.config.extensions.iter().any(|e| e == ext))
    }
}

async fn read_source(abs_path: &Path, rel_path: &str) -> Result<String> {
    let bytes = tokio::fs::read(abs_path).await?;
    if bytes.contains(&0) {
        return Err(IndexError::Decode {
            path: rel_path.to_owned(),
        });
    }
    String::from_utf8(bytes).map_err(|_| IndexError::Decode {
        path: rel_path.to_owned(),
    })
}

fn load_gitignore(root: &Path) -> Vec<String> {
    std::fs::read_to_string(root.join(".gitignore"))
        .map(|text| {
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

#[cfg(test)]
mod tests {
    use codemend_llm::mock::MockProvider;
    use tempfile::TempDir;

    use super::*;
    use crate::embedding::ProviderEmbedder;
    use crate::memory_store::InMemoryChunkStore;

    type TestIndexer = CodeIndexer<InMemoryChunkStore, ProviderEmbedder<MockProvider>>;

    fn indexer() -> TestIndexer {
        let embedder = ProviderEmbedder::new(Arc::new(MockProvider::default()), 384);
        CodeIndexer::new(
            Arc::new(InMemoryChunkStore::new()),
            Arc::new(embedder),
            IndexerConfig::default(),
        )
    }

    fn write(dir: &TempDir, rel: &str, content: &str) {
        let path = dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn default_config() {
        let config = IndexerConfig::default();
        assert_eq!(config.concurrency, 4);
        assert!(config.extensions.iter().any(|e| e == "py"));
        assert!(config.extensions.iter().any(|e| e == "hpp"));
    }

    #[test]
    fn discover_prunes_skipped_and_dot_dirs() {
        let dir = TempDir::new().unwrap();
        write(&dir, "src/app.py", "x = 1\n");
        write(&dir, "node_modules/lib/index.js", "x;\n");
        write(&dir, "venv/site.py", "x = 1\n");
        write(&dir, ".git/hooks/pre.py", "x = 1\n");
        write(&dir, "target/debug/build.rs", "fn main() {}\n");
        write(&dir, "README.md", "# readme\n");
        write(&dir, "lib/util.go", "package lib\n");

        let files = indexer().discover_files(dir.path());
        assert_eq!(files, vec!["lib/util.go", "src/app.py"]);
    }

    #[test]
    fn gitignore_lines_match_as_substrings() {
        let dir = TempDir::new().unwrap();
        write(&dir, ".gitignore", "# comment\n\n  generated  \n*.log\n");
        write(&dir, "src/generated_api.py", "x = 1\n");
        write(&dir, "src/main.py", "x = 2\n");
        write(&dir, "src/codegen/generated/out.py", "x = 3\n");

        let files = indexer().discover_files(dir.path());
        assert_eq!(files, vec!["src/main.py"]);
    }

    #[test]
    fn is_indexable_matches_discovery_rules() {
        let dir = TempDir::new().unwrap();
        write(&dir, ".gitignore", "secrets\n");
        let indexer = indexer();

        assert!(indexer.is_indexable(dir.path(), "src/app.py"));
        assert!(!indexer.is_indexable(dir.path(), "secrets/keys.py"));
        assert!(!indexer.is_indexable(dir.path(), "notes.txt"));
        assert!(!indexer.is_indexable(dir.path(), "node_modules/lib/index.js"));
        assert!(!indexer.is_indexable(dir.path(), ".github/ci.py"));
    }

    #[tokio::test]
    async fn reindex_skips_excluded_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, ".gitignore", "secrets\n");
        write(&dir, "secrets/keys.py", "TOKEN = 'abc'\n");
        write(&dir, "notes.txt", "remember the milk\n");
        let indexer = indexer();

        assert_eq!(
            indexer.reindex_file(dir.path(), "secrets/keys.py").await.unwrap(),
            0
        );
        assert_eq!(indexer.reindex_file(dir.path(), "notes.txt").await.unwrap(), 0);
        assert_eq!(indexer.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn second_run_creates_nothing() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "a.py",
            "import os\n\ndef f():\n    return os.getcwd()\n",
        );
        let indexer = indexer();

        let first = indexer.index_project(dir.path()).await.unwrap();
        assert_eq!(first.files_scanned, 1);
        assert_eq!(first.files_indexed, 1);
        assert_eq!(first.chunks_created, 2);

        let second = indexer.index_project(dir.path()).await.unwrap();
        assert_eq!(second.chunks_created, 0);
        assert_eq!(second.chunks_skipped, first.chunks_created);
        assert_eq!(indexer.store().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn identical_content_in_two_files_stored_once() {
        let dir = TempDir::new().unwrap();
        let body = "def shared():\n    return 42\n";
        write(&dir, "a.py", body);
        write(&dir, "b.py", body);
        let indexer = indexer();

        let report = indexer.index_project(dir.path()).await.unwrap();
        assert_eq!(report.chunks_created, 1);
        assert_eq!(report.chunks_skipped, 1);
        assert_eq!(indexer.store().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn binary_and_non_utf8_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("blob.c"), b"int x;\0\0\x01").unwrap();
        std::fs::write(dir.path().join("latin.py"), b"name = '\xe9t\xe9'\n").unwrap();
        write(&dir, "ok.py", "value = 1\n");
        let indexer = indexer();

        let report = indexer.index_project(dir.path()).await.unwrap();
        assert_eq!(report.files_scanned, 3);
        assert_eq!(report.files_skipped, 2);
        assert!(report.errors.is_empty());
        assert_eq!(
            indexer.store().indexed_files().await.unwrap(),
            vec!["ok.py"]
        );
    }

    #[tokio::test]
    async fn records_of_deleted_files_are_removed() {
        let dir = TempDir::new().unwrap();
        write(&dir, "keep.py", "def keep():\n    pass\n");
        write(&dir, "gone.py", "def gone():\n    pass\n");
        let indexer = indexer();
        indexer.index_project(dir.path()).await.unwrap();

        std::fs::remove_file(dir.path().join("gone.py")).unwrap();
        let report = indexer.index_project(dir.path()).await.unwrap();
        assert_eq!(report.chunks_removed, 1);
        assert_eq!(
            indexer.store().indexed_files().await.unwrap(),
            vec!["keep.py"]
        );
    }

    #[tokio::test]
    async fn reindex_file_replaces_records() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.py", "def old():\n    return 1\n");
        let indexer = indexer();
        indexer.index_project(dir.path()).await.unwrap();

        write(&dir, "a.py", "def new():\n    return 2\n\n\ndef extra():\n    pass\n");
        let created = indexer.reindex_file(dir.path(), "a.py").await.unwrap();
        assert_eq!(created, 2);

        let located = indexer.store().locate("a.py", 5).await.unwrap().unwrap();
        assert_eq!(located.name, "extra");
        assert_eq!(indexer.store().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn reindex_of_missing_file_only_deletes() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.py", "def f():\n    pass\n");
        let indexer = indexer();
        indexer.index_project(dir.path()).await.unwrap();

        std::fs::remove_file(dir.path().join("a.py")).unwrap();
        assert_eq!(indexer.reindex_file(dir.path(), "a.py").await.unwrap(), 0);
        assert_eq!(indexer.store().count().await.unwrap(), 0);
    }

    #[test]
    fn index_dir_helpers() {
        let dir = TempDir::new().unwrap();
        assert!(!index_exists(dir.path()));
        std::fs::create_dir(index_dir(dir.path())).unwrap();
        assert!(index_exists(dir.path()));
    }
}
