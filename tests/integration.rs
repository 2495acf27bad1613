use std::path::Path;
use std::sync::Arc;

use codemend_core::bootstrap;
use codemend_core::config::{Config, IndexBackend, ProviderKind};
use codemend_core::pipeline::{AutoApprove, Confirmer, QueryOutcome, QueryProcessor};
use codemend_index::{
    AnyChunkStore, ChunkStore, CodeIndexer, InMemoryChunkStore, IndexerConfig, ProviderEmbedder,
};
use codemend_llm::mock::MockProvider;
use codemend_patch::{LlmGenerator, PatchState};
use tempfile::TempDir;

type MockIndexer = CodeIndexer<AnyChunkStore, ProviderEmbedder<MockProvider>>;

const CALC: &str = "\
def add(a, b):
    return a + b


def divide(a, b):
    return a / b


class Calculator:
    def total(self, values):
        return sum(values)
";

const UTIL: &str = "\
function greet(name) {
  return 'hi ' + name;
}
";

struct Reject;

impl Confirmer for Reject {
    async fn confirm(&self, _previews: &[String]) -> anyhow::Result<bool> {
        Ok(false)
    }
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "src/calc.py", CALC);
    write(dir.path(), "web/util.js", UTIL);
    write(dir.path(), "README.txt", "not source\n");
    write(dir.path(), "node_modules/dep/index.js", "module.exports = 1;\n");
    dir
}

fn indexer(store: AnyChunkStore) -> Arc<MockIndexer> {
    Arc::new(CodeIndexer::new(
        Arc::new(store),
        Arc::new(ProviderEmbedder::new(Arc::new(MockProvider::default()), 384)),
        IndexerConfig::default(),
    ))
}

fn processor(
    root: &Path,
    indexer: &Arc<MockIndexer>,
    replies: &[&str],
) -> QueryProcessor<AnyChunkStore, ProviderEmbedder<MockProvider>, LlmGenerator<MockProvider>> {
    let chat = MockProvider::with_responses(replies.iter().map(ToString::to_string).collect());
    QueryProcessor::new(
        root,
        Arc::clone(indexer),
        LlmGenerator::new(Arc::new(chat)),
        5,
    )
}

#[tokio::test]
async fn index_query_apply_reindex() {
    let dir = project();
    let indexer = indexer(AnyChunkStore::Memory(InMemoryChunkStore::new()));

    let report = indexer.index_project(dir.path()).await.unwrap();
    assert_eq!(report.files_scanned, 2);
    assert!(report.errors.is_empty());
    let files = indexer.store().indexed_files().await.unwrap();
    assert_eq!(files, vec!["src/calc.py", "web/util.js"]);

    let reply = r#"{"changes": [{
        "file_path": "src/calc.py",
        "start_line": 6,
        "end_line": 6,
        "new_content": "    if b == 0:\n        raise ZeroDivisionError('b must be non-zero')\n    return a / b",
        "reasoning": "guard against division by zero"
    }]}"#;
    let mut processor = processor(dir.path(), &indexer, &[reply]);

    let outcome = processor
        .process("guard divide against zero", &AutoApprove)
        .await
        .unwrap();
    let QueryOutcome::Applied(report) = outcome else {
        panic!("expected applied outcome, got {outcome:?}");
    };
    assert_eq!(report.applied(), 1);
    assert_eq!(report.outcomes[0].state, PatchState::Reindexed);

    let after = std::fs::read_to_string(dir.path().join("src/calc.py")).unwrap();
    let lines: Vec<&str> = after.lines().collect();
    assert_eq!(lines[4], "def divide(a, b):");
    assert_eq!(lines[5], "    if b == 0:");
    assert_eq!(lines[7], "    return a / b");
    assert_eq!(lines[10], "class Calculator:");
    assert!(!dir.path().join("src/calc.py.backup").exists());

    let chunk = indexer
        .store()
        .locate("src/calc.py", 6)
        .await
        .unwrap()
        .unwrap();
    assert!(chunk.content.contains("ZeroDivisionError"));
    let moved = indexer
        .store()
        .locate("src/calc.py", 12)
        .await
        .unwrap()
        .unwrap();
    assert!(moved.content.contains("sum(values)"));
}

#[tokio::test]
async fn same_file_proposals_are_shifted_by_earlier_edits() {
    let dir = project();
    let indexer = indexer(AnyChunkStore::Memory(InMemoryChunkStore::new()));
    indexer.index_project(dir.path()).await.unwrap();

    let reply = r#"{"changes": [
        {"file_path": "src/calc.py", "start_line": 2, "end_line": 2,
         "new_content": "    # plain addition\n    return a + b"},
        {"file_path": "src/calc.py", "start_line": 6, "end_line": 6,
         "new_content": "    return a // b"},
        {"file_path": "src/calc.py", "start_line": 2, "end_line": 3,
         "new_content": "    pass"}
    ]}"#;
    let mut processor = processor(dir.path(), &indexer, &[reply]);

    let QueryOutcome::Applied(report) = processor
        .process("tidy calc", &AutoApprove)
        .await
        .unwrap()
    else {
        panic!("expected applied outcome");
    };
    assert_eq!(report.applied(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.outcomes[1].applied_range, Some((7, 7)));
    assert_eq!(report.outcomes[2].state, PatchState::Failed);

    let after = std::fs::read_to_string(dir.path().join("src/calc.py")).unwrap();
    let lines: Vec<&str> = after.lines().collect();
    assert_eq!(lines[1], "    # plain addition");
    assert_eq!(lines[2], "    return a + b");
    assert_eq!(lines[6], "    return a // b");
}

#[tokio::test]
async fn rejected_batch_changes_nothing() {
    let dir = project();
    let indexer = indexer(AnyChunkStore::Memory(InMemoryChunkStore::new()));
    indexer.index_project(dir.path()).await.unwrap();
    let before = indexer.store().count().await.unwrap();

    let reply = r#"{"changes": [{"file_path": "web/util.js", "start_line": 2,
        "end_line": 2, "new_content": "  return `hi ${name}`;"}]}"#;
    let mut processor = processor(dir.path(), &indexer, &[reply]);

    let outcome = processor.process("use a template", &Reject).await.unwrap();
    assert!(matches!(outcome, QueryOutcome::Cancelled));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("web/util.js")).unwrap(),
        UTIL
    );
    assert_eq!(indexer.store().count().await.unwrap(), before);
}

#[tokio::test]
async fn escaping_and_out_of_range_proposals_fail_without_writing() {
    let dir = project();
    let indexer = indexer(AnyChunkStore::Memory(InMemoryChunkStore::new()));
    indexer.index_project(dir.path()).await.unwrap();

    let reply = r#"{"changes": [
        {"file_path": "../outside.py", "start_line": 1, "end_line": 1, "new_content": "x"},
        {"file_path": "web/util.js", "start_line": 3, "end_line": 9, "new_content": "x"},
        {"file_path": "missing.py", "start_line": 1, "end_line": 1, "new_content": "x"}
    ]}"#;
    let mut processor = processor(dir.path(), &indexer, &[reply]);

    let QueryOutcome::Applied(report) = processor.process("break things", &AutoApprove).await.unwrap()
    else {
        panic!("expected applied outcome");
    };
    assert_eq!(report.applied(), 0);
    assert_eq!(report.failed(), 3);
    assert!(report.outcomes.iter().all(|o| o.error.is_some()));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("web/util.js")).unwrap(),
        UTIL
    );
}

#[tokio::test]
async fn sqlite_index_persists_and_skips_unchanged_chunks() {
    let dir = project();
    let mut config = Config::default();
    config.index.backend = IndexBackend::Sqlite;

    let first = indexer(bootstrap::open_store(&config, dir.path()).await.unwrap());
    let report = first.index_project(dir.path()).await.unwrap();
    assert!(report.chunks_created > 0);
    let stored = first.store().count().await.unwrap();
    drop(first);

    let second = indexer(bootstrap::open_store(&config, dir.path()).await.unwrap());
    assert_eq!(second.store().count().await.unwrap(), stored);
    let report = second.index_project(dir.path()).await.unwrap();
    assert_eq!(report.chunks_created, 0);
    assert!(report.chunks_skipped >= stored);

    std::fs::remove_file(dir.path().join("web/util.js")).unwrap();
    let report = second.index_project(dir.path()).await.unwrap();
    assert!(report.chunks_removed > 0);
    assert_eq!(
        second.store().indexed_files().await.unwrap(),
        vec!["src/calc.py"]
    );
}

#[test]
fn shipped_config_parses() {
    let config = Config::load(Path::new("config/default.toml")).unwrap();
    assert_eq!(config.index.top_k, 5);
    assert_eq!(config.index.embedding_dimension, 384);
    assert!(matches!(
        config.llm.provider,
        ProviderKind::Claude | ProviderKind::Ollama
    ));
}
