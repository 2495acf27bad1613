//! In-process chunk store backing the `memory` index backend and tests.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::chunker::Chunk;
use crate::error::Result;
use crate::store::{ChunkStore, SearchHit, rank};

struct Record {
    chunk: Chunk,
    embedding: Vec<f32>,
}

/// Volatile chunk store keeping records in insertion order.
#[derive(Default)]
pub struct InMemoryChunkStore {
    records: RwLock<Vec<Record>>,
}

impl InMemoryChunkStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Writers never leave the vector half-updated, so poisoned guards are recovered.
    fn read(&self) -> RwLockReadGuard<'_, Vec<Record>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Record>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for InMemoryChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryChunkStore").finish_non_exhaustive()
    }
}

impl ChunkStore for InMemoryChunkStore {
    async fn exists(&self, content_hash: &str) -> Result<bool> {
        Ok(self.read()
            .iter()
            .any(|r| r.chunk.content_hash == content_hash))
    }

    async fn put(&self, chunk: &Chunk, embedding: &[f32]) -> Result<bool> {
        let mut records = self.write();
        if records
            .iter()
            .any(|r| r.chunk.content_hash == chunk.content_hash)
        {
            return Ok(false);
        }
        records.push(Record {
            chunk: chunk.clone(),
            embedding: embedding.to_vec(),
        });
        Ok(true)
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let records = self.read();
        Ok(rank(
            embedding,
            records
                .iter()
                .map(|r| (&r.chunk, r.embedding.as_slice())),
            k,
        ))
    }

    async fn locate(&self, file_path: &str, line: usize) -> Result<Option<Chunk>> {
        Ok(self.read()
            .iter()
            .find(|r| r.chunk.file_path == file_path && r.chunk.contains_line(line))
            .map(|r| r.chunk.clone()))
    }

    async fn delete_all_for(&self, file_path: &str) -> Result<usize> {
        let mut records = self.write();
        let before = records.len();
        records.retain(|r| r.chunk.file_path != file_path);
        Ok(before - records.len())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read().len())
    }

    async fn indexed_files(&self) -> Result<Vec<String>> {
        let records = self.read();
        let mut seen = HashSet::new();
        let mut files: Vec<String> = records
            .iter()
            .filter(|r| seen.insert(r.chunk.file_path.as_str()))
            .map(|r| r.chunk.file_path.clone())
            .collect();
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::chunker::{ChunkType, content_hash};

    fn chunk(file_path: &str, content: &str, lines: (usize, usize)) -> Chunk {
        Chunk {
            file_path: file_path.into(),
            content: content.into(),
            content_hash: content_hash(content),
            chunk_type: ChunkType::Statement,
            name: "code_block".into(),
            start_line: lines.0,
            end_line: lines.1,
        }
    }

    #[tokio::test]
    async fn put_twice_keeps_one_record() {
        let store = InMemoryChunkStore::new();
        let c = chunk("a.py", "x = 1", (1, 1));
        assert!(store.put(&c, &[1.0]).await.unwrap());
        assert!(!store.put(&c, &[9.0]).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_puts_of_same_hash_store_once() {
        let store = Arc::new(InMemoryChunkStore::new());
        let c = chunk("a.py", "shared = True", (1, 1));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let c = c.clone();
            handles.push(tokio::spawn(async move { store.put(&c, &[1.0]).await }));
        }
        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn locate_and_delete() {
        let store = InMemoryChunkStore::new();
        store
            .put(&chunk("a.py", "one", (1, 3)), &[1.0])
            .await
            .unwrap();
        store
            .put(&chunk("b.py", "two", (1, 3)), &[1.0])
            .await
            .unwrap();

        assert_eq!(
            store.locate("a.py", 2).await.unwrap().unwrap().content,
            "one"
        );
        assert_eq!(store.delete_all_for("a.py").await.unwrap(), 1);
        assert!(store.locate("a.py", 2).await.unwrap().is_none());
        assert_eq!(store.indexed_files().await.unwrap(), vec!["b.py"]);
    }

    #[tokio::test]
    async fn query_returns_top_k_without_threshold() {
        let store = InMemoryChunkStore::new();
        store
            .put(&chunk("a.py", "a", (1, 1)), &[0.0, 1.0])
            .await
            .unwrap();
        store
            .put(&chunk("a.py", "b", (2, 2)), &[0.1, 1.0])
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.content, "b");
    }
}
