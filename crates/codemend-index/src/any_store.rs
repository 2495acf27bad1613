//! Store backend selected at runtime from configuration.

use crate::chunker::Chunk;
use crate::error::Result;
use crate::memory_store::InMemoryChunkStore;
use crate::sqlite_store::SqliteChunkStore;
use crate::store::{ChunkStore, SearchHit};

macro_rules! delegate_store {
    ($self:expr, |$s:ident| $expr:expr) => {
        match $self {
            AnyChunkStore::Sqlite($s) => $expr,
            AnyChunkStore::Memory($s) => $expr,
        }
    };
}

/// Store backend chosen at runtime from configuration.
#[derive(Debug)]
pub enum AnyChunkStore {
    Sqlite(SqliteChunkStore),
    Memory(InMemoryChunkStore),
}

impl ChunkStore for AnyChunkStore {
    async fn exists(&self, content_hash: &str) -> Result<bool> {
        delegate_store!(self, |s| s.exists(content_hash).await)
    }

    async fn put(&self, chunk: &Chunk, embedding: &[f32]) -> Result<bool> {
        delegate_store!(self, |s| s.put(chunk, embedding).await)
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        delegate_store!(self, |s| s.query(embedding, k).await)
    }

    async fn locate(&self, file_path: &str, line: usize) -> Result<Option<Chunk>> {
        delegate_store!(self, |s| s.locate(file_path, line).await)
    }

    async fn delete_all_for(&self, file_path: &str) -> Result<usize> {
        delegate_store!(self, |s| s.delete_all_for(file_path).await)
    }

    async fn count(&self) -> Result<usize> {
        delegate_store!(self, |s| s.count().await)
    }

    async fn indexed_files(&self) -> Result<Vec<String>> {
        delegate_store!(self, |s| s.indexed_files().await)
    }
}
