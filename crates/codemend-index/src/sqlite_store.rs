//! `SQLite`-backed chunk store living under the project's `.codebase_index`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::chunker::{Chunk, ChunkType};
use crate::error::{IndexError, Result};
use crate::store::{ChunkStore, INDEX_DIR_NAME, SearchHit, rank};

const DB_FILE_NAME: &str = "chunks.db";

const CHUNK_COLUMNS: &str = "content_hash, file_path, chunk_type, name, start_line, end_line, content";

/// Chunk store persisting records and embeddings in one `SQLite` table.
///
/// Similarity search is a linear cosine scan over every stored embedding.
#[derive(Debug, Clone)]
pub struct SqliteChunkStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ChunkRow {
    content_hash: String,
    file_path: String,
    chunk_type: String,
    name: String,
    start_line: i64,
    end_line: i64,
    content: String,
}

#[derive(sqlx::FromRow)]
struct EmbeddedRow {
    #[sqlx(flatten)]
    chunk: ChunkRow,
    embedding: Vec<u8>,
}

impl SqliteChunkStore {
    /// Database location for a project root.
    #[must_use]
    pub fn db_path(project_root: &Path) -> PathBuf {
        project_root.join(INDEX_DIR_NAME).join(DB_FILE_NAME)
    }

    /// Open (or create) the store of the project rooted at `project_root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index directory cannot be created, the database
    /// cannot be opened, or migrations fail.
    pub async fn open_for_project(project_root: &Path) -> Result<Self> {
        Self::open(&Self::db_path(project_root)).await
    }

    /// Open (or create) a store at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        Self::with_pool(pool).await
    }

    /// Private in-memory database, mostly for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Every connection to `:memory:` is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Close all pooled connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl ChunkStore for SqliteChunkStore {
    async fn exists(&self, content_hash: &str) -> Result<bool> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks WHERE content_hash = ?")
            .bind(content_hash)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 > 0)
    }

    async fn put(&self, chunk: &Chunk, embedding: &[f32]) -> Result<bool> {
        let start_line = i64::try_from(chunk.start_line)?;
        let end_line = i64::try_from(chunk.end_line)?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO chunks \
             (content_hash, file_path, chunk_type, name, start_line, end_line, content, embedding) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.content_hash)
        .bind(&chunk.file_path)
        .bind(chunk.chunk_type.as_str())
        .bind(&chunk.name)
        .bind(start_line)
        .bind(end_line)
        .bind(&chunk.content)
        .bind(encode_embedding(embedding))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows: Vec<EmbeddedRow> = sqlx::query_as(&format!(
            "SELECT {CHUNK_COLUMNS}, embedding FROM chunks ORDER BY rowid"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let vector = decode_embedding(&row.embedding, &row.chunk.content_hash)?;
            records.push((row.chunk.into_chunk()?, vector));
        }

        Ok(rank(
            embedding,
            records.iter().map(|(chunk, vector)| (chunk, vector.as_slice())),
            k,
        ))
    }

    async fn locate(&self, file_path: &str, line: usize) -> Result<Option<Chunk>> {
        let line = i64::try_from(line)?;
        let row: Option<ChunkRow> = sqlx::query_as(&format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks \
             WHERE file_path = ? AND start_line <= ? AND end_line >= ? \
             ORDER BY rowid LIMIT 1"
        ))
        .bind(file_path)
        .bind(line)
        .bind(line)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChunkRow::into_chunk).transpose()
    }

    async fn delete_all_for(&self, file_path: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE file_path = ?")
            .bind(file_path)
            .execute(&self.pool)
            .await?;
        Ok(usize::try_from(result.rows_affected())?)
    }

    async fn count(&self) -> Result<usize> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(row.0)?)
    }

    async fn indexed_files(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT file_path FROM chunks ORDER BY file_path")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(p,)| p).collect())
    }
}

impl ChunkRow {
    fn into_chunk(self) -> Result<Chunk> {
        let chunk_type = ChunkType::from_str(&self.chunk_type).unwrap_or_else(|e| {
            tracing::warn!(content_hash = %self.content_hash, "{e}");
            ChunkType::GenericBlock
        });
        Ok(Chunk {
            start_line: usize::try_from(self.start_line)?,
            end_line: usize::try_from(self.end_line)?,
            file_path: self.file_path,
            content: self.content,
            content_hash: self.content_hash,
            chunk_type,
            name: self.name,
        })
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8], content_hash: &str) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(IndexError::CorruptEmbedding {
            content_hash: content_hash.to_owned(),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
