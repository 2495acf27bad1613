//! AST-based chunk extraction, content-addressed storage and semantic
//! retrieval.
//!
//! Source files are split into typed, line-addressed chunks with tree-sitter,
//! embedded, and stored once per distinct content hash. Retrieval ranks stored
//! chunks by cosine similarity to an embedded query.

pub mod any_store;
pub mod chunker;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod languages;
pub mod memory_store;
pub mod retriever;
pub mod sqlite_store;
pub mod store;

pub use any_store::AnyChunkStore;
pub use chunker::{Chunk, ChunkType};
pub use embedding::{EmbeddingProvider, ProviderEmbedder};
pub use error::{IndexError, Result};
pub use indexer::{CodeIndexer, IndexReport, IndexerConfig};
pub use memory_store::InMemoryChunkStore;
pub use retriever::CodeRetriever;
pub use sqlite_store::SqliteChunkStore;
pub use store::{ChunkStore, SearchHit};
