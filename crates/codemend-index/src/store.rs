//! Content-addressed chunk store contract and similarity ranking.

use std::future::Future;

use crate::chunker::Chunk;
use crate::error::Result;

/// Hidden per-project directory holding the persisted index.
pub const INDEX_DIR_NAME: &str = ".codebase_index";

/// A stored chunk with its cosine similarity to the query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: Chunk,
    /// `1 - cosine_distance`, in `[-1, 1]`.
    pub score: f32,
}

/// Persistence of chunks and embeddings keyed by `content_hash`.
///
/// Records are never mutated once written. `put` for a hash that is already
/// present is a no-op, so concurrent writers of the same content need no
/// coordination beyond the store's own.
pub trait ChunkStore: Send + Sync {
    /// Whether a record with `content_hash` exists.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Storage` on backend failure; absence is `Ok(false)`.
    fn exists(&self, content_hash: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Insert `chunk` unless its hash is already stored. Returns `true` when a
    /// new record was written.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Storage` on backend failure.
    fn put(&self, chunk: &Chunk, embedding: &[f32]) -> impl Future<Output = Result<bool>> + Send;

    /// Up to `k` records by descending cosine similarity. Records with exactly
    /// equal scores come back in store order, which callers must not rely on.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Storage` on backend failure.
    fn query(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> impl Future<Output = Result<Vec<SearchHit>>> + Send;

    /// First record of `file_path` whose line range contains `line`.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Storage` on backend failure.
    fn locate(
        &self,
        file_path: &str,
        line: usize,
    ) -> impl Future<Output = Result<Option<Chunk>>> + Send;

    /// Remove every record owned by `file_path`, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Storage` on backend failure.
    fn delete_all_for(&self, file_path: &str) -> impl Future<Output = Result<usize>> + Send;

    /// Number of stored records.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Storage` on backend failure.
    fn count(&self) -> impl Future<Output = Result<usize>> + Send;

    /// Distinct file paths that own at least one record.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Storage` on backend failure.
    fn indexed_files(&self) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// Cosine of two vectors; 0.0 when either is zero or their lengths differ.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Score every candidate against `query` and keep the best `k`. The sort is
/// stable, so equal scores keep candidate order.
pub(crate) fn rank<'a, I>(query: &[f32], candidates: I, k: usize) -> Vec<SearchHit>
where
    I: IntoIterator<Item = (&'a Chunk, &'a [f32])>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut mismatched = 0usize;
    let mut scored: Vec<(f32, &Chunk)> = candidates
        .into_iter()
        .map(|(chunk, embedding)| {
            if embedding.len() != query.len() {
                mismatched += 1;
            }
            (cosine_similarity(query, embedding), chunk)
        })
        .collect();
    if mismatched > 0 {
        tracing::warn!(
            mismatched,
            dimension = query.len(),
            "stored embeddings differ in dimension from the query; rebuild the index"
        );
    }

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(score, chunk)| SearchHit {
            chunk: chunk.clone(),
            score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{ChunkType, content_hash};

    fn chunk(name: &str) -> Chunk {
        Chunk {
            file_path: "a.py".into(),
            content: name.into(),
            content_hash: content_hash(name),
            chunk_type: ChunkType::FunctionDef,
            name: name.into(),
            start_line: 1,
            end_line: 1,
        }
    }

    #[test]
    fn cosine_similarity_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < f32::EPSILON);
    }

    #[test]
    fn cosine_similarity_zero_vector_is_zero() {
        let zero = vec![0.0; 3];
        let v = vec![1.0, 1.0, 1.0];
        assert!(cosine_similarity(&zero, &v).abs() < f32::EPSILON);
    }

    #[test]
    fn cosine_similarity_length_mismatch_is_zero() {
        let short = vec![1.0, 0.0];
        let long = vec![1.0, 0.0, 0.0];
        assert!(cosine_similarity(&short, &long).abs() < f32::EPSILON);
        assert!(cosine_similarity(&long, &short).abs() < f32::EPSILON);
    }

    #[test]
    fn rank_scores_other_dimensions_last() {
        let stale = chunk("stale");
        let fresh = chunk("fresh");
        let stale_v = [1.0];
        let fresh_v = [0.5, 0.5];
        let hits = rank(
            &[1.0, 0.0],
            [(&stale, stale_v.as_slice()), (&fresh, fresh_v.as_slice())],
            2,
        );
        assert_eq!(hits[0].chunk.name, "fresh");
        assert_eq!(hits[1].chunk.name, "stale");
        assert!(hits[1].score.abs() < f32::EPSILON);
    }

    #[test]
    fn rank_orders_by_descending_score_and_truncates() {
        let near = chunk("near");
        let far = chunk("far");
        let mid = chunk("mid");
        let near_v = [1.0, 0.0];
        let far_v = [-1.0, 0.0];
        let mid_v = [1.0, 1.0];

        let hits = rank(
            &[1.0, 0.0],
            [
                (&far, far_v.as_slice()),
                (&near, near_v.as_slice()),
                (&mid, mid_v.as_slice()),
            ],
            2,
        );
        let names: Vec<&str> = hits.iter().map(|h| h.chunk.name.as_str()).collect();
        assert_eq!(names, vec!["near", "mid"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rank_keeps_candidate_order_on_ties() {
        let first = chunk("first");
        let second = chunk("second");
        let v = [0.0, 1.0];
        let hits = rank(
            &[0.0, 1.0],
            [(&first, v.as_slice()), (&second, v.as_slice())],
            5,
        );
        assert_eq!(hits[0].chunk.name, "first");
        assert_eq!(hits[1].chunk.name, "second");
    }

    #[test]
    fn rank_with_zero_k_is_empty() {
        let c = chunk("c");
        let v = [1.0];
        assert!(rank(&[1.0], [(&c, v.as_slice())], 0).is_empty());
    }
}
