//! In-memory vector index over chunk embeddings.
//!
//! Holds one f16 vector per chunk and answers nearest-neighbor queries by
//! exhaustive cosine similarity, which is plenty for a personal corpus.
//! The index dimensionality is fixed by the first inserted vector; any
//! later vector or query probe of a different shape fails with
//! [`DimensionMismatch`] until the index is rebuilt.
//!
//! The index is not durable. Embeddings persist alongside chunks in the
//! corpus store, and the knowledge base repopulates this index from there
//! on open.

use half::f16;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::DimensionMismatch;
use crate::storage::ChunkId;

/// Cosine-similarity vector index. All operations are async-safe; write
/// sections never await while holding the lock.
#[derive(Debug, Default)]
pub struct EmbeddingIndex {
    inner: RwLock<IndexState>,
}

#[derive(Debug, Default)]
struct IndexState {
    /// Fixed at first insert
    dimension: Option<usize>,
    vectors: HashMap<ChunkId, Vec<f16>>,
}

impl EmbeddingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a chunk's vector.
    pub async fn upsert(&self, id: ChunkId, vector: Vec<f16>) -> Result<(), DimensionMismatch> {
        let mut state = self.inner.write().await;
        match state.dimension {
            None => state.dimension = Some(vector.len()),
            Some(expected) if expected != vector.len() => {
                return Err(DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            Some(_) => {}
        }
        state.vectors.insert(id, vector);
        Ok(())
    }

    /// Remove a chunk's vector. Returns whether it was present.
    pub async fn remove(&self, id: &ChunkId) -> bool {
        self.inner.write().await.vectors.remove(id).is_some()
    }

    /// Number of indexed vectors.
    pub async fn len(&self) -> usize {
        self.inner.read().await.vectors.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.vectors.is_empty()
    }

    /// Top `top_k` chunks by cosine similarity, descending; ties break by
    /// chunk id ascending. A chunk removed before the call is never
    /// returned. Querying an empty index yields an empty list.
    pub async fn query(
        &self,
        query: &[f16],
        top_k: usize,
    ) -> Result<Vec<(ChunkId, f32)>, DimensionMismatch> {
        let state = self.inner.read().await;
        let Some(expected) = state.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != expected {
            return Err(DimensionMismatch {
                expected,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(ChunkId, f32)> = state
            .vectors
            .iter()
            .map(|(id, vector)| (id.clone(), cosine_similarity(query, vector)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(top_k);

        Ok(scored)
    }
}

/// Cosine similarity between two f16 vectors of equal length.
fn cosine_similarity(a: &[f16], b: &[f16]) -> f32 {
    let mut dot_product = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = x.to_f32();
        let y = y.to_f32();
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(values: &[f32]) -> Vec<f16> {
        values.iter().copied().map(f16::from_f32).collect()
    }

    #[tokio::test]
    async fn query_orders_by_similarity() {
        let index = EmbeddingIndex::new();
        index
            .upsert(ChunkId::new("a", 0), vector(&[1.0, 0.0]))
            .await
            .unwrap();
        index
            .upsert(ChunkId::new("b", 0), vector(&[0.0, 1.0]))
            .await
            .unwrap();
        index
            .upsert(ChunkId::new("c", 0), vector(&[0.7, 0.7]))
            .await
            .unwrap();

        let results = index.query(&vector(&[1.0, 0.0]), 10).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, ChunkId::new("a", 0));
        assert_eq!(results[1].0, ChunkId::new("c", 0));
        assert_eq!(results[2].0, ChunkId::new("b", 0));
        assert!(results[0].1 > results[1].1);
    }

    #[tokio::test]
    async fn ties_break_by_chunk_id_ascending() {
        let index = EmbeddingIndex::new();
        // identical vectors, identical similarity
        for id in ["c", "a", "b"] {
            index
                .upsert(ChunkId::new(id, 0), vector(&[1.0, 1.0]))
                .await
                .unwrap();
        }

        let results = index.query(&vector(&[1.0, 1.0]), 10).await.unwrap();
        let order: Vec<&str> = results.iter().map(|(id, _)| id.note_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn top_k_truncates() {
        let index = EmbeddingIndex::new();
        for position in 0..10 {
            index
                .upsert(ChunkId::new("n", position), vector(&[1.0, 0.0]))
                .await
                .unwrap();
        }
        let results = index.query(&vector(&[1.0, 0.0]), 3).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn dimension_is_fixed_at_first_insert() {
        let index = EmbeddingIndex::new();
        index
            .upsert(ChunkId::new("a", 0), vector(&[1.0, 0.0, 0.0]))
            .await
            .unwrap();

        let err = index
            .upsert(ChunkId::new("b", 0), vector(&[1.0, 0.0]))
            .await
            .unwrap_err();
        assert_eq!(err.expected, 3);
        assert_eq!(err.actual, 2);

        let err = index.query(&vector(&[1.0]), 5).await.unwrap_err();
        assert_eq!(err.expected, 3);
        assert_eq!(err.actual, 1);
    }

    #[tokio::test]
    async fn removed_chunks_are_never_returned() {
        let index = EmbeddingIndex::new();
        let id = ChunkId::new("a", 0);
        index.upsert(id.clone(), vector(&[1.0, 0.0])).await.unwrap();
        index
            .upsert(ChunkId::new("b", 0), vector(&[0.9, 0.1]))
            .await
            .unwrap();

        assert!(index.remove(&id).await);
        assert!(!index.remove(&id).await);

        let results = index.query(&vector(&[1.0, 0.0]), 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, ChunkId::new("b", 0));
    }

    #[tokio::test]
    async fn empty_index_yields_empty_results() {
        let index = EmbeddingIndex::new();
        assert!(index.query(&vector(&[1.0, 0.0]), 5).await.unwrap().is_empty());
        assert!(index.is_empty().await);
    }
}
