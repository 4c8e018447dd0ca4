//! Incremental inverted index with BM25 scoring.
//!
//! Maps terms to per-chunk frequencies and scores queries with BM25
//! (k1 = 1.2, b = 0.75). Document frequency and average document length
//! are maintained on every upsert and remove rather than in periodic
//! batches, so scores always reflect the corpus as it is right now.
//!
//! Like the embedding index, this structure is rebuilt from the corpus
//! store on open rather than persisted.

use itertools::Itertools;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::storage::ChunkId;

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

/// Lowercase alphanumeric tokenization, shared by the index and query
/// sides so both always agree on term boundaries.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

/// BM25-scored inverted index over chunk tokens.
#[derive(Debug, Default)]
pub struct LexicalIndex {
    inner: RwLock<IndexState>,
}

#[derive(Debug, Default)]
struct IndexState {
    /// term -> (chunk id -> term frequency)
    postings: HashMap<String, HashMap<ChunkId, u32>>,
    /// chunk id -> token count
    doc_lengths: HashMap<ChunkId, u32>,
    total_length: u64,
}

impl IndexState {
    fn remove_chunk(&mut self, id: &ChunkId) -> bool {
        let Some(length) = self.doc_lengths.remove(id) else {
            return false;
        };
        self.total_length -= u64::from(length);
        self.postings.retain(|_, chunk_freqs| {
            chunk_freqs.remove(id);
            !chunk_freqs.is_empty()
        });
        true
    }
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a chunk's token stream.
    pub async fn upsert(&self, id: ChunkId, tokens: &[String]) {
        let mut state = self.inner.write().await;
        state.remove_chunk(&id);

        let mut frequencies: HashMap<&str, u32> = HashMap::new();
        for token in tokens {
            *frequencies.entry(token.as_str()).or_insert(0) += 1;
        }

        for (term, frequency) in frequencies {
            state
                .postings
                .entry(term.to_owned())
                .or_default()
                .insert(id.clone(), frequency);
        }
        state.doc_lengths.insert(id, tokens.len() as u32);
        state.total_length += tokens.len() as u64;
    }

    /// Remove a chunk from the index. Returns whether it was present.
    pub async fn remove(&self, id: &ChunkId) -> bool {
        self.inner.write().await.remove_chunk(id)
    }

    /// Number of indexed chunks.
    pub async fn len(&self) -> usize {
        self.inner.read().await.doc_lengths.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.doc_lengths.is_empty()
    }

    /// Top `top_k` chunks by BM25 score, descending; ties break by chunk
    /// id ascending. Chunks matching no query term are absent from the
    /// result.
    pub async fn query(&self, terms: &[String], top_k: usize) -> Vec<(ChunkId, f32)> {
        let state = self.inner.read().await;
        let corpus_size = state.doc_lengths.len();
        if corpus_size == 0 || terms.is_empty() {
            return Vec::new();
        }

        let average_length = (state.total_length as f32 / corpus_size as f32).max(1.0);
        let mut scores: HashMap<ChunkId, f32> = HashMap::new();

        for term in terms.iter().unique() {
            let Some(chunk_freqs) = state.postings.get(term.as_str()) else {
                continue;
            };
            let doc_freq = chunk_freqs.len() as f32;
            let idf = (1.0 + (corpus_size as f32 - doc_freq + 0.5) / (doc_freq + 0.5)).ln();

            for (id, &frequency) in chunk_freqs {
                let doc_length = state.doc_lengths.get(id).copied().unwrap_or(1) as f32;
                let tf = frequency as f32;
                let tf_component = tf * (BM25_K1 + 1.0)
                    / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_length / average_length));
                *scores.entry(id.clone()).or_insert(0.0) += idf * tf_component;
            }
        }

        let mut scored: Vec<(ChunkId, f32)> = scores.into_iter().collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(top_k);
        scored
    }
}
