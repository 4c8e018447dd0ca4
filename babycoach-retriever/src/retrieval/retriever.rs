//! Hybrid retrieval: fan out to both indexes, fuse, deduplicate, order.
//!
//! # Scoring Algorithm
//!
//! 1. Tokenize the query and embed it through the injected provider.
//! 2. Query the embedding index (cosine) and the lexical index (BM25)
//!    concurrently for their respective top-k candidate sets.
//! 3. Min-max normalize each candidate set to `[0, 1]` independently; the
//!    two raw scales are not comparable.
//! 4. Fuse: `score = fusion_weight × semantic + (1 − fusion_weight) ×
//!    lexical`. A chunk present in both sets gets one combined entry.
//! 5. Deduplicate by note: keep at most `per_note_dedupe_limit` chunks per
//!    note so a single verbose note cannot crowd out the rest.
//! 6. Sort by fused score (desc), note recency (desc), chunk id (asc);
//!    truncate to `max_results`.
//!
//! A query that embeds to the zero vector skips the semantic leg and runs
//! on lexical signal alone. Both legs empty is an empty result, not an
//! error; an index or provider failure is an error, never an empty result.
//!
//! Retrieval is read-only. Cancelling a call (dropping the future, or
//! racing it against a timeout) abandons both index queries and leaves no
//! side effects behind.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use babycoach_embed::EmbeddingProvider;

use crate::config::RetrievalConfig;
use crate::error::RetrievalError;
use crate::retrieval::embedding_index::EmbeddingIndex;
use crate::retrieval::lexical_index::{LexicalIndex, tokenize};
use crate::storage::corpus_store::CorpusStore;
use crate::storage::{ChunkId, NoteId};

/// Which retrieval signal produced a piece of evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Signal {
    Semantic,
    Lexical,
    Both,
}

/// One retrieved chunk with its fused score and provenance.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceItem {
    pub chunk_id: ChunkId,
    pub note_id: NoteId,
    pub note_title: String,
    /// The chunk text, exactly as stored
    pub text: String,
    /// Fused relevance score in `[0, 1]`
    pub score: f32,
    pub signal: Signal,
    pub note_modified_at: DateTime<Utc>,
}

/// Ordered, deduplicated evidence for one query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalResult {
    pub items: Vec<EvidenceItem>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Read-only hybrid retriever over the two indexes and the corpus store.
pub struct Retriever {
    store: Arc<CorpusStore>,
    embedding_index: Arc<EmbeddingIndex>,
    lexical_index: Arc<LexicalIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(
        store: Arc<CorpusStore>,
        embedding_index: Arc<EmbeddingIndex>,
        lexical_index: Arc<LexicalIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            store,
            embedding_index,
            lexical_index,
            embedder,
        }
    }

    /// Run the full retrieval pipeline for one query.
    pub async fn retrieve(
        &self,
        query_text: &str,
        config: &RetrievalConfig,
    ) -> Result<RetrievalResult, RetrievalError> {
        if query_text.trim().is_empty() {
            return Ok(RetrievalResult::default());
        }

        let terms = tokenize(query_text);
        let query_vector = self.embedder.embed_text(query_text).await?;
        let semantic_enabled = query_vector.iter().any(|v| v.to_f32() != 0.0);
        if !semantic_enabled {
            debug!("query embedded to the zero vector; using lexical signal only");
        }

        let semantic_leg = async {
            if semantic_enabled {
                self.embedding_index
                    .query(&query_vector, config.top_k_semantic)
                    .await
            } else {
                Ok(Vec::new())
            }
        };
        let lexical_leg = self.lexical_index.query(&terms, config.top_k_lexical);

        let (semantic, lexical) = futures::join!(semantic_leg, lexical_leg);
        let semantic = semantic?;

        if semantic.is_empty() && lexical.is_empty() {
            return Ok(RetrievalResult::default());
        }

        let semantic_norm = normalize_scores(&semantic);
        let lexical_norm = normalize_scores(&lexical);

        // fuse; a chunk in both sets is combined, not duplicated
        let semantic_weight = config.fusion_weight;
        let lexical_weight = 1.0 - config.fusion_weight;
        let mut fused: HashMap<ChunkId, (f32, Signal)> = HashMap::new();
        for (id, score) in &semantic_norm {
            fused.insert(id.clone(), (semantic_weight * score, Signal::Semantic));
        }
        for (id, score) in &lexical_norm {
            fused
                .entry(id.clone())
                .and_modify(|(total, signal)| {
                    *total += lexical_weight * score;
                    *signal = Signal::Both;
                })
                .or_insert((lexical_weight * score, Signal::Lexical));
        }

        // per-note dedupe: keep the best chunks of each note
        let mut kept: Vec<(ChunkId, f32, Signal)> = Vec::new();
        let by_note = fused
            .into_iter()
            .map(|(id, (score, signal))| (id.note_id.clone(), (id, score, signal)))
            .into_group_map();
        for (_, mut group) in by_note {
            group.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            group.truncate(config.per_note_dedupe_limit);
            kept.extend(group);
        }

        // join provenance and chunk text from the store; a note tombstoned
        // mid-flight drops out here rather than dangling
        let note_ids: Vec<NoteId> = kept
            .iter()
            .map(|(id, _, _)| id.note_id.clone())
            .unique()
            .collect();
        let metas = self.store.get_notes_meta(&note_ids).await?;

        let mut texts: HashMap<ChunkId, String> = HashMap::new();
        for note_id in &note_ids {
            for chunk in self.store.list_chunks(note_id).await? {
                texts.insert(chunk.id.clone(), chunk.content);
            }
        }

        let mut items: Vec<EvidenceItem> = kept
            .into_iter()
            .filter_map(|(chunk_id, score, signal)| {
                let meta = metas.get(&chunk_id.note_id)?;
                let text = texts.remove(&chunk_id)?;
                Some(EvidenceItem {
                    note_id: meta.id.clone(),
                    note_title: meta.title.clone(),
                    note_modified_at: meta.modified_at,
                    text,
                    score,
                    signal,
                    chunk_id,
                })
            })
            .collect();

        items.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.note_modified_at.cmp(&a.note_modified_at))
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        items.truncate(config.max_results);

        debug!(
            "retrieved {} evidence items ({} semantic, {} lexical candidates)",
            items.len(),
            semantic.len(),
            lexical.len()
        );

        Ok(RetrievalResult { items })
    }
}

/// Min-max normalize raw scores to `[0, 1]` per result set. All-equal
/// scores normalize to 1.0 so a single candidate keeps full weight.
fn normalize_scores(candidates: &[(ChunkId, f32)]) -> Vec<(ChunkId, f32)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let min = candidates.iter().map(|(_, s)| *s).fold(f32::INFINITY, f32::min);
    let max = candidates
        .iter()
        .map(|(_, s)| *s)
        .fold(f32::NEG_INFINITY, f32::max);

    candidates
        .iter()
        .map(|(id, score)| {
            let normalized = if (max - min).abs() < f32::EPSILON {
                1.0
            } else {
                (score - min) / (max - min)
            };
            (id.clone(), normalized)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(note: &str, position: u32, score: f32) -> (ChunkId, f32) {
        (ChunkId::new(note, position), score)
    }

    #[test]
    fn normalize_empty_set() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn normalize_single_candidate_to_one() {
        let result = normalize_scores(&[candidate("a", 0, 7.3)]);
        assert_eq!(result.len(), 1);
        assert!((result[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_spreads_over_unit_interval() {
        let result = normalize_scores(&[
            candidate("a", 0, 10.0),
            candidate("b", 0, 5.0),
            candidate("c", 0, 0.0),
        ]);
        assert!((result[0].1 - 1.0).abs() < 1e-6);
        assert!((result[1].1 - 0.5).abs() < 1e-6);
        assert!((result[2].1 - 0.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_all_equal_to_one() {
        let result = normalize_scores(&[candidate("a", 0, 3.0), candidate("b", 0, 3.0)]);
        for (_, score) in result {
            assert!((score - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn normalize_stays_in_unit_interval_for_any_input() {
        let result = normalize_scores(&[
            candidate("a", 0, -5.0),
            candidate("b", 0, 100.0),
            candidate("c", 0, 42.0),
        ]);
        for (_, score) in result {
            assert!((0.0..=1.0).contains(&score), "score out of range: {score}");
        }
    }
}
