//! Tunables for chunking, retrieval, and assembly.

use crate::error::IndexingError;
use serde::{Deserialize, Serialize};

/// Configuration for a knowledge base.
///
/// All fields have working defaults; use the builder methods to adjust
/// individual knobs. Validation happens once at construction of the
/// knowledge base, so a running instance never sees a bad combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Maximum chunk size in bytes
    pub chunk_size: usize,
    /// Overlap carried between consecutive chunks, in bytes; must be
    /// strictly smaller than `chunk_size`
    pub chunk_overlap: usize,
    /// Candidates fetched from the embedding index per query
    pub top_k_semantic: usize,
    /// Candidates fetched from the lexical index per query. Defaults wider
    /// than the semantic side: lexical recall is typically lower, so the
    /// lexical leg casts a bigger net before fusion.
    pub top_k_lexical: usize,
    /// Weight of the semantic signal in fusion, in `[0, 1]`; the lexical
    /// signal gets `1 - fusion_weight`
    pub fusion_weight: f32,
    /// Maximum number of chunks retained per note after fusion
    pub per_note_dedupe_limit: usize,
    /// Token budget for assembled context payloads
    pub token_budget: usize,
    /// Maximum evidence items in a retrieval result
    pub max_results: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 160,
            top_k_semantic: 8,
            top_k_lexical: 16,
            fusion_weight: 0.5,
            per_note_dedupe_limit: 3,
            token_budget: 2048,
            max_results: 12,
        }
    }
}

impl RetrievalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_chunk_overlap(mut self, chunk_overlap: usize) -> Self {
        self.chunk_overlap = chunk_overlap;
        self
    }

    pub fn with_top_k_semantic(mut self, top_k: usize) -> Self {
        self.top_k_semantic = top_k;
        self
    }

    pub fn with_top_k_lexical(mut self, top_k: usize) -> Self {
        self.top_k_lexical = top_k;
        self
    }

    pub fn with_fusion_weight(mut self, fusion_weight: f32) -> Self {
        self.fusion_weight = fusion_weight;
        self
    }

    pub fn with_per_note_dedupe_limit(mut self, limit: usize) -> Self {
        self.per_note_dedupe_limit = limit;
        self
    }

    pub fn with_token_budget(mut self, token_budget: usize) -> Self {
        self.token_budget = token_budget;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Check every knob; called once when a knowledge base is opened.
    pub fn validate(&self) -> Result<(), IndexingError> {
        if self.chunk_size == 0 {
            return Err(IndexingError::invalid_configuration(
                "chunk_size must be nonzero",
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IndexingError::invalid_configuration(format!(
                "chunk_size ({}) must exceed chunk_overlap ({})",
                self.chunk_size, self.chunk_overlap
            )));
        }
        if self.top_k_semantic == 0 || self.top_k_lexical == 0 {
            return Err(IndexingError::invalid_configuration(
                "top_k_semantic and top_k_lexical must be nonzero",
            ));
        }
        if !(0.0..=1.0).contains(&self.fusion_weight) {
            return Err(IndexingError::invalid_configuration(format!(
                "fusion_weight must be within [0, 1], got {}",
                self.fusion_weight
            )));
        }
        if self.per_note_dedupe_limit == 0 {
            return Err(IndexingError::invalid_configuration(
                "per_note_dedupe_limit must be nonzero",
            ));
        }
        if self.token_budget == 0 {
            return Err(IndexingError::invalid_configuration(
                "token_budget must be nonzero",
            ));
        }
        if self.max_results == 0 {
            return Err(IndexingError::invalid_configuration(
                "max_results must be nonzero",
            ));
        }
        Ok(())
    }
}
