//! Token-budgeted assembly of ranked evidence into a grounding payload.
//!
//! The assembler is the last stage before evidence leaves the retrieval
//! core: it selects a prefix of the ranked evidence that fits the token
//! budget and attaches citation metadata so a generated answer can always
//! be traced back to its source notes.
//!
//! Selection is greedy in rank order and all-or-nothing per item: a chunk
//! is either included whole or not at all, never truncated mid-span.
//! Inclusion stops at the first item that would overflow the budget;
//! skipping past it would reorder evidence relative to its ranking.

use serde::Serialize;
use std::sync::Arc;

use babycoach_embed::TokenCounter;

use crate::error::RetrievalError;
use crate::retrieval::retriever::{EvidenceItem, RetrievalResult};
use crate::storage::NoteId;

/// Traceability record attached to every included evidence item.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub note_id: NoteId,
    pub note_title: String,
    pub chunk_position: u32,
}

/// An evidence item admitted into the payload, with its citation and
/// token cost.
#[derive(Debug, Clone, Serialize)]
pub struct CitedEvidence {
    pub evidence: EvidenceItem,
    pub citation: Citation,
    pub tokens: usize,
}

/// The grounding payload handed to the downstream generator.
///
/// `total_tokens` never exceeds the budget the payload was assembled with.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextPayload {
    pub items: Vec<CitedEvidence>,
    pub total_tokens: usize,
}

impl ContextPayload {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Greedy budget packer over ranked evidence.
pub struct ContextAssembler {
    token_counter: Arc<dyn TokenCounter>,
}

impl ContextAssembler {
    pub fn new(token_counter: Arc<dyn TokenCounter>) -> Self {
        Self { token_counter }
    }

    /// Assemble a payload from ranked evidence under `token_budget`.
    ///
    /// Empty evidence assembles to an empty payload. Fails with
    /// [`RetrievalError::BudgetTooSmall`] when even the top-ranked item
    /// cannot fit.
    pub fn assemble(
        &self,
        result: &RetrievalResult,
        token_budget: usize,
    ) -> Result<ContextPayload, RetrievalError> {
        let mut payload = ContextPayload::default();

        for (rank, item) in result.items.iter().enumerate() {
            let tokens = self.token_counter.count_tokens(&item.text);
            if payload.total_tokens + tokens > token_budget {
                if rank == 0 {
                    return Err(RetrievalError::BudgetTooSmall {
                        budget: token_budget,
                        required: tokens,
                    });
                }
                break;
            }

            payload.items.push(CitedEvidence {
                citation: Citation {
                    note_id: item.note_id.clone(),
                    note_title: item.note_title.clone(),
                    chunk_position: item.chunk_id.position,
                },
                tokens,
                evidence: item.clone(),
            });
            payload.total_tokens += tokens;
        }

        Ok(payload)
    }
}
