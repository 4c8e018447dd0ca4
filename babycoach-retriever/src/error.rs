//! Error taxonomy for the retrieval core.
//!
//! Two public enums mirror the two public operations: [`IndexingError`]
//! for the write path (`index`) and [`RetrievalError`] for the read path
//! (`query`). Transient store failures on the write path are retried with
//! backoff by the coordinator before they surface here; read-path errors
//! are never retried automatically, because retries change latency the
//! caller can observe. A failed query always surfaces as an error; the
//! core never passes off an empty evidence set as a successful grounding.

use babycoach_chunk::ChunkError;
use babycoach_embed::EmbedError;
use thiserror::Error;

/// Failure inside the corpus store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite-level failure; typically transient (lock contention, I/O)
    #[error("database failure: {source}")]
    Database {
        #[from]
        source: sqlx::Error,
    },

    /// Note metadata could not be encoded or decoded
    #[error("metadata encoding failure: {source}")]
    Encoding {
        #[from]
        source: serde_json::Error,
    },
}

/// A vector's dimensionality disagrees with the index.
///
/// The index dimensionality is fixed by the first inserted vector; a
/// provider swap with a different shape surfaces as this error until the
/// corpus is re-indexed.
#[derive(Debug, Clone, Copy, Error)]
#[error("embedding dimension mismatch: index holds {expected}-dimensional vectors, got {actual}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Errors surfaced by the write path.
///
/// Re-submitting the same note event after an `IndexingError` is always
/// safe: reconciliation is idempotent per content hash.
#[derive(Debug, Error)]
pub enum IndexingError {
    /// Bad tunables, caught at construction
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),

    #[error("corpus store failure: {source}")]
    Store {
        #[from]
        source: StoreError,
    },

    #[error("embedding provider failure: {source}")]
    Embedding {
        #[from]
        source: EmbedError,
    },

    /// A transient failure persisted through every retry attempt
    #[error("reconciling note {note_id} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        note_id: String,
        attempts: u32,
        #[source]
        source: Box<IndexingError>,
    },
}

impl IndexingError {
    /// Create an invalid configuration error with a custom message.
    pub fn invalid_configuration<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Store {
                source: StoreError::Database { .. }
            }
        )
    }
}

impl From<ChunkError> for IndexingError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::InvalidConfiguration { message } => {
                Self::InvalidConfiguration { message }
            }
        }
    }
}

/// Errors surfaced by the read path.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),

    #[error("corpus store failure: {source}")]
    Store {
        #[from]
        source: StoreError,
    },

    #[error("embedding provider failure: {source}")]
    Embedding {
        #[from]
        source: EmbedError,
    },

    /// Assembly could not fit even the top-ranked evidence item
    #[error(
        "token budget {budget} cannot fit any evidence; the top-ranked item alone needs {required} tokens"
    )]
    BudgetTooSmall { budget: usize, required: usize },
}
