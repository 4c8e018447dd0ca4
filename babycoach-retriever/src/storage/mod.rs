//! Storage layer for the retrieval core.
//!
//! The corpus store is the single durable source of truth: what chunks it
//! holds is what the two in-memory indexes must reflect. This module
//! defines the data model shared across the crate and the SQLite-backed
//! store implementation.
//!
//! ## Key Components
//!
//! - **[`Note`]**: a note as supplied by the ingestion layer
//! - **[`ChunkId`]**: chunk identity as (owning note, position)
//! - **[`StoredChunk`]**: a chunk as persisted, embedding included
//! - **[`corpus_store::CorpusStore`]**: the SQLite implementation
//!
//! ## Identity
//!
//! Chunk ids are derived, not surrogate: a chunk is identified by its note
//! and its position within that note. Re-indexing a note therefore maps
//! unchanged chunks onto the same ids, and the derived lexicographic order
//! on [`ChunkId`] provides the deterministic tie-break used by both
//! indexes and the retriever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub mod corpus_store;

/// Stable identifier of a note, assigned by the ingestion layer and
/// immutable for the lifetime of the note.
pub type NoteId = String;

/// Identity of a chunk: the owning note plus the chunk's position in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId {
    pub note_id: NoteId,
    pub position: u32,
}

impl ChunkId {
    pub fn new(note_id: impl Into<NoteId>, position: u32) -> Self {
        Self {
            note_id: note_id.into(),
            position,
        }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.note_id, self.position)
    }
}

/// A note as supplied by the ingestion layer.
///
/// `modified_at` must strictly increase whenever title or body change;
/// the reconciler relies on content hashes rather than timestamps to
/// detect real changes, so a stale timestamp degrades ordering, not
/// correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub tags: Vec<String>,
    /// Opaque source-system metadata, stored verbatim
    pub source: HashMap<String, String>,
}

impl Note {
    /// Content hash over everything retrieval derives from: title and body.
    /// Two notes with equal hashes chunk and embed identically.
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.title.as_bytes());
        hasher.update(b"\x00");
        hasher.update(self.body.as_bytes());
        hex::encode(hasher.finalize().as_bytes())
    }
}

/// A chunk as persisted in the corpus store.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: ChunkId,
    /// Byte offset of the chunk within the note body
    pub start: usize,
    /// Byte offset one past the end of the chunk
    pub end: usize,
    /// The chunk text; never empty
    pub content: String,
    /// blake3 of the embedded passage, hex-encoded. An unchanged hash means
    /// the stored embedding can be reused without another provider call.
    pub content_hash: String,
    /// f16 embedding vector, if one has been computed
    pub embedding: Option<Vec<half::f16>>,
}

/// Note metadata needed for provenance and recency ordering.
#[derive(Debug, Clone)]
pub struct NoteMeta {
    pub id: NoteId,
    pub title: String,
    pub modified_at: DateTime<Utc>,
}
