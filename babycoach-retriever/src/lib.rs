//! babycoach-retriever: the retrieval core of a personal knowledge assistant
//!
//! This crate turns a corpus of personal notes into a queryable hybrid
//! index and, at query time, selects a token-bounded, cited evidence set to
//! ground a downstream answer generator. The generator itself, the note
//! format, and every user-facing surface live outside this crate.
//!
//! ## Key Modules
//!
//! - **[`knowledge_base`]**: the facade: `index` note events, `query` for
//!   grounding payloads
//! - **[`retrieval`]**: indexes, hybrid retriever, context assembler, and
//!   the indexing coordinator
//! - **[`storage`]**: the data model and the SQLite corpus store
//! - **[`config`]** / **[`error`]**: tunables and the error taxonomy
//!
//! ## Architecture
//!
//! ```text
//! NoteEvent → IndexingCoordinator → Chunker → EmbeddingProvider
//!                   ↓                              ↓
//!             CorpusStore  ←  EmbeddingIndex + LexicalIndex
//!                   ↑                              ↑
//! question  →  Retriever (fuse, dedupe, rank)  ────┘
//!                   ↓
//!           ContextAssembler → ContextPayload (cited, budgeted)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use babycoach_embed::{HashedBagProvider, HeuristicTokenCounter};
//! use babycoach_retriever::{KnowledgeBase, NoteEvent, RetrievalConfig};
//!
//! # async fn example(note: babycoach_retriever::Note) -> anyhow::Result<()> {
//! let kb = KnowledgeBase::open(
//!     std::path::Path::new("."),
//!     RetrievalConfig::default(),
//!     Arc::new(HashedBagProvider::new(256)?),
//!     Arc::new(HeuristicTokenCounter::default()),
//! )
//! .await?;
//!
//! kb.index(NoteEvent::Upserted(note)).await?;
//! let payload = kb.query("what did I plant last spring?").await?;
//! for item in &payload.items {
//!     println!("[{}] {}", item.citation.note_title, item.evidence.text);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod knowledge_base;
pub mod retrieval;
pub mod storage;

pub use config::RetrievalConfig;
pub use error::{DimensionMismatch, IndexingError, RetrievalError, StoreError};
pub use knowledge_base::{KnowledgeBase, KnowledgeBaseStats, QueryOverrides};
pub use retrieval::assembler::{Citation, CitedEvidence, ContextAssembler, ContextPayload};
pub use retrieval::coordinator::{IndexingCoordinator, NoteEvent, ReconcileStats};
pub use retrieval::retriever::{EvidenceItem, RetrievalResult, Retriever, Signal};
pub use storage::{ChunkId, Note, NoteId};
