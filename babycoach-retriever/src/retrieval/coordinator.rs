//! Reconciles note events against the corpus store and both indexes.
//!
//! The coordinator is the only writer in the system: every mutation of the
//! corpus store, the embedding index, and the lexical index flows through
//! [`IndexingCoordinator::reconcile`]. The retriever and assembler only
//! ever read.
//!
//! ## Pipeline
//!
//! ```text
//! NoteEvent → content-hash skip → Chunker → embed changed chunks
//!                                              ↓
//!            stale-entry purge ← CorpusStore ← both indexes
//! ```
//!
//! ## Ordering Guarantee
//!
//! For an update, both indexes receive the new chunk set before the store
//! commit, and stale entries are purged only afterwards, so there is no
//! window in which a query finds zero evidence for a note that is merely
//! being updated. Per-note reconciliation is serialized through a lock
//! registry: at most one in-flight reconcile per note id, while different
//! notes reconcile concurrently.
//!
//! ## Idempotence and Retries
//!
//! Reconcile is idempotent per content hash: replaying an event whose
//! content already matches the store is a no-op with zero embedding calls.
//! Transient store failures are retried with exponential backoff up to
//! [`MAX_ATTEMPTS`]; anything else surfaces immediately. Either way,
//! re-submitting the same event later is always safe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use babycoach_chunk::Chunker;
use babycoach_embed::EmbeddingProvider;

use crate::error::IndexingError;
use crate::retrieval::embedding_index::EmbeddingIndex;
use crate::retrieval::lexical_index::{LexicalIndex, tokenize};
use crate::storage::corpus_store::CorpusStore;
use crate::storage::{ChunkId, Note, NoteId, StoredChunk};

/// A change to the note corpus, as reported by the ingestion layer.
#[derive(Debug, Clone)]
pub enum NoteEvent {
    /// A note was created or its content changed. Both cases reconcile
    /// identically; the content hash decides how much work is left to do.
    Upserted(Note),
    /// A note was removed from the source system.
    Deleted(NoteId),
}

impl NoteEvent {
    /// The note this event concerns.
    pub fn note_id(&self) -> &str {
        match self {
            Self::Upserted(note) => &note.id,
            Self::Deleted(note_id) => note_id,
        }
    }
}

/// Counters for reconcile activity since this coordinator was created.
#[derive(Debug, Default, Clone)]
pub struct ReconcileStats {
    pub notes_reconciled: usize,
    pub notes_skipped: usize,
    pub notes_deleted: usize,
    pub chunks_indexed: usize,
    pub embeddings_generated: usize,
    pub errors: usize,
}

/// Retry ceiling for transient store failures.
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Sole writer over the corpus store and both indexes.
pub struct IndexingCoordinator {
    store: Arc<CorpusStore>,
    embedding_index: Arc<EmbeddingIndex>,
    lexical_index: Arc<LexicalIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Chunker,
    note_locks: Mutex<HashMap<NoteId, Arc<Mutex<()>>>>,
    stats: RwLock<ReconcileStats>,
}

impl IndexingCoordinator {
    pub fn new(
        store: Arc<CorpusStore>,
        embedding_index: Arc<EmbeddingIndex>,
        lexical_index: Arc<LexicalIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: Chunker,
    ) -> Self {
        Self {
            store,
            embedding_index,
            lexical_index,
            embedder,
            chunker,
            note_locks: Mutex::new(HashMap::new()),
            stats: RwLock::new(ReconcileStats::default()),
        }
    }

    /// Apply one note event, serialized per note id and retried with
    /// backoff on transient store failures.
    pub async fn reconcile(&self, event: NoteEvent) -> Result<(), IndexingError> {
        let note_id = event.note_id().to_owned();
        let lock = self.note_lock(&note_id).await;
        let _guard = lock.lock().await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match &event {
                NoteEvent::Upserted(note) => self.apply_upsert(note).await,
                NoteEvent::Deleted(id) => self.apply_delete(id).await,
            };

            match result {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                    warn!(
                        "reconcile of note {note_id} failed on attempt {attempt}: {err}; retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    self.stats.write().await.errors += 1;
                    return Err(if attempt > 1 {
                        IndexingError::RetriesExhausted {
                            note_id,
                            attempts: attempt,
                            source: Box::new(err),
                        }
                    } else {
                        err
                    });
                }
            }
        }
    }

    /// Snapshot of activity counters.
    pub async fn stats(&self) -> ReconcileStats {
        self.stats.read().await.clone()
    }

    async fn note_lock(&self, note_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.note_locks.lock().await;
        locks
            .entry(note_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn apply_upsert(&self, note: &Note) -> Result<(), IndexingError> {
        let note_hash = note.content_hash();
        if self.store.note_content_hash(&note.id).await?.as_deref() == Some(note_hash.as_str()) {
            debug!("note {} unchanged, skipping reconcile", note.id);
            self.stats.write().await.notes_skipped += 1;
            return Ok(());
        }

        let previous: HashMap<u32, StoredChunk> = self
            .store
            .list_chunks(&note.id)
            .await?
            .into_iter()
            .map(|chunk| (chunk.id.position, chunk))
            .collect();

        // re-chunk, reusing stored embeddings wherever the passage hash is
        // unchanged so unchanged chunks cost no provider calls
        let mut chunks: Vec<StoredChunk> = Vec::new();
        let mut pending: Vec<usize> = Vec::new();
        let mut pending_passages: Vec<String> = Vec::new();

        for piece in self.chunker.chunk(&note.body) {
            let passage = passage_text(&note.title, &piece.text);
            let content_hash = hex::encode(blake3::hash(passage.as_bytes()).as_bytes());
            let position = piece.sequence as u32;

            let embedding = previous
                .get(&position)
                .filter(|prev| prev.content_hash == content_hash)
                .and_then(|prev| prev.embedding.clone());
            if embedding.is_none() {
                pending.push(chunks.len());
                pending_passages.push(passage);
            }

            chunks.push(StoredChunk {
                id: ChunkId::new(note.id.clone(), position),
                start: piece.start,
                end: piece.end,
                content: piece.text,
                content_hash,
                embedding,
            });
        }

        let embeddings_generated = pending.len();
        if !pending_passages.is_empty() {
            let batch = self.embedder.embed_texts(&pending_passages).await?;
            for (&chunk_idx, embedding) in pending.iter().zip(batch.embeddings) {
                chunks[chunk_idx].embedding = Some(embedding);
            }
        }

        // new state goes into both indexes before the old state is purged
        for chunk in &chunks {
            if let Some(embedding) = &chunk.embedding {
                self.embedding_index
                    .upsert(chunk.id.clone(), embedding.clone())
                    .await?;
            }
            let mut tokens = tokenize(&note.title);
            tokens.extend(tokenize(&chunk.content));
            self.lexical_index.upsert(chunk.id.clone(), &tokens).await;
        }

        self.store.put_note(note, &chunks).await?;

        let new_len = chunks.len() as u32;
        for (position, prev) in previous {
            if position >= new_len {
                self.embedding_index.remove(&prev.id).await;
                self.lexical_index.remove(&prev.id).await;
            }
        }

        let mut stats = self.stats.write().await;
        stats.notes_reconciled += 1;
        stats.chunks_indexed += chunks.len();
        stats.embeddings_generated += embeddings_generated;
        drop(stats);

        debug!(
            "reconciled note {} into {} chunks ({} freshly embedded)",
            note.id,
            chunks.len(),
            embeddings_generated
        );
        Ok(())
    }

    async fn apply_delete(&self, note_id: &str) -> Result<(), IndexingError> {
        let chunks = self.store.list_chunks(note_id).await?;
        for chunk in &chunks {
            self.embedding_index.remove(&chunk.id).await;
            self.lexical_index.remove(&chunk.id).await;
        }

        if self.store.delete_note(note_id).await? {
            self.stats.write().await.notes_deleted += 1;
            debug!("deleted note {note_id} and its {} chunks", chunks.len());
        }
        Ok(())
    }
}

/// The text actually embedded for a chunk: the note title as context,
/// then the chunk span.
pub(crate) fn passage_text(title: &str, chunk_text: &str) -> String {
    format!("{title}\n\n{chunk_text}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use babycoach_chunk::ChunkerConfig;
    use babycoach_embed::HashedBagProvider;
    use chrono::{TimeZone, Utc};
    use tracing_test::traced_test;

    async fn coordinator() -> Result<(
        IndexingCoordinator,
        Arc<CorpusStore>,
        Arc<EmbeddingIndex>,
        Arc<LexicalIndex>,
    )> {
        let store = Arc::new(CorpusStore::open_memory().await?);
        let embedding_index = Arc::new(EmbeddingIndex::new());
        let lexical_index = Arc::new(LexicalIndex::new());
        let embedder = Arc::new(HashedBagProvider::new(128)?);
        let chunker = Chunker::new(ChunkerConfig::new(200, 40))?;

        let coordinator = IndexingCoordinator::new(
            store.clone(),
            embedding_index.clone(),
            lexical_index.clone(),
            embedder,
            chunker,
        );
        Ok((coordinator, store, embedding_index, lexical_index))
    }

    fn note(id: &str, title: &str, body: &str, modified_at_secs: i64) -> Note {
        Note {
            id: id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            modified_at: Utc.timestamp_opt(modified_at_secs, 0).unwrap(),
            tags: vec![],
            source: HashMap::new(),
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn created_note_lands_in_store_and_both_indexes() -> Result<()> {
        let (coordinator, store, embedding_index, lexical_index) = coordinator().await?;

        let note = note(
            "n1",
            "Garden log",
            "Planted tomatoes in the raised bed. Watered the seedlings at dusk.",
            1_700_000_100,
        );
        coordinator
            .reconcile(NoteEvent::Upserted(note))
            .await?;

        let stored = store.list_chunks("n1").await?;
        assert!(!stored.is_empty());
        assert!(stored.iter().all(|c| c.embedding.is_some()));
        assert_eq!(embedding_index.len().await, stored.len());
        assert_eq!(lexical_index.len().await, stored.len());

        let stats = coordinator.stats().await;
        assert_eq!(stats.notes_reconciled, 1);
        assert_eq!(stats.chunks_indexed, stored.len());
        assert_eq!(stats.embeddings_generated, stored.len());

        Ok(())
    }

    #[tokio::test]
    async fn unchanged_note_is_skipped_entirely() -> Result<()> {
        let (coordinator, _, _, _) = coordinator().await?;

        let original = note("n1", "Garden log", "Planted tomatoes.", 1_700_000_100);
        coordinator
            .reconcile(NoteEvent::Upserted(original.clone()))
            .await?;

        // same content, later timestamp: still a skip
        let mut replay = original;
        replay.modified_at = Utc.timestamp_opt(1_700_000_999, 0).unwrap();
        coordinator.reconcile(NoteEvent::Upserted(replay)).await?;

        let stats = coordinator.stats().await;
        assert_eq!(stats.notes_reconciled, 1);
        assert_eq!(stats.notes_skipped, 1);
        assert_eq!(stats.embeddings_generated, stats.chunks_indexed);

        Ok(())
    }

    #[tokio::test]
    async fn shrinking_update_purges_stale_chunks() -> Result<()> {
        let (coordinator, store, embedding_index, lexical_index) = coordinator().await?;

        let long_body = (0..12)
            .map(|i| format!("Paragraph {i} with enough words to fill a chunk comfortably.\n\n"))
            .collect::<String>();
        coordinator
            .reconcile(NoteEvent::Upserted(note("n1", "Log", &long_body, 1)))
            .await?;
        let before = store.list_chunks("n1").await?.len();
        assert!(before > 1);

        coordinator
            .reconcile(NoteEvent::Upserted(note("n1", "Log", "One short line.", 2)))
            .await?;

        let after = store.list_chunks("n1").await?;
        assert_eq!(after.len(), 1);
        assert_eq!(embedding_index.len().await, 1);
        assert_eq!(lexical_index.len().await, 1);

        Ok(())
    }

    #[tokio::test]
    async fn partial_edit_reembeds_only_changed_chunks() -> Result<()> {
        let (coordinator, store, _, _) = coordinator().await?;

        // each paragraph is close to the 200-byte chunk limit, so the two
        // paragraphs land in separate chunks and only the second changes
        let stable = "Stable paragraph that will not change between the two versions of this note, \
                      padded out with further words so that it nearly fills one whole chunk by itself."
            .to_string();
        let body_v1 = format!("{stable}\n\nOriginal second paragraph about ramen broth, also padded with \
                               enough extra words to guarantee it cannot share a chunk with the first.");
        let body_v2 = format!("{stable}\n\nRewritten second paragraph about miso soup, also padded with \
                               enough extra words to guarantee it cannot share a chunk with the first.");

        coordinator
            .reconcile(NoteEvent::Upserted(note("n1", "Food", &body_v1, 1)))
            .await?;
        let first_pass = coordinator.stats().await.embeddings_generated;

        coordinator
            .reconcile(NoteEvent::Upserted(note("n1", "Food", &body_v2, 2)))
            .await?;
        let second_pass = coordinator.stats().await.embeddings_generated - first_pass;

        let chunk_count = store.list_chunks("n1").await?.len();
        assert!(
            second_pass < chunk_count,
            "expected fewer re-embeddings ({second_pass}) than chunks ({chunk_count})"
        );

        Ok(())
    }

    #[tokio::test]
    async fn deleted_note_vanishes_from_store_and_indexes() -> Result<()> {
        let (coordinator, store, embedding_index, lexical_index) = coordinator().await?;

        coordinator
            .reconcile(NoteEvent::Upserted(note(
                "n1",
                "Log",
                "Some body text worth indexing.",
                1,
            )))
            .await?;
        coordinator
            .reconcile(NoteEvent::Deleted("n1".to_string()))
            .await?;

        assert!(store.get_note("n1").await?.is_none());
        assert!(store.list_chunks("n1").await?.is_empty());
        assert!(embedding_index.is_empty().await);
        assert!(lexical_index.is_empty().await);
        assert_eq!(coordinator.stats().await.notes_deleted, 1);

        // deleting an unknown note is a quiet no-op
        coordinator
            .reconcile(NoteEvent::Deleted("ghost".to_string()))
            .await?;
        assert_eq!(coordinator.stats().await.notes_deleted, 1);

        Ok(())
    }
}
