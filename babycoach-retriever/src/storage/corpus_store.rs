//! SQLite-backed corpus store.
//!
//! The store is the authoritative record of notes and their chunk sets.
//! Once `put_note` returns, the note and its chunks survive a crash; the
//! in-memory indexes are rebuilt from here on open.
//!
//! ## Database Schema
//!
//! ```sql
//! -- Notes table: one row per note, tombstoned on delete
//! CREATE TABLE notes (
//!     id TEXT PRIMARY KEY,             -- ingestion-assigned note id
//!     title TEXT,
//!     body TEXT,
//!     created_at INTEGER,              -- unix seconds
//!     modified_at INTEGER,             -- unix seconds
//!     tags_json TEXT,                  -- JSON array of tags
//!     source_json TEXT,                -- opaque source metadata
//!     content_hash TEXT,               -- blake3 over title + body
//!     deleted INTEGER,                 -- tombstone flag
//!     indexed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
//! );
//!
//! -- Chunks table: the chunk set of each live note
//! CREATE TABLE chunks (
//!     note_id TEXT REFERENCES notes(id),
//!     position INTEGER,                -- chunk position within the note
//!     span_start INTEGER,              -- byte span within the note body
//!     span_end INTEGER,
//!     content TEXT,                    -- the chunk text
//!     content_hash TEXT,               -- blake3 over the embedded passage
//!     embedding BLOB,                  -- f16 embedding vector (optional)
//!     PRIMARY KEY (note_id, position)
//! );
//! ```
//!
//! ## Consistency
//!
//! `put_note` replaces a note's chunk set inside one transaction, so a
//! concurrent reader sees either the previous set or the new one, never a
//! mix. `delete_note` is a tombstone: the note row stays (flagged) while
//! the chunk rows are dropped in the same transaction, making the note
//! invisible to every read immediately even while index cleanup is still
//! in flight.
//!
//! ## SQLite Configuration
//!
//! WAL journaling for concurrent readers during writes, a 64 KB page size
//! for embedding blobs, busy timeout, foreign keys, and full auto-vacuum.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;

use super::{ChunkId, Note, NoteId, NoteMeta, StoredChunk};
use crate::error::StoreError;

/// SQLite-backed store of notes and chunk sets. See module docs for the
/// schema and consistency rules.
#[derive(Clone, Debug)]
pub struct CorpusStore {
    pool: SqlitePool,
}

impl CorpusStore {
    /// Open (or create) the store at `base/babycoach.db`.
    pub async fn open(base: &Path) -> Result<Self, StoreError> {
        let db_path = base.join("babycoach.db");

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true)
                .auto_vacuum(sqlx::sqlite::SqliteAutoVacuum::Full)
                .page_size(1 << 16)
                .optimize_on_close(true, 1 << 10),
        )
        .await?;
        Self::new_with_pool(pool).await
    }

    /// Open an in-memory store, for tests.
    pub async fn open_memory() -> Result<Self, StoreError> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        Self::new_with_pool(pool).await
    }

    async fn new_with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notes (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                modified_at INTEGER NOT NULL,
                tags_json TEXT NOT NULL DEFAULT '[]',
                source_json TEXT NOT NULL DEFAULT '{}',
                content_hash TEXT NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                indexed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                note_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                span_start INTEGER NOT NULL,
                span_end INTEGER NOT NULL,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                embedding BLOB,
                PRIMARY KEY (note_id, position),
                FOREIGN KEY (note_id) REFERENCES notes(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_note ON chunks(note_id)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_notes_modified ON notes(modified_at)")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Commit a note and its full chunk set in one transaction.
    ///
    /// Replaces any previous chunk set for the note; clears a tombstone if
    /// the note id is being reused.
    pub async fn put_note(&self, note: &Note, chunks: &[StoredChunk]) -> Result<(), StoreError> {
        let tags_json = serde_json::to_string(&note.tags)?;
        let source_json = serde_json::to_string(&note.source)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO notes
                (id, title, body, created_at, modified_at, tags_json, source_json, content_hash, deleted, indexed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                body = excluded.body,
                modified_at = excluded.modified_at,
                tags_json = excluded.tags_json,
                source_json = excluded.source_json,
                content_hash = excluded.content_hash,
                deleted = 0,
                indexed_at = datetime('now')
            "#,
        )
        .bind(&note.id)
        .bind(&note.title)
        .bind(&note.body)
        .bind(note.created_at.timestamp())
        .bind(note.modified_at.timestamp())
        .bind(tags_json)
        .bind(source_json)
        .bind(note.content_hash())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks WHERE note_id = ?1")
            .bind(&note.id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            let embedding_bytes = chunk
                .embedding
                .as_ref()
                .map(|e| bytemuck::cast_slice::<half::f16, u8>(e));

            sqlx::query(
                r#"
                INSERT INTO chunks (note_id, position, span_start, span_end, content, content_hash, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&chunk.id.note_id)
            .bind(chunk.id.position as i64)
            .bind(chunk.start as i64)
            .bind(chunk.end as i64)
            .bind(&chunk.content)
            .bind(&chunk.content_hash)
            .bind(embedding_bytes)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Fetch a live note; tombstoned notes return `None`.
    pub async fn get_note(&self, note_id: &str) -> Result<Option<Note>, StoreError> {
        let row = sqlx::query(
            "SELECT id, title, body, created_at, modified_at, tags_json, source_json
             FROM notes WHERE id = ?1 AND deleted = 0",
        )
        .bind(note_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let tags_json: String = row.get("tags_json");
        let source_json: String = row.get("source_json");

        Ok(Some(Note {
            id: row.get("id"),
            title: row.get("title"),
            body: row.get("body"),
            created_at: timestamp(row.get("created_at")),
            modified_at: timestamp(row.get("modified_at")),
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            source: serde_json::from_str(&source_json).unwrap_or_default(),
        }))
    }

    /// Content hash of the stored live note, if any. Cheap probe used by
    /// the reconciler to skip unchanged notes.
    pub async fn note_content_hash(&self, note_id: &str) -> Result<Option<String>, StoreError> {
        let hash = sqlx::query_scalar::<_, String>(
            "SELECT content_hash FROM notes WHERE id = ?1 AND deleted = 0",
        )
        .bind(note_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hash)
    }

    /// Tombstone a note: flag the row and drop its chunks in one
    /// transaction. Returns whether a live note existed.
    pub async fn delete_note(&self, note_id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE notes SET deleted = 1 WHERE id = ?1 AND deleted = 0")
            .bind(note_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM chunks WHERE note_id = ?1")
            .bind(note_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Chunks of a live note, ordered by position. Tombstoned notes list
    /// no chunks.
    pub async fn list_chunks(&self, note_id: &str) -> Result<Vec<StoredChunk>, StoreError> {
        let rows = sqlx::query(
            "SELECT c.note_id, c.position, c.span_start, c.span_end, c.content, c.content_hash, c.embedding
             FROM chunks c JOIN notes n ON n.id = c.note_id
             WHERE c.note_id = ?1 AND n.deleted = 0
             ORDER BY c.position",
        )
        .bind(note_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_chunk).collect())
    }

    /// Metadata for the given notes, keyed by note id. Tombstoned notes
    /// are absent from the result.
    pub async fn get_notes_meta(
        &self,
        note_ids: &[NoteId],
    ) -> Result<HashMap<NoteId, NoteMeta>, StoreError> {
        if note_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = note_ids
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");

        let query = format!(
            "SELECT id, title, modified_at FROM notes WHERE deleted = 0 AND id IN ({placeholders})"
        );
        let mut query_builder = sqlx::query(&query);
        for id in note_ids {
            query_builder = query_builder.bind(id);
        }

        let rows = query_builder.fetch_all(&self.pool).await?;

        let mut metas = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: NoteId = row.get("id");
            metas.insert(
                id.clone(),
                NoteMeta {
                    id,
                    title: row.get("title"),
                    modified_at: timestamp(row.get("modified_at")),
                },
            );
        }
        Ok(metas)
    }

    /// Every live chunk paired with its note's title, for rebuilding the
    /// in-memory indexes on open.
    pub async fn load_live_chunks(&self) -> Result<Vec<(StoredChunk, String)>, StoreError> {
        let rows = sqlx::query(
            "SELECT c.note_id, c.position, c.span_start, c.span_end, c.content, c.content_hash, c.embedding, n.title
             FROM chunks c JOIN notes n ON n.id = c.note_id
             WHERE n.deleted = 0
             ORDER BY c.note_id, c.position",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let title: String = row.get("title");
                (row_to_chunk(row), title)
            })
            .collect())
    }
}

fn row_to_chunk(row: sqlx::sqlite::SqliteRow) -> StoredChunk {
    let note_id: String = row.get("note_id");
    let position: i64 = row.get("position");
    let span_start: i64 = row.get("span_start");
    let span_end: i64 = row.get("span_end");
    let embedding_bytes: Option<Vec<u8>> = row.get("embedding");

    let embedding =
        embedding_bytes.map(|bytes| bytemuck::cast_slice::<u8, half::f16>(&bytes).to_vec());

    StoredChunk {
        id: ChunkId::new(note_id, position as u32),
        start: span_start as usize,
        end: span_end as usize,
        content: row.get("content"),
        content_hash: row.get("content_hash"),
        embedding,
    }
}

fn timestamp(unix_seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(unix_seconds, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use half::f16;

    fn sample_note(id: &str, title: &str, body: &str) -> Note {
        Note {
            id: id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            created_at: timestamp(1_700_000_000),
            modified_at: timestamp(1_700_000_100),
            tags: vec!["journal".to_string()],
            source: HashMap::from([("origin".to_string(), "test".to_string())]),
        }
    }

    fn sample_chunk(note_id: &str, position: u32, content: &str) -> StoredChunk {
        StoredChunk {
            id: ChunkId::new(note_id, position),
            start: 0,
            end: content.len(),
            content: content.to_string(),
            content_hash: hex::encode(blake3::hash(content.as_bytes()).as_bytes()),
            embedding: Some(vec![
                f16::from_f32(0.1),
                f16::from_f32(0.2),
                f16::from_f32(0.3),
            ]),
        }
    }

    #[tokio::test]
    async fn put_and_get_roundtrip() -> Result<()> {
        let store = CorpusStore::open_memory().await?;
        let note = sample_note("n1", "Garden", "Planted tomatoes in the raised bed.");
        let chunks = vec![sample_chunk("n1", 0, "Planted tomatoes in the raised bed.")];

        store.put_note(&note, &chunks).await?;

        let fetched = store.get_note("n1").await?.expect("note should exist");
        assert_eq!(fetched.title, "Garden");
        assert_eq!(fetched.tags, vec!["journal".to_string()]);
        assert_eq!(fetched.source.get("origin").map(String::as_str), Some("test"));
        assert_eq!(fetched.modified_at, note.modified_at);

        let listed = store.list_chunks("n1").await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, ChunkId::new("n1", 0));
        assert!(listed[0].embedding.is_some());
        assert_eq!(listed[0].embedding.as_ref().unwrap().len(), 3);

        Ok(())
    }

    #[tokio::test]
    async fn put_replaces_the_whole_chunk_set() -> Result<()> {
        let store = CorpusStore::open_memory().await?;
        let note = sample_note("n1", "Garden", "Old body with several chunks.");
        store
            .put_note(
                &note,
                &[
                    sample_chunk("n1", 0, "Old body"),
                    sample_chunk("n1", 1, "with several chunks."),
                ],
            )
            .await?;

        let mut updated = note.clone();
        updated.body = "Short body.".to_string();
        store
            .put_note(&updated, &[sample_chunk("n1", 0, "Short body.")])
            .await?;

        let listed = store.list_chunks("n1").await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].content, "Short body.");

        Ok(())
    }

    #[tokio::test]
    async fn tombstone_hides_note_and_chunks_immediately() -> Result<()> {
        let store = CorpusStore::open_memory().await?;
        let note = sample_note("n1", "Garden", "Body.");
        store
            .put_note(&note, &[sample_chunk("n1", 0, "Body.")])
            .await?;

        assert!(store.delete_note("n1").await?);
        assert!(store.get_note("n1").await?.is_none());
        assert!(store.note_content_hash("n1").await?.is_none());
        assert!(store.list_chunks("n1").await?.is_empty());
        assert!(store.load_live_chunks().await?.is_empty());

        // deleting again is a no-op
        assert!(!store.delete_note("n1").await?);

        // re-putting the same id clears the tombstone
        store
            .put_note(&note, &[sample_chunk("n1", 0, "Body.")])
            .await?;
        assert!(store.get_note("n1").await?.is_some());

        Ok(())
    }

    #[tokio::test]
    async fn metadata_covers_only_live_notes() -> Result<()> {
        let store = CorpusStore::open_memory().await?;
        store
            .put_note(&sample_note("n1", "First", "Body one."), &[])
            .await?;
        store
            .put_note(&sample_note("n2", "Second", "Body two."), &[])
            .await?;
        store.delete_note("n2").await?;

        let metas = store
            .get_notes_meta(&["n1".to_string(), "n2".to_string(), "n3".to_string()])
            .await?;
        assert_eq!(metas.len(), 1);
        assert_eq!(metas.get("n1").map(|m| m.title.as_str()), Some("First"));

        Ok(())
    }

    #[tokio::test]
    async fn live_chunks_carry_note_titles() -> Result<()> {
        let store = CorpusStore::open_memory().await?;
        let note = sample_note("n1", "Garden", "Body.");
        store
            .put_note(&note, &[sample_chunk("n1", 0, "Body.")])
            .await?;

        let live = store.load_live_chunks().await?;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].1, "Garden");
        assert_eq!(live[0].0.content, "Body.");

        Ok(())
    }
}
