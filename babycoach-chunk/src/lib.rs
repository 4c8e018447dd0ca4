pub mod text;

// Re-export the chunking surface for external use
pub use text::{ChunkError, Chunker, ChunkerConfig, DEFAULT_NOTE_DELIMITERS, NoteChunk};
