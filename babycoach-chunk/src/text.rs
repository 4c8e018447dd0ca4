//! Splitting note bodies into bounded, overlapping chunks.
//!
//! A chunk is the atomic unit of embedding and retrieval, so the way a note
//! is cut up has a direct effect on answer quality. This module favors
//! breaking at structural boundaries (headings, paragraphs, list items,
//! sentence ends) and only falls back to hard character windows when a span
//! of text has no boundary at all within the chunk limit.
//!
//! The splitter is deterministic: the same body text and configuration
//! always produce the same chunk spans, which makes re-indexing
//! reproducible and lets the indexing layer diff chunk sets by content hash
//! when a note changes.
//!
//! Chunks carry their byte span within the original body. Consecutive
//! chunks may overlap by up to [`ChunkerConfig::overlap_len`] bytes so that
//! a thought cut at a chunk boundary is still visible in the next chunk;
//! the overlap always re-opens at a segment boundary, never mid-word.
//!
//! # Usage
//!
//! ```
//! use babycoach_chunk::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig::new(200, 40)).unwrap();
//! let body = "First paragraph about gardening.\n\nSecond paragraph about soil.";
//! let chunks = chunker.chunk(body);
//!
//! assert!(!chunks.is_empty());
//! for chunk in &chunks {
//!     assert!(!chunk.text.trim().is_empty());
//!     assert_eq!(&body[chunk.start..chunk.end], chunk.text);
//! }
//! ```

use regex::Regex;
use serde::Serialize;
use std::ops::Range;
use thiserror::Error;

/// Default delimiter patterns for personal notes, most significant first.
///
/// Notes are mostly prose with light markdown structure, so the patterns
/// cover headings, code fences, paragraph breaks, list markers, and
/// sentence ends before degrading to line breaks and spaces.
pub const DEFAULT_NOTE_DELIMITERS: &[&str] = &[
    r"(?m)^\s*#{1,6}\s+.*$", // markdown headings
    r"```",                  // code block fences
    r"\n\n",                 // paragraphs
    r"(?m)^\s*[-*+]\s+",     // unordered list items
    r"(?m)^\s*\d+\.\s+",     // ordered list items
    r"[.!?][ \t]",           // sentence ends
    r"\n",                   // line breaks
    r" ",                    // spaces
];

/// Errors raised while building a [`Chunker`].
#[derive(Debug, Error)]
pub enum ChunkError {
    /// The configured sizes cannot produce a valid chunking.
    #[error("invalid chunker configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Configuration for the chunker.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkerConfig {
    /// Maximum size of each chunk in bytes.
    pub max_chunk_len: usize,
    /// Maximum overlap carried from the previous chunk, in bytes. Must be
    /// strictly smaller than `max_chunk_len`.
    pub overlap_len: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_len: 800,
            overlap_len: 160,
        }
    }
}

impl ChunkerConfig {
    pub fn new(max_chunk_len: usize, overlap_len: usize) -> Self {
        Self {
            max_chunk_len,
            overlap_len,
        }
    }

    pub fn with_max_chunk_len(mut self, max_chunk_len: usize) -> Self {
        self.max_chunk_len = max_chunk_len;
        self
    }

    pub fn with_overlap_len(mut self, overlap_len: usize) -> Self {
        self.overlap_len = overlap_len;
        self
    }
}

/// A single chunk of a note body.
///
/// `start..end` is the byte span of `text` within the original body, so
/// `body[chunk.start..chunk.end] == chunk.text` always holds. Spans of
/// consecutive chunks may overlap by up to the configured overlap window;
/// non-adjacent chunks never overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteChunk {
    /// Position of this chunk within the note (0-indexed).
    pub sequence: usize,
    /// Byte offset where the chunk starts in the note body.
    pub start: usize,
    /// Byte offset one past the end of the chunk.
    pub end: usize,
    /// The chunk text, exactly `body[start..end]`.
    pub text: String,
}

/// Deterministic, boundary-preferring note splitter.
///
/// Built from a [`ChunkerConfig`] and a delimiter list. Construction fails
/// with [`ChunkError::InvalidConfiguration`] when the chunk size is zero or
/// does not exceed the overlap.
pub struct Chunker {
    delimiters: Vec<Regex>,
    max_chunk_len: usize,
    overlap_len: usize,
}

impl Chunker {
    /// Create a chunker with [`DEFAULT_NOTE_DELIMITERS`].
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkError> {
        Self::with_delimiters(config, DEFAULT_NOTE_DELIMITERS)
    }

    /// Create a chunker with custom delimiter patterns, applied in order
    /// from most significant to least significant.
    pub fn with_delimiters(
        config: ChunkerConfig,
        delimiter_patterns: &[&str],
    ) -> Result<Self, ChunkError> {
        if config.max_chunk_len == 0 {
            return Err(ChunkError::InvalidConfiguration {
                message: "chunk size must be nonzero".to_string(),
            });
        }
        if config.overlap_len >= config.max_chunk_len {
            return Err(ChunkError::InvalidConfiguration {
                message: format!(
                    "chunk size ({}) must exceed chunk overlap ({})",
                    config.max_chunk_len, config.overlap_len
                ),
            });
        }

        let delimiters = delimiter_patterns
            .iter()
            .map(|&pattern| {
                Regex::new(pattern).map_err(|e| ChunkError::InvalidConfiguration {
                    message: format!("bad delimiter pattern {pattern:?}: {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            delimiters,
            max_chunk_len: config.max_chunk_len,
            overlap_len: config.overlap_len,
        })
    }

    /// Split a note body into ordered chunks.
    ///
    /// Whitespace-only spans are dropped, so every returned chunk has
    /// non-empty text. An empty body yields no chunks.
    pub fn chunk(&self, body: &str) -> Vec<NoteChunk> {
        let segments = self.segment_ranges(body, 0, 0);
        let spans = self.pack_segments(&segments);

        let mut chunks = Vec::with_capacity(spans.len());
        for span in spans {
            let text = &body[span.clone()];
            if text.trim().is_empty() {
                continue;
            }
            chunks.push(NoteChunk {
                sequence: chunks.len(),
                start: span.start,
                end: span.end,
                text: text.to_string(),
            });
        }
        chunks
    }

    // Recursively split text into segment ranges: runs of text between
    // delimiter matches, plus the matches themselves. Each segment fits in
    // max_chunk_len; when every delimiter is exhausted the text is split
    // into hard windows on char boundaries.
    fn segment_ranges(&self, text: &str, delimiter_idx: usize, offset: usize) -> Vec<Range<usize>> {
        let mut segments: Vec<Range<usize>> = Vec::new();

        if text.is_empty() {
            return segments;
        }

        if text.len() <= self.max_chunk_len {
            segments.push(offset..offset + text.len());
            return segments;
        }

        if delimiter_idx >= self.delimiters.len() {
            let mut start = 0;
            while start < text.len() {
                let mut end = (start + self.max_chunk_len).min(text.len());
                while end > start && !text.is_char_boundary(end) {
                    end -= 1;
                }
                if end == start {
                    // chunk window smaller than one char; take the char whole
                    end = start + 1;
                    while end < text.len() && !text.is_char_boundary(end) {
                        end += 1;
                    }
                }
                segments.push(offset + start..offset + end);
                start = end;
            }
            return segments;
        }

        let delimiter = &self.delimiters[delimiter_idx];
        let mut last = 0;

        for mat in delimiter.find_iter(text) {
            if mat.start() > last {
                segments.extend(self.segment_ranges(
                    &text[last..mat.start()],
                    delimiter_idx + 1,
                    offset + last,
                ));
            }
            segments.push(offset + mat.start()..offset + mat.end());
            last = mat.end();
        }

        if last < text.len() {
            segments.extend(self.segment_ranges(&text[last..], delimiter_idx + 1, offset + last));
        }

        segments
    }

    // Greedily pack segments into chunk spans of at most max_chunk_len
    // bytes. When a chunk closes, the next one re-opens at the latest
    // segment boundary within the overlap window, provided the overlapped
    // start still leaves room for at least one new segment.
    fn pack_segments(&self, segments: &[Range<usize>]) -> Vec<Range<usize>> {
        let mut spans: Vec<Range<usize>> = Vec::new();
        let mut start_idx = 0;

        while start_idx < segments.len() {
            let chunk_start = segments[start_idx].start;
            let mut end_idx = start_idx;
            while end_idx + 1 < segments.len()
                && segments[end_idx + 1].end - chunk_start <= self.max_chunk_len
            {
                end_idx += 1;
            }
            spans.push(chunk_start..segments[end_idx].end);

            if end_idx + 1 >= segments.len() {
                break;
            }

            let chunk_end = segments[end_idx].end;
            let next_end = segments[end_idx + 1].end;
            // a chunk may overlap its immediate predecessor only, so the
            // walk back never crosses the end of the chunk before that
            let prior_end = if spans.len() >= 2 {
                spans[spans.len() - 2].end
            } else {
                0
            };
            let mut next_start_idx = end_idx + 1;
            while next_start_idx > start_idx + 1 {
                let candidate = next_start_idx - 1;
                let overlap_ok = chunk_end - segments[candidate].start <= self.overlap_len;
                let progress_ok = next_end - segments[candidate].start <= self.max_chunk_len;
                let boundary_ok = segments[candidate].start >= prior_end;
                if overlap_ok && progress_ok && boundary_ok {
                    next_start_idx = candidate;
                } else {
                    break;
                }
            }
            start_idx = next_start_idx;
        }

        spans
    }
}
