//! # babycoach-embed
//!
//! Pluggable capabilities the babycoach retrieval core depends on but does
//! not implement itself: turning text into embedding vectors and counting
//! tokens for context budgets. Both are modeled as traits injected at
//! construction time, never as global defaults, so a process can host
//! multiple isolated corpora with different backends.
//!
//! ## Quick Start
//!
//! ```
//! use babycoach_embed::{EmbeddingProvider, HashedBagProvider};
//!
//! # async fn example() -> babycoach_embed::Result<()> {
//! let provider = HashedBagProvider::new(256)?;
//! let result = provider
//!     .embed_texts(&["ramen broth".to_string(), "tonkotsu ramen".to_string()])
//!     .await?;
//!
//! assert_eq!(result.len(), 2);
//! assert_eq!(result.dimension, 256);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`provider`]: the [`EmbeddingProvider`] trait, batch results, and a
//!   deterministic hashed bag-of-words provider for tests and offline use
//! - [`tokens`]: the [`TokenCounter`] trait and a chars-per-token heuristic
//! - [`error`]: the [`EmbedError`] taxonomy
//!
//! Embeddings are `half::f16` vectors throughout: half precision halves
//! index memory and storage with no measurable retrieval quality loss.

pub mod error;
pub mod provider;
pub mod tokens;

pub use error::{EmbedError, Result};
pub use provider::{EmbeddingProvider, EmbeddingResult, HashedBagProvider};
pub use tokens::{HeuristicTokenCounter, TokenCounter};
