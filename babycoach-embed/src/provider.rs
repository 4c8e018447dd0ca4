//! Embedding provider implementations

use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fnv::FnvHasher;
use half::f16;
use std::hash::Hasher;

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result from a vector of f16 embeddings.
    ///
    /// The dimension is inferred from the first embedding vector; an empty
    /// result has dimension 0.
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Returns `true` if this result contains no embedding vectors.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate embeddings from text.
///
/// This is the capability boundary between the retrieval core and whatever
/// actually computes vectors (a local model, a remote API, a test stub).
/// Implementations must be deterministic per input if the corpus they feed
/// is expected to reconcile idempotently.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>>;

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;
}

/// Deterministic bag-of-words embedding provider.
///
/// Hashes lowercased alphanumeric tokens into a fixed number of buckets
/// with FNV and L2-normalizes the bucket counts. Texts sharing vocabulary
/// land in shared buckets and therefore score high cosine similarity,
/// which is enough signal for tests and fully offline operation. Text with
/// no tokens embeds to the zero vector.
#[derive(Debug, Clone)]
pub struct HashedBagProvider {
    dimension: usize,
}

impl HashedBagProvider {
    /// Create a provider producing vectors of the given dimension.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(EmbedError::invalid_config(
                "embedding dimension must be nonzero",
            ));
        }
        Ok(Self { dimension })
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hasher = FnvHasher::default();
        hasher.write(token.as_bytes());
        (hasher.finish() % self.dimension as u64) as usize
    }

    fn embed_sync(&self, text: &str) -> Vec<f16> {
        let mut weights = vec![0f32; self.dimension];
        for token in text.split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let token = token.to_lowercase();
            weights[self.bucket(&token)] += 1.0;
        }

        let norm = weights.iter().map(|w| w * w).sum::<f32>().sqrt();
        if norm > 0.0 {
            for w in &mut weights {
                *w /= norm;
            }
        }

        weights.into_iter().map(f16::from_f32).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for HashedBagProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let embeddings = texts.iter().map(|t| self.embed_sync(t)).collect();
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "hashed-bag"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f16], b: &[f16]) -> f32 {
        let dot: f32 = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| x.to_f32() * y.to_f32())
            .sum();
        let na: f32 = a.iter().map(|x| x.to_f32().powi(2)).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x.to_f32().powi(2)).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
    }

    #[tokio::test]
    async fn embeddings_are_deterministic() -> Result<()> {
        let provider = HashedBagProvider::new(128)?;
        let a = provider.embed_text("morning pages about the garden").await?;
        let b = provider.embed_text("morning pages about the garden").await?;
        assert_eq!(a, b);
        Ok(())
    }

    #[tokio::test]
    async fn shared_vocabulary_scores_higher_than_unrelated() -> Result<()> {
        let provider = HashedBagProvider::new(256)?;
        let query = provider.embed_text("ramen broth recipe").await?;
        let related = provider
            .embed_text("a recipe for rich tonkotsu ramen broth")
            .await?;
        let unrelated = provider
            .embed_text("quarterly budget spreadsheet notes")
            .await?;

        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
        Ok(())
    }

    #[tokio::test]
    async fn empty_text_embeds_to_zero_vector() -> Result<()> {
        let provider = HashedBagProvider::new(64)?;
        let vector = provider.embed_text("   ...   ").await?;
        assert!(vector.iter().all(|v| v.to_f32() == 0.0));
        Ok(())
    }

    #[tokio::test]
    async fn batch_matches_single_embedding() -> Result<()> {
        let provider = HashedBagProvider::new(64)?;
        let texts = vec!["first note".to_string(), "second note".to_string()];
        let batch = provider.embed_texts(&texts).await?;

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.dimension, 64);
        assert_eq!(batch.embeddings[0], provider.embed_text("first note").await?);
        Ok(())
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(matches!(
            HashedBagProvider::new(0),
            Err(EmbedError::InvalidConfig { .. })
        ));
    }
}
