//! Error types for the embedding capabilities

/// Result type for embedding operations.
///
/// Convenience alias using [`EmbedError`] as the error type, used
/// throughout the crate for operations that can fail.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for embedding operations.
///
/// Covers configuration problems caught when a provider is constructed and
/// runtime failures while generating embeddings. Integrates with
/// [`thiserror`] for automatic [`std::error::Error`] implementation and
/// error chaining.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Error when provider configuration is invalid
    #[error("Invalid embedding configuration: {message}")]
    InvalidConfig { message: String },

    /// Error during embedding generation
    #[error("Embedding generation failed: {source}")]
    EmbeddingGeneration {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Generic errors from other libraries
    #[error("External error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl EmbedError {
    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Wrap any error that occurred while generating embeddings.
    pub fn embedding_gen<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::EmbeddingGeneration {
            source: Box::new(source),
        }
    }
}
