//! The facade tying the retrieval core together.
//!
//! A [`KnowledgeBase`] owns one corpus: a SQLite corpus store plus the two
//! in-memory indexes rebuilt from it on open. All handles are per-instance
//! and passed explicitly into each component, so one process can host any
//! number of isolated corpora (the tests lean on this heavily).
//!
//! ```text
//! write path:  NoteEvent → IndexingCoordinator → indexes + CorpusStore
//! read path:   question  → Retriever → ContextAssembler → ContextPayload
//! ```
//!
//! The coordinator is the sole writer; queries are read-only and may run
//! concurrently with indexing and with each other. Dropping a query future
//! (caller-side timeout) cancels it without side effects.

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use babycoach_chunk::{Chunker, ChunkerConfig};
use babycoach_embed::{EmbeddingProvider, TokenCounter};

use crate::config::RetrievalConfig;
use crate::error::{IndexingError, RetrievalError};
use crate::retrieval::assembler::{ContextAssembler, ContextPayload};
use crate::retrieval::coordinator::{IndexingCoordinator, NoteEvent, ReconcileStats};
use crate::retrieval::embedding_index::EmbeddingIndex;
use crate::retrieval::lexical_index::{LexicalIndex, tokenize};
use crate::retrieval::retriever::{RetrievalResult, Retriever};
use crate::storage::corpus_store::CorpusStore;

/// Per-query overrides for knobs that otherwise come from
/// [`RetrievalConfig`].
#[derive(Debug, Clone, Default)]
pub struct QueryOverrides {
    pub token_budget: Option<usize>,
    pub top_k_semantic: Option<usize>,
    pub top_k_lexical: Option<usize>,
    pub max_results: Option<usize>,
}

/// Sizes and counters describing one knowledge base.
#[derive(Debug, Clone)]
pub struct KnowledgeBaseStats {
    pub reconcile: ReconcileStats,
    pub embedded_chunks: usize,
    pub lexical_chunks: usize,
}

/// One indexed corpus with its retrieval pipeline.
pub struct KnowledgeBase {
    config: RetrievalConfig,
    coordinator: IndexingCoordinator,
    retriever: Retriever,
    assembler: ContextAssembler,
    embedding_index: Arc<EmbeddingIndex>,
    lexical_index: Arc<LexicalIndex>,
}

impl KnowledgeBase {
    /// Open (or create) a knowledge base persisted under `base`.
    ///
    /// Validates the configuration, opens the store, and rebuilds both
    /// indexes from the live chunks. Rebuilding performs zero embedding
    /// calls: vectors persist with their chunks.
    pub async fn open(
        base: &Path,
        config: RetrievalConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        token_counter: Arc<dyn TokenCounter>,
    ) -> Result<Self, IndexingError> {
        let store = CorpusStore::open(base).await?;
        Self::with_store(store, config, embedder, token_counter).await
    }

    /// Open a knowledge base backed by an in-memory store, for tests.
    pub async fn open_memory(
        config: RetrievalConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        token_counter: Arc<dyn TokenCounter>,
    ) -> Result<Self, IndexingError> {
        let store = CorpusStore::open_memory().await?;
        Self::with_store(store, config, embedder, token_counter).await
    }

    async fn with_store(
        store: CorpusStore,
        config: RetrievalConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        token_counter: Arc<dyn TokenCounter>,
    ) -> Result<Self, IndexingError> {
        config.validate()?;
        let chunker = Chunker::new(ChunkerConfig::new(config.chunk_size, config.chunk_overlap))?;

        let store = Arc::new(store);
        let embedding_index = Arc::new(EmbeddingIndex::new());
        let lexical_index = Arc::new(LexicalIndex::new());

        let mut rebuilt = 0usize;
        for (chunk, title) in store.load_live_chunks().await? {
            let mut tokens = tokenize(&title);
            tokens.extend(tokenize(&chunk.content));
            if let Some(embedding) = chunk.embedding {
                embedding_index.upsert(chunk.id.clone(), embedding).await?;
            }
            lexical_index.upsert(chunk.id, &tokens).await;
            rebuilt += 1;
        }
        if rebuilt > 0 {
            info!("rebuilt indexes for {rebuilt} chunks from the corpus store");
        }

        let coordinator = IndexingCoordinator::new(
            store.clone(),
            embedding_index.clone(),
            lexical_index.clone(),
            embedder.clone(),
            chunker,
        );
        let retriever = Retriever::new(
            store.clone(),
            embedding_index.clone(),
            lexical_index.clone(),
            embedder,
        );
        let assembler = ContextAssembler::new(token_counter);

        Ok(Self {
            config,
            coordinator,
            retriever,
            assembler,
            embedding_index,
            lexical_index,
        })
    }

    /// Apply one note event from the ingestion layer.
    pub async fn index(&self, event: NoteEvent) -> Result<(), IndexingError> {
        self.coordinator.reconcile(event).await
    }

    /// Retrieve and assemble grounding evidence for a question.
    pub async fn query(&self, question: &str) -> Result<ContextPayload, RetrievalError> {
        self.query_with(question, QueryOverrides::default()).await
    }

    /// [`query`](Self::query) with per-call knob overrides.
    pub async fn query_with(
        &self,
        question: &str,
        overrides: QueryOverrides,
    ) -> Result<ContextPayload, RetrievalError> {
        let mut config = self.config.clone();
        if let Some(top_k) = overrides.top_k_semantic {
            config.top_k_semantic = top_k;
        }
        if let Some(top_k) = overrides.top_k_lexical {
            config.top_k_lexical = top_k;
        }
        if let Some(max_results) = overrides.max_results {
            config.max_results = max_results;
        }
        let token_budget = overrides.token_budget.unwrap_or(config.token_budget);

        let result = self.retriever.retrieve(question, &config).await?;
        self.assembler.assemble(&result, token_budget)
    }

    /// Ranked evidence without budget assembly, for diagnostics and tests.
    pub async fn retrieve(&self, question: &str) -> Result<RetrievalResult, RetrievalError> {
        self.retriever.retrieve(question, &self.config).await
    }

    pub async fn stats(&self) -> KnowledgeBaseStats {
        KnowledgeBaseStats {
            reconcile: self.coordinator.stats().await,
            embedded_chunks: self.embedding_index.len().await,
            lexical_chunks: self.lexical_index.len().await,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }
}
