//! Facade wiring the pipeline, resolver, retriever, and assembler into
//! the three seams the routing layer consumes (`ingest`, `resolve`,
//! `retrieve`), plus a convenience `answer` that runs retrieval through
//! the generation capability.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::assembly::{ContextBudget, assemble};
use crate::config::RagConfig;
use crate::directory::CompanyDirectory;
use crate::embeddings::EmbeddingProvider;
use crate::error::{ConfigurationError, IngestionError, RetrievalError};
use crate::generation::{GenerationConfig, GenerationError, GenerationProvider};
use crate::ingestion::{IngestReport, IngestionPipeline, RawDocument};
use crate::resolver::{FuzzyResolver, ResolverMatch};
use crate::retrieval::{RetrievalResult, Retriever};
use crate::stores::VectorBackend;

/// Failure of an end-to-end grounded answer.
#[derive(Debug, Error)]
pub enum AnswerError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error(transparent)]
    Config(#[from] ConfigurationError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// A generated answer plus grounding telemetry.
#[derive(Clone, Debug)]
pub struct GroundedAnswer {
    pub text: String,
    pub tokens_used: u32,
    /// True when at least one retrieved chunk backed the prompt.
    pub grounded: bool,
    /// Number of chunks retrieved (before budgeting).
    pub hits: usize,
}

/// The retrieval engine's outward surface.
pub struct RagService {
    resolver: Arc<FuzzyResolver>,
    retriever: Retriever,
    pipeline: IngestionPipeline,
    generation: Arc<dyn GenerationProvider>,
    generation_config: GenerationConfig,
    budget: ContextBudget,
    top_k: usize,
}

impl RagService {
    pub fn new(
        config: &RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorBackend>,
        directory: Arc<dyn CompanyDirectory>,
        generation: Arc<dyn GenerationProvider>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let resolver = Arc::new(FuzzyResolver::new(directory, config));
        let retriever = Retriever::new(
            Arc::clone(&resolver),
            Arc::clone(&embedder),
            Arc::clone(&store),
            config,
        );
        let pipeline =
            IngestionPipeline::new(&config.chunking, embedder, store, config.retry.clone())?;
        Ok(Self {
            resolver,
            retriever,
            pipeline,
            generation,
            generation_config: GenerationConfig::default(),
            budget: config.budget,
            top_k: config.top_k,
        })
    }

    #[must_use]
    pub fn with_generation_config(mut self, config: GenerationConfig) -> Self {
        self.generation_config = config;
        self
    }

    /// (Re)indexes documents for a symbol. See [`IngestionPipeline::ingest`].
    pub async fn ingest(
        &self,
        symbol: &str,
        documents: Vec<RawDocument>,
    ) -> Result<IngestReport, IngestionError> {
        self.pipeline.ingest(symbol, documents).await
    }

    /// Resolves a free-text query to company records. See
    /// [`FuzzyResolver::resolve`].
    pub async fn resolve(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ResolverMatch>, RetrievalError> {
        self.resolver.resolve(query, limit).await
    }

    /// Retrieves ranked chunks for a query. See [`Retriever::retrieve`].
    pub async fn retrieve(
        &self,
        query: &str,
        symbol_hint: Option<&str>,
        k: usize,
    ) -> Result<RetrievalResult, RetrievalError> {
        self.retriever.retrieve(query, symbol_hint, k).await
    }

    /// Retrieves, assembles the bounded grounding prompt, and generates
    /// the answer. An empty retrieval is not an error: the model is asked
    /// to answer from general knowledge and flag the missing grounding.
    pub async fn answer(
        &self,
        query: &str,
        symbol_hint: Option<&str>,
    ) -> Result<GroundedAnswer, AnswerError> {
        let result = self.retriever.retrieve(query, symbol_hint, self.top_k).await?;
        let prompt = assemble(query, &result, &self.budget)?;
        let generation = self
            .generation
            .generate(&prompt, &self.generation_config)
            .await?;

        info!(
            query,
            hits = result.hits.len(),
            tokens_used = generation.tokens_used,
            "answer generated"
        );
        Ok(GroundedAnswer {
            text: generation.text,
            tokens_used: generation.tokens_used,
            grounded: !result.is_empty(),
            hits: result.hits.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{CompanyRecord, MemoryCompanyDirectory};
    use crate::embeddings::MockEmbeddingProvider;
    use crate::generation::CannedGenerationProvider;
    use crate::stores::MemoryVectorStore;

    async fn service() -> RagService {
        let directory = Arc::new(MemoryCompanyDirectory::new());
        directory
            .refresh(vec![
                CompanyRecord::new("Tata Consultancy Services").with_nse_symbol("TCS"),
            ])
            .await
            .unwrap();

        RagService::new(
            &RagConfig::default(),
            Arc::new(MockEmbeddingProvider::new(16)),
            Arc::new(MemoryVectorStore::new(16)),
            directory,
            Arc::new(CannedGenerationProvider::new("generated summary")),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn answer_on_empty_store_is_ungrounded_but_successful() {
        let service = service().await;
        let answer = service.answer("how did markets close?", None).await.unwrap();
        assert_eq!(answer.text, "generated summary");
        assert!(!answer.grounded);
        assert_eq!(answer.hits, 0);
    }

    #[tokio::test]
    async fn ingest_then_answer_is_grounded() {
        let service = service().await;
        service
            .ingest(
                "TCS",
                vec![RawDocument::new(
                    "TCS reported strong quarterly earnings with margin expansion",
                    "rev-1",
                )],
            )
            .await
            .unwrap();

        let answer = service
            .answer("quarterly earnings", Some("TCS"))
            .await
            .unwrap();
        assert!(answer.grounded);
        assert!(answer.hits > 0);
        assert!(answer.tokens_used > 0);
    }
}
