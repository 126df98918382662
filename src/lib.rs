//! Retrieval and grounding engine for financial document Q&A.
//!
//! ```text
//! raw text ──► ingestion::IngestionPipeline ──► chunking::Chunker
//!                                   │
//!                                   ├─► embeddings::EmbeddingProvider
//!                                   └─► stores::VectorBackend (sqlite-vec / memory)
//!
//! query ──► resolver::FuzzyResolver (trigram over directory::CompanyDirectory)
//!                │
//!                ▼
//!        retrieval::Retriever ──► VectorBackend::similarity_search
//!                │
//!                ▼
//!        assembly::assemble ──► bounded grounding prompt
//!                │
//!                ▼
//!        generation::GenerationProvider (external capability)
//! ```
//!
//! Two similarity spaces stay deliberately separate: the resolver ranks
//! companies lexically (trigram similarity over names and exchange
//! symbols), the retriever ranks chunks by embedding cosine distance.
//! Their tie-break rules are independent and testable on their own.
//!
//! Chunks are partitioned by company symbol and versioned by an opaque
//! `source_revision`; re-indexing a symbol supersedes the previous
//! revision atomically. See [`service::RagService`] for the assembled
//! outward surface.

pub mod assembly;
pub mod chunking;
pub mod config;
pub mod directory;
pub mod embeddings;
pub mod error;
pub mod generation;
pub mod ingestion;
pub mod resolver;
mod retry;
pub mod retrieval;
pub mod service;
pub mod stores;

pub use assembly::{ContextBudget, assemble};
pub use chunking::{Chunker, chunk};
pub use config::{ChunkingConfig, RagConfig, RetryPolicy};
pub use directory::{CompanyDirectory, CompanyRecord, MemoryCompanyDirectory, SqliteCompanyDirectory};
pub use embeddings::{EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider};
pub use error::{
    ConfigurationError, EmbeddingError, IngestionError, RetrievalError, StoreUnavailableError,
};
pub use generation::{Generation, GenerationConfig, GenerationProvider};
pub use ingestion::{IngestReport, IngestionPipeline, RawDocument};
pub use resolver::{FuzzyResolver, MatchKind, ResolverMatch};
pub use retrieval::{RetrievalHit, RetrievalResult, Retriever};
pub use service::{AnswerError, GroundedAnswer, RagService};
pub use stores::{ChunkRecord, MemoryVectorStore, NewChunk, SqliteVectorStore, VectorBackend};
