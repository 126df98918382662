//! Vector storage backends for document chunks.
//!
//! A unified [`VectorBackend`] trait abstracts over the supported
//! implementations so the pipeline and retriever never depend on a
//! specific database:
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │  VectorBackend   │
//!                  │  (async trait)   │
//!                  └────────┬─────────┘
//!                           │
//!               ┌───────────┴───────────┐
//!               ▼                       ▼
//!        ┌─────────────┐         ┌─────────────┐
//!        │   SQLite    │         │  In-memory  │
//!        │ sqlite-vec  │         │  (tests &   │
//!        │             │         │   demos)    │
//!        └─────────────┘         └─────────────┘
//! ```
//!
//! Chunks are partitioned by company symbol and versioned by an opaque
//! `source_revision`: an upsert for a new revision supersedes every chunk
//! of the old revision atomically, and re-upserting an already-committed
//! revision is a no-op.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreUnavailableError;

pub use memory::MemoryVectorStore;
pub use sqlite::SqliteVectorStore;

/// A chunk as it is handed to the store for indexing.
#[derive(Clone, Debug)]
pub struct NewChunk {
    pub content: String,
    pub embedding: Vec<f32>,
}

/// A stored, retrievable chunk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub symbol: String,
    pub content: String,
    pub source_revision: String,
    pub created_at: DateTime<Utc>,
}

/// What an upsert did.
#[derive(Clone, Copy, Debug, Default)]
pub struct UpsertOutcome {
    /// Chunks written for the new revision.
    pub inserted: usize,
    /// Chunks removed because their revision was superseded.
    pub replaced: usize,
    /// True when the revision was already committed and nothing changed.
    pub unchanged: bool,
}

/// Persistent index over `(symbol, chunk, embedding, revision)` records.
///
/// All failures are [`StoreUnavailableError`]; callers retry with bounded
/// exponential backoff before surfacing a terminal error.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Embedding dimensionality the index was created with.
    fn dimensions(&self) -> usize;

    /// Replaces all chunks for `symbol` whose stored revision differs
    /// from `revision`, then writes `chunks` under `revision`, in one
    /// atomic step. Re-upserting an already-committed revision is a
    /// no-op.
    async fn upsert(
        &self,
        symbol: &str,
        revision: &str,
        chunks: Vec<NewChunk>,
    ) -> Result<UpsertOutcome, StoreUnavailableError>;

    /// The `k` chunks nearest to `query` by cosine distance, smallest
    /// first, optionally restricted to one symbol. Ties break toward the
    /// most recent `created_at`.
    async fn similarity_search(
        &self,
        query: &[f32],
        k: usize,
        symbol: Option<&str>,
    ) -> Result<Vec<(ChunkRecord, f32)>, StoreUnavailableError>;

    /// Removes every chunk for `symbol`; returns how many were removed.
    async fn delete_symbol(&self, symbol: &str) -> Result<usize, StoreUnavailableError>;

    /// Total number of stored chunks.
    async fn count(&self) -> Result<usize, StoreUnavailableError>;
}
