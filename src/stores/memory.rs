//! In-process vector store.
//!
//! Implements the full [`VectorBackend`] contract over a `Vec` guarded by
//! a read-write lock. Intended for tests and small demos; the persistent
//! backend is [`super::sqlite::SqliteVectorStore`].

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{ChunkRecord, NewChunk, UpsertOutcome, VectorBackend};
use crate::error::StoreUnavailableError;

struct StoredChunk {
    record: ChunkRecord,
    embedding: Vec<f32>,
}

pub struct MemoryVectorStore {
    dimensions: usize,
    inner: RwLock<Vec<StoredChunk>>,
}

impl MemoryVectorStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            inner: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VectorBackend for MemoryVectorStore {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn upsert(
        &self,
        symbol: &str,
        revision: &str,
        chunks: Vec<NewChunk>,
    ) -> Result<UpsertOutcome, StoreUnavailableError> {
        if let Some(bad) = chunks
            .iter()
            .find(|chunk| chunk.embedding.len() != self.dimensions)
        {
            return Err(StoreUnavailableError::new(format!(
                "embedding has {} dimensions, index expects {}",
                bad.embedding.len(),
                self.dimensions
            )));
        }

        let now = Utc::now();
        let mut guard = self.inner.write();

        let already_committed = guard
            .iter()
            .any(|stored| stored.record.symbol == symbol && stored.record.source_revision == revision);

        let before = guard.len();
        guard.retain(|stored| {
            stored.record.symbol != symbol || stored.record.source_revision == revision
        });
        let replaced = before - guard.len();

        if already_committed {
            return Ok(UpsertOutcome {
                inserted: 0,
                replaced,
                unchanged: replaced == 0,
            });
        }

        let inserted = chunks.len();
        for chunk in chunks {
            guard.push(StoredChunk {
                record: ChunkRecord {
                    id: Uuid::new_v4().to_string(),
                    symbol: symbol.to_string(),
                    content: chunk.content,
                    source_revision: revision.to_string(),
                    created_at: now,
                },
                embedding: chunk.embedding,
            });
        }

        Ok(UpsertOutcome {
            inserted,
            replaced,
            unchanged: false,
        })
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        k: usize,
        symbol: Option<&str>,
    ) -> Result<Vec<(ChunkRecord, f32)>, StoreUnavailableError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let guard = self.inner.read();
        let mut scored: Vec<(ChunkRecord, f32)> = guard
            .iter()
            .filter(|stored| symbol.is_none_or(|s| stored.record.symbol == s))
            .map(|stored| {
                (
                    stored.record.clone(),
                    cosine_distance(query, &stored.embedding),
                )
            })
            .collect();

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.0.created_at.cmp(&a.0.created_at))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn delete_symbol(&self, symbol: &str) -> Result<usize, StoreUnavailableError> {
        let mut guard = self.inner.write();
        let before = guard.len();
        guard.retain(|stored| stored.record.symbol != symbol);
        Ok(before - guard.len())
    }

    async fn count(&self) -> Result<usize, StoreUnavailableError> {
        Ok(self.inner.read().len())
    }
}

/// Cosine distance (1 − cosine similarity), matching the metric the
/// SQLite backend gets from `vec_distance_cosine`.
pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}
