//! Ingestion pipeline: raw documents → chunks → embeddings → vector store.
//!
//! Calls for the same symbol serialize through a per-symbol lock so
//! revision replacement stays ordered; calls for different symbols run
//! fully in parallel. Each (symbol, revision) commits in a single store
//! upsert, so a failure anywhere before that point leaves the previous
//! revision untouched.
//!
//! Last-writer-wins: every call takes a ticket on entry, and a call that
//! observes a newer ticket for its symbol before committing discards its
//! own work instead of overwriting the newer writer's revision.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::chunking::Chunker;
use crate::config::{ChunkingConfig, RetryPolicy};
use crate::embeddings::EmbeddingProvider;
use crate::error::{ConfigurationError, IngestionError};
use crate::retry::with_backoff;
use crate::stores::{NewChunk, VectorBackend};

/// One source document with its opaque revision marker.
#[derive(Clone, Debug)]
pub struct RawDocument {
    pub text: String,
    pub revision: String,
}

impl RawDocument {
    pub fn new(text: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            revision: revision.into(),
        }
    }
}

/// What an ingestion call did.
#[derive(Clone, Copy, Debug, Default)]
pub struct IngestReport {
    /// Documents received.
    pub documents: usize,
    /// Chunks newly written to the store.
    pub chunks: usize,
    /// Documents skipped because their text was empty.
    pub skipped_empty: usize,
    /// True when a newer ingest for the same symbol arrived first and
    /// this call discarded its commit.
    pub superseded: bool,
}

#[derive(Default)]
struct SymbolGate {
    tickets: AtomicU64,
    serial: tokio::sync::Mutex<()>,
}

pub struct IngestionPipeline {
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorBackend>,
    retry: RetryPolicy,
    gates: Mutex<HashMap<String, Arc<SymbolGate>>>,
}

impl IngestionPipeline {
    /// Fails when the chunking parameters are invalid or the embedder's
    /// output dimensionality does not match the store's index.
    pub fn new(
        chunking: &ChunkingConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorBackend>,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigurationError> {
        let chunker = Chunker::new(chunking)?;
        if embedder.dimensions() != store.dimensions() {
            return Err(ConfigurationError::new(format!(
                "embedder produces {}-dimensional vectors but the store index expects {}",
                embedder.dimensions(),
                store.dimensions()
            )));
        }
        Ok(Self {
            chunker,
            embedder,
            store,
            retry,
            gates: Mutex::new(HashMap::new()),
        })
    }

    fn gate(&self, symbol: &str) -> Arc<SymbolGate> {
        Arc::clone(
            self.gates
                .lock()
                .entry(symbol.to_string())
                .or_default(),
        )
    }

    /// (Re)indexes `documents` for `symbol`.
    ///
    /// Documents sharing a revision are combined into one atomic upsert;
    /// distinct revisions commit in input order, each superseding the
    /// previous per the store's replacement contract. Idempotent per
    /// (symbol, revision): re-ingesting identical input is a no-op.
    pub async fn ingest(
        &self,
        symbol: &str,
        documents: Vec<RawDocument>,
    ) -> Result<IngestReport, IngestionError> {
        let gate = self.gate(symbol);
        let ticket = gate.tickets.fetch_add(1, Ordering::SeqCst) + 1;
        let _serial = gate.serial.lock().await;

        let mut report = IngestReport {
            documents: documents.len(),
            ..IngestReport::default()
        };

        // Group documents by revision, preserving first-seen order.
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for document in documents {
            if document.text.trim().is_empty() {
                report.skipped_empty += 1;
                continue;
            }
            match groups.iter_mut().find(|(rev, _)| *rev == document.revision) {
                Some((_, texts)) => texts.push(document.text),
                None => groups.push((document.revision, vec![document.text])),
            }
        }

        for (revision, texts) in groups {
            let mut chunks: Vec<String> = Vec::new();
            for text in &texts {
                chunks.extend(self.chunker.split(text));
            }
            if chunks.is_empty() {
                continue;
            }
            debug!(symbol, %revision, chunks = chunks.len(), "embedding chunk batch");

            let embeddings = with_backoff(&self.retry, "chunk embedding", || {
                self.embedder.embed_batch(&chunks)
            })
            .await
            .map_err(|exhausted| IngestionError::Embedding {
                attempts: exhausted.attempts,
                source: exhausted.error,
            })?;

            let new_chunks: Vec<NewChunk> = chunks
                .iter()
                .zip(embeddings)
                .map(|(content, embedding)| NewChunk {
                    content: content.clone(),
                    embedding,
                })
                .collect();

            // A later call for this symbol has taken a newer ticket;
            // committing now would overwrite its revision with ours.
            if gate.tickets.load(Ordering::SeqCst) != ticket {
                info!(symbol, %revision, "ingest superseded by a newer call, discarding");
                report.superseded = true;
                return Ok(report);
            }

            let outcome = with_backoff(&self.retry, "vector store upsert", || {
                self.store.upsert(symbol, &revision, new_chunks.clone())
            })
            .await
            .map_err(|exhausted| IngestionError::Store {
                attempts: exhausted.attempts,
                source: exhausted.error,
            })?;

            report.chunks += outcome.inserted;
        }

        info!(
            symbol,
            documents = report.documents,
            chunks = report.chunks,
            skipped_empty = report.skipped_empty,
            "ingestion finished"
        );
        Ok(report)
    }
}
