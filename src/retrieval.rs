//! Query-time retrieval: resolve → embed → search → rank.
//!
//! The retriever scopes the similarity search to a company when one can
//! be resolved (an explicit hint always wins), tops up sparse scoped
//! results from the unscoped index, and returns a ranked
//! [`RetrievalResult`]. Finding zero chunks is a valid outcome; only an
//! embedder or store failure after retries is an error.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::config::{RagConfig, RetryPolicy};
use crate::directory::CompanyRecord;
use crate::embeddings::EmbeddingProvider;
use crate::error::RetrievalError;
use crate::resolver::{FuzzyResolver, warn_resolution_degraded};
use crate::retry::with_backoff;
use crate::stores::{ChunkRecord, VectorBackend};

/// How many resolver candidates to consider for scoping.
const RESOLVER_CANDIDATES: usize = 5;

/// One ranked chunk.
#[derive(Clone, Debug)]
pub struct RetrievalHit {
    pub chunk: ChunkRecord,
    /// Cosine distance to the query; smaller is closer.
    pub distance: f32,
    /// True when the chunk came from the symbol-scoped search.
    pub scoped: bool,
}

/// The ranked outcome of one retrieval. Transient, never persisted.
#[derive(Clone, Debug, Default)]
pub struct RetrievalResult {
    pub hits: Vec<RetrievalHit>,
    /// The company the query resolved to, when resolution ran and was
    /// confident enough.
    pub resolved: Option<CompanyRecord>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

pub struct Retriever {
    resolver: Arc<FuzzyResolver>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorBackend>,
    min_confidence: f32,
    retry: RetryPolicy,
}

impl Retriever {
    pub fn new(
        resolver: Arc<FuzzyResolver>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorBackend>,
        config: &RagConfig,
    ) -> Self {
        Self {
            resolver,
            embedder,
            store,
            min_confidence: config.min_confidence,
            retry: config.retry.clone(),
        }
    }

    /// Retrieves the `k` chunks most relevant to `query`.
    ///
    /// With a `symbol_hint` the search scopes to that symbol directly;
    /// otherwise the resolver's top candidate is used when its score
    /// clears the confidence threshold. A scoped search that returns
    /// fewer than `k` chunks is supplemented from the unscoped index,
    /// excluding chunks already returned. The combined result is ordered
    /// by distance ascending; exact ties prefer scoped hits.
    pub async fn retrieve(
        &self,
        query: &str,
        symbol_hint: Option<&str>,
        k: usize,
    ) -> Result<RetrievalResult, RetrievalError> {
        if k == 0 {
            return Ok(RetrievalResult::default());
        }

        let (scope, resolved) = match symbol_hint {
            Some(hint) => (Some(hint.to_string()), None),
            None => self.resolve_scope(query).await,
        };

        let query_embedding = with_backoff(&self.retry, "query embedding", || {
            self.embedder.embed(query)
        })
        .await
        .map_err(|exhausted| RetrievalError::Embedding {
            attempts: exhausted.attempts,
            source: exhausted.error,
        })?;

        let mut hits: Vec<RetrievalHit> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        if let Some(symbol) = scope.as_deref() {
            let scoped = with_backoff(&self.retry, "scoped similarity search", || {
                self.store.similarity_search(&query_embedding, k, Some(symbol))
            })
            .await
            .map_err(|exhausted| RetrievalError::Store {
                attempts: exhausted.attempts,
                source: exhausted.error,
            })?;
            for (chunk, distance) in scoped {
                seen.insert(chunk.id.clone());
                hits.push(RetrievalHit {
                    chunk,
                    distance,
                    scoped: true,
                });
            }
        }

        if hits.len() < k {
            // Over-fetch so exclusions cannot starve the supplement.
            let want = k + seen.len();
            let unscoped = with_backoff(&self.retry, "unscoped similarity search", || {
                self.store.similarity_search(&query_embedding, want, None)
            })
            .await
            .map_err(|exhausted| RetrievalError::Store {
                attempts: exhausted.attempts,
                source: exhausted.error,
            })?;
            for (chunk, distance) in unscoped {
                if hits.len() >= k {
                    break;
                }
                if seen.insert(chunk.id.clone()) {
                    hits.push(RetrievalHit {
                        chunk,
                        distance,
                        scoped: false,
                    });
                }
            }
        }

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.scoped.cmp(&a.scoped))
        });
        hits.truncate(k);

        debug!(
            query,
            scope = scope.as_deref().unwrap_or("<unscoped>"),
            hits = hits.len(),
            "retrieval finished"
        );
        Ok(RetrievalResult { hits, resolved })
    }

    /// Resolution inside retrieval is best-effort: a directory outage
    /// degrades to an unscoped search instead of failing the call.
    async fn resolve_scope(&self, query: &str) -> (Option<String>, Option<CompanyRecord>) {
        match self.resolver.resolve(query, RESOLVER_CANDIDATES).await {
            Ok(matches) => match matches.into_iter().next() {
                Some(top) if top.similarity >= self.min_confidence => {
                    let scope = top.company.primary_symbol().map(str::to_string);
                    (scope, Some(top.company))
                }
                _ => (None, None),
            },
            Err(error) => {
                warn_resolution_degraded(query, &error);
                (None, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RagConfig;
    use crate::directory::{CompanyDirectory, CompanyRecord, MemoryCompanyDirectory};
    use crate::embeddings::MockEmbeddingProvider;
    use crate::error::{EmbeddingError, StoreUnavailableError};
    use crate::stores::{MemoryVectorStore, NewChunk, UpsertOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    fn fast_config() -> RagConfig {
        let mut config = RagConfig::default();
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 2;
        config
    }

    async fn embed(text: &str) -> Vec<f32> {
        MockEmbeddingProvider::new(16).embed(text).await.unwrap()
    }

    async fn seeded_directory() -> Arc<MemoryCompanyDirectory> {
        let directory = Arc::new(MemoryCompanyDirectory::new());
        directory
            .refresh(vec![
                CompanyRecord::new("Tata Consultancy Services").with_nse_symbol("TCS"),
                CompanyRecord::new("Infosys Limited").with_nse_symbol("INFY"),
            ])
            .await
            .unwrap();
        directory
    }

    fn retriever_with(
        directory: Arc<MemoryCompanyDirectory>,
        store: Arc<dyn VectorBackend>,
    ) -> Retriever {
        let config = fast_config();
        let resolver = Arc::new(FuzzyResolver::new(directory, &config));
        Retriever::new(
            resolver,
            Arc::new(MockEmbeddingProvider::new(16)),
            store,
            &config,
        )
    }

    async fn seed_chunks(store: &MemoryVectorStore, symbol: &str, texts: &[&str]) {
        let mut chunks = Vec::new();
        for text in texts {
            chunks.push(NewChunk {
                content: text.to_string(),
                embedding: embed(text).await,
            });
        }
        store.upsert(symbol, "rev-1", chunks).await.unwrap();
    }

    #[tokio::test]
    async fn hint_scopes_retrieval_to_that_symbol() {
        let store = Arc::new(MemoryVectorStore::new(16));
        seed_chunks(
            &store,
            "TCS",
            &["tcs alpha", "tcs beta", "tcs gamma", "tcs delta", "tcs epsilon"],
        )
        .await;
        seed_chunks(&store, "INFY", &["infy one", "infy two"]).await;

        let retriever = retriever_with(seeded_directory().await, store);
        let result = retriever
            .retrieve("latest news", Some("TCS"), 5)
            .await
            .unwrap();

        assert_eq!(result.hits.len(), 5);
        assert!(result.hits.iter().all(|hit| hit.chunk.symbol == "TCS"));
        assert!(result.hits.iter().all(|hit| hit.scoped));
    }

    #[tokio::test]
    async fn sparse_scoped_results_are_supplemented_unscoped() {
        let store = Arc::new(MemoryVectorStore::new(16));
        seed_chunks(&store, "TCS", &["tcs only chunk"]).await;
        seed_chunks(&store, "INFY", &["infy filler one", "infy filler two"]).await;

        let retriever = retriever_with(seeded_directory().await, store);
        let result = retriever
            .retrieve("quarterly outlook", Some("TCS"), 3)
            .await
            .unwrap();

        assert_eq!(result.hits.len(), 3);
        let scoped: Vec<_> = result.hits.iter().filter(|hit| hit.scoped).collect();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].chunk.symbol, "TCS");
        // No chunk appears twice even though the unscoped search also
        // returns the TCS chunk.
        let mut ids: Vec<_> = result.hits.iter().map(|hit| hit.chunk.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn resolver_confidence_drives_scoping() {
        let store = Arc::new(MemoryVectorStore::new(16));
        seed_chunks(&store, "TCS", &["tcs results chunk"]).await;
        seed_chunks(&store, "INFY", &["infy results chunk"]).await;

        let retriever = retriever_with(seeded_directory().await, store);

        // "TCS" resolves with full confidence and scopes the search.
        let scoped = retriever.retrieve("TCS", None, 1).await.unwrap();
        assert!(scoped.resolved.is_some());
        assert_eq!(scoped.hits[0].chunk.symbol, "TCS");

        // A query naming no company stays unscoped.
        let unscoped = retriever
            .retrieve("macro outlook for markets", None, 2)
            .await
            .unwrap();
        assert!(unscoped.resolved.is_none());
        assert_eq!(unscoped.hits.len(), 2);
    }

    #[tokio::test]
    async fn empty_store_and_unresolved_query_yield_empty_result() {
        let store = Arc::new(MemoryVectorStore::new(16));
        let retriever = retriever_with(seeded_directory().await, store);

        let result = retriever
            .retrieve("anything at all", None, 5)
            .await
            .unwrap();
        assert!(result.is_empty());
        assert!(result.resolved.is_none());
    }

    #[tokio::test]
    async fn exact_distance_ties_prefer_scoped_hits() {
        let store = Arc::new(MemoryVectorStore::new(16));
        // Identical text under two symbols produces identical distances.
        seed_chunks(&store, "TCS", &["identical body"]).await;
        seed_chunks(&store, "INFY", &["identical body"]).await;

        let retriever = retriever_with(seeded_directory().await, store);
        let result = retriever
            .retrieve("identical body", Some("TCS"), 2)
            .await
            .unwrap();

        assert_eq!(result.hits.len(), 2);
        assert_eq!(result.hits[0].chunk.symbol, "TCS");
        assert!(result.hits[0].scoped);
        assert!((result.hits[0].distance - result.hits[1].distance).abs() < 1e-6);
    }

    struct DownEmbedder;

    #[async_trait]
    impl EmbeddingProvider for DownEmbedder {
        fn name(&self) -> &str {
            "down"
        }

        fn dimensions(&self) -> usize {
            16
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Backend("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn embedder_failure_surfaces_after_retries() {
        let store = Arc::new(MemoryVectorStore::new(16));
        let config = fast_config();
        let resolver = Arc::new(FuzzyResolver::new(seeded_directory().await, &config));
        let retriever = Retriever::new(resolver, Arc::new(DownEmbedder), store, &config);

        let err = retriever.retrieve("anything", None, 3).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Embedding { attempts: 3, .. }));
    }

    /// Store that fails a configurable number of times before recovering.
    struct FlakyStore {
        inner: MemoryVectorStore,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl VectorBackend for FlakyStore {
        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        async fn upsert(
            &self,
            symbol: &str,
            revision: &str,
            chunks: Vec<NewChunk>,
        ) -> Result<UpsertOutcome, StoreUnavailableError> {
            self.inner.upsert(symbol, revision, chunks).await
        }

        async fn similarity_search(
            &self,
            query: &[f32],
            k: usize,
            symbol: Option<&str>,
        ) -> Result<Vec<(ChunkRecord, f32)>, StoreUnavailableError> {
            if self.failures_left.fetch_update(
                AtomicOrdering::SeqCst,
                AtomicOrdering::SeqCst,
                |n| n.checked_sub(1),
            ).is_ok()
            {
                return Err(StoreUnavailableError::new("index warming up"));
            }
            self.inner.similarity_search(query, k, symbol).await
        }

        async fn delete_symbol(&self, symbol: &str) -> Result<usize, StoreUnavailableError> {
            self.inner.delete_symbol(symbol).await
        }

        async fn count(&self) -> Result<usize, StoreUnavailableError> {
            self.inner.count().await
        }
    }

    #[tokio::test]
    async fn transient_store_failures_are_retried() {
        let inner = MemoryVectorStore::new(16);
        seed_chunks(&inner, "TCS", &["tcs recovery chunk"]).await;
        let store = Arc::new(FlakyStore {
            inner,
            failures_left: AtomicU32::new(2),
        });

        let retriever = retriever_with(seeded_directory().await, store);
        let result = retriever
            .retrieve("recovery", Some("TCS"), 1)
            .await
            .unwrap();
        assert_eq!(result.hits.len(), 1);
    }
}
