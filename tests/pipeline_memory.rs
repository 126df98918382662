//! End-to-end pipeline tests over the in-memory backends with the
//! deterministic mock embedder: ingest → resolve → retrieve → assemble.

use std::sync::Arc;

use finground::{
    CompanyDirectory, CompanyRecord, ContextBudget, MemoryCompanyDirectory, MemoryVectorStore,
    MockEmbeddingProvider, RagConfig, RagService, RawDocument, VectorBackend, assemble,
};
use finground::generation::CannedGenerationProvider;

const DIMENSIONS: usize = 16;

async fn seeded_service(store: Arc<MemoryVectorStore>) -> RagService {
    let directory = Arc::new(MemoryCompanyDirectory::new());
    directory
        .refresh(vec![
            CompanyRecord::new("Tata Consultancy Services")
                .with_nse_symbol("TCS")
                .with_isin("INE467B01029"),
            CompanyRecord::new("Tata Motors").with_nse_symbol("TATAMOTORS"),
            CompanyRecord::new("Infosys Limited").with_nse_symbol("INFY"),
        ])
        .await
        .unwrap();

    RagService::new(
        &RagConfig::default(),
        Arc::new(MockEmbeddingProvider::new(DIMENSIONS)),
        store,
        directory,
        Arc::new(CannedGenerationProvider::new("ok")),
    )
    .unwrap()
}

fn article(symbol: &str, topic: &str) -> String {
    format!(
        "{symbol} {topic}: the company commented on demand trends, deal wins, \
         and the margin trajectory for the coming quarters."
    )
}

#[tokio::test]
async fn ingest_twice_leaves_identical_observable_state() {
    let store = Arc::new(MemoryVectorStore::new(DIMENSIONS));
    let service = seeded_service(Arc::clone(&store)).await;

    let docs = vec![RawDocument::new(article("TCS", "earnings"), "2026-03-14T10:00:00Z")];
    service.ingest("TCS", docs.clone()).await.unwrap();
    let count_once = store.count().await.unwrap();
    let hits_once = service
        .retrieve("earnings", Some("TCS"), 10)
        .await
        .unwrap()
        .hits
        .len();

    service.ingest("TCS", docs).await.unwrap();
    assert_eq!(store.count().await.unwrap(), count_once);
    let hits_twice = service
        .retrieve("earnings", Some("TCS"), 10)
        .await
        .unwrap()
        .hits
        .len();
    assert_eq!(hits_twice, hits_once);
}

#[tokio::test]
async fn newer_revision_makes_old_chunks_unreachable() {
    let store = Arc::new(MemoryVectorStore::new(DIMENSIONS));
    let service = seeded_service(Arc::clone(&store)).await;

    service
        .ingest("TCS", vec![RawDocument::new(article("TCS", "guidance cut"), "v1")])
        .await
        .unwrap();
    service
        .ingest("TCS", vec![RawDocument::new(article("TCS", "guidance raised"), "v2")])
        .await
        .unwrap();

    let result = service.retrieve("guidance", Some("TCS"), 20).await.unwrap();
    assert!(!result.hits.is_empty());
    assert!(
        result
            .hits
            .iter()
            .all(|hit| hit.chunk.source_revision == "v2"),
        "v1 chunks must be unreachable after the v2 ingest"
    );
}

#[tokio::test]
async fn scoped_retrieval_stays_scoped_when_enough_chunks_exist() {
    let store = Arc::new(MemoryVectorStore::new(DIMENSIONS));
    let service = seeded_service(Arc::clone(&store)).await;

    // A long enough body to produce well over five 1000-char chunks.
    let combined = ["earnings", "dividend", "buyback", "hiring", "expansion"]
        .iter()
        .map(|topic| article("TCS", topic))
        .collect::<Vec<_>>()
        .join("\n\n")
        .repeat(10);
    service
        .ingest("TCS", vec![RawDocument::new(combined, "batch-1")])
        .await
        .unwrap();
    service
        .ingest("INFY", vec![RawDocument::new(article("INFY", "results"), "r1")])
        .await
        .unwrap();

    let result = service.retrieve("latest news", Some("TCS"), 5).await.unwrap();
    assert_eq!(result.hits.len(), 5);
    assert!(result.hits.iter().all(|hit| hit.chunk.symbol == "TCS"));
}

#[tokio::test]
async fn resolver_drives_scoping_through_the_service() {
    let store = Arc::new(MemoryVectorStore::new(DIMENSIONS));
    let service = seeded_service(Arc::clone(&store)).await;

    service
        .ingest("TCS", vec![RawDocument::new(article("TCS", "results"), "r1")])
        .await
        .unwrap();
    service
        .ingest("TATAMOTORS", vec![RawDocument::new(article("TATAMOTORS", "sales"), "r1")])
        .await
        .unwrap();

    let matches = service.resolve("TCS", 5).await.unwrap();
    assert_eq!(matches[0].company.company_name, "Tata Consultancy Services");

    let result = service.retrieve("TCS news update", None, 3).await.unwrap();
    if let Some(resolved) = &result.resolved {
        assert_eq!(resolved.company_name, "Tata Consultancy Services");
    }

    let by_isin = service.resolve("INE467B01029", 5).await.unwrap();
    assert_eq!(by_isin[0].company.company_name, "Tata Consultancy Services");
}

#[tokio::test]
async fn empty_everything_degrades_to_fallback_prompt() {
    let store = Arc::new(MemoryVectorStore::new(DIMENSIONS));
    let service = seeded_service(Arc::clone(&store)).await;

    let result = service
        .retrieve("completely unknown topic", None, 5)
        .await
        .unwrap();
    assert!(result.is_empty());

    let prompt = assemble("completely unknown topic", &result, &ContextBudget::default()).unwrap();
    assert!(prompt.contains("No grounding context was found"));

    let answer = service.answer("completely unknown topic", None).await.unwrap();
    assert!(!answer.grounded);
}

#[tokio::test]
async fn assembled_prompt_respects_budget_end_to_end() {
    let store = Arc::new(MemoryVectorStore::new(DIMENSIONS));
    let service = seeded_service(Arc::clone(&store)).await;

    let long_body = article("TCS", "annual report").repeat(25);
    service
        .ingest("TCS", vec![RawDocument::new(long_body, "r1")])
        .await
        .unwrap();

    let result = service.retrieve("annual report", Some("TCS"), 10).await.unwrap();
    assert!(result.hits.len() > 2);

    let budget = ContextBudget {
        max_chunks: 2,
        max_chars: 100_000,
    };
    let prompt = assemble("annual report", &result, &budget).unwrap();
    let passages = prompt.matches("] (TCS, ").count();
    assert!(passages <= 2, "budget admitted {passages} passages");
}
