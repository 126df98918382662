//! On-disk integration tests for the SQLite vector store and company
//! directory.

use std::sync::Arc;

use tempfile::tempdir;

use finground::{
    CompanyDirectory, CompanyRecord, FuzzyResolver, NewChunk, RagConfig, SqliteCompanyDirectory,
    SqliteVectorStore, VectorBackend,
};

const DIMENSIONS: usize = 4;

fn chunk(content: &str, embedding: [f32; 4]) -> NewChunk {
    NewChunk {
        content: content.to_string(),
        embedding: embedding.to_vec(),
    }
}

#[tokio::test]
async fn chunks_round_trip_through_the_index() {
    let dir = tempdir().unwrap();
    let store = SqliteVectorStore::open(dir.path().join("index.sqlite"), DIMENSIONS)
        .await
        .unwrap();

    let outcome = store
        .upsert(
            "TCS",
            "rev-1",
            vec![
                chunk("tcs earnings beat", [1.0, 0.0, 0.0, 0.0]),
                chunk("tcs guidance steady", [0.0, 1.0, 0.0, 0.0]),
            ],
        )
        .await
        .unwrap();
    assert_eq!(outcome.inserted, 2);
    assert_eq!(store.count().await.unwrap(), 2);

    let hits = store
        .similarity_search(&[1.0, 0.0, 0.0, 0.0], 2, Some("TCS"))
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].0.content, "tcs earnings beat");
    assert!(hits[0].1 < hits[1].1, "nearest chunk must rank first");
    assert_eq!(hits[0].0.symbol, "TCS");
    assert_eq!(hits[0].0.source_revision, "rev-1");
}

#[tokio::test]
async fn reupserting_the_same_revision_is_a_noop() {
    let dir = tempdir().unwrap();
    let store = SqliteVectorStore::open(dir.path().join("index.sqlite"), DIMENSIONS)
        .await
        .unwrap();

    let chunks = vec![chunk("stable content", [0.5, 0.5, 0.0, 0.0])];
    store.upsert("INFY", "rev-1", chunks.clone()).await.unwrap();
    let second = store.upsert("INFY", "rev-1", chunks).await.unwrap();

    assert!(second.unchanged);
    assert_eq!(second.inserted, 0);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn a_new_revision_replaces_the_old_one_atomically() {
    let dir = tempdir().unwrap();
    let store = SqliteVectorStore::open(dir.path().join("index.sqlite"), DIMENSIONS)
        .await
        .unwrap();

    store
        .upsert(
            "TCS",
            "rev-1",
            vec![
                chunk("old a", [1.0, 0.0, 0.0, 0.0]),
                chunk("old b", [0.0, 1.0, 0.0, 0.0]),
            ],
        )
        .await
        .unwrap();
    let outcome = store
        .upsert("TCS", "rev-2", vec![chunk("new only", [0.0, 0.0, 1.0, 0.0])])
        .await
        .unwrap();

    assert_eq!(outcome.replaced, 2);
    assert_eq!(outcome.inserted, 1);
    assert_eq!(store.count().await.unwrap(), 1);

    let hits = store
        .similarity_search(&[1.0, 0.0, 0.0, 0.0], 10, Some("TCS"))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0.source_revision, "rev-2");
}

#[tokio::test]
async fn search_scoping_and_symbol_deletion() {
    let dir = tempdir().unwrap();
    let store = SqliteVectorStore::open(dir.path().join("index.sqlite"), DIMENSIONS)
        .await
        .unwrap();

    store
        .upsert("TCS", "r1", vec![chunk("tcs item", [1.0, 0.0, 0.0, 0.0])])
        .await
        .unwrap();
    store
        .upsert("INFY", "r1", vec![chunk("infy item", [0.9, 0.1, 0.0, 0.0])])
        .await
        .unwrap();

    let scoped = store
        .similarity_search(&[1.0, 0.0, 0.0, 0.0], 10, Some("INFY"))
        .await
        .unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].0.symbol, "INFY");

    let unscoped = store
        .similarity_search(&[1.0, 0.0, 0.0, 0.0], 10, None)
        .await
        .unwrap();
    assert_eq!(unscoped.len(), 2);
    assert_eq!(unscoped[0].0.symbol, "TCS");

    assert_eq!(store.delete_symbol("TCS").await.unwrap(), 1);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn store_reopens_with_existing_data() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.sqlite");

    {
        let store = SqliteVectorStore::open(&path, DIMENSIONS).await.unwrap();
        store
            .upsert("TCS", "r1", vec![chunk("persisted", [1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();
    }

    let reopened = SqliteVectorStore::open(&path, DIMENSIONS).await.unwrap();
    assert_eq!(reopened.count().await.unwrap(), 1);
    let hits = reopened
        .similarity_search(&[1.0, 0.0, 0.0, 0.0], 1, None)
        .await
        .unwrap();
    assert_eq!(hits[0].0.content, "persisted");
}

#[tokio::test]
async fn directory_refresh_and_resolution_work_on_disk() {
    let dir = tempdir().unwrap();
    let directory = Arc::new(
        SqliteCompanyDirectory::open(dir.path().join("companies.sqlite"))
            .await
            .unwrap(),
    );

    directory
        .refresh(vec![
            CompanyRecord::new("Tata Consultancy Services")
                .with_nse_symbol("TCS")
                .with_isin("INE467B01029"),
            CompanyRecord::new("Tata Motors").with_nse_symbol("TATAMOTORS"),
        ])
        .await
        .unwrap();

    let all = directory.all().await.unwrap();
    assert_eq!(all.len(), 2);

    let resolver = FuzzyResolver::new(directory.clone(), &RagConfig::default());
    let matches = resolver.resolve("TCS", 5).await.unwrap();
    assert_eq!(matches[0].company.company_name, "Tata Consultancy Services");

    // A second refresh fully replaces the first.
    directory
        .refresh(vec![CompanyRecord::new("Infosys Limited").with_nse_symbol("INFY")])
        .await
        .unwrap();
    let replaced = directory.all().await.unwrap();
    assert_eq!(replaced.len(), 1);
    assert_eq!(replaced[0].company_name, "Infosys Limited");
}
