//! SQLite vector store backed by the `sqlite-vec` extension.
//!
//! Chunk rows live in a plain `chunks` table; their embeddings live in a
//! `chunk_embeddings` vec0 virtual table keyed by the same rowid.
//! Similarity queries rank with `vec_distance_cosine`. Every upsert runs
//! in a single transaction, which is what makes revision replacement
//! atomic.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio_rusqlite::{Connection, ffi};
use tracing::debug;
use uuid::Uuid;

use super::{ChunkRecord, NewChunk, UpsertOutcome, VectorBackend};
use crate::error::StoreUnavailableError;

#[derive(Clone)]
pub struct SqliteVectorStore {
    conn: Connection,
    dimensions: usize,
}

impl SqliteVectorStore {
    /// Opens (or creates) the index at `path` with a fixed embedding
    /// dimensionality. The dimensionality cannot change for the lifetime
    /// of the store file.
    pub async fn open(
        path: impl AsRef<Path>,
        dimensions: usize,
    ) -> Result<Self, StoreUnavailableError> {
        register_sqlite_vec()?;

        let conn = Connection::open(path)
            .await
            .map_err(|err| StoreUnavailableError::new(err.to_string()))?;

        conn.call(move |conn| {
            // Fails fast when the extension did not load.
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS chunks (
                    id TEXT PRIMARY KEY,
                    symbol TEXT NOT NULL,
                    content TEXT NOT NULL,
                    source_revision TEXT NOT NULL,
                    created_at TEXT NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_chunks_symbol ON chunks(symbol)",
                [],
            )?;
            conn.execute(
                &format!(
                    "CREATE VIRTUAL TABLE IF NOT EXISTS chunk_embeddings
                     USING vec0(embedding float[{dimensions}])"
                ),
                [],
            )?;
            Ok(())
        })
        .await
        .map_err(|err: tokio_rusqlite::Error<tokio_rusqlite::rusqlite::Error>| {
            StoreUnavailableError::new(err.to_string())
        })?;

        Ok(Self { conn, dimensions })
    }
}

#[async_trait]
impl VectorBackend for SqliteVectorStore {
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

        let symbol = symbol.to_string();
        let revision = revision.to_string();
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let mut rows = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let embedding_json = serde_json::to_string(&chunk.embedding)
                .map_err(|err| StoreUnavailableError::new(err.to_string()))?;
            rows.push((Uuid::new_v4().to_string(), chunk.content, embedding_json));
        }

        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let already_committed: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM chunks WHERE symbol = ?1 AND source_revision = ?2",
                    (&symbol, &revision),
                    |row| row.get(0),
                )?;

                tx.execute(
                    "DELETE FROM chunk_embeddings WHERE rowid IN (
                         SELECT rowid FROM chunks
                         WHERE symbol = ?1 AND source_revision <> ?2
                     )",
                    (&symbol, &revision),
                )?;
                let replaced = tx.execute(
                    "DELETE FROM chunks WHERE symbol = ?1 AND source_revision <> ?2",
                    (&symbol, &revision),
                )?;

                let mut inserted = 0;
                if already_committed == 0 {
                    for (id, content, embedding_json) in &rows {
                        tx.execute(
                            "INSERT INTO chunks
                                 (id, symbol, content, source_revision, created_at)
                             VALUES (?1, ?2, ?3, ?4, ?5)",
                            (id, &symbol, content, &revision, &created_at),
                        )?;
                        let rowid = tx.last_insert_rowid();
                        tx.execute(
                            &format!(
                                "INSERT INTO chunk_embeddings (rowid, embedding)
                                 VALUES ({rowid}, ?1)"
                            ),
                            [embedding_json],
                        )?;
                        inserted += 1;
                    }
                }

                tx.commit()?;
                Ok(UpsertOutcome {
                    inserted,
                    replaced,
                    unchanged: already_committed > 0 && replaced == 0,
                })
            })
            .await
            .map_err(|err: tokio_rusqlite::Error<tokio_rusqlite::rusqlite::Error>| {
                StoreUnavailableError::new(err.to_string())
            })?;

        debug!(
            inserted = outcome.inserted,
            replaced = outcome.replaced,
            unchanged = outcome.unchanged,
            "vector store upsert finished"
        );
        Ok(outcome)
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

        let embedding_json = serde_json::to_string(query)
            .map_err(|err| StoreUnavailableError::new(err.to_string()))?;
        let symbol = symbol.map(str::to_string);

        let raw_rows = self
            .conn
            .call(move |conn| {
                let select = "SELECT c.id, c.symbol, c.content, c.source_revision, c.created_at, \
                              vec_distance_cosine(e.embedding, vec_f32(?1)) AS distance \
                              FROM chunks c \
                              JOIN chunk_embeddings e ON e.rowid = c.rowid";
                let order = format!("ORDER BY distance ASC, c.created_at DESC LIMIT {k}");

                let mut results = Vec::new();
                match &symbol {
                    Some(scope) => {
                        let mut stmt =
                            conn.prepare(&format!("{select} WHERE c.symbol = ?2 {order}"))?;
                        let rows = stmt.query_map((&embedding_json, scope), |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, String>(3)?,
                                row.get::<_, String>(4)?,
                                row.get::<_, f32>(5)?,
                            ))
                        })?;
                        for row in rows {
                            results.push(row?);
                        }
                    }
                    None => {
                        let mut stmt = conn.prepare(&format!("{select} {order}"))?;
                        let rows = stmt.query_map([&embedding_json], |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, String>(3)?,
                                row.get::<_, String>(4)?,
                                row.get::<_, f32>(5)?,
                            ))
                        })?;
                        for row in rows {
                            results.push(row?);
                        }
                    }
                }
                Ok(results)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error<tokio_rusqlite::rusqlite::Error>| {
                StoreUnavailableError::new(err.to_string())
            })?;

        raw_rows
            .into_iter()
            .map(|(id, symbol, content, source_revision, created_raw, distance)| {
                let created_at = DateTime::parse_from_rfc3339(&created_raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|err| {
                        StoreUnavailableError::new(format!(
                            "corrupt created_at timestamp in index: {err}"
                        ))
                    })?;
                Ok((
                    ChunkRecord {
                        id,
                        symbol,
                        content,
                        source_revision,
                        created_at,
                    },
                    distance,
                ))
            })
            .collect()
    }

    async fn delete_symbol(&self, symbol: &str) -> Result<usize, StoreUnavailableError> {
        let symbol = symbol.to_string();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM chunk_embeddings WHERE rowid IN (
                         SELECT rowid FROM chunks WHERE symbol = ?1
                     )",
                    [&symbol],
                )?;
                let deleted = tx.execute("DELETE FROM chunks WHERE symbol = ?1", [&symbol])?;
                tx.commit()?;
                Ok(deleted)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error<tokio_rusqlite::rusqlite::Error>| {
                StoreUnavailableError::new(err.to_string())
            })
    }

    async fn count(&self) -> Result<usize, StoreUnavailableError> {
        self.conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error<tokio_rusqlite::rusqlite::Error>| {
                StoreUnavailableError::new(err.to_string())
            })
    }
}

fn register_sqlite_vec() -> Result<(), StoreUnavailableError> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();

    INIT.get_or_init(|| unsafe {
        type SqliteExtensionInit = unsafe extern "C" fn(
            *mut ffi::sqlite3,
            *mut *mut c_char,
            *const ffi::sqlite3_api_routines,
        ) -> i32;

        let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
        let init_fn: SqliteExtensionInit =
            transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
        let rc = ffi::sqlite3_auto_extension(Some(init_fn));
        if rc != 0 {
            Err(format!("failed to register sqlite-vec extension (code {rc})"))
        } else {
            Ok(())
        }
    })
    .clone()
    .map_err(StoreUnavailableError::new)
}
