//! SQLite-backed company directory.

use std::path::Path;

use async_trait::async_trait;
use tokio_rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use super::{CompanyDirectory, CompanyRecord, retain_identified};
use crate::error::StoreUnavailableError;

/// Company directory persisted in a SQLite table.
#[derive(Clone)]
pub struct SqliteCompanyDirectory {
    conn: Connection,
}

impl SqliteCompanyDirectory {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreUnavailableError> {
        let conn = Connection::open(path)
            .await
            .map_err(|err| StoreUnavailableError::new(err.to_string()))?;
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS companies (
                    id TEXT PRIMARY KEY,
                    company_name TEXT NOT NULL,
                    nse_symbol TEXT,
                    bse_symbol TEXT,
                    bse_code TEXT,
                    isin TEXT
                )",
                [],
            )?;
            Ok(())
        })
        .await
        .map_err(|err: tokio_rusqlite::Error<tokio_rusqlite::rusqlite::Error>| {
            StoreUnavailableError::new(err.to_string())
        })?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CompanyDirectory for SqliteCompanyDirectory {
    async fn refresh(&self, records: Vec<CompanyRecord>) -> Result<usize, StoreUnavailableError> {
        let kept = retain_identified(records);
        let count = kept.len();

        let rows: Vec<(String, CompanyRecord)> = kept
            .into_iter()
            .map(|record| (Uuid::new_v4().to_string(), record))
            .collect();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM companies", [])?;
                for (id, record) in &rows {
                    tx.execute(
                        "INSERT INTO companies
                             (id, company_name, nse_symbol, bse_symbol, bse_code, isin)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        (
                            id,
                            &record.company_name,
                            &record.nse_symbol,
                            &record.bse_symbol,
                            &record.bse_code,
                            &record.isin,
                        ),
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error<tokio_rusqlite::rusqlite::Error>| {
                StoreUnavailableError::new(err.to_string())
            })?;

        debug!(count, "company directory refreshed");
        Ok(count)
    }

    async fn all(&self) -> Result<Vec<CompanyRecord>, StoreUnavailableError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT company_name, nse_symbol, bse_symbol, bse_code, isin
                     FROM companies
                     ORDER BY company_name ASC",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(CompanyRecord {
                        company_name: row.get(0)?,
                        nse_symbol: row.get(1)?,
                        bse_symbol: row.get(2)?,
                        bse_code: row.get(3)?,
                        isin: row.get(4)?,
                    })
                })?;

                let mut records = Vec::new();
                for row in rows {
                    records.push(row?);
                }
                Ok(records)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error<tokio_rusqlite::rusqlite::Error>| {
                StoreUnavailableError::new(err.to_string())
            })
    }
}
