//! Company directory: the canonical identity records fuzzy resolution
//! runs against.
//!
//! Records are created and replaced wholesale by a periodic upstream
//! refresh; this subsystem never deletes individual companies. Two
//! backends implement the same [`CompanyDirectory`] contract: an
//! in-memory directory for tests and demos, and a SQLite directory for
//! persistence (see [`sqlite`]).

pub mod sqlite;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreUnavailableError;

pub use sqlite::SqliteCompanyDirectory;

/// A canonical listed-company identity.
///
/// At least one identifying field must be non-empty; refresh skips
/// records that violate this.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub company_name: String,
    pub nse_symbol: Option<String>,
    pub bse_symbol: Option<String>,
    pub bse_code: Option<String>,
    pub isin: Option<String>,
}

impl CompanyRecord {
    pub fn new(company_name: impl Into<String>) -> Self {
        Self {
            company_name: company_name.into(),
            nse_symbol: None,
            bse_symbol: None,
            bse_code: None,
            isin: None,
        }
    }

    #[must_use]
    pub fn with_nse_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.nse_symbol = Some(symbol.into());
        self
    }

    #[must_use]
    pub fn with_bse_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.bse_symbol = Some(symbol.into());
        self
    }

    #[must_use]
    pub fn with_bse_code(mut self, code: impl Into<String>) -> Self {
        self.bse_code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_isin(mut self, isin: impl Into<String>) -> Self {
        self.isin = Some(isin.into());
        self
    }

    /// True when at least one identifying field is non-empty.
    pub fn has_identity(&self) -> bool {
        let nonempty = |field: &Option<String>| {
            field
                .as_deref()
                .is_some_and(|value| !value.trim().is_empty())
        };
        !self.company_name.trim().is_empty()
            || nonempty(&self.nse_symbol)
            || nonempty(&self.bse_symbol)
            || nonempty(&self.bse_code)
            || nonempty(&self.isin)
    }

    /// The symbol chunks for this company are partitioned under.
    ///
    /// NSE symbol is preferred, then BSE symbol, BSE code, ISIN.
    pub fn primary_symbol(&self) -> Option<&str> {
        self.nse_symbol
            .as_deref()
            .or(self.bse_symbol.as_deref())
            .or(self.bse_code.as_deref())
            .or(self.isin.as_deref())
            .filter(|symbol| !symbol.trim().is_empty())
    }
}

/// Storage contract for company identity records.
#[async_trait]
pub trait CompanyDirectory: Send + Sync {
    /// Replaces the full directory with `records` atomically.
    ///
    /// Records without any identifying field are skipped with a warning.
    /// Returns the number of records kept.
    async fn refresh(&self, records: Vec<CompanyRecord>) -> Result<usize, StoreUnavailableError>;

    /// All current records.
    async fn all(&self) -> Result<Vec<CompanyRecord>, StoreUnavailableError>;
}

/// Drops records that violate the identity invariant, warning per drop.
pub(crate) fn retain_identified(records: Vec<CompanyRecord>) -> Vec<CompanyRecord> {
    records
        .into_iter()
        .filter(|record| {
            let keep = record.has_identity();
            if !keep {
                warn!(
                    company_name = %record.company_name,
                    "skipping company record without any identifying field"
                );
            }
            keep
        })
        .collect()
}

/// In-memory directory backend.
#[derive(Default)]
pub struct MemoryCompanyDirectory {
    records: RwLock<Vec<CompanyRecord>>,
}

impl MemoryCompanyDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CompanyDirectory for MemoryCompanyDirectory {
    async fn refresh(&self, records: Vec<CompanyRecord>) -> Result<usize, StoreUnavailableError> {
        let kept = retain_identified(records);
        let count = kept.len();
        *self.records.write() = kept;
        Ok(count)
    }

    async fn all(&self) -> Result<Vec<CompanyRecord>, StoreUnavailableError> {
        Ok(self.records.read().clone())
    }
}
