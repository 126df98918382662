//! Tunable configuration for chunking, matching, retries, and budgets.
//!
//! Nothing here is a hard-coded magic number: thresholds the matching
//! policy depends on (trigram similarity cutoff, resolver confidence) and
//! the retry/budget envelope all live in [`RagConfig`] and can be loaded
//! from the environment via [`RagConfig::from_env`].

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::assembly::ContextBudget;
use crate::error::ConfigurationError;

/// Sliding-window chunking parameters.
///
/// `max_len` and `overlap` are measured in grapheme clusters, so a chunk
/// boundary can never land inside a multibyte scalar or combining
/// sequence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub max_len: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_len: 1000,
            overlap: 150,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_len == 0 {
            return Err(ConfigurationError::new("chunk max_len must be non-zero"));
        }
        if self.overlap >= self.max_len {
            return Err(ConfigurationError::new(format!(
                "chunk overlap ({}) must be smaller than max_len ({})",
                self.overlap, self.max_len
            )));
        }
        Ok(())
    }
}

/// Bounded exponential backoff for transient backend failures.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let millis = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_attempts == 0 {
            return Err(ConfigurationError::new("retry max_attempts must be >= 1"));
        }
        Ok(())
    }
}

/// Top-level configuration for the retrieval engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RagConfig {
    pub chunking: ChunkingConfig,
    /// Minimum trigram similarity for a fuzzy directory match.
    pub trigram_threshold: f32,
    /// Minimum resolver score for scoping retrieval to a company.
    pub min_confidence: f32,
    /// Default number of chunks a retrieval returns.
    pub top_k: usize,
    pub retry: RetryPolicy,
    pub budget: ContextBudget,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            trigram_threshold: 0.3,
            min_confidence: 0.4,
            top_k: 6,
            retry: RetryPolicy::default(),
            budget: ContextBudget::default(),
        }
    }
}

impl RagConfig {
    /// Loads configuration from the environment on top of the defaults.
    ///
    /// Reads `.env` (if present) via dotenvy, then `FINGROUND_*` variables.
    /// Unset variables keep their defaults; unparsable values fail with
    /// [`ConfigurationError`].
    pub fn from_env() -> Result<Self, ConfigurationError> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        if let Some(value) = read_env("FINGROUND_CHUNK_MAX_LEN")? {
            config.chunking.max_len = value;
        }
        if let Some(value) = read_env("FINGROUND_CHUNK_OVERLAP")? {
            config.chunking.overlap = value;
        }
        if let Some(value) = read_env("FINGROUND_TRIGRAM_THRESHOLD")? {
            config.trigram_threshold = value;
        }
        if let Some(value) = read_env("FINGROUND_MIN_CONFIDENCE")? {
            config.min_confidence = value;
        }
        if let Some(value) = read_env("FINGROUND_TOP_K")? {
            config.top_k = value;
        }
        if let Some(value) = read_env("FINGROUND_RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = value;
        }
        if let Some(value) = read_env("FINGROUND_RETRY_BASE_DELAY_MS")? {
            config.retry.base_delay_ms = value;
        }
        if let Some(value) = read_env("FINGROUND_RETRY_MAX_DELAY_MS")? {
            config.retry.max_delay_ms = value;
        }
        if let Some(value) = read_env("FINGROUND_BUDGET_MAX_CHUNKS")? {
            config.budget.max_chunks = value;
        }
        if let Some(value) = read_env("FINGROUND_BUDGET_MAX_CHARS")? {
            config.budget.max_chars = value;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.chunking.validate()?;
        self.retry.validate()?;
        self.budget.validate()?;
        if !(0.0..=1.0).contains(&self.trigram_threshold) {
            return Err(ConfigurationError::new(
                "trigram_threshold must be within [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigurationError::new(
                "min_confidence must be within [0, 1]",
            ));
        }
        if self.top_k == 0 {
            return Err(ConfigurationError::new("top_k must be >= 1"));
        }
        Ok(())
    }
}

fn read_env<T>(key: &str) -> Result<Option<T>, ConfigurationError>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| ConfigurationError::new(format!("cannot parse {key}={raw}: {err}"))),
        Err(_) => Ok(None),
    }
}
