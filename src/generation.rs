//! Generation capability: the opaque language-model seam.
//!
//! The engine assembles a grounding prompt and hands it to a
//! [`GenerationProvider`]; the model call itself is external.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Knobs recognized by every generation backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_output_tokens: 1_200,
        }
    }
}

/// A completed generation.
#[derive(Clone, Debug)]
pub struct Generation {
    pub text: String,
    pub tokens_used: u32,
}

/// Generation backend failure.
#[derive(Debug, Clone, Error)]
#[error("generation backend failure: {cause}")]
pub struct GenerationError {
    pub cause: String,
}

impl GenerationError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
        }
    }
}

/// `generate(prompt, config) -> (text, tokens_used)`.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<Generation, GenerationError>;
}

/// Returns a fixed reply; for tests and wiring checks.
#[derive(Clone, Debug, Default)]
pub struct CannedGenerationProvider {
    pub reply: String,
}

impl CannedGenerationProvider {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl GenerationProvider for CannedGenerationProvider {
    async fn generate(
        &self,
        prompt: &str,
        _config: &GenerationConfig,
    ) -> Result<Generation, GenerationError> {
        // Rough 4-chars-per-token accounting keeps tests deterministic.
        let tokens_used = ((prompt.len() + self.reply.len()) / 4) as u32;
        Ok(Generation {
            text: self.reply.clone(),
            tokens_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn canned_provider_echoes_reply() {
        let provider = CannedGenerationProvider::new("no position on that");
        let generation = provider
            .generate("What moved the market?", &GenerationConfig::default())
            .await
            .unwrap();
        assert_eq!(generation.text, "no position on that");
        assert!(generation.tokens_used > 0);
    }
}
