//! Grounding prompt assembly under a bounded context budget.
//!
//! Retrieved chunks are admitted in rank order until either the chunk
//! count or the character budget would be exceeded; a chunk is never
//! truncated to squeeze it in. When nothing was retrieved the prompt
//! switches to an explicit general-knowledge fallback so the model flags
//! the missing grounding instead of hallucinating citations.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigurationError;
use crate::retrieval::RetrievalResult;

/// Upper bounds on what a prompt may contain.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ContextBudget {
    /// Maximum number of chunks admitted into the prompt.
    pub max_chunks: usize,
    /// Maximum total characters of chunk content admitted.
    pub max_chars: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            max_chunks: 6,
            max_chars: 6_000,
        }
    }
}

impl ContextBudget {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_chunks == 0 {
            return Err(ConfigurationError::new("budget max_chunks must be >= 1"));
        }
        if self.max_chars == 0 {
            return Err(ConfigurationError::new("budget max_chars must be >= 1"));
        }
        Ok(())
    }
}

const GROUNDED_HEADER: &str = "You are a financial research assistant. Answer the question using \
only the context passages below. Cite passage numbers like [1] where relevant. If the context \
does not contain the answer, say so plainly.";

const FALLBACK_HEADER: &str = "You are a financial research assistant. No grounding context was \
found for this question. Answer from general knowledge and state explicitly that the answer is \
not grounded in retrieved documents.";

/// Builds the grounding prompt for `query` from ranked retrieval output.
///
/// Deterministic for identical inputs. The included chunk count and
/// total chunk characters never exceed `budget`, and no chunk is ever
/// emitted partially. An empty result (or a budget too small to admit
/// even the first chunk) produces the general-knowledge fallback prompt.
pub fn assemble(
    query: &str,
    result: &RetrievalResult,
    budget: &ContextBudget,
) -> Result<String, ConfigurationError> {
    budget.validate()?;

    let mut admitted = Vec::new();
    let mut used_chars = 0usize;
    for hit in &result.hits {
        if admitted.len() >= budget.max_chunks {
            break;
        }
        let chars = hit.chunk.content.chars().count();
        if used_chars + chars > budget.max_chars {
            break;
        }
        used_chars += chars;
        admitted.push(hit);
    }

    if admitted.is_empty() {
        debug!(query, "assembling fallback prompt without grounding context");
        return Ok(format!("{FALLBACK_HEADER}\n\nQuestion: {query}\n"));
    }

    let mut prompt = String::with_capacity(used_chars + 512);
    prompt.push_str(GROUNDED_HEADER);
    prompt.push_str("\n\nContext:\n");
    for (index, hit) in admitted.iter().enumerate() {
        let date = hit.chunk.created_at.format("%Y-%m-%d");
        prompt.push_str(&format!(
            "[{}] ({}, {}) {}\n",
            index + 1,
            hit.chunk.symbol,
            date,
            hit.chunk.content
        ));
    }
    prompt.push_str(&format!("\nQuestion: {query}\n"));

    debug!(
        query,
        admitted = admitted.len(),
        chars = used_chars,
        "grounding prompt assembled"
    );
    Ok(prompt)
}
