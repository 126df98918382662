//! Fuzzy resolution of free-text queries to canonical company records.
//!
//! Matching runs in three stages, in strict priority order:
//!
//! 1. exact match on `bse_code` or `isin` (case-sensitive);
//! 2. trigram similarity above a configured threshold on the
//!    accent-normalized, case-folded name and exchange symbols;
//! 3. substring containment, used only when the first two stages are
//!    sparse (fewer matches than requested).
//!
//! The two similarity spaces of the engine stay separate on purpose: the
//! resolver ranks lexically, the retriever ranks by vector distance, and
//! neither score bleeds into the other.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, warn};

use crate::config::{RagConfig, RetryPolicy};
use crate::directory::{CompanyDirectory, CompanyRecord};
use crate::error::RetrievalError;
use crate::retry::with_backoff;

/// How a record matched the query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchKind {
    Exact,
    Trigram,
    Substring,
}

/// A resolved company with its lexical score.
#[derive(Clone, Debug)]
pub struct ResolverMatch {
    pub company: CompanyRecord,
    pub similarity: f32,
    pub kind: MatchKind,
}

/// Resolves free-text queries against a [`CompanyDirectory`].
pub struct FuzzyResolver {
    directory: Arc<dyn CompanyDirectory>,
    trigram_threshold: f32,
    retry: RetryPolicy,
}

impl FuzzyResolver {
    pub fn new(directory: Arc<dyn CompanyDirectory>, config: &RagConfig) -> Self {
        Self {
            directory,
            trigram_threshold: config.trigram_threshold,
            retry: config.retry.clone(),
        }
    }

    /// Resolves `query` to at most `limit` company records, best first.
    ///
    /// An empty result is a valid outcome, not an error; callers treat it
    /// as "no entity resolved" and fall back to unscoped retrieval. The
    /// directory being unreachable after retries is the only error path.
    pub async fn resolve(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ResolverMatch>, RetrievalError> {
        let raw = query.trim();
        if raw.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let records = with_backoff(&self.retry, "company directory scan", || {
            self.directory.all()
        })
        .await
        .map_err(|exhausted| RetrievalError::Store {
            attempts: exhausted.attempts,
            source: exhausted.error,
        })?;

        let normalized_query = normalize_company_query(raw);
        let folded_query = fold_for_matching(raw);

        let mut matches: Vec<ResolverMatch> = Vec::new();
        let mut rest: Vec<(CompanyRecord, f32)> = Vec::new();

        for record in records {
            if record.bse_code.as_deref() == Some(raw) || record.isin.as_deref() == Some(raw) {
                matches.push(ResolverMatch {
                    company: record,
                    similarity: 1.0,
                    kind: MatchKind::Exact,
                });
                continue;
            }

            let similarity = record_similarity(&record, &normalized_query, &folded_query);
            if similarity >= self.trigram_threshold {
                matches.push(ResolverMatch {
                    company: record,
                    similarity,
                    kind: MatchKind::Trigram,
                });
            } else {
                rest.push((record, similarity));
            }
        }

        // Substring containment only supplements a sparse result.
        if matches.len() < limit && !folded_query.is_empty() {
            for (record, similarity) in rest {
                if record_contains(&record, &normalized_query, &folded_query) {
                    matches.push(ResolverMatch {
                        company: record,
                        similarity,
                        kind: MatchKind::Substring,
                    });
                }
            }
        }

        matches.sort_by(|a, b| {
            a.kind
                .cmp(&b.kind)
                .then_with(|| {
                    b.similarity
                        .partial_cmp(&a.similarity)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.company.company_name.cmp(&b.company.company_name))
        });
        matches.truncate(limit);

        if matches.is_empty() {
            debug!(query = raw, "no company resolved");
        } else {
            debug!(
                query = raw,
                top = %matches[0].company.company_name,
                similarity = matches[0].similarity,
                "company resolved"
            );
        }
        Ok(matches)
    }
}

fn record_similarity(record: &CompanyRecord, normalized_query: &str, folded_query: &str) -> f32 {
    let name_similarity = trigram_similarity(
        normalized_query,
        &normalize_company_query(&record.company_name),
    );
    let symbol_similarity = [&record.nse_symbol, &record.bse_symbol]
        .into_iter()
        .flatten()
        .map(|symbol| trigram_similarity(folded_query, &fold_for_matching(symbol)))
        .fold(0.0f32, f32::max);
    name_similarity.max(symbol_similarity)
}

fn record_contains(record: &CompanyRecord, normalized_query: &str, folded_query: &str) -> bool {
    if !normalized_query.is_empty()
        && normalize_company_query(&record.company_name).contains(normalized_query)
    {
        return true;
    }
    [&record.nse_symbol, &record.bse_symbol]
        .into_iter()
        .flatten()
        .any(|symbol| fold_for_matching(symbol).contains(folded_query))
}

/// Case-folds and strips accents; keeps word structure intact.
fn fold_for_matching(input: &str) -> String {
    let mut folded = String::with_capacity(input.len());
    for c in input.chars().flat_map(char::to_lowercase) {
        folded.push(fold_accent(c));
    }
    folded.trim().to_string()
}

/// Normalizes a company-name query: case/accent folding, quote removal,
/// corporate suffix stripping, whitespace collapsing.
pub(crate) fn normalize_company_query(input: &str) -> String {
    static SUFFIXES: OnceLock<Regex> = OnceLock::new();
    static QUOTES: OnceLock<Regex> = OnceLock::new();
    static SPACES: OnceLock<Regex> = OnceLock::new();

    let suffixes = SUFFIXES.get_or_init(|| {
        Regex::new(r"\b(ltd\.?|limited|pvt\.?|private|inc\.?|co\.?|company|corp\.?|corporation)\b")
            .expect("suffix pattern is valid")
    });
    let quotes = QUOTES.get_or_init(|| Regex::new(r#"["'`]+"#).expect("quote pattern is valid"));
    let spaces = SPACES.get_or_init(|| Regex::new(r"\s+").expect("space pattern is valid"));

    let folded = fold_for_matching(input);
    let without_quotes = quotes.replace_all(&folded, "");
    let without_suffixes = suffixes.replace_all(&without_quotes, " ");
    spaces
        .replace_all(without_suffixes.trim(), " ")
        .into_owned()
}

/// Maps common accented Latin characters to their base letter.
fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'ç' | 'ć' | 'č' => 'c',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => 'e',
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'į' => 'i',
        'ñ' | 'ń' | 'ň' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => 'o',
        'š' | 'ś' => 's',
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' => 'u',
        'ý' | 'ÿ' => 'y',
        'ž' | 'ź' | 'ż' => 'z',
        other => other,
    }
}

/// Trigram similarity in the pg_trgm style: each word is padded with two
/// leading and one trailing space, the string maps to its set of
/// three-character windows, and similarity is the Jaccard ratio of the
/// two sets. Identical non-empty strings score 1.0.
pub(crate) fn trigram_similarity(a: &str, b: &str) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let set_a = trigrams(a);
    let set_b = trigrams(b);
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let shared = set_a.intersection(&set_b).count();
    let union = set_a.len() + set_b.len() - shared;
    shared as f32 / union as f32
}

fn trigrams(input: &str) -> HashSet<[char; 3]> {
    let mut set = HashSet::new();
    for word in input.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let padded: Vec<char> = [' ', ' ']
            .into_iter()
            .chain(word.chars())
            .chain([' '])
            .collect();
        for window in padded.windows(3) {
            set.insert([window[0], window[1], window[2]]);
        }
    }
    set
}

/// Emits a warning when resolution degrades; used by the retriever so a
/// directory outage downgrades to an unscoped search instead of failing
/// the whole retrieval.
pub(crate) fn warn_resolution_degraded(query: &str, error: &RetrievalError) {
    warn!(
        query,
        error = %error,
        "entity resolution unavailable; continuing with unscoped retrieval"
    );
}
