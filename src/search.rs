//! Ranked fulltext search over indexed files.
//!
//! Runs an FTS5 query scoped to one repository, then re-scores each hit
//! with path and language heuristics. Results are sorted by final score
//! descending, ties broken by path, so identical queries against identical
//! graph state always return the same order.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::model::{split_file_key, FileNode, LABEL_FILE, LABEL_REPO};
use crate::store::GraphStore;

pub const LIMIT_MIN: usize = 1;
pub const LIMIT_MAX: usize = 100;
pub const LIMIT_DEFAULT: usize = 30;

/// Conventional source-root prefixes that earn a ranking boost.
const SOURCE_ROOTS: [&str; 4] = ["src/", "lib/", "core/", "app/"];

/// Search request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    pub query: String,
    pub repo_id: String,
    /// Result limit, clamped to 1..=100 when present, 30 when absent
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: String,
    pub lang: String,
    pub size: usize,
    pub score: f64,
    /// Stable reference handle, `file:{path}`
    #[serde(rename = "ref")]
    pub reference: String,
}

/// Build a sanitized FTS5 match expression from a free-text query.
///
/// Each term is lowercased, stripped of non-alphanumeric characters
/// (underscores kept), double-quoted, and joined with OR. FTS5 operator
/// words and punctuation in user input therefore cannot change query
/// semantics. Returns `None` when no usable term survives.
pub fn build_match_expr(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|term| {
            term.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{}\"", term))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// Execute a ranked search.
///
/// # Errors
/// `Validation` for an empty/blank query or out-of-range limit semantics,
/// `NotFound` for an unknown repository.
pub fn search(store: &GraphStore, opts: &SearchOptions) -> Result<Vec<SearchHit>> {
    let query = opts.query.trim();
    if query.is_empty() {
        return Err(EngineError::Validation("query must not be empty".into()));
    }
    let limit = opts.limit.unwrap_or(LIMIT_DEFAULT).clamp(LIMIT_MIN, LIMIT_MAX);

    if store.node_id(LABEL_REPO, &opts.repo_id)?.is_none() {
        return Err(EngineError::NotFound(format!(
            "repository {}",
            opts.repo_id
        )));
    }

    let Some(match_expr) = build_match_expr(query) else {
        return Err(EngineError::Validation(
            "query contains no searchable terms".into(),
        ));
    };

    // Over-fetch so re-scoring can promote hits past the raw-score cutoff
    let raw = store.fulltext_search(&opts.repo_id, &match_expr, limit * 4)?;

    let mut hits: Vec<SearchHit> = Vec::with_capacity(raw.len());
    for fts in raw {
        let Some(node) = store.get_payload_by_key::<FileNode>(LABEL_FILE, &fts.node_key)? else {
            continue;
        };
        let path = split_file_key(&fts.node_key)
            .map(|(_, p)| p.to_string())
            .unwrap_or_else(|| node.path.clone());

        let score = rescore(fts.score, query, &path, &node.lang);
        hits.push(SearchHit {
            reference: format!("file:{}", path),
            path,
            lang: node.lang,
            size: node.size,
            score,
        });
    }

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });
    hits.truncate(limit);
    Ok(hits)
}

/// Apply the path/language re-scoring multipliers to a base fulltext score.
fn rescore(base: f64, query: &str, path: &str, lang: &str) -> f64 {
    // BM25 can go slightly negative for very common terms; the multipliers
    // need a positive base to mean anything
    let mut score = base.max(0.01);
    let query_lower = query.to_lowercase();
    let path_lower = path.to_lowercase();

    if path_lower.contains(&query_lower) {
        score *= 2.0;
    }

    let segments: Vec<&str> = path_lower
        .split('/')
        .flat_map(|s| s.split('.'))
        .collect();
    let matched_terms = query_lower
        .split_whitespace()
        .filter(|term| segments.contains(term))
        .count();
    if matched_terms > 0 {
        score *= 1.0 + 0.3 * matched_terms as f64;
    }

    if lang != crate::ingest::LANG_UNKNOWN && query_lower.contains(lang) {
        score *= 1.5;
    }

    if SOURCE_ROOTS.iter().any(|root| path_lower.starts_with(root)) {
        score *= 1.2;
    }

    if is_test_path(&path_lower) && !query_lower.contains("test") {
        score *= 0.5;
    }

    score
}

/// Heuristic: does this path look like a test file?
fn is_test_path(path_lower: &str) -> bool {
    let name = path_lower.rsplit('/').next().unwrap_or(path_lower);
    path_lower.starts_with("tests/")
        || path_lower.contains("/tests/")
        || path_lower.contains("/test/")
        || name.starts_with("test_")
        || name.contains("_test.")
        || name.contains(".test.")
        || name.contains(".spec.")
}
