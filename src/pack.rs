//! Budget-aware context pack assembly.
//!
//! Merges search hits (from keyword hints) and impact results (from focus
//! paths) into a single ranked candidate list, then greedily selects items
//! highest-score-first until the token budget would be exceeded. Stage
//! labels tune how the budget is shared between whole files and individual
//! symbols, as a soft cap: a category may exceed its share only with
//! tokens the other category left unused.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::impact::{self, ImpactOptions};
use crate::ingest;
use crate::model::{file_key, FileNode, LABEL_FILE, LABEL_REPO};
use crate::search::{self, SearchOptions};
use crate::store::GraphStore;

pub const BUDGET_MIN: usize = 500;
pub const BUDGET_MAX: usize = 10_000;

/// Minimum token cost charged for any item.
const TOKEN_FLOOR: usize = 16;

/// Workflow stage, selecting the file/symbol budget split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Broad orientation: mostly whole files
    Plan,
    /// Focused reading: files and symbols evenly
    Review,
    /// Editing context: files first, symbols for call sites
    Implement,
}

impl Stage {
    /// Soft share of the budget reserved for file items; the rest goes to
    /// symbol items.
    fn file_share(self) -> f64 {
        match self {
            Stage::Plan => 0.7,
            Stage::Review => 0.5,
            Stage::Implement => 0.6,
        }
    }
}

/// Pack request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackOptions {
    pub repo_id: String,
    pub stage: Stage,
    /// Token budget, clamped to 500..=10000
    pub budget: usize,
    /// Free-text keywords fed to search
    #[serde(default)]
    pub keywords: Option<String>,
    /// Focus file path fed to impact analysis
    #[serde(default)]
    pub focus: Option<String>,
}

/// Item category, used for the budget split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemCategory {
    File,
    Symbol,
}

/// One selected context item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackItem {
    /// Stable reference handle, `file:{path}` or `sym:{id}`
    #[serde(rename = "ref")]
    pub reference: String,
    pub category: ItemCategory,
    pub path: String,
    /// Symbol name, for symbol items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub score: f64,
    /// Estimated token cost charged against the budget
    pub tokens: usize,
}

/// Assembled context pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackResponse {
    pub items: Vec<PackItem>,
    pub budget_used: usize,
    pub budget_limit: usize,
}

/// Build a context pack.
///
/// # Errors
/// `Validation` when neither keywords nor focus is given, `NotFound` for
/// an unknown repository or focus file.
pub fn build(store: &GraphStore, opts: &PackOptions) -> Result<PackResponse> {
    if store.node_id(LABEL_REPO, &opts.repo_id)?.is_none() {
        return Err(EngineError::NotFound(format!(
            "repository {}",
            opts.repo_id
        )));
    }
    let keywords = opts.keywords.as_deref().map(str::trim).filter(|k| !k.is_empty());
    let focus = opts.focus.as_deref().map(str::trim).filter(|f| !f.is_empty());
    if keywords.is_none() && focus.is_none() {
        return Err(EngineError::Validation(
            "pack request needs keywords or a focus path".into(),
        ));
    }
    let budget = opts.budget.clamp(BUDGET_MIN, BUDGET_MAX);

    let mut candidates = collect_candidates(store, &opts.repo_id, keywords, focus)?;

    // Highest score first; ties broken by reference handle for determinism
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.reference.cmp(&b.reference))
    });

    let file_cap = (budget as f64 * opts.stage.file_share()) as usize;
    let symbol_cap = budget - file_cap;

    let mut items: Vec<PackItem> = Vec::new();
    let mut used = 0usize;
    let mut used_files = 0usize;
    let mut used_symbols = 0usize;
    let mut deferred: Vec<PackItem> = Vec::new();

    // First pass honors the per-category share
    for item in candidates {
        if used + item.tokens > budget {
            continue;
        }
        let (cap, cat_used) = match item.category {
            ItemCategory::File => (file_cap, used_files),
            ItemCategory::Symbol => (symbol_cap, used_symbols),
        };
        if cat_used + item.tokens > cap {
            deferred.push(item);
            continue;
        }
        used += item.tokens;
        match item.category {
            ItemCategory::File => used_files += item.tokens,
            ItemCategory::Symbol => used_symbols += item.tokens,
        }
        items.push(item);
    }

    // Second pass spends leftover budget on deferred items, cap ignored
    for item in deferred {
        if used + item.tokens > budget {
            continue;
        }
        used += item.tokens;
        items.push(item);
    }

    Ok(PackResponse {
        items,
        budget_used: used,
        budget_limit: budget,
    })
}

/// Gather and deduplicate candidate items from search and impact.
fn collect_candidates(
    store: &GraphStore,
    repo_id: &str,
    keywords: Option<&str>,
    focus: Option<&str>,
) -> Result<Vec<PackItem>> {
    let mut candidates: Vec<PackItem> = Vec::new();

    if let Some(keywords) = keywords {
        let hits = search::search(
            store,
            &SearchOptions {
                query: keywords.to_string(),
                repo_id: repo_id.to_string(),
                limit: Some(search::LIMIT_MAX),
            },
        )?;
        // Fulltext scores are unbounded; normalize against the best hit so
        // they merge sensibly with 0..=1 impact scores
        let top = hits.first().map(|h| h.score).unwrap_or(1.0).max(f64::MIN_POSITIVE);
        for hit in hits {
            candidates.push(PackItem {
                reference: hit.reference,
                category: ItemCategory::File,
                path: hit.path.clone(),
                name: None,
                score: hit.score / top,
                tokens: file_tokens(store, repo_id, &hit.path)?,
            });
        }
    }

    if let Some(focus) = focus {
        // The focus file itself anchors the pack
        candidates.push(PackItem {
            reference: format!("file:{}", focus),
            category: ItemCategory::File,
            path: focus.to_string(),
            name: None,
            score: 1.0,
            tokens: file_tokens(store, repo_id, focus)?,
        });

        for impacted in impact::analyze(
            store,
            &ImpactOptions {
                repo_id: repo_id.to_string(),
                file_path: focus.to_string(),
                depth: None,
            },
        )? {
            candidates.push(PackItem {
                reference: format!("file:{}", impacted.path),
                category: ItemCategory::File,
                path: impacted.path.clone(),
                name: None,
                score: impacted.score,
                tokens: file_tokens(store, repo_id, &impacted.path)?,
            });
        }

        // Symbols with inbound calls are the file's hot surface and rank
        // above the rest of its definitions
        let hot = impact::called_symbol_names(store, repo_id, focus)?;
        for symbol in ingest::symbols_in_file(store, repo_id, focus)? {
            let score = if hot.contains(&symbol.name) { 0.85 } else { 0.65 };
            candidates.push(PackItem {
                reference: format!("sym:{}", symbol.id),
                category: ItemCategory::Symbol,
                path: symbol.path.clone(),
                name: Some(symbol.name.clone()),
                score,
                tokens: TOKEN_FLOOR,
            });
        }
    }

    // Dedup by reference handle, keeping the best score
    candidates.sort_by(|a, b| {
        a.reference.cmp(&b.reference).then(
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });
    candidates.dedup_by(|next, kept| kept.reference == next.reference);
    Ok(candidates)
}

/// Estimated token cost for a file item: content length / 4, floored.
///
/// Files whose content was too large to inline are estimated from their
/// recorded size instead.
fn file_tokens(store: &GraphStore, repo_id: &str, path: &str) -> Result<usize> {
    let key = file_key(repo_id, path);
    let Some(node) = store.get_payload_by_key::<FileNode>(LABEL_FILE, &key)? else {
        return Err(EngineError::NotFound(format!("file {} in {}", path, repo_id)));
    };
    let chars = node.content.as_ref().map(|c| c.len()).unwrap_or(node.size);
    Ok((chars / 4).max(TOKEN_FLOOR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{IngestMode, IngestOptions};
    use tempfile::TempDir;

    fn ingested_store(files: &[(&str, &str)]) -> (GraphStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        for (rel, content) in files {
            let abs = temp_dir.path().join(rel);
            if let Some(parent) = abs.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(abs, content).unwrap();
        }
        let store = GraphStore::open_in_memory().unwrap();
        ingest::run(
            &store,
            &IngestOptions {
                repo_id: "r".into(),
                root: temp_dir.path().to_path_buf(),
                remote: None,
                mode: IngestMode::Full,
                include_globs: vec![],
                exclude_globs: vec![],
            },
            None,
            None,
        )
        .unwrap();
        (store, temp_dir)
    }

    fn base_opts() -> PackOptions {
        PackOptions {
            repo_id: "r".into(),
            stage: Stage::Plan,
            budget: 2000,
            keywords: None,
            focus: None,
        }
    }

    #[test]
    fn test_requires_keywords_or_focus() {
        let (store, _dir) = ingested_store(&[("a.py", "def f():\n    pass\n")]);
        let err = build(&store, &base_opts()).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_budget_respected() {
        let big = "x = 1\n".repeat(400);
        let (store, _dir) = ingested_store(&[
            ("a.py", big.as_str()),
            ("b.py", big.as_str()),
            ("c.py", big.as_str()),
        ]);

        let mut opts = base_opts();
        opts.keywords = Some("x".into());
        opts.budget = 600;
        let pack = build(&store, &opts).unwrap();

        assert!(pack.budget_used <= pack.budget_limit);
        assert_eq!(pack.budget_limit, 600);
        // Each file costs 600 tokens; exactly one fits
        assert_eq!(pack.items.len(), 1);
    }

    #[test]
    fn test_larger_budget_never_selects_fewer_items() {
        let content = "shared = 1\n".repeat(100);
        let (store, _dir) = ingested_store(&[
            ("a.py", content.as_str()),
            ("b.py", content.as_str()),
            ("c.py", content.as_str()),
        ]);

        let mut opts = base_opts();
        opts.keywords = Some("shared".into());
        opts.budget = 500;
        let small = build(&store, &opts).unwrap();
        opts.budget = 3000;
        let large = build(&store, &opts).unwrap();

        assert!(large.items.len() >= small.items.len());
    }

    #[test]
    fn test_focus_merges_impact_and_symbols() {
        let (store, _dir) = ingested_store(&[
            ("a.py", "import b\n\ndef use_f():\n    f()\n"),
            ("b.py", "def f():\n    pass\n"),
        ]);

        let mut opts = base_opts();
        opts.focus = Some("b.py".into());
        let pack = build(&store, &opts).unwrap();

        let refs: Vec<&str> = pack.items.iter().map(|i| i.reference.as_str()).collect();
        assert!(refs.contains(&"file:b.py"));
        assert!(refs.contains(&"file:a.py"));
        assert!(refs.iter().any(|r| r.starts_with("sym:")));

        // Focus file and its direct caller share the top score
        assert!((pack.items[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_deduplicates_search_and_impact_overlap() {
        let (store, _dir) = ingested_store(&[
            ("a.py", "import b\nwidget = 1\n"),
            ("b.py", "widget = 2\n"),
        ]);

        let mut opts = base_opts();
        opts.keywords = Some("widget".into());
        opts.focus = Some("b.py".into());
        let pack = build(&store, &opts).unwrap();

        let count = pack
            .items
            .iter()
            .filter(|i| i.reference == "file:a.py")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_unknown_focus_is_not_found() {
        let (store, _dir) = ingested_store(&[("a.py", "x = 1\n")]);
        let mut opts = base_opts();
        opts.focus = Some("ghost.py".into());
        let err = build(&store, &opts).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn test_symbol_share_kept_for_review_stage() {
        // Many large files plus focus symbols; review stage must still
        // admit symbol items rather than letting files take everything
        let big = "token = 1\n".repeat(200);
        let (store, _dir) = ingested_store(&[
            ("a.py", big.as_str()),
            ("b.py", big.as_str()),
            ("focus.py", "def token():\n    pass\n"),
        ]);

        let mut opts = base_opts();
        opts.stage = Stage::Review;
        opts.keywords = Some("token".into());
        opts.focus = Some("focus.py".into());
        opts.budget = 600;
        let pack = build(&store, &opts).unwrap();

        assert!(pack
            .items
            .iter()
            .any(|i| i.category == ItemCategory::Symbol));
    }
}
