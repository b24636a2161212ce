//! Bounded-depth reverse-dependency analysis.
//!
//! Answers "what breaks if this file changes" by walking the graph
//! backwards from a target file: incoming IMPORTS edges at the file level,
//! and incoming CALLS edges through the symbols the file defines. Each
//! dependent file is reported once, at the minimal depth it was reached,
//! with a certainty score that decays with distance.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::model::{file_key, EdgeKind, SymbolNode, LABEL_FILE, LABEL_REPO};
use crate::store::{Direction, GraphStore};

pub const DEPTH_MIN: usize = 1;
pub const DEPTH_MAX: usize = 5;
pub const DEPTH_DEFAULT: usize = 2;

/// Impact request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactOptions {
    pub repo_id: String,
    pub file_path: String,
    /// Traversal depth, clamped to 1..=5 when present, 2 when absent
    #[serde(default)]
    pub depth: Option<usize>,
}

/// Relationship through which a dependent was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relationship {
    #[serde(rename = "CALLS")]
    Calls,
    #[serde(rename = "IMPORTS")]
    Imports,
}

/// One impacted file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactedFile {
    pub path: String,
    pub relationship: Relationship,
    pub depth: usize,
    pub score: f64,
}

/// Certainty score for a hit at `depth` via `relationship`.
///
/// Direct callers are the most certain impact, direct importers slightly
/// less, and everything further out decays with distance.
fn impact_score(depth: usize, relationship: Relationship) -> f64 {
    match (depth, relationship) {
        (1, Relationship::Calls) => 1.0,
        (1, Relationship::Imports) => 0.9,
        (2, Relationship::Calls) => 0.7,
        (2, Relationship::Imports) => 0.6,
        (d, _) => 0.5 / d as f64,
    }
}

/// Compute the reverse-dependency set of one file.
///
/// # Errors
/// `NotFound` when the repository or target file is absent from the graph.
/// A file with no dependents yields an empty list, never an error.
pub fn analyze(store: &GraphStore, opts: &ImpactOptions) -> Result<Vec<ImpactedFile>> {
    let depth_limit = opts.depth.unwrap_or(DEPTH_DEFAULT).clamp(DEPTH_MIN, DEPTH_MAX);

    if store.node_id(LABEL_REPO, &opts.repo_id)?.is_none() {
        return Err(EngineError::NotFound(format!(
            "repository {}",
            opts.repo_id
        )));
    }
    let target_key = file_key(&opts.repo_id, &opts.file_path);
    let Some(target_id) = store.node_id(LABEL_FILE, &target_key)? else {
        return Err(EngineError::NotFound(format!(
            "file {} in {}",
            opts.file_path, opts.repo_id
        )));
    };

    // path -> first (minimal-depth) hit
    let mut reached: BTreeMap<String, ImpactedFile> = BTreeMap::new();
    let mut visited: BTreeSet<i64> = BTreeSet::new();
    visited.insert(target_id);

    // BFS frontier of file node ids; expanding level by level keeps the
    // first recording of each path at its minimal depth
    let mut frontier = vec![target_id];

    for depth in 1..=depth_limit {
        let mut next_frontier: Vec<i64> = Vec::new();

        for &file_id in &frontier {
            for (dependent, relationship) in dependents_of(store, file_id)? {
                if !visited.insert(dependent) {
                    continue;
                }
                next_frontier.push(dependent);

                let Some(row) = store.get_node(dependent)? else {
                    continue;
                };
                let Some((_, path)) = crate::model::split_file_key(&row.natural_key) else {
                    continue;
                };
                reached.entry(path.to_string()).or_insert(ImpactedFile {
                    path: path.to_string(),
                    relationship,
                    depth,
                    score: impact_score(depth, relationship),
                });
            }
        }

        if next_frontier.is_empty() {
            break;
        }
        frontier = next_frontier;
    }

    let mut results: Vec<ImpactedFile> = reached.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.depth.cmp(&b.depth))
            .then_with(|| a.path.cmp(&b.path))
    });
    Ok(results)
}

/// Files depending directly on `file_id`, with the relationship that links
/// them. CALLS wins when both relationships connect the same pair.
fn dependents_of(
    store: &GraphStore,
    file_id: i64,
) -> Result<Vec<(i64, Relationship)>> {
    // CALLS: symbols defined in this file <- calling symbols <- their files
    let mut callers: BTreeSet<i64> = BTreeSet::new();
    for symbol_id in store.neighbors(file_id, EdgeKind::DefinedIn, Direction::Incoming)? {
        for caller_symbol in store.neighbors(symbol_id, EdgeKind::Calls, Direction::Incoming)? {
            for caller_file in
                store.neighbors(caller_symbol, EdgeKind::DefinedIn, Direction::Outgoing)?
            {
                if caller_file != file_id {
                    callers.insert(caller_file);
                }
            }
        }
    }

    let importers: BTreeSet<i64> = store
        .neighbors(file_id, EdgeKind::Imports, Direction::Incoming)?
        .into_iter()
        .filter(|&id| id != file_id)
        .collect();

    let mut out: Vec<(i64, Relationship)> = Vec::new();
    for id in &callers {
        out.push((*id, Relationship::Calls));
    }
    for id in importers.difference(&callers) {
        out.push((*id, Relationship::Imports));
    }
    Ok(out)
}

/// Names of the symbols defined in a file that have at least one incoming
/// CALLS edge. The pack builder treats these as the file's hot surface.
pub fn called_symbol_names(
    store: &GraphStore,
    repo_id: &str,
    path: &str,
) -> Result<BTreeSet<String>> {
    let key = file_key(repo_id, path);
    let Some(file_id) = store.node_id(LABEL_FILE, &key)? else {
        return Err(EngineError::NotFound(format!("file {} in {}", path, repo_id)));
    };
    let mut names = BTreeSet::new();
    for symbol_id in store.neighbors(file_id, EdgeKind::DefinedIn, Direction::Incoming)? {
        let incoming = store.neighbors(symbol_id, EdgeKind::Calls, Direction::Incoming)?;
        if incoming.is_empty() {
            continue;
        }
        if let Some(symbol) = store.get_payload::<SymbolNode>(symbol_id)? {
            names.insert(symbol.name);
        }
    }
    Ok(names)
}
