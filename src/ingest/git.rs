//! Changed-file detection for incremental ingestion.
//!
//! Incremental mode requires the source tree to be a git work tree. The
//! reference point is the commit recorded on the Repo node by the previous
//! ingestion; the changed set is the diff of that commit's tree against the
//! current work directory and index. A root that is not a repository is an
//! explicit error, never a silent full scan.

use std::collections::BTreeSet;
use std::path::Path;

use git2::{Delta, DiffOptions, Repository};

use crate::error::EngineError;

/// Changed paths (relative, forward slashes) between the reference commit
/// and the current work tree.
#[derive(Debug, Default)]
pub struct ChangedSet {
    /// Added or modified paths, sorted
    pub upserts: Vec<String>,
    /// Deleted paths, sorted
    pub deletes: Vec<String>,
}

/// Open the work tree at `root`, failing with retry-in-full-mode guidance.
pub fn open_work_tree(root: &Path) -> Result<Repository, EngineError> {
    Repository::open(root).map_err(|e| {
        EngineError::SourceRead(format!(
            "{} is not a git work tree ({}); retry ingestion in full mode",
            root.display(),
            e.message()
        ))
    })
}

/// Current HEAD commit id, if the root is a git work tree with history.
///
/// Best effort: a missing HEAD (fresh repository) or non-git root yields
/// `None` so full ingestion never fails on this.
pub fn head_commit(root: &Path) -> Option<String> {
    let repo = Repository::open(root).ok()?;
    let head = repo.head().ok()?;
    head.peel_to_commit().ok().map(|c| c.id().to_string())
}

/// Compute the changed-file set since `reference_commit`.
///
/// Paths are relative to the work tree root with forward slashes, matching
/// File node identity. Renames surface as delete + add, which the pipeline
/// already handles.
pub fn changed_since(root: &Path, reference_commit: &str) -> Result<ChangedSet, EngineError> {
    let repo = open_work_tree(root)?;

    let oid = git2::Oid::from_str(reference_commit).map_err(|e| {
        EngineError::SourceRead(format!(
            "invalid reference commit '{}': {}; retry ingestion in full mode",
            reference_commit, e
        ))
    })?;
    let commit = repo.find_commit(oid).map_err(|e| {
        EngineError::SourceRead(format!(
            "reference commit {} not found ({}); retry ingestion in full mode",
            reference_commit,
            e.message()
        ))
    })?;
    let old_tree = commit
        .tree()
        .map_err(|e| EngineError::SourceRead(format!("cannot read reference tree: {}", e)))?;

    let mut opts = DiffOptions::new();
    opts.include_untracked(true).recurse_untracked_dirs(true);

    let diff = repo
        .diff_tree_to_workdir_with_index(Some(&old_tree), Some(&mut opts))
        .map_err(|e| EngineError::SourceRead(format!("diff failed: {}", e.message())))?;

    // BTreeSets give sorted, deduplicated output for deterministic replay.
    let mut upserts = BTreeSet::new();
    let mut deletes = BTreeSet::new();

    for delta in diff.deltas() {
        match delta.status() {
            Delta::Added | Delta::Modified | Delta::Untracked | Delta::Copied => {
                if let Some(path) = delta.new_file().path() {
                    upserts.insert(path.to_string_lossy().replace('\\', "/"));
                }
            }
            Delta::Deleted => {
                if let Some(path) = delta.old_file().path() {
                    deletes.insert(path.to_string_lossy().replace('\\', "/"));
                }
            }
            Delta::Renamed => {
                if let Some(path) = delta.old_file().path() {
                    deletes.insert(path.to_string_lossy().replace('\\', "/"));
                }
                if let Some(path) = delta.new_file().path() {
                    upserts.insert(path.to_string_lossy().replace('\\', "/"));
                }
            }
            _ => {}
        }
    }

    Ok(ChangedSet {
        upserts: upserts.into_iter().collect(),
        deletes: deletes.into_iter().collect(),
    })
}
