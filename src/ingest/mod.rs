//! Repository ingestion pipeline.
//!
//! Walks a repository, detects changes, and upserts File/Symbol nodes and
//! their relationships. Files are processed in lexical path order so
//! repeated runs are reproducible, and every file's graph writes are
//! committed before progress advances past it.
//!
//! # Modes
//! - **Full**: enumerate everything matching the filters, then remove File
//!   nodes not seen in this pass (deletion detection).
//! - **Incremental**: process only the git changed set since the reference
//!   commit recorded by the previous ingestion. Not being a git work tree
//!   is an explicit error, never a silent full scan.
//!
//! # Failure semantics
//! A read error on one file is recorded and skipped. A graph store error
//! aborts the remaining batch; the report carries the error alongside the
//! counts committed so far. Cancellation is checked between files.

pub mod detect;
pub mod filter;
pub mod git;
pub mod parsers;

pub use detect::{detect_language, has_parser, LANG_UNKNOWN};
pub use filter::{FileFilter, SkipReason};

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result, StoreError};
use crate::model::{
    content_hash, file_key, now_secs, repo_file_prefix, symbol_id, EdgeKind, FileNode, RepoNode,
    SymbolNode, CONTENT_INLINE_THRESHOLD, LABEL_FILE, LABEL_REPO, LABEL_SYMBOL,
};
use crate::store::{Direction, GraphStore};

use parsers::ParserRegistry;

/// Ingestion mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    Full,
    Incremental,
}

/// Ingestion request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOptions {
    /// Repository id (caller-assigned, stable across runs)
    pub repo_id: String,
    /// Repository root path
    pub root: PathBuf,
    /// Optional remote identifier
    #[serde(default)]
    pub remote: Option<String>,
    /// Full or incremental
    pub mode: IngestMode,
    /// Include globs (empty = include all)
    #[serde(default)]
    pub include_globs: Vec<String>,
    /// Exclude globs
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

/// One recorded per-file failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileError {
    pub path: String,
    pub message: String,
}

/// Ingestion result summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub files_processed: usize,
    pub files_added: usize,
    pub files_updated: usize,
    pub files_deleted: usize,
    pub symbols_added: usize,
    /// Per-file read failures, skipped without failing the run
    pub errors: Vec<FileError>,
    /// Set when a store failure aborted the remaining batch; the counts
    /// above reflect work committed before the abort
    pub store_error: Option<String>,
    /// Set when the run stopped at a cancellation checkpoint
    pub cancelled: bool,
    pub duration_ms: u64,
}

/// Progress callback: (files done, files total).
pub type ProgressFn<'a> = dyn Fn(usize, usize) + Send + Sync + 'a;

/// What happened to a single file during processing.
enum FileOutcome {
    Added,
    Updated,
}

/// Facts awaiting the edge-resolution pass at the end of the run.
#[derive(Default)]
struct PendingEdges {
    /// (source path, candidate module name)
    imports: Vec<(String, String)>,
    /// (source path, caller name, callee name)
    calls: Vec<(String, String, String)>,
}

/// Run an ingestion pass.
///
/// Synchronous entry point; the task queue wraps this for long runs. The
/// optional `cancel` flag is polled between files (cooperative
/// cancellation), and `progress` is invoked after each file commits.
pub fn run(
    store: &GraphStore,
    opts: &IngestOptions,
    progress: Option<&ProgressFn<'_>>,
    cancel: Option<&AtomicBool>,
) -> Result<IngestReport> {
    if opts.repo_id.is_empty() {
        return Err(EngineError::Validation("repo_id must not be empty".into()));
    }
    if !opts.root.is_dir() {
        return Err(EngineError::Validation(format!(
            "root is not a directory: {}",
            opts.root.display()
        )));
    }

    let started = Instant::now();
    let filter = FileFilter::new(&opts.root, &opts.include_globs, &opts.exclude_globs)?;

    // Full mode creates the Repo node on first contact; incremental mode
    // requires a prior ingestion to exist
    let repo_node_id = match opts.mode {
        IngestMode::Full => ensure_repo(store, opts)?,
        IngestMode::Incremental => store
            .node_id(LABEL_REPO, &opts.repo_id)?
            .ok_or_else(|| EngineError::NotFound(format!("repository {}", opts.repo_id)))?,
    };

    let mut report = IngestReport::default();
    let mut pending = PendingEdges::default();
    let mut registry = ParserRegistry::new()?;

    let outcome = match opts.mode {
        IngestMode::Full => run_full(
            store,
            opts,
            &filter,
            repo_node_id,
            &mut registry,
            &mut pending,
            &mut report,
            progress,
            cancel,
        ),
        IngestMode::Incremental => run_incremental(
            store,
            opts,
            &filter,
            repo_node_id,
            &mut registry,
            &mut pending,
            &mut report,
            progress,
            cancel,
        ),
    };

    match outcome {
        Ok(()) => {
            // Resolve IMPORTS/CALLS edges once all files of the run are known
            if let Err(err) = resolve_edges(store, &opts.repo_id, &pending) {
                report.store_error = Some(err.to_string());
            }
        }
        Err(EngineError::Store(err)) => {
            tracing::warn!(repo = %opts.repo_id, error = %err, "ingestion aborted by store failure");
            report.store_error = Some(err.to_string());
        }
        Err(other) => return Err(other),
    }

    // A cancelled or aborted run must not advance the incremental
    // reference point; files past the stopping checkpoint were never
    // committed, and a later incremental diff against the new HEAD would
    // skip them silently
    if report.store_error.is_none() && !report.cancelled {
        finalize_repo(store, opts)?;
    }

    report.duration_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        repo = %opts.repo_id,
        added = report.files_added,
        updated = report.files_updated,
        deleted = report.files_deleted,
        errors = report.errors.len(),
        cancelled = report.cancelled,
        "ingestion finished"
    );
    Ok(report)
}

/// Create the Repo node on first ingestion, keep it on later ones.
fn ensure_repo(store: &GraphStore, opts: &IngestOptions) -> Result<i64> {
    let existing: Option<RepoNode> = store.get_payload_by_key(LABEL_REPO, &opts.repo_id)?;
    let node = match existing {
        Some(mut node) => {
            node.root = opts.root.to_string_lossy().into_owned();
            if opts.remote.is_some() {
                node.remote = opts.remote.clone();
            }
            node
        }
        None => RepoNode {
            id: opts.repo_id.clone(),
            root: opts.root.to_string_lossy().into_owned(),
            remote: opts.remote.clone(),
            file_count: 0,
            last_commit: None,
            created_at: now_secs(),
        },
    };
    Ok(store.upsert_node(LABEL_REPO, &opts.repo_id, &node)?)
}

/// Record the final file count and the new incremental reference point.
fn finalize_repo(store: &GraphStore, opts: &IngestOptions) -> Result<()> {
    let mut node: RepoNode = store
        .get_payload_by_key(LABEL_REPO, &opts.repo_id)?
        .ok_or_else(|| EngineError::NotFound(format!("repository {}", opts.repo_id)))?;
    node.file_count = store
        .node_keys_with_prefix(LABEL_FILE, &repo_file_prefix(&opts.repo_id))?
        .len();
    // Best effort: non-git roots simply keep no reference point
    node.last_commit = git::head_commit(&opts.root);
    store.upsert_node(LABEL_REPO, &opts.repo_id, &node)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_full(
    store: &GraphStore,
    opts: &IngestOptions,
    filter: &FileFilter,
    repo_node_id: i64,
    registry: &mut ParserRegistry,
    pending: &mut PendingEdges,
    report: &mut IngestReport,
    progress: Option<&ProgressFn<'_>>,
    cancel: Option<&AtomicBool>,
) -> Result<()> {
    // Collect matching paths first, then sort for deterministic order
    let mut rel_paths: Vec<String> = Vec::new();
    for entry in walkdir::WalkDir::new(&opts.root)
        .follow_links(false)
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        let path = entry.path();
        if filter.should_skip(path).is_none() {
            rel_paths.push(filter.relative_path(path));
        }
    }
    rel_paths.sort();

    let total = rel_paths.len();
    let mut seen: BTreeSet<String> = BTreeSet::new();

    for (idx, rel) in rel_paths.iter().enumerate() {
        if is_cancelled(cancel) {
            report.cancelled = true;
            break;
        }

        seen.insert(file_key(&opts.repo_id, rel));
        process_file(store, opts, repo_node_id, registry, pending, report, rel)?;
        report.files_processed += 1;

        if let Some(cb) = progress {
            cb(idx + 1, total);
        }
    }

    // Deletion detection only makes sense for an uncancelled complete pass
    if !report.cancelled {
        let prefix = repo_file_prefix(&opts.repo_id);
        for key in store.node_keys_with_prefix(LABEL_FILE, &prefix)? {
            if !seen.contains(&key) {
                delete_file(store, &key)?;
                report.files_deleted += 1;
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_incremental(
    store: &GraphStore,
    opts: &IngestOptions,
    filter: &FileFilter,
    repo_node_id: i64,
    registry: &mut ParserRegistry,
    pending: &mut PendingEdges,
    report: &mut IngestReport,
    progress: Option<&ProgressFn<'_>>,
    cancel: Option<&AtomicBool>,
) -> Result<()> {
    let repo: RepoNode = store
        .get_payload_by_key(LABEL_REPO, &opts.repo_id)?
        .ok_or_else(|| EngineError::NotFound(format!("repository {}", opts.repo_id)))?;

    let reference = repo.last_commit.as_deref().ok_or_else(|| {
        EngineError::SourceRead(format!(
            "repository {} has no ingestion reference point; run full mode first",
            opts.repo_id
        ))
    })?;

    let changed = git::changed_since(&opts.root, reference)?;

    let upserts: Vec<String> = changed
        .upserts
        .into_iter()
        .filter(|rel| filter.should_skip(&opts.root.join(rel)).is_none())
        .collect();
    let total = upserts.len() + changed.deletes.len();
    let mut done = 0usize;

    for rel in &upserts {
        if is_cancelled(cancel) {
            report.cancelled = true;
            return Ok(());
        }

        process_file(store, opts, repo_node_id, registry, pending, report, rel)?;
        report.files_processed += 1;
        done += 1;
        if let Some(cb) = progress {
            cb(done, total);
        }
    }

    for rel in &changed.deletes {
        if is_cancelled(cancel) {
            report.cancelled = true;
            return Ok(());
        }

        let key = file_key(&opts.repo_id, rel);
        if store.node_id(LABEL_FILE, &key)?.is_some() {
            delete_file(store, &key)?;
            report.files_deleted += 1;
        }
        done += 1;
        if let Some(cb) = progress {
            cb(done, total);
        }
    }

    Ok(())
}

fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.map(|flag| flag.load(Ordering::SeqCst)).unwrap_or(false)
}

/// Process one file: hash, change-detect, upsert node + fulltext + symbols.
///
/// All graph writes for the file happen here, before the caller advances
/// progress past it. Read failures are recorded and skipped; store failures
/// propagate and abort the batch.
fn process_file(
    store: &GraphStore,
    opts: &IngestOptions,
    repo_node_id: i64,
    registry: &mut ParserRegistry,
    pending: &mut PendingEdges,
    report: &mut IngestReport,
    rel: &str,
) -> Result<()> {
    let abs = opts.root.join(rel);
    let source = match std::fs::read(&abs) {
        Ok(bytes) => bytes,
        Err(err) => {
            report.errors.push(FileError {
                path: rel.to_string(),
                message: err.to_string(),
            });
            return Ok(());
        }
    };

    let hash = content_hash(&source);
    let key = file_key(&opts.repo_id, rel);
    let existing: Option<FileNode> = store.get_payload_by_key(LABEL_FILE, &key)?;

    if let Some(mut node) = existing.filter(|node| node.hash == hash) {
        // Unchanged: refresh the timestamp, skip extraction entirely
        node.updated_at = now_secs();
        store.upsert_node(LABEL_FILE, &key, &node)?;
        return Ok(());
    }

    let outcome = if store.node_id(LABEL_FILE, &key)?.is_some() {
        FileOutcome::Updated
    } else {
        FileOutcome::Added
    };

    let lang = detect_language(Path::new(rel));
    let text = std::str::from_utf8(&source).ok();
    let content = text
        .filter(|_| source.len() < CONTENT_INLINE_THRESHOLD)
        .map(|s| s.to_string());

    let node = FileNode {
        repo_id: opts.repo_id.clone(),
        path: rel.to_string(),
        lang: lang.to_string(),
        size: source.len(),
        hash,
        content: content.clone(),
        updated_at: now_secs(),
    };
    let file_node_id = store.upsert_node(LABEL_FILE, &key, &node)?;
    store.upsert_edge(file_node_id, repo_node_id, EdgeKind::BelongsTo)?;
    store.fts_upsert(&key, &opts.repo_id, rel, lang, content.as_deref())?;

    // Symbol ids are deterministic, so a symbol that survives the edit
    // keeps its node id and its inbound CALLS edges from other files stay
    // valid. Only symbols gone from the new source are deleted.
    let mut previous: BTreeMap<String, i64> = BTreeMap::new();
    for old_symbol in store.neighbors(file_node_id, EdgeKind::DefinedIn, Direction::Incoming)? {
        if let Some(row) = store.get_node(old_symbol)? {
            previous.insert(row.natural_key, old_symbol);
        }
    }
    store.delete_edges_from(file_node_id, EdgeKind::Imports)?;

    let mut kept: BTreeSet<String> = BTreeSet::new();
    if let (Some(parser), Some(text)) = (registry.for_language(lang), text) {
        let facts = parser.extract(text.as_bytes());

        // Dedup by symbol id; duplicate definitions map to one node
        for fact in &facts.symbols {
            let id = symbol_id(&opts.repo_id, rel, fact.kind, &fact.name);
            let key = symbol_key(&opts.repo_id, &id);
            if !kept.insert(key.clone()) {
                continue;
            }
            let symbol = SymbolNode {
                id,
                repo_id: opts.repo_id.clone(),
                path: rel.to_string(),
                name: fact.name.clone(),
                kind: fact.kind,
                lang: lang.to_string(),
            };
            let symbol_node_id = store.upsert_node(LABEL_SYMBOL, &key, &symbol)?;
            // Outgoing calls are rebuilt from this parse
            store.delete_edges_from(symbol_node_id, EdgeKind::Calls)?;
            store.upsert_edge(symbol_node_id, file_node_id, EdgeKind::DefinedIn)?;
            if !previous.contains_key(&key) {
                report.symbols_added += 1;
            }
        }

        for call in facts.calls {
            pending
                .calls
                .push((rel.to_string(), call.caller, call.callee));
        }
        for import in facts.imports {
            pending.imports.push((rel.to_string(), import.module));
        }
    }

    for (key, old_id) in &previous {
        if !kept.contains(key) {
            store.delete_node(*old_id)?;
        }
    }

    match outcome {
        FileOutcome::Added => report.files_added += 1,
        FileOutcome::Updated => report.files_updated += 1,
    }

    Ok(())
}

/// Natural key for a Symbol node, prefixed for repo-scoped scans.
pub(crate) fn symbol_key(repo_id: &str, id: &str) -> String {
    format!("{}:{}", repo_id, id)
}

/// Delete a File node, its owned Symbols, and every touching edge.
pub(crate) fn delete_file(store: &GraphStore, key: &str) -> Result<(), StoreError> {
    if let Some(file_node_id) = store.node_id(LABEL_FILE, key)? {
        for symbol in store.neighbors(file_node_id, EdgeKind::DefinedIn, Direction::Incoming)? {
            store.delete_node(symbol)?;
        }
        store.delete_node(file_node_id)?;
    }
    store.fts_delete(key)?;
    Ok(())
}

/// Second pass: resolve collected import/call facts into graph edges.
///
/// Imports match a candidate module name against repository file stems;
/// calls match callee names against repository symbols. Unresolvable facts
/// are dropped (external modules, dynamic targets).
fn resolve_edges(store: &GraphStore, repo_id: &str, pending: &PendingEdges) -> Result<()> {
    let prefix = repo_file_prefix(repo_id);

    // stem -> path, lexically-first path wins on collision
    let mut stems: BTreeMap<String, String> = BTreeMap::new();
    for key in store.node_keys_with_prefix(LABEL_FILE, &prefix)? {
        if let Some((_, path)) = crate::model::split_file_key(&key) {
            let stem = Path::new(path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !stem.is_empty() {
                stems.entry(stem).or_insert_with(|| path.to_string());
            }
        }
    }

    for (from_path, module) in &pending.imports {
        let Some(target) = stems.get(module) else {
            continue;
        };
        if target == from_path {
            continue;
        }
        let from_id = store.node_id(LABEL_FILE, &file_key(repo_id, from_path))?;
        let to_id = store.node_id(LABEL_FILE, &file_key(repo_id, target))?;
        if let (Some(from_id), Some(to_id)) = (from_id, to_id) {
            store.upsert_edge(from_id, to_id, EdgeKind::Imports)?;
        }
    }

    if pending.calls.is_empty() {
        return Ok(());
    }

    // name -> symbol node id, first by natural key order on collision
    let mut by_name: BTreeMap<String, i64> = BTreeMap::new();
    for key in store.node_keys_with_prefix(LABEL_SYMBOL, &prefix)? {
        if let Some(node_id) = store.node_id(LABEL_SYMBOL, &key)? {
            if let Some(symbol) = store.get_payload::<SymbolNode>(node_id)? {
                by_name.entry(symbol.name).or_insert(node_id);
            }
        }
    }

    for (from_path, caller, callee) in &pending.calls {
        let caller_id = symbol_id(repo_id, from_path, crate::model::SymbolKind::Function, caller);
        let Some(caller_node) = store.node_id(LABEL_SYMBOL, &symbol_key(repo_id, &caller_id))?
        else {
            continue;
        };
        let Some(&callee_node) = by_name.get(callee) else {
            continue;
        };
        if callee_node != caller_node {
            store.upsert_edge(caller_node, callee_node, EdgeKind::Calls)?;
        }
    }

    Ok(())
}

/// List the File payloads of a repository in path order. Status surface.
pub fn list_files(store: &GraphStore, repo_id: &str) -> Result<Vec<FileNode>> {
    let mut files = Vec::new();
    for key in store.node_keys_with_prefix(LABEL_FILE, &repo_file_prefix(repo_id))? {
        if let Some(node) = store.get_payload_by_key::<FileNode>(LABEL_FILE, &key)? {
            files.push(node);
        }
    }
    Ok(files)
}

/// Symbols defined in one file, name order. Used by the pack builder.
pub fn symbols_in_file(store: &GraphStore, repo_id: &str, path: &str) -> Result<Vec<SymbolNode>> {
    let key = file_key(repo_id, path);
    let Some(file_node_id) = store.node_id(LABEL_FILE, &key)? else {
        return Err(EngineError::NotFound(format!("file {} in {}", path, repo_id)));
    };
    let mut symbols = Vec::new();
    for id in store.neighbors(file_node_id, EdgeKind::DefinedIn, Direction::Incoming)? {
        if let Some(symbol) = store.get_payload::<SymbolNode>(id)? {
            symbols.push(symbol);
        }
    }
    symbols.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(symbols)
}
