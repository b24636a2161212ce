//! Graph data model for Ortelius.
//!
//! Defines node payloads, edge types, and natural-key construction. All node
//! payloads are serialized to JSON before being handed to the graph store;
//! natural keys make every write an idempotent upsert.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Node labels used in the graph.
pub const LABEL_REPO: &str = "Repo";
pub const LABEL_FILE: &str = "File";
pub const LABEL_SYMBOL: &str = "Symbol";

/// Files at or above this size are indexed without inline content.
pub const CONTENT_INLINE_THRESHOLD: usize = 65536;

/// Directed edge types between graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// File → Repo ownership
    BelongsTo,
    /// File → File import dependency
    Imports,
    /// Symbol → File definition site
    DefinedIn,
    /// Symbol → Symbol call dependency
    Calls,
}

impl EdgeKind {
    /// Stable storage key for this edge type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::BelongsTo => "BELONGS_TO",
            EdgeKind::Imports => "IMPORTS",
            EdgeKind::DefinedIn => "DEFINED_IN",
            EdgeKind::Calls => "CALLS",
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository node payload.
///
/// Created on first ingestion; never deleted implicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoNode {
    /// Unique repository id (UUID string)
    pub id: String,
    /// Root path of the indexed tree
    pub root: String,
    /// Optional remote identifier (URL or slug)
    #[serde(default)]
    pub remote: Option<String>,
    /// Number of files at the end of the last completed ingestion
    pub file_count: usize,
    /// Commit id recorded at the end of the last ingestion, when the root
    /// is a git work tree. Reference point for incremental mode.
    #[serde(default)]
    pub last_commit: Option<String>,
    /// Unix timestamp (seconds) of repository creation
    pub created_at: i64,
}

/// File node payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    /// Owning repository id
    pub repo_id: String,
    /// Path relative to the repository root, forward slashes
    pub path: String,
    /// Detected language ("unknown" for unrecognized extensions)
    pub lang: String,
    /// Size in bytes
    pub size: usize,
    /// SHA-256 content hash (hex) for change detection
    pub hash: String,
    /// Inline content, present only below CONTENT_INLINE_THRESHOLD
    #[serde(default)]
    pub content: Option<String>,
    /// Unix timestamp (seconds) when this file was last indexed
    pub updated_at: i64,
}

/// Symbol kinds tracked in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Class => "class",
        }
    }
}

/// Symbol node payload.
///
/// Owned by its defining File; destroyed when the File is re-ingested and
/// the symbol no longer exists in source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolNode {
    /// Globally unique symbol id (see [`symbol_id`])
    pub id: String,
    /// Owning repository id
    pub repo_id: String,
    /// Path of the defining file
    pub path: String,
    /// Symbol name
    pub name: String,
    /// Symbol kind
    pub kind: SymbolKind,
    /// Declaring language
    pub lang: String,
}

/// Natural key for a File node: composite (repo id, relative path).
pub fn file_key(repo_id: &str, path: &str) -> String {
    format!("{}:{}", repo_id, path)
}

/// Key prefix matching every File of a repository.
pub fn repo_file_prefix(repo_id: &str) -> String {
    format!("{}:", repo_id)
}

/// Split a File natural key back into (repo id, path).
pub fn split_file_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(':')
}

/// Derive the stable symbol id for (repo, path, kind, name).
///
/// SHA-256 prefix, 32 hex chars. Deterministic across runs so re-ingestion
/// of unchanged content upserts the same node.
pub fn symbol_id(repo_id: &str, path: &str, kind: SymbolKind, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repo_id.as_bytes());
    hasher.update(b":");
    hasher.update(path.as_bytes());
    hasher.update(b":");
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Compute the SHA-256 content hash used for change detection.
pub fn content_hash(source: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source);
    hex::encode(hasher.finalize())
}

/// Current unix timestamp in seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Current unix timestamp in milliseconds. Used where second granularity
/// is too coarse, such as worker lock expiry.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
