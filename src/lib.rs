//! Ortelius: a code graph engine with a durable task orchestrator
//!
//! Ortelius ingests repositories into a property graph (Repo, File, and
//! Symbol nodes joined by BELONGS_TO, IMPORTS, DEFINED_IN, and CALLS
//! edges), then answers questions against that graph: ranked fulltext
//! search, bounded-depth impact analysis, and token-budgeted context
//! packs. Long-running ingestion goes through a durable, concurrency-
//! limited task queue with cooperative cancellation.
//!
//! # Determinism Conventions
//!
//! All graph mutations are idempotent, natural-key-addressed upserts, and
//! all iteration orders are defined (lexical paths, sorted keys, explicit
//! tie-breaks on every ranking), so repeated runs against unchanged input
//! produce byte-identical results.
//!
//! # Quick Start
//!
//! ```no_run
//! use ortelius::ingest::{self, IngestMode, IngestOptions};
//! use ortelius::search::{self, SearchOptions};
//! use ortelius::store::GraphStore;
//!
//! # fn main() -> ortelius::Result<()> {
//! let store = GraphStore::open("graph.db")?;
//! ingest::run(
//!     &store,
//!     &IngestOptions {
//!         repo_id: "my-repo".into(),
//!         root: "/path/to/repo".into(),
//!         remote: None,
//!         mode: IngestMode::Full,
//!         include_globs: vec![],
//!         exclude_globs: vec![],
//!     },
//!     None,
//!     None,
//! )?;
//!
//! let hits = search::search(
//!     &store,
//!     &SearchOptions { query: "parser".into(), repo_id: "my-repo".into(), limit: None },
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod impact;
pub mod ingest;
pub mod model;
pub mod pack;
pub mod search;
pub mod store;
pub mod tasks;

pub use error::{EngineError, Result, StoreError};
pub use impact::{ImpactOptions, ImpactedFile, Relationship};
pub use ingest::{IngestMode, IngestOptions, IngestReport};
pub use model::{EdgeKind, FileNode, RepoNode, SymbolKind, SymbolNode};
pub use pack::{PackOptions, PackResponse, Stage};
pub use search::{SearchHit, SearchOptions};
pub use store::GraphStore;
pub use tasks::{
    IngestRunner, QueueConfig, SqliteTaskStore, Task, TaskQueue, TaskRunner, TaskStatus, TaskStore,
};
