//! Graph store schema setup.
//!
//! All statements are idempotent (`IF NOT EXISTS`) so schema setup is safe
//! to call repeatedly, including concurrently from multiple workers.

use rusqlite::Connection;

use crate::error::StoreError;

/// Schema version recorded in `graph_meta`. Bump on incompatible changes.
pub const ORTELIUS_SCHEMA_VERSION: i64 = 1;

/// Create tables, unique constraints, and the fulltext index if absent.
///
/// Layout:
/// - `graph_nodes`: one row per node, unique on (label, natural_key)
/// - `graph_edges`: one row per directed typed edge, unique on
///   (from_id, to_id, edge_type) so repeated upserts never duplicate
/// - `file_fts`: FTS5 fulltext index over File path/lang/content
pub fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS graph_meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS graph_nodes (
            id          INTEGER PRIMARY KEY,
            label       TEXT NOT NULL,
            natural_key TEXT NOT NULL,
            data        TEXT NOT NULL,
            UNIQUE(label, natural_key)
        );

        CREATE INDEX IF NOT EXISTS idx_graph_nodes_label
            ON graph_nodes(label);

        CREATE TABLE IF NOT EXISTS graph_edges (
            from_id   INTEGER NOT NULL,
            to_id     INTEGER NOT NULL,
            edge_type TEXT NOT NULL,
            UNIQUE(from_id, to_id, edge_type)
        );

        CREATE INDEX IF NOT EXISTS idx_graph_edges_from
            ON graph_edges(from_id, edge_type);
        CREATE INDEX IF NOT EXISTS idx_graph_edges_to
            ON graph_edges(to_id, edge_type);

        CREATE VIRTUAL TABLE IF NOT EXISTS file_fts USING fts5(
            path,
            lang,
            content,
            node_key UNINDEXED,
            repo_id  UNINDEXED
        );
        ",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO graph_meta(key, value) VALUES ('schema_version', ?1)",
        [ORTELIUS_SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}
