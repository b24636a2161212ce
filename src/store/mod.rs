//! Graph persistence layer over SQLite.
//!
//! Provides typed, natural-key-addressed operations so that every write is
//! an idempotent upsert: concurrent or retried writes from different workers
//! converge instead of diverging. The adapter performs no retries of its
//! own; retry policy belongs to callers.

mod schema;

pub use schema::{ensure_schema, ORTELIUS_SCHEMA_VERSION};

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::error::StoreError;
use crate::model::EdgeKind;

/// Edge traversal direction for neighbor queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Follow edges from the given node outward (from_id = node)
    Outgoing,
    /// Follow edges pointing at the given node (to_id = node)
    Incoming,
}

/// A raw node row: label, natural key, and JSON payload.
#[derive(Debug, Clone)]
pub struct NodeRow {
    pub id: i64,
    pub label: String,
    pub natural_key: String,
    pub data: serde_json::Value,
}

/// A fulltext hit: File natural key plus engine relevance score.
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub node_key: String,
    pub score: f64,
}

/// Graph database wrapper for Ortelius.
///
/// Each `GraphStore` owns one SQLite connection. Workers that run in
/// parallel open their own store against the same database file; idempotent
/// upserts make concurrent writes safe without in-process locks.
pub struct GraphStore {
    conn: Connection,
}

impl GraphStore {
    /// Open (and if necessary create) a graph database at the given path.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        // Readers and writers from multiple worker threads share this file.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory store. Test use.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    // ===== Node operations =====

    /// Insert or update a node addressed by (label, natural key).
    ///
    /// Returns the node id. The id is stable across upserts of the same key.
    pub fn upsert_node<T: Serialize>(
        &self,
        label: &str,
        natural_key: &str,
        payload: &T,
    ) -> Result<i64, StoreError> {
        let data = serde_json::to_string(payload)?;
        self.conn.execute(
            "INSERT INTO graph_nodes(label, natural_key, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(label, natural_key) DO UPDATE SET data = excluded.data",
            params![label, natural_key, data],
        )?;
        let id: i64 = self.conn.query_row(
            "SELECT id FROM graph_nodes WHERE label = ?1 AND natural_key = ?2",
            params![label, natural_key],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Look up a node id by (label, natural key).
    pub fn node_id(&self, label: &str, natural_key: &str) -> Result<Option<i64>, StoreError> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM graph_nodes WHERE label = ?1 AND natural_key = ?2",
                params![label, natural_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Fetch a node row by id.
    pub fn get_node(&self, id: i64) -> Result<Option<NodeRow>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, label, natural_key, data FROM graph_nodes WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id, label, natural_key, data)) => Ok(Some(NodeRow {
                id,
                label,
                natural_key,
                data: serde_json::from_str(&data)?,
            })),
            None => Ok(None),
        }
    }

    /// Fetch and deserialize a node payload by id.
    pub fn get_payload<T: DeserializeOwned>(&self, id: i64) -> Result<Option<T>, StoreError> {
        match self.get_node(id)? {
            Some(row) => Ok(Some(serde_json::from_value(row.data)?)),
            None => Ok(None),
        }
    }

    /// Fetch and deserialize a node payload by (label, natural key).
    pub fn get_payload_by_key<T: DeserializeOwned>(
        &self,
        label: &str,
        natural_key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.node_id(label, natural_key)? {
            Some(id) => self.get_payload(id),
            None => Ok(None),
        }
    }

    /// List natural keys of nodes whose key starts with the given prefix.
    ///
    /// Returned in lexicographic order for determinism.
    pub fn node_keys_with_prefix(
        &self,
        label: &str,
        prefix: &str,
    ) -> Result<Vec<String>, StoreError> {
        // Prefixes are "{uuid}:" so no LIKE metacharacters can appear.
        let mut stmt = self.conn.prepare(
            "SELECT natural_key FROM graph_nodes
             WHERE label = ?1 AND natural_key LIKE ?2 || '%'
             ORDER BY natural_key",
        )?;
        let keys = stmt
            .query_map(params![label, prefix], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// Delete a node and every edge touching it.
    pub fn delete_node(&self, id: i64) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM graph_edges WHERE from_id = ?1 OR to_id = ?1",
            params![id],
        )?;
        self.conn
            .execute("DELETE FROM graph_nodes WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Count nodes with the given label.
    pub fn count_nodes(&self, label: &str) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM graph_nodes WHERE label = ?1",
            params![label],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ===== Edge operations =====

    /// Insert a directed typed edge if it does not already exist.
    ///
    /// Duplicate upserts are no-ops: edges are unique per ordered
    /// (from, to, type) triple, which makes re-ingestion idempotent.
    pub fn upsert_edge(&self, from: i64, to: i64, kind: EdgeKind) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO graph_edges(from_id, to_id, edge_type) VALUES (?1, ?2, ?3)",
            params![from, to, kind.as_str()],
        )?;
        Ok(())
    }

    /// Neighbor ids of a node along edges of one type and direction.
    ///
    /// Sorted ascending by id for deterministic traversal order.
    pub fn neighbors(
        &self,
        id: i64,
        kind: EdgeKind,
        direction: Direction,
    ) -> Result<Vec<i64>, StoreError> {
        let sql = match direction {
            Direction::Outgoing => {
                "SELECT to_id FROM graph_edges
                 WHERE from_id = ?1 AND edge_type = ?2 ORDER BY to_id"
            }
            Direction::Incoming => {
                "SELECT from_id FROM graph_edges
                 WHERE to_id = ?1 AND edge_type = ?2 ORDER BY from_id"
            }
        };
        let mut stmt = self.conn.prepare(sql)?;
        let ids = stmt
            .query_map(params![id, kind.as_str()], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Delete all outgoing edges of one type from a node.
    ///
    /// Used when a file is re-ingested and its import set may have shrunk.
    pub fn delete_edges_from(&self, id: i64, kind: EdgeKind) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM graph_edges WHERE from_id = ?1 AND edge_type = ?2",
            params![id, kind.as_str()],
        )?;
        Ok(())
    }

    /// Count edges of one type. Status/diagnostic use.
    pub fn count_edges(&self, kind: EdgeKind) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM graph_edges WHERE edge_type = ?1",
            params![kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ===== Fulltext operations =====

    /// Replace the fulltext row for a File node.
    pub fn fts_upsert(
        &self,
        node_key: &str,
        repo_id: &str,
        path: &str,
        lang: &str,
        content: Option<&str>,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM file_fts WHERE node_key = ?1",
            params![node_key],
        )?;
        self.conn.execute(
            "INSERT INTO file_fts(path, lang, content, node_key, repo_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![path, lang, content.unwrap_or(""), node_key, repo_id],
        )?;
        Ok(())
    }

    /// Remove the fulltext row for a File node.
    pub fn fts_delete(&self, node_key: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM file_fts WHERE node_key = ?1",
            params![node_key],
        )?;
        Ok(())
    }

    /// Run a fulltext query scoped to one repository.
    ///
    /// `match_expr` must already be a sanitized FTS5 match expression (see
    /// [`crate::search::build_match_expr`]). Scores are BM25-derived, higher
    /// is better. Ties are broken by path for determinism.
    pub fn fulltext_search(
        &self,
        repo_id: &str,
        match_expr: &str,
        limit: usize,
    ) -> Result<Vec<FtsHit>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT node_key, -bm25(file_fts) AS score FROM file_fts
             WHERE file_fts MATCH ?1 AND repo_id = ?2
             ORDER BY score DESC, path ASC
             LIMIT ?3",
        )?;
        let hits = stmt
            .query_map(params![match_expr, repo_id, limit as i64], |row| {
                Ok(FtsHit {
                    node_key: row.get(0)?,
                    score: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(hits)
    }
}
