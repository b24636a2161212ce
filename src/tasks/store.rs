//! Durable task persistence.
//!
//! The store is authoritative: a task exists once `put` returns, and every
//! status transition goes through a guarded SQL update so concurrent
//! workers converge instead of clobbering each other. Lock expiry is
//! handled inside the claim query and never surfaces to callers.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::model::{now_millis, now_secs};

use super::{Task, TaskStatus};

/// Persistence contract for the queue.
///
/// Passed explicitly to [`super::TaskQueue`]; there is no global registry.
pub trait TaskStore: Send + Sync {
    /// Durably store a task. Upserts by id.
    fn put(&self, task: &Task) -> Result<(), StoreError>;

    /// Fetch one task by id.
    fn get(&self, id: &str) -> Result<Option<Task>, StoreError>;

    /// Pending tasks in claim order (priority desc, creation asc).
    fn list_pending(&self, limit: usize) -> Result<Vec<Task>, StoreError>;

    /// Atomically claim the next eligible task for `worker_id`.
    ///
    /// Eligible: Pending, or Processing with a lock older than
    /// `lock_timeout_secs` (crash reclaim). Returns `None` when nothing is
    /// eligible.
    fn claim(&self, worker_id: &str, lock_timeout_secs: i64) -> Result<Option<Task>, StoreError>;

    /// Record progress from the lock-holding worker and refresh its lock.
    ///
    /// Returns `Ok(true)` when cancellation has been requested; this is the
    /// cooperative cancellation checkpoint. Returns `Err` if the caller no
    /// longer holds the lock (the task was reclaimed or finished).
    fn update_progress(
        &self,
        id: &str,
        worker_id: &str,
        fraction: f64,
        message: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Write a terminal state. First terminal write wins: returns `false`
    /// without modifying anything when the task is already terminal.
    fn finish(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Request cancellation.
    ///
    /// A Pending task goes straight to Cancelled and never starts. A
    /// Processing task gets its flag set for the worker to observe at the
    /// next checkpoint. Returns `false` for already-terminal tasks.
    fn request_cancel(&self, id: &str) -> Result<bool, StoreError>;
}

/// SQLite-backed task store.
///
/// The connection is mutex-guarded; every operation is a single statement
/// or short transaction, so contention stays bounded by statement latency.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

const TASKS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id              TEXT PRIMARY KEY,
    kind            TEXT NOT NULL,
    parameters      TEXT NOT NULL,
    priority        INTEGER NOT NULL DEFAULT 0,
    status          TEXT NOT NULL,
    progress        REAL NOT NULL DEFAULT 0.0,
    message         TEXT,
    result          TEXT,
    error           TEXT,
    worker          TEXT,
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    lock_ts         INTEGER,
    created_at      INTEGER NOT NULL,
    updated_at      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_claim
    ON tasks(status, priority DESC, created_at ASC);
";

impl SqliteTaskStore {
    /// Open (or create) a task store at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path.as_ref())
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(TASKS_SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Connection(e.to_string()))?;
        conn.execute_batch(TASKS_SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned mutex means another thread panicked mid-statement;
        // the connection itself is still usable
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
        let parameters: String = row.get("parameters")?;
        let result: Option<String> = row.get("result")?;
        let status: String = row.get("status")?;
        Ok(Task {
            id: row.get("id")?,
            kind: row.get("kind")?,
            parameters: serde_json::from_str(&parameters)
                .unwrap_or(serde_json::Value::Null),
            priority: row.get("priority")?,
            status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Failed),
            progress: row.get("progress")?,
            message: row.get("message")?,
            result: result.and_then(|r| serde_json::from_str(&r).ok()),
            error: row.get("error")?,
            worker: row.get("worker")?,
            cancel_requested: row.get::<_, i64>("cancel_requested")? != 0,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

impl TaskStore for SqliteTaskStore {
    fn put(&self, task: &Task) -> Result<(), StoreError> {
        let parameters = serde_json::to_string(&task.parameters)?;
        let result = task
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.lock().execute(
            "INSERT INTO tasks (id, kind, parameters, priority, status, progress,
                                message, result, error, worker, cancel_requested,
                                lock_ts, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                parameters = excluded.parameters,
                priority = excluded.priority,
                status = excluded.status,
                progress = excluded.progress,
                message = excluded.message,
                result = excluded.result,
                error = excluded.error,
                worker = excluded.worker,
                cancel_requested = excluded.cancel_requested,
                updated_at = excluded.updated_at",
            params![
                task.id,
                task.kind,
                parameters,
                task.priority,
                task.status.as_str(),
                task.progress,
                task.message,
                result,
                task.error,
                task.worker,
                task.cancel_requested as i64,
                task.created_at,
                task.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let conn = self.lock();
        let task = conn
            .query_row(
                "SELECT * FROM tasks WHERE id = ?1",
                params![id],
                Self::row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    fn list_pending(&self, limit: usize) -> Result<Vec<Task>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks WHERE status = 'pending'
             ORDER BY priority DESC, created_at ASC
             LIMIT ?1",
        )?;
        let tasks = stmt
            .query_map(params![limit as i64], Self::row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    fn claim(&self, worker_id: &str, lock_timeout_secs: i64) -> Result<Option<Task>, StoreError> {
        // Lock timestamps are milliseconds; second granularity cannot
        // express a zero timeout taken within the same second
        let now_ms = now_millis();
        let conn = self.lock();

        // Single conditional UPDATE: whoever's statement runs first gets the
        // row, the loser's WHERE matches nothing
        let claimed_id: Option<String> = conn
            .query_row(
                "UPDATE tasks SET status = 'processing', worker = ?1,
                        lock_ts = ?2, updated_at = ?3
                 WHERE id = (
                     SELECT id FROM tasks
                     WHERE status = 'pending'
                        OR (status = 'processing' AND lock_ts IS NOT NULL
                            AND lock_ts <= ?4)
                     ORDER BY priority DESC, created_at ASC
                     LIMIT 1
                 )
                 RETURNING id",
                params![
                    worker_id,
                    now_ms,
                    now_secs(),
                    now_ms - lock_timeout_secs * 1000
                ],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = claimed_id else {
            return Ok(None);
        };
        let task = conn
            .query_row(
                "SELECT * FROM tasks WHERE id = ?1",
                params![id],
                Self::row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    fn update_progress(
        &self,
        id: &str,
        worker_id: &str,
        fraction: f64,
        message: Option<&str>,
    ) -> Result<bool, StoreError> {
        let conn = self.lock();
        let row: Option<i64> = conn
            .query_row(
                "UPDATE tasks SET progress = ?1, message = COALESCE(?2, message),
                        lock_ts = ?3, updated_at = ?4
                 WHERE id = ?5 AND status = 'processing' AND worker = ?6
                 RETURNING cancel_requested",
                params![
                    fraction.clamp(0.0, 1.0),
                    message,
                    now_millis(),
                    now_secs(),
                    id,
                    worker_id
                ],
                |row| row.get(0),
            )
            .optional()?;
        match row {
            Some(flag) => Ok(flag != 0),
            // Lock lost: the task was reclaimed or finished elsewhere
            None => Err(StoreError::Constraint(format!(
                "worker {} no longer holds the lock on task {}",
                worker_id, id
            ))),
        }
    }

    fn finish(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::Constraint(format!(
                "finish called with non-terminal status {}",
                status.as_str()
            )));
        }
        let result = result.map(serde_json::to_string).transpose()?;
        let now = now_secs();
        let changed = self.lock().execute(
            "UPDATE tasks SET status = ?1, result = ?2, error = ?3,
                    progress = CASE WHEN ?1 = 'success' THEN 1.0 ELSE progress END,
                    worker = NULL, lock_ts = NULL, updated_at = ?4
             WHERE id = ?5 AND status IN ('pending', 'processing')",
            params![status.as_str(), result, error, now, id],
        )?;
        Ok(changed > 0)
    }

    fn request_cancel(&self, id: &str) -> Result<bool, StoreError> {
        let now = now_secs();
        let conn = self.lock();

        // Pending: cancel outright, it will never start
        let cancelled_pending = conn.execute(
            "UPDATE tasks SET status = 'cancelled', updated_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![now, id],
        )?;
        if cancelled_pending > 0 {
            return Ok(true);
        }

        // Processing: flag for the worker's next checkpoint
        let flagged = conn.execute(
            "UPDATE tasks SET cancel_requested = 1, updated_at = ?1
             WHERE id = ?2 AND status = 'processing'",
            params![now, id],
        )?;
        Ok(flagged > 0)
    }
}
