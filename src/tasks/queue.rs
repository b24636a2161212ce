//! Worker pool and task dispatch.
//!
//! The queue owns N worker threads; each runs at most one task at a time,
//! so N is the process-wide concurrency bound. Workers poll the store for
//! claimable work and sleep between empty polls. Shutdown is an atomic
//! flag checked at the top of every poll cycle, followed by a join.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::ingest::{self, IngestOptions};
use crate::store::GraphStore;

use super::store::TaskStore;
use super::{Task, TaskStatus};

/// Queue tuning knobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Worker thread count; the process-wide concurrency bound
    pub workers: usize,
    /// Sleep between empty polls
    pub poll_interval: Duration,
    /// Age after which a processing task's lock may be reclaimed
    pub lock_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval: Duration::from_millis(200),
            lock_timeout: Duration::from_secs(300),
        }
    }
}

/// Handle passed to a running task for progress and cancellation.
pub struct RunnerContext {
    store: Arc<dyn TaskStore>,
    task_id: String,
    worker_id: String,
    cancel: AtomicBool,
}

impl RunnerContext {
    /// Cooperative cancellation checkpoint.
    ///
    /// Records progress, refreshes the worker's lock, and returns `true`
    /// when the task should stop. A lost lock also reads as "stop": the
    /// task has been reclaimed and this worker's writes no longer matter.
    pub fn checkpoint(&self, fraction: f64, message: Option<&str>) -> bool {
        match self
            .store
            .update_progress(&self.task_id, &self.worker_id, fraction, message)
        {
            Ok(cancel_requested) => {
                if cancel_requested {
                    self.cancel.store(true, Ordering::SeqCst);
                }
                cancel_requested
            }
            Err(err) => {
                tracing::warn!(task = %self.task_id, error = %err, "lost task lock");
                self.cancel.store(true, Ordering::SeqCst);
                true
            }
        }
    }

    /// Flag observed by pipelines that take an [`AtomicBool`] directly.
    pub fn cancel_flag(&self) -> &AtomicBool {
        &self.cancel
    }
}

/// One kind of executable work.
pub trait TaskRunner: Send + Sync {
    /// Task kind this runner handles, matched against [`Task::kind`].
    fn kind(&self) -> &str;

    /// Execute the task to completion or a cancellation checkpoint.
    ///
    /// Returns the JSON result recorded on success. `Cancelled` errors map
    /// to the Cancelled terminal state, everything else to Failed.
    fn run(&self, task: &Task, ctx: &RunnerContext) -> Result<serde_json::Value>;
}

/// Durable task queue with a fixed worker pool.
pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
    config: QueueConfig,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskQueue {
    /// Start the queue: spawns the worker pool immediately.
    ///
    /// The store is passed in explicitly; the queue holds no global state.
    pub fn start(
        store: Arc<dyn TaskStore>,
        runners: Vec<Arc<dyn TaskRunner>>,
        config: QueueConfig,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let runner_map: Arc<HashMap<String, Arc<dyn TaskRunner>>> = Arc::new(
            runners
                .into_iter()
                .map(|r| (r.kind().to_string(), r))
                .collect(),
        );

        let workers = (0..config.workers.max(1))
            .map(|n| {
                let store = Arc::clone(&store);
                let runners = Arc::clone(&runner_map);
                let shutdown = Arc::clone(&shutdown);
                let config = config.clone();
                let worker_id = format!("worker-{}", n);
                thread::spawn(move || worker_loop(store, runners, shutdown, config, worker_id))
            })
            .collect();

        Self {
            store,
            config,
            shutdown,
            workers,
        }
    }

    /// Submit a task. It is durably stored before the id is returned.
    pub fn submit(
        &self,
        kind: &str,
        parameters: serde_json::Value,
        priority: i64,
    ) -> Result<String> {
        let task = Task::new(kind, parameters, priority);
        self.store.put(&task)?;
        tracing::debug!(task = %task.id, kind, priority, "task submitted");
        Ok(task.id)
    }

    /// Current task state.
    pub fn status(&self, task_id: &str) -> Result<Task> {
        self.store
            .get(task_id)?
            .ok_or_else(|| EngineError::NotFound(format!("task {}", task_id)))
    }

    /// Request cancellation. Returns whether the request took effect.
    pub fn cancel(&self, task_id: &str) -> Result<bool> {
        if self.store.get(task_id)?.is_none() {
            return Err(EngineError::NotFound(format!("task {}", task_id)));
        }
        Ok(self.store.request_cancel(task_id)?)
    }

    /// Pending tasks in claim order.
    pub fn list_pending(&self, limit: usize) -> Result<Vec<Task>> {
        Ok(self.store.list_pending(limit)?)
    }

    /// Signal shutdown and join all workers. In-flight tasks finish their
    /// current checkpoint interval; nothing new is claimed.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("worker thread panicked during shutdown");
            }
        }
    }

    /// Lock timeout currently in force, for status surfaces.
    pub fn lock_timeout(&self) -> Duration {
        self.config.lock_timeout
    }
}

fn worker_loop(
    store: Arc<dyn TaskStore>,
    runners: Arc<HashMap<String, Arc<dyn TaskRunner>>>,
    shutdown: Arc<AtomicBool>,
    config: QueueConfig,
    worker_id: String,
) {
    let lock_timeout_secs = config.lock_timeout.as_secs() as i64;

    while !shutdown.load(Ordering::SeqCst) {
        let claimed = match store.claim(&worker_id, lock_timeout_secs) {
            Ok(task) => task,
            Err(err) => {
                tracing::warn!(worker = %worker_id, error = %err, "claim failed");
                thread::sleep(config.poll_interval);
                continue;
            }
        };

        let Some(task) = claimed else {
            thread::sleep(config.poll_interval);
            continue;
        };

        tracing::info!(worker = %worker_id, task = %task.id, kind = %task.kind, "task claimed");

        // A cancel requested while the task sat processing-reclaimed still
        // has to be honored before any work happens
        if task.cancel_requested {
            record_finish(&store, &task.id, TaskStatus::Cancelled, None, None);
            continue;
        }

        let ctx = RunnerContext {
            store: Arc::clone(&store),
            task_id: task.id.clone(),
            worker_id: worker_id.clone(),
            cancel: AtomicBool::new(false),
        };

        match runners.get(&task.kind) {
            None => {
                record_finish(
                    &store,
                    &task.id,
                    TaskStatus::Failed,
                    None,
                    Some(&format!("no runner for task kind '{}'", task.kind)),
                );
            }
            Some(runner) => match runner.run(&task, &ctx) {
                Ok(result) => {
                    record_finish(&store, &task.id, TaskStatus::Success, Some(&result), None);
                }
                Err(EngineError::Cancelled(message)) => {
                    record_finish(&store, &task.id, TaskStatus::Cancelled, None, Some(&message));
                }
                Err(err) => {
                    let message = format!("{}: {}", err.kind(), err);
                    record_finish(&store, &task.id, TaskStatus::Failed, None, Some(&message));
                }
            },
        }
    }
}

/// Terminal write; a `false` return means another worker finished first,
/// which is expected after a lock reclaim.
fn record_finish(
    store: &Arc<dyn TaskStore>,
    task_id: &str,
    status: TaskStatus,
    result: Option<&serde_json::Value>,
    error: Option<&str>,
) {
    match store.finish(task_id, status, result, error) {
        Ok(true) => {
            tracing::info!(task = %task_id, status = status.as_str(), "task finished");
        }
        Ok(false) => {
            tracing::debug!(task = %task_id, "terminal state already written, dropping result");
        }
        Err(err) => {
            tracing::warn!(task = %task_id, error = %err, "failed to record terminal state");
        }
    }
}

/// Runner executing ingestion requests from the queue.
///
/// Opens its own graph store connection per task; SQLite connections are
/// not shared across worker threads.
pub struct IngestRunner {
    db_path: PathBuf,
}

impl IngestRunner {
    pub const KIND: &'static str = "ingest";

    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }
}

impl TaskRunner for IngestRunner {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn run(&self, task: &Task, ctx: &RunnerContext) -> Result<serde_json::Value> {
        let opts: IngestOptions = serde_json::from_value(task.parameters.clone())
            .map_err(|e| EngineError::Validation(format!("bad ingestion parameters: {}", e)))?;
        let store = GraphStore::open(&self.db_path)?;

        let progress = |done: usize, total: usize| {
            let fraction = if total == 0 {
                1.0
            } else {
                done as f64 / total as f64
            };
            let message = format!("{}/{} files", done, total);
            ctx.checkpoint(fraction, Some(&message));
        };

        let report = ingest::run(&store, &opts, Some(&progress), Some(ctx.cancel_flag()))?;

        if report.cancelled {
            return Err(EngineError::Cancelled(format!(
                "stopped after {} files",
                report.files_processed
            )));
        }
        if let Some(message) = &report.store_error {
            return Err(EngineError::Store(crate::error::StoreError::Query(
                message.clone(),
            )));
        }
        let result = serde_json::to_value(&report).map_err(crate::error::StoreError::from)?;
        Ok(result)
    }
}
