use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Task, TaskPatch, TaskStatus};
use crate::error::StoreError;
use crate::provider::GenerationRequest;
use crate::snapshot::SnapshotFile;

/// Default number of tasks kept after a terminal transition.
pub const DEFAULT_RETENTION: usize = 50;

/// Error text given to tasks that were still in flight when the process stopped.
pub const RESTART_REASON: &str = "server restarted before the task finished";

/// Durable collection of [`Task`] records.
///
/// The in-memory list is authoritative; every mutation rewrites the snapshot
/// while still holding the lock, so writes to the file are serialized and a
/// mutation plus its retention pass is atomic with respect to other callers.
/// Snapshot failures are logged and do not roll back the in-memory change.
#[derive(Clone)]
pub struct TaskStore {
    tasks: Arc<Mutex<Vec<Task>>>,
    file: Arc<SnapshotFile>,
    retention: usize,
}

impl TaskStore {
    /// Load the snapshot at `path`, failing every task a previous process
    /// left unfinished.
    ///
    /// A snapshot that cannot be parsed is logged and replaced by an empty
    /// store; an unreadable file is an error.
    pub async fn open(path: impl Into<PathBuf>, retention: usize) -> Result<Self, StoreError> {
        let file = SnapshotFile::new(path);
        let mut tasks: Vec<Task> = match file.load().await {
            Ok(tasks) => tasks,
            Err(err @ StoreError::Json { .. }) => {
                warn!(error = %err, "ignoring unreadable task snapshot");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        let now = Utc::now();
        let mut recovered = 0usize;
        for task in tasks.iter_mut().filter(|t| !t.status.is_terminal()) {
            task.apply(TaskPatch::failed(RESTART_REASON), now);
            recovered += 1;
        }

        let store = Self {
            tasks: Arc::new(Mutex::new(Vec::new())),
            file: Arc::new(file),
            retention: retention.max(1),
        };
        info!(
            path = %store.file.path().display(),
            loaded = tasks.len(),
            recovered,
            "task store opened"
        );
        {
            let mut guard = store.tasks.lock().await;
            *guard = tasks;
            if recovered > 0 {
                store.retain_newest(&mut guard);
                store.persist(&guard).await;
            }
        }
        Ok(store)
    }

    /// Record a new `pending` task and return it.
    pub async fn create(
        &self,
        id: impl Into<String>,
        owner: impl Into<String>,
        request: GenerationRequest,
    ) -> Task {
        let task = Task::new(id, owner, request);
        let mut tasks = self.tasks.lock().await;
        tasks.push(task.clone());
        self.persist(&tasks).await;
        debug!(task_id = %task.id, "task created");
        task
    }

    /// Merge `patch` into task `id`. Returns the task as stored afterwards, or
    /// `None` if no such task exists. Terminal tasks come back unchanged.
    pub async fn update(&self, id: &str, patch: TaskPatch) -> Option<Task> {
        let mut tasks = self.tasks.lock().await;
        let index = tasks.iter().position(|t| t.id == id)?;
        if tasks[index].status.is_terminal() {
            return Some(tasks[index].clone());
        }

        let finished = tasks[index].apply(patch, Utc::now());
        let updated = tasks[index].clone();
        if finished {
            self.retain_newest(&mut tasks);
        }
        self.persist(&tasks).await;
        Some(updated)
    }

    pub async fn get(&self, id: &str) -> Option<Task> {
        self.tasks.lock().await.iter().find(|t| t.id == id).cloned()
    }

    /// All tasks, newest first.
    pub async fn list(&self) -> Vec<Task> {
        let mut tasks = self.tasks.lock().await.clone();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    pub async fn delete(&self, id: &str) -> bool {
        let mut tasks = self.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        if tasks.len() == before {
            return false;
        }
        self.persist(&tasks).await;
        true
    }

    /// Move a `pending`, `running` or `running_fallback` task to `cancelled`.
    /// Returns `false` for unknown or already finished tasks.
    pub async fn cancel(&self, id: &str) -> bool {
        let mut tasks = self.tasks.lock().await;
        let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
            return false;
        };
        if task.status.is_terminal() {
            return false;
        }
        task.apply(TaskPatch::status(TaskStatus::Cancelled), Utc::now());
        self.retain_newest(&mut tasks);
        self.persist(&tasks).await;
        info!(task_id = id, "task cancelled");
        true
    }

    /// Whether the pipeline working on `id` should stop. A task that no
    /// longer exists counts as cancelled.
    pub async fn is_cancelled(&self, id: &str) -> bool {
        self.tasks
            .lock()
            .await
            .iter()
            .find(|t| t.id == id)
            .is_none_or(|t| t.status == TaskStatus::Cancelled)
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    /// Drop the oldest tasks until at most `retention` remain.
    fn retain_newest(&self, tasks: &mut Vec<Task>) {
        if tasks.len() <= self.retention {
            return;
        }
        tasks.sort_by_key(|t| t.created_at);
        let excess = tasks.len() - self.retention;
        tasks.drain(..excess);
        debug!(dropped = excess, kept = tasks.len(), "task retention applied");
    }

    async fn persist(&self, tasks: &[Task]) {
        if let Err(err) = self.file.save(tasks).await {
            warn!(error = %err, "failed to persist task snapshot");
        }
    }
}
