//! Directory-backed task store.
//!
//! Three bucket directories under one root encode the task lifecycle:
//! `pending/` (awaiting dispatch), `processing/` (claimed, in flight) and
//! `failed/` (terminal failure). A task's state IS its location — nothing
//! is stored in-band. Transitions between buckets use atomic renames so a
//! task file is never duplicated and never absent while in flight.

use std::path::PathBuf;

use tokio::fs;
use tracing::{debug, warn};

use crate::error::QueueError;
use crate::task::Task;

/// A task together with the queue file it was scanned from.
///
/// The file name (always `<id>.json` for tasks the crate enqueues, but any
/// producer-chosen `*.json` name is honored) keys all later transitions.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task: Task,
    pub file_name: String,
}

/// The three-bucket task store.
pub struct TaskQueue {
    pending_dir: PathBuf,
    processing_dir: PathBuf,
    failed_dir: PathBuf,
}

impl TaskQueue {
    /// Create a store rooted at `root`. Does not touch the filesystem;
    /// call [`ensure_dirs`](Self::ensure_dirs) before use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            pending_dir: root.join("pending"),
            processing_dir: root.join("processing"),
            failed_dir: root.join("failed"),
        }
    }

    /// Create the bucket directories if missing.
    pub async fn ensure_dirs(&self) -> Result<(), QueueError> {
        fs::create_dir_all(&self.pending_dir).await?;
        fs::create_dir_all(&self.processing_dir).await?;
        fs::create_dir_all(&self.failed_dir).await?;
        Ok(())
    }

    /// Producer-side helper: persist a task into the pending bucket as
    /// `<id>.json`.
    pub async fn enqueue(&self, task: &Task) -> Result<(), QueueError> {
        let body = serde_json::to_string_pretty(task).map_err(|source| QueueError::Serialize {
            id: task.id.clone(),
            source,
        })?;
        let file_name = format!("{}.json", task.id);
        fs::write(self.pending_dir.join(&file_name), body).await?;
        Ok(())
    }

    /// Enumerate the pending bucket.
    ///
    /// Unreadable or unparsable entries are skipped with a warning — a
    /// poisoned file must never block the rest of the queue. The result is
    /// a best-effort snapshot, sorted by file name so within-target order
    /// is deterministic; producers writing concurrently are picked up on a
    /// later poll.
    pub async fn scan_pending(&self) -> Result<Vec<QueuedTask>, QueueError> {
        let mut file_names: Vec<String> = Vec::new();
        let mut read_dir = fs::read_dir(&self.pending_dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                file_names.push(name.to_string());
            }
        }
        file_names.sort();

        let mut tasks = Vec::new();
        for file_name in file_names {
            let path = self.pending_dir.join(&file_name);
            let body = match fs::read_to_string(&path).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(file = %file_name, error = %e, "Skipping unreadable task file");
                    continue;
                }
            };
            match serde_json::from_str::<Task>(&body) {
                Ok(task) => tasks.push(QueuedTask { task, file_name }),
                Err(e) => {
                    warn!(file = %file_name, error = %e, "Skipping malformed task file");
                }
            }
        }
        Ok(tasks)
    }

    /// Atomically move a task from pending to processing.
    ///
    /// Returns `Ok(false)` when the pending file no longer exists — a
    /// benign race with an external producer or operator, not an error.
    pub async fn claim(&self, queued: &QueuedTask) -> Result<bool, QueueError> {
        let src = self.pending_dir.join(&queued.file_name);
        let dst = self.processing_dir.join(&queued.file_name);
        match fs::rename(&src, &dst).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(file = %queued.file_name, "Task vanished before claim; skipping");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a claimed task's file — the success path. Idempotent: a
    /// file already gone is not an error.
    pub async fn complete(&self, queued: &QueuedTask) -> Result<(), QueueError> {
        let path = self.processing_dir.join(&queued.file_name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Record a terminal failure: write the task with updated failure
    /// metadata into the failed bucket, then remove the processing copy.
    ///
    /// The write happens first — if it fails, the processing copy is
    /// preserved and the error propagates, so the task is never silently
    /// dropped.
    pub async fn fail(&self, queued: &QueuedTask, error: &str) -> Result<(), QueueError> {
        let mut task = queued.task.clone();
        task.record_failure(error);

        let body = serde_json::to_string_pretty(&task).map_err(|source| QueueError::Serialize {
            id: task.id.clone(),
            source,
        })?;
        fs::write(self.failed_dir.join(&queued.file_name), body).await?;

        let processing = self.processing_dir.join(&queued.file_name);
        if let Err(e) = fs::remove_file(&processing).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(file = %queued.file_name, error = %e, "Could not remove processing copy after failure record");
            }
        }
        Ok(())
    }

    pub fn pending_dir(&self) -> &PathBuf {
        &self.pending_dir
    }

    pub fn processing_dir(&self) -> &PathBuf {
        &self.processing_dir
    }

    pub fn failed_dir(&self) -> &PathBuf {
        &self.failed_dir
    }
}
