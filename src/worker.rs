//! The dispatch loop — scan, group, order, deliver.
//!
//! One iteration turns a snapshot of the pending bucket into actuator
//! calls with minimal session churn: tasks are grouped by destination so
//! each conversation is opened once, and the largest backlog goes first to
//! amortize the expensive open over the most deliveries. Failure blast
//! radius is bounded per level: a task failure stays in its task, an
//! unopenable conversation skips its group, a dead session aborts the
//! iteration, and nothing short of a signal stops the loop.

use std::path::Path;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{DispatchError, Error};
use crate::lifecycle::StopFlag;
use crate::queue::{QueuedTask, TaskQueue};
use crate::session::SessionManager;
use crate::task::{ContentType, Task};

/// Where the control loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Nothing pending; sleeping between polls.
    Idle,
    /// Working through a scan's groups.
    Dispatching,
    /// Stop requested; finishing the task in flight, starting nothing new.
    Draining,
    /// Terminal.
    Stopped,
}

/// Tasks for one destination, in scan order.
#[derive(Debug)]
pub struct TargetGroup {
    pub target: String,
    pub tasks: Vec<QueuedTask>,
}

/// Group tasks by destination (stable insertion order within a group),
/// then order groups by descending size. Stable sort: equal-sized groups
/// keep first-seen order.
pub fn group_by_target(tasks: Vec<QueuedTask>) -> Vec<TargetGroup> {
    let mut groups: Vec<TargetGroup> = Vec::new();
    for queued in tasks {
        match groups.iter_mut().find(|g| g.target == queued.task.target) {
            Some(group) => group.tasks.push(queued),
            None => groups.push(TargetGroup {
                target: queued.task.target.clone(),
                tasks: vec![queued],
            }),
        }
    }
    groups.sort_by(|a, b| b.tasks.len().cmp(&a.tasks.len()));
    groups
}

/// Outcome counts for one loop iteration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IterationStats {
    /// Tasks found by the scan.
    pub scanned: usize,
    /// Delivered and deleted.
    pub delivered: usize,
    /// Moved to the failed bucket.
    pub failed: usize,
    /// Left in pending: claim races and skipped groups.
    pub skipped: usize,
}

/// The queue worker: one control loop, one session, no internal
/// parallelism — the actuator cannot serve concurrent operations.
pub struct Worker {
    queue: TaskQueue,
    session: SessionManager,
    config: WorkerConfig,
    stop: StopFlag,
    state: LoopState,
}

impl Worker {
    pub fn new(
        queue: TaskQueue,
        session: SessionManager,
        config: WorkerConfig,
        stop: StopFlag,
    ) -> Self {
        Self {
            queue,
            session,
            config,
            stop,
            state: LoopState::Idle,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run until the stop flag trips. Iteration errors are logged and
    /// absorbed with an extended backoff; session cleanup is guaranteed on
    /// every exit path.
    pub async fn run(&mut self) {
        info!("Worker started");

        while !self.stop.is_stopped() {
            match self.run_once().await {
                Ok(stats) => {
                    if stats.scanned == 0 {
                        self.state = LoopState::Idle;
                        sleep(self.config.poll_interval).await;
                    } else {
                        debug!(
                            delivered = stats.delivered,
                            failed = stats.failed,
                            skipped = stats.skipped,
                            "Iteration finished"
                        );
                    }
                }
                Err(e) => {
                    error!(error = %e, "Dispatch iteration failed");
                    sleep(self.config.error_backoff).await;
                }
            }
        }

        self.state = LoopState::Stopped;
        info!("Worker stopped; releasing session");
        self.session.shutdown().await;
    }

    /// One scan-group-dispatch iteration. Returns early (without error) at
    /// any boundary once the stop flag trips.
    pub async fn run_once(&mut self) -> Result<IterationStats, Error> {
        let mut stats = IterationStats::default();

        let tasks = self.queue.scan_pending().await?;
        stats.scanned = tasks.len();
        if tasks.is_empty() {
            return Ok(stats);
        }

        self.state = LoopState::Dispatching;
        let groups = group_by_target(tasks);
        debug!(
            tasks = stats.scanned,
            groups = groups.len(),
            "Dispatching scan snapshot"
        );

        for group in groups {
            if self.stop.is_stopped() {
                self.state = LoopState::Draining;
                break;
            }

            // A dead session invalidates every remaining group.
            self.session.ensure_session().await?;

            info!(
                target = %group.target,
                tasks = group.tasks.len(),
                "Processing conversation group"
            );
            if !self.session.open_conversation(&group.target).await {
                // Every task in the group would fail the same way; leave
                // them pending instead of polluting the failed bucket.
                warn!(target = %group.target, "Could not open conversation; leaving group pending");
                stats.skipped += group.tasks.len();
                continue;
            }

            for queued in &group.tasks {
                if self.stop.is_stopped() {
                    self.state = LoopState::Draining;
                    break;
                }
                self.dispatch_task(queued, &mut stats).await;
                sleep(self.config.task_delay).await;
            }

            // Deferred recycle point: between groups, never mid-batch.
            if self.session.needs_recycle() && !self.stop.is_stopped() {
                self.session.ensure_session().await?;
            }
        }

        Ok(stats)
    }

    /// Claim and deliver one task. Never lets an error escape — every
    /// outcome lands in the store or a log line.
    async fn dispatch_task(&mut self, queued: &QueuedTask, stats: &mut IterationStats) {
        match self.queue.claim(queued).await {
            Ok(true) => {}
            Ok(false) => {
                stats.skipped += 1;
                return;
            }
            Err(e) => {
                warn!(id = %queued.task.id, error = %e, "Could not claim task; skipping");
                stats.skipped += 1;
                return;
            }
        }

        match self.deliver(&queued.task).await {
            Ok(()) => {
                if let Err(e) = self.queue.complete(queued).await {
                    warn!(id = %queued.task.id, error = %e, "Could not remove completed task file");
                }
                self.session.record_operation();
                stats.delivered += 1;
                info!(id = %queued.task.id, target = %queued.task.target, "Task delivered");
            }
            Err(reason) => {
                if let Err(e) = self.queue.fail(queued, &reason.to_string()).await {
                    error!(id = %queued.task.id, error = %e, "Could not record task failure");
                }
                stats.failed += 1;
                warn!(id = %queued.task.id, error = %reason, "Task failed");
            }
        }
    }

    async fn deliver(&mut self, task: &Task) -> Result<(), DispatchError> {
        match task.content_type {
            ContentType::Text => {
                let message = task
                    .message
                    .as_deref()
                    .ok_or_else(|| DispatchError::MissingBody {
                        id: task.id.clone(),
                    })?;
                if self.session.send_text(message).await {
                    Ok(())
                } else {
                    Err(DispatchError::SendFailed {
                        target: task.target.clone(),
                        content_type: ContentType::Text,
                    })
                }
            }
            ContentType::Image => {
                let path = task
                    .file_path
                    .as_deref()
                    .ok_or_else(|| DispatchError::MissingPayload {
                        id: task.id.clone(),
                    })?;
                if self
                    .session
                    .send_media(Path::new(path), task.message.as_deref())
                    .await
                {
                    Ok(())
                } else {
                    Err(DispatchError::SendFailed {
                        target: task.target.clone(),
                        content_type: ContentType::Image,
                    })
                }
            }
        }
    }
}
