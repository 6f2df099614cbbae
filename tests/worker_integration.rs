//! Integration tests for the queue worker.
//!
//! Each test runs the real worker loop against a tempdir-backed queue and
//! a scripted actuator that records every capability call, then asserts on
//! bucket contents and call ordering.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::time::timeout;

use wa_courier::actuator::{Actuator, ProcessReaper};
use wa_courier::config::WorkerConfig;
use wa_courier::error::SessionError;
use wa_courier::lifecycle::StopFlag;
use wa_courier::queue::TaskQueue;
use wa_courier::session::SessionManager;
use wa_courier::task::Task;
use wa_courier::worker::{LoopState, Worker};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Ordered log of every actuator/reaper call.
type CallLog = Arc<Mutex<Vec<String>>>;

/// Scripted actuator: records calls, fails where told to.
struct ScriptedActuator {
    live: bool,
    /// Targets whose conversation refuses to open.
    unopenable: HashSet<String>,
    /// Message bodies whose send fails.
    undeliverable: HashSet<String>,
    log: CallLog,
}

impl ScriptedActuator {
    fn new(log: CallLog) -> Self {
        Self {
            live: false,
            unopenable: HashSet::new(),
            undeliverable: HashSet::new(),
            log,
        }
    }

    fn record(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }
}

#[async_trait]
impl Actuator for ScriptedActuator {
    async fn acquire(&mut self) -> Result<(), SessionError> {
        self.record("acquire");
        self.live = true;
        Ok(())
    }

    async fn release(&mut self) {
        self.record("release");
        self.live = false;
    }

    fn is_live(&self) -> bool {
        self.live
    }

    async fn open_conversation(&mut self, name: &str) -> bool {
        self.record(format!("open:{name}"));
        !self.unopenable.contains(name)
    }

    async fn send_text(&mut self, message: &str) -> bool {
        self.record(format!("text:{message}"));
        !self.undeliverable.contains(message)
    }

    async fn send_media(&mut self, path: &Path, caption: Option<&str>) -> bool {
        self.record(format!(
            "media:{}:{}",
            path.display(),
            caption.unwrap_or("-")
        ));
        true
    }
}

struct NoopReaper;

impl ProcessReaper for NoopReaper {
    fn terminate_stale(&self, _profile_path: &Path) {}
}

/// Fast test config (no inter-task delay, tiny poll interval).
fn test_config(queue_root: PathBuf) -> WorkerConfig {
    WorkerConfig {
        queue_root,
        profile_path: PathBuf::from("/tmp/unused-profile"),
        poll_interval: Duration::from_millis(10),
        task_delay: Duration::ZERO,
        error_backoff: Duration::from_millis(10),
        ..WorkerConfig::default()
    }
}

struct Harness {
    worker: Worker,
    queue_root: PathBuf,
    log: CallLog,
    stop: StopFlag,
    _dir: TempDir,
}

async fn harness_with(
    max_operations: u32,
    configure: impl FnOnce(&mut ScriptedActuator),
) -> Harness {
    let dir = TempDir::new().unwrap();
    let queue_root = dir.path().join("queue");
    let queue = TaskQueue::new(&queue_root);
    queue.ensure_dirs().await.unwrap();

    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let mut actuator = ScriptedActuator::new(Arc::clone(&log));
    configure(&mut actuator);

    let config = test_config(queue_root.clone());
    let session = SessionManager::new(
        Box::new(actuator),
        Arc::new(NoopReaper),
        config.profile_path.clone(),
        max_operations,
    );

    let stop = StopFlag::new();
    let worker = Worker::new(queue, session, config, stop.clone());
    Harness {
        worker,
        queue_root,
        log,
        stop,
        _dir: dir,
    }
}

async fn harness() -> Harness {
    harness_with(100, |_| {}).await
}

impl Harness {
    fn queue(&self) -> TaskQueue {
        TaskQueue::new(&self.queue_root)
    }

    fn bucket_files(&self, bucket: &str) -> Vec<String> {
        let dir = self.queue_root.join(bucket);
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

// ── Scenarios ────────────────────────────────────────────────────────

#[tokio::test]
async fn successful_delivery_deletes_the_task() {
    timeout(TEST_TIMEOUT, async {
        let mut h = harness().await;
        let task = Task::text("Alice", "hi");
        h.queue().enqueue(&task).await.unwrap();

        let stats = h.worker.run_once().await.unwrap();
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 0);

        assert!(h.bucket_files("pending").is_empty());
        assert!(h.bucket_files("processing").is_empty());
        assert!(h.bucket_files("failed").is_empty());

        let calls = h.calls();
        assert_eq!(calls, vec!["acquire", "open:Alice", "text:hi"]);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn send_failure_lands_in_failed_bucket() {
    timeout(TEST_TIMEOUT, async {
        let mut h = harness_with(100, |a| {
            a.undeliverable.insert("hi".into());
        })
        .await;
        let task = Task::text("Alice", "hi");
        h.queue().enqueue(&task).await.unwrap();

        let stats = h.worker.run_once().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 0);

        assert!(h.bucket_files("pending").is_empty());
        assert!(h.bucket_files("processing").is_empty());
        let failed = h.bucket_files("failed");
        assert_eq!(failed, vec![format!("{}.json", task.id)]);

        let body =
            std::fs::read_to_string(h.queue_root.join("failed").join(&failed[0])).unwrap();
        let record: Task = serde_json::from_str(&body).unwrap();
        assert_eq!(record.attempts, 1);
        assert!(record.last_error.is_some());
        assert!(record.failed_time.is_some());
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn unopenable_conversation_leaves_group_pending() {
    timeout(TEST_TIMEOUT, async {
        let mut h = harness_with(100, |a| {
            a.unopenable.insert("Bob".into());
        })
        .await;
        let queue = h.queue();
        let t1 = Task::text("Bob", "one");
        let t2 = Task::text("Bob", "two");
        queue.enqueue(&t1).await.unwrap();
        queue.enqueue(&t2).await.unwrap();

        let stats = h.worker.run_once().await.unwrap();
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.failed, 0);

        // Never claimed: both stay in pending, untouched.
        assert_eq!(h.bucket_files("pending").len(), 2);
        assert!(h.bucket_files("processing").is_empty());
        assert!(h.bucket_files("failed").is_empty());

        let calls = h.calls();
        assert_eq!(calls, vec!["acquire", "open:Bob"]);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn one_failure_does_not_abort_the_group() {
    timeout(TEST_TIMEOUT, async {
        let mut h = harness_with(100, |a| {
            a.undeliverable.insert("bad".into());
        })
        .await;
        let queue = h.queue();
        // File-name ordering pins the dispatch order inside the group.
        let mut first = Task::text("Alice", "bad");
        first.id = "a-first".into();
        let mut second = Task::text("Alice", "good");
        second.id = "b-second".into();
        queue.enqueue(&first).await.unwrap();
        queue.enqueue(&second).await.unwrap();

        let stats = h.worker.run_once().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 1);

        assert_eq!(h.bucket_files("failed"), vec!["a-first.json".to_string()]);
        assert!(h.bucket_files("pending").is_empty());
        assert!(h.bucket_files("processing").is_empty());
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn largest_group_dispatches_first() {
    timeout(TEST_TIMEOUT, async {
        let mut h = harness().await;
        let queue = h.queue();
        queue.enqueue(&Task::text("Solo", "s1")).await.unwrap();
        queue.enqueue(&Task::text("Busy", "b1")).await.unwrap();
        queue.enqueue(&Task::text("Busy", "b2")).await.unwrap();

        h.worker.run_once().await.unwrap();

        let calls = h.calls();
        let busy = calls.iter().position(|c| c == "open:Busy").unwrap();
        let solo = calls.iter().position(|c| c == "open:Solo").unwrap();
        assert!(busy < solo, "larger backlog must be served first");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn media_task_sends_file_with_caption() {
    timeout(TEST_TIMEOUT, async {
        let mut h = harness().await;
        let task = Task::image("Alice", "/tmp/photo.jpg", Some("look".into()));
        h.queue().enqueue(&task).await.unwrap();

        let stats = h.worker.run_once().await.unwrap();
        assert_eq!(stats.delivered, 1);
        assert!(h
            .calls()
            .contains(&"media:/tmp/photo.jpg:look".to_string()));
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn session_recycles_between_groups_after_threshold() {
    timeout(TEST_TIMEOUT, async {
        // Threshold 1: the two Alice deliveries exceed it, so the session
        // must recycle before Bob's conversation is opened.
        let mut h = harness_with(1, |_| {}).await;
        let queue = h.queue();
        queue.enqueue(&Task::text("Alice", "a1")).await.unwrap();
        queue.enqueue(&Task::text("Alice", "a2")).await.unwrap();
        queue.enqueue(&Task::text("Bob", "b1")).await.unwrap();

        let stats = h.worker.run_once().await.unwrap();
        assert_eq!(stats.delivered, 3);

        let calls = h.calls();
        let acquires: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| *c == "acquire")
            .map(|(i, _)| i)
            .collect();
        assert_eq!(acquires.len(), 2, "expected one recycle: {calls:?}");

        let open_bob = calls.iter().position(|c| c == "open:Bob").unwrap();
        assert!(
            acquires[1] < open_bob,
            "recycle must happen before the next group opens: {calls:?}"
        );
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn stop_flag_drains_and_releases_session() {
    timeout(TEST_TIMEOUT, async {
        let mut h = harness().await;
        h.queue().enqueue(&Task::text("Alice", "hi")).await.unwrap();

        h.stop.trigger();
        h.worker.run().await;

        assert_eq!(h.worker.state(), LoopState::Stopped);
        // Task untouched — the stop landed before the iteration started.
        assert_eq!(h.bucket_files("pending").len(), 1);
        // Shutdown released whatever was held.
        assert!(h.calls().contains(&"release".to_string()));
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn worker_loop_delivers_then_is_stopped() {
    timeout(TEST_TIMEOUT, async {
        let mut h = harness().await;
        h.queue().enqueue(&Task::text("Alice", "hi")).await.unwrap();

        let stop = h.stop.clone();
        let log = Arc::clone(&h.log);
        let waiter = tokio::spawn(async move {
            // Stop once the delivery shows up in the call log.
            loop {
                if log.lock().unwrap().iter().any(|c| c == "text:hi") {
                    stop.trigger();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        h.worker.run().await;
        waiter.await.unwrap();

        assert_eq!(h.worker.state(), LoopState::Stopped);
        assert!(h.bucket_files("pending").is_empty());
        assert!(h.bucket_files("failed").is_empty());
    })
    .await
    .unwrap();
}
