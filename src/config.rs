//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root of the queue directory tree (pending/processing/failed live under it).
    pub queue_root: PathBuf,
    /// Browser profile directory holding the authenticated session.
    pub profile_path: PathBuf,
    /// Run the browser headless.
    pub headless: bool,
    /// How long to sleep when the pending bucket is empty.
    pub poll_interval: Duration,
    /// Delay between messages within a conversation group.
    pub task_delay: Duration,
    /// Backoff after an iteration-level error.
    pub error_backoff: Duration,
    /// Successful deliveries before the session is recycled.
    pub max_operations: u32,
    /// How long to wait for the surface's ready signal after launch.
    pub ready_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_root: PathBuf::from("queue/whatsapp"),
            profile_path: default_profile_path(),
            headless: true,
            poll_interval: Duration::from_secs(5),
            task_delay: Duration::from_secs(2),
            error_backoff: Duration::from_secs(10),
            max_operations: 100,
            ready_timeout: Duration::from_secs(60),
        }
    }
}

impl WorkerConfig {
    /// Build a config from `COURIER_*` environment variables, falling back
    /// to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let queue_root = std::env::var("COURIER_QUEUE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.queue_root);

        let profile_path = std::env::var("COURIER_PROFILE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.profile_path);

        let headless = std::env::var("COURIER_HEADLESS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.headless);

        let poll_interval = env_secs("COURIER_POLL_INTERVAL_SECS", defaults.poll_interval);
        let task_delay = env_secs("COURIER_TASK_DELAY_SECS", defaults.task_delay);
        let error_backoff = env_secs("COURIER_ERROR_BACKOFF_SECS", defaults.error_backoff);
        let ready_timeout = env_secs("COURIER_READY_TIMEOUT_SECS", defaults.ready_timeout);

        let max_operations = std::env::var("COURIER_MAX_OPERATIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_operations);

        Self {
            queue_root,
            profile_path,
            headless,
            poll_interval,
            task_delay,
            error_backoff,
            max_operations,
            ready_timeout,
        }
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn default_profile_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".wa-courier/chrome_profile")
}
