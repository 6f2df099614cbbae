//! Cooperative shutdown — stop flag and signal wiring.
//!
//! Termination is never forced mid-operation: signals trip a shared flag
//! that the worker polls at its loop boundaries (iteration start, between
//! groups, between tasks).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Shared "keep running" flag. Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a cooperative stop. Idempotent.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Spawn a background task that trips `flag` on the first SIGINT or
/// SIGTERM. Returns the handle so the caller can abort it once the worker
/// has drained.
pub fn spawn_signal_listener(flag: StopFlag) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received; draining...");
        flag.trigger();
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Could not install SIGTERM handler; listening for Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
