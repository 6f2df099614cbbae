//! Session ownership — acquisition, health accounting, recycling, shutdown.
//!
//! Exactly one actuator session exists at a time and this manager owns it.
//! The dispatcher never holds a session reference; it issues capability
//! calls through the manager.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::actuator::{Actuator, ProcessReaper};
use crate::error::SessionError;

pub struct SessionManager {
    actuator: Box<dyn Actuator>,
    reaper: Arc<dyn ProcessReaper>,
    profile_path: PathBuf,
    max_operations: u32,
    operation_count: u32,
    recycle_pending: bool,
}

impl SessionManager {
    pub fn new(
        actuator: Box<dyn Actuator>,
        reaper: Arc<dyn ProcessReaper>,
        profile_path: PathBuf,
        max_operations: u32,
    ) -> Self {
        Self {
            actuator,
            reaper,
            profile_path,
            max_operations,
            operation_count: 0,
            recycle_pending: false,
        }
    }

    /// Make sure a healthy session is live.
    ///
    /// A no-op when one already is and no recycle is pending. Otherwise a
    /// full teardown-then-acquire cycle: release whatever is held, reap
    /// leaked browser processes bound to the profile, then acquire fresh.
    /// On acquisition failure the same teardown runs again before the
    /// error propagates — a half-initialized session is never kept.
    pub async fn ensure_session(&mut self) -> Result<(), SessionError> {
        if self.actuator.is_live() && !self.recycle_pending {
            return Ok(());
        }

        if self.recycle_pending {
            info!(
                operations = self.operation_count,
                "Recycling session after operation threshold"
            );
        }

        self.teardown().await;
        match self.actuator.acquire().await {
            Ok(()) => {
                self.operation_count = 0;
                self.recycle_pending = false;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Session acquisition failed");
                self.teardown().await;
                Err(e)
            }
        }
    }

    /// Account one successful delivery. Past the threshold the session is
    /// flagged for recycling — deferred to the next `ensure_session` call
    /// so a batch is never interrupted mid-flight.
    pub fn record_operation(&mut self) {
        self.operation_count += 1;
        if self.operation_count > self.max_operations {
            self.recycle_pending = true;
        }
    }

    pub fn needs_recycle(&self) -> bool {
        self.recycle_pending
    }

    pub fn operation_count(&self) -> u32 {
        self.operation_count
    }

    // ── Mediated capability calls ───────────────────────────────────

    pub async fn open_conversation(&mut self, name: &str) -> bool {
        self.actuator.open_conversation(name).await
    }

    pub async fn send_text(&mut self, message: &str) -> bool {
        self.actuator.send_text(message).await
    }

    pub async fn send_media(&mut self, path: &std::path::Path, caption: Option<&str>) -> bool {
        self.actuator.send_media(path, caption).await
    }

    // ── Teardown ────────────────────────────────────────────────────

    async fn teardown(&mut self) {
        self.actuator.release().await;
        self.reaper.terminate_stale(&self.profile_path);
    }

    /// Unconditional best-effort cleanup. Idempotent — both steps tolerate
    /// an already-released session, and neither can abort the other.
    pub async fn shutdown(&mut self) {
        debug!("Session manager shutting down");
        self.teardown().await;
    }
}
