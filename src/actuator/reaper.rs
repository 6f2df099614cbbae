//! Stale browser process cleanup.
//!
//! A crashed or killed worker can leave browser processes holding the
//! profile directory's lock, which blocks the next acquisition. The reaper
//! sweeps them before a session is (re)established. Matching is heuristic
//! by nature: process name plus the profile path in the launch arguments.

use std::path::Path;

use sysinfo::{ProcessesToUpdate, Signal, System};
use tracing::{info, warn};

/// Injectable process-cleanup capability. Best-effort: implementations
/// must never fail or panic.
pub trait ProcessReaper: Send + Sync {
    /// Terminate external processes bound to `profile_path`.
    fn terminate_stale(&self, profile_path: &Path);
}

/// Production reaper backed by system process enumeration.
pub struct SysinfoReaper {
    process_name: String,
}

impl SysinfoReaper {
    /// Reaper matching Chrome/Chromium processes.
    pub fn new() -> Self {
        Self::with_process_name("chrome")
    }

    /// Reaper matching processes whose name contains `name`
    /// (case-insensitive).
    pub fn with_process_name(name: impl Into<String>) -> Self {
        Self {
            process_name: name.into().to_lowercase(),
        }
    }
}

impl Default for SysinfoReaper {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessReaper for SysinfoReaper {
    fn terminate_stale(&self, profile_path: &Path) {
        let profile = profile_path.to_string_lossy();
        if profile.is_empty() {
            return;
        }

        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);

        for (pid, process) in sys.processes() {
            let name = process.name().to_string_lossy().to_lowercase();
            if !name.contains(&self.process_name) {
                continue;
            }
            let bound_to_profile = process
                .cmd()
                .iter()
                .any(|arg| arg.to_string_lossy().contains(profile.as_ref()));
            if !bound_to_profile {
                continue;
            }

            info!(pid = pid.as_u32(), name = %name, "Terminating stale browser process");
            // Graceful first; SIGKILL where TERM is unsupported.
            if process.kill_with(Signal::Term).is_none() && !process.kill() {
                warn!(pid = pid.as_u32(), "Could not terminate stale browser process");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn matcher_is_lowercased() {
        let reaper = SysinfoReaper::with_process_name("Chrome");
        assert_eq!(reaper.process_name, "chrome");
    }

    #[test]
    fn empty_profile_is_a_noop() {
        // Must not sweep every chrome on the machine when the profile path
        // is empty.
        SysinfoReaper::new().terminate_stale(&PathBuf::new());
    }
}
