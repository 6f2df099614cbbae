//! Actuator capability — the delivery surface the worker drives.
//!
//! The core never touches a browser directly; it dispatches through this
//! trait, and the session manager owns the one live implementation.

pub mod browser;
pub mod reaper;

pub use browser::BrowserActuator;
pub use reaper::{ProcessReaper, SysinfoReaper};

use std::path::Path;

use async_trait::async_trait;

use crate::error::SessionError;

/// One live connection to the messaging surface.
///
/// The delivery calls (`open_conversation`, `send_text`, `send_media`)
/// return plain `bool`s: the surface either performed the action within its
/// own bounded waits or it did not — the caller decides what a `false`
/// means (group skip vs. task failure). Only session establishment carries
/// a typed error.
#[async_trait]
pub trait Actuator: Send {
    /// Establish a live session and wait (bounded) for the surface's ready
    /// signal. A no-op when already live.
    async fn acquire(&mut self) -> Result<(), SessionError>;

    /// Best-effort teardown of the live session. Never errors; safe to
    /// call when no session is held.
    async fn release(&mut self);

    /// Whether a live session is currently held.
    fn is_live(&self) -> bool;

    /// Open the named conversation. `false` when the destination cannot
    /// be opened.
    async fn open_conversation(&mut self, name: &str) -> bool;

    /// Send a text message into the currently open conversation.
    async fn send_text(&mut self, message: &str) -> bool;

    /// Send a media file, with an optional caption, into the currently
    /// open conversation.
    async fn send_media(&mut self, path: &Path, caption: Option<&str>) -> bool;
}
