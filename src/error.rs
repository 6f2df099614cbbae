//! Error types for wa-courier.

use std::time::Duration;

use crate::task::ContentType;

/// Top-level error type for the worker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Task store errors.
///
/// Malformed pending files are not represented here — the scan skips and
/// logs them. These variants cover real I/O and serialization failures.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize task {id}: {source}")]
    Serialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Actuator session errors. Fatal to the current iteration, never to the
/// worker process.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session failed to launch: {reason}")]
    Launch { reason: String },

    #[error("Surface did not become ready within {timeout:?}")]
    ReadyTimeout { timeout: Duration },

    #[error("No live session")]
    NotConnected,
}

/// Per-task delivery failures. Converted into failed-bucket records, never
/// propagated past the task that produced them.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to send {content_type} message to {target}")]
    SendFailed {
        target: String,
        content_type: ContentType,
    },

    #[error("Task {id} has no message body")]
    MissingBody { id: String },

    #[error("Task {id} has no media file path")]
    MissingPayload { id: String },
}

/// Result type alias for the worker.
pub type Result<T> = std::result::Result<T, Error>;
