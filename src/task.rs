//! Task model — one unit of work delivering one message to one destination.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of content a task delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Plain text message.
    Text,
    /// Media file with an optional caption.
    Image,
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Image => "image",
        };
        write!(f, "{s}")
    }
}

/// A queued message delivery.
///
/// `id`, `target`, `content_type`, `message` and `file_path` are set at
/// creation and never mutated by the worker; only the failure metadata
/// (`attempts`, `last_error`, `failed_time`) changes, and only on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Opaque unique identifier, assigned at creation.
    pub id: String,
    /// Destination conversation/contact name; the grouping key.
    pub target: String,
    /// What kind of content this task carries.
    pub content_type: ContentType,
    /// Text body (text tasks) or caption (media tasks, optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Path to the media payload (media tasks only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Count of prior failed delivery attempts.
    #[serde(default)]
    pub attempts: u32,
    /// Most recent failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Unix-seconds timestamp of the most recent move into the failed bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_time: Option<i64>,
}

impl Task {
    /// Create a text task with a fresh id.
    pub fn text(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target: target.into(),
            content_type: ContentType::Text,
            message: Some(message.into()),
            file_path: None,
            attempts: 0,
            last_error: None,
            failed_time: None,
        }
    }

    /// Create a media task with a fresh id and an optional caption.
    pub fn image(
        target: impl Into<String>,
        file_path: impl Into<String>,
        caption: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target: target.into(),
            content_type: ContentType::Image,
            message: caption,
            file_path: Some(file_path.into()),
            attempts: 0,
            last_error: None,
            failed_time: None,
        }
    }

    /// Record a failed delivery attempt. Failure metadata is monotonic:
    /// `attempts` only grows and `last_error`/`failed_time` are overwritten
    /// with newer values, never cleared.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.attempts += 1;
        self.last_error = Some(error.into());
        self.failed_time = Some(Utc::now().timestamp());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_serde_values() {
        assert_eq!(serde_json::to_string(&ContentType::Text).unwrap(), "\"text\"");
        assert_eq!(serde_json::to_string(&ContentType::Image).unwrap(), "\"image\"");
        let parsed: ContentType = serde_json::from_str("\"image\"").unwrap();
        assert_eq!(parsed, ContentType::Image);
    }

    #[test]
    fn minimal_wire_format_parses_with_defaults() {
        let json = r#"{"id":"t1","target":"Alice","content_type":"text","message":"hi"}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.id, "t1");
        assert_eq!(task.target, "Alice");
        assert_eq!(task.content_type, ContentType::Text);
        assert_eq!(task.message.as_deref(), Some("hi"));
        assert_eq!(task.attempts, 0);
        assert!(task.last_error.is_none());
        assert!(task.failed_time.is_none());
    }

    #[test]
    fn unknown_content_type_rejected() {
        let json = r#"{"id":"t1","target":"Alice","content_type":"video"}"#;
        assert!(serde_json::from_str::<Task>(json).is_err());
    }

    #[test]
    fn serialization_omits_unset_optionals() {
        let task = Task::text("Alice", "hi");
        let json = serde_json::to_string(&task).unwrap();
        assert!(!json.contains("file_path"));
        assert!(!json.contains("last_error"));
        assert!(!json.contains("failed_time"));
        assert!(json.contains("\"attempts\":0"));
    }

    #[test]
    fn record_failure_is_monotonic() {
        let mut task = Task::text("Alice", "hi");
        task.record_failure("first error");
        assert_eq!(task.attempts, 1);
        assert_eq!(task.last_error.as_deref(), Some("first error"));
        let first_time = task.failed_time.unwrap();

        task.record_failure("second error");
        assert_eq!(task.attempts, 2);
        assert_eq!(task.last_error.as_deref(), Some("second error"));
        assert!(task.failed_time.unwrap() >= first_time);
    }

    #[test]
    fn record_failure_leaves_inputs_untouched() {
        let mut task = Task::image("Bob", "/tmp/photo.jpg", Some("caption".into()));
        task.record_failure("send failed");
        assert_eq!(task.target, "Bob");
        assert_eq!(task.content_type, ContentType::Image);
        assert_eq!(task.message.as_deref(), Some("caption"));
        assert_eq!(task.file_path.as_deref(), Some("/tmp/photo.jpg"));
    }

    #[test]
    fn roundtrip_preserves_failure_metadata() {
        let mut task = Task::text("Alice", "hi");
        task.record_failure("boom");
        let json = serde_json::to_string(&task).unwrap();
        let parsed: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, task);
    }
}
