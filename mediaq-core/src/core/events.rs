use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Downloading => "downloading",
            QueueStatus::Paused => "paused",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Cancelled
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(QueueStatus::Queued),
            "downloading" => Ok(QueueStatus::Downloading),
            "paused" => Ok(QueueStatus::Paused),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            "cancelled" => Ok(QueueStatus::Cancelled),
            other => Err(format!("unknown queue status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Duplicate,
    SpawnError,
    ProcessError,
    RetryExceeded,
    NotFound,
    InvalidState,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::SpawnError => "spawn_error",
            ErrorKind::ProcessError => "process_error",
            ErrorKind::RetryExceeded => "retry_exceeded",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidState => "invalid_state",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "duplicate" => Ok(ErrorKind::Duplicate),
            "spawn_error" => Ok(ErrorKind::SpawnError),
            "process_error" => Ok(ErrorKind::ProcessError),
            "retry_exceeded" => Ok(ErrorKind::RetryExceeded),
            "not_found" => Ok(ErrorKind::NotFound),
            "invalid_state" => Ok(ErrorKind::InvalidState),
            other => Err(format!("unknown error kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItemInfo {
    pub id: Uuid,
    pub url: String,
    pub media_id: Option<String>,
    pub title: Option<String>,
    pub status: QueueStatus,
    pub progress: u8,
    pub priority: i32,
    pub queue_position: u64,
    pub format: Option<String>,
    pub quality: Option<String>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub is_retryable: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    pub file_path: Option<String>,
    pub file_size_bytes: Option<u64>,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub speed_bytes_per_sec: Option<f64>,
    pub eta_seconds: Option<u64>,
    pub added_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueStats {
    pub queued: usize,
    pub downloading: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
    pub average_progress: f64,
}

/// Polling-friendly partition of the live queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub queued: Vec<QueueItemInfo>,
    pub downloading: Vec<QueueItemInfo>,
    pub paused: Vec<QueueItemInfo>,
    pub completed: Vec<QueueItemInfo>,
    pub failed: Vec<QueueItemInfo>,
    pub stats: QueueStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItemProgress {
    pub id: Uuid,
    pub title: Option<String>,
    pub percent: u8,
    pub downloaded: Option<String>,
    pub total: Option<String>,
    pub speed: Option<String>,
    pub eta: Option<String>,
}

pub trait EventEmitter: Send + Sync + 'static {
    fn emit_queue_state(&self, snapshot: &QueueSnapshot);
    fn emit_progress(&self, progress: &QueueItemProgress);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit_queue_state(&self, _snapshot: &QueueSnapshot) {}

    fn emit_progress(&self, _progress: &QueueItemProgress) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            QueueStatus::Queued,
            QueueStatus::Downloading,
            QueueStatus::Paused,
            QueueStatus::Completed,
            QueueStatus::Failed,
            QueueStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<QueueStatus>().unwrap(), status);
        }
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&QueueStatus::Downloading).unwrap();
        assert_eq!(json, "\"downloading\"");
    }

    #[test]
    fn terminal_statuses() {
        assert!(QueueStatus::Completed.is_terminal());
        assert!(QueueStatus::Failed.is_terminal());
        assert!(QueueStatus::Cancelled.is_terminal());
        assert!(!QueueStatus::Paused.is_terminal());
        assert!(!QueueStatus::Queued.is_terminal());
    }

    #[test]
    fn error_kind_wire_names() {
        assert_eq!(ErrorKind::SpawnError.as_str(), "spawn_error");
        assert_eq!(
            serde_json::to_string(&ErrorKind::RetryExceeded).unwrap(),
            "\"retry_exceeded\""
        );
        assert_eq!("process_error".parse::<ErrorKind>().unwrap(), ErrorKind::ProcessError);
        assert!("bogus".parse::<ErrorKind>().is_err());
    }
}
