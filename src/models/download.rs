use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use mediaq_core::core::events::{ErrorKind, QueueItemInfo, QueueStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::progress::ProgressEvent;
use crate::error::{QueueError, QueueResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitOptions {
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

/// Key of the durable record a job projects into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    MediaId(String),
    JobId(Uuid),
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::MediaId(id) => write!(f, "media:{}", id),
            RecordKey::JobId(id) => write!(f, "job:{}", id),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub source_url: String,
    pub media_id: Option<String>,
    pub title: Option<String>,
    pub status: QueueStatus,
    pub progress: u8,
    pub priority: i32,
    pub queue_position: u64,
    pub format: Option<String>,
    pub quality: Option<String>,
    pub output_dir: PathBuf,
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

impl QueueItem {
    pub fn new(
        source_url: String,
        media_id: Option<String>,
        opts: &SubmitOptions,
        output_dir: PathBuf,
        queue_position: u64,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_url,
            media_id,
            title: None,
            status: QueueStatus::Queued,
            progress: 0,
            priority: opts.priority,
            queue_position,
            format: opts.format.clone(),
            quality: opts.quality.clone(),
            output_dir,
            error_message: None,
            error_kind: None,
            is_retryable: true,
            retry_count: 0,
            max_retries,
            file_path: None,
            file_size_bytes: None,
            downloaded_bytes: None,
            total_bytes: None,
            speed_bytes_per_sec: None,
            eta_seconds: None,
            added_at: now,
            started_at: None,
            paused_at: None,
            completed_at: None,
            cancelled_at: None,
            updated_at: now,
        }
    }

    pub fn record_key(&self) -> RecordKey {
        match &self.media_id {
            Some(media_id) => RecordKey::MediaId(media_id.clone()),
            None => RecordKey::JobId(self.id),
        }
    }

    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.source_url)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn invalid(&self, action: &'static str) -> QueueError {
        QueueError::InvalidState {
            id: self.id,
            action,
            status: self.status,
        }
    }

    fn clear_transfer(&mut self) {
        self.speed_bytes_per_sec = None;
        self.eta_seconds = None;
    }

    fn requeue(&mut self) {
        self.status = QueueStatus::Queued;
        self.progress = 0;
        self.paused_at = None;
        self.downloaded_bytes = None;
        self.clear_transfer();
        self.touch();
    }

    pub fn start(&mut self) -> QueueResult<bool> {
        match self.status {
            QueueStatus::Queued => {
                self.status = QueueStatus::Downloading;
                self.started_at = Some(Utc::now());
                self.touch();
                Ok(true)
            }
            QueueStatus::Downloading => Ok(false),
            _ => Err(self.invalid("start")),
        }
    }

    pub fn pause(&mut self) -> QueueResult<bool> {
        match self.status {
            QueueStatus::Queued | QueueStatus::Downloading => {
                self.status = QueueStatus::Paused;
                self.paused_at = Some(Utc::now());
                self.clear_transfer();
                self.touch();
                Ok(true)
            }
            QueueStatus::Paused => Ok(false),
            _ => Err(self.invalid("pause")),
        }
    }

    pub fn resume(&mut self) -> QueueResult<bool> {
        match self.status {
            QueueStatus::Paused => {
                self.requeue();
                Ok(true)
            }
            QueueStatus::Queued | QueueStatus::Downloading => Ok(false),
            _ => Err(self.invalid("resume")),
        }
    }

    pub fn retry(&mut self) -> QueueResult<bool> {
        if self.status != QueueStatus::Failed {
            return Err(self.invalid("retry"));
        }
        if self.retry_count >= self.max_retries {
            if self.is_retryable {
                self.is_retryable = false;
                self.touch();
            }
            return Err(QueueError::RetryExceeded {
                id: self.id,
                retry_count: self.retry_count,
                max_retries: self.max_retries,
            });
        }
        self.retry_count += 1;
        self.error_message = None;
        self.error_kind = None;
        self.is_retryable = true;
        self.file_path = None;
        self.file_size_bytes = None;
        self.requeue();
        Ok(true)
    }

    /// Folds a parsed progress line into the live figures. Progress only moves
    /// forward while downloading.
    pub fn apply_progress(&mut self, event: &ProgressEvent) -> bool {
        if self.status != QueueStatus::Downloading {
            return false;
        }
        self.progress = self.progress.max(event.percent);
        if event.total_bytes.is_some() {
            self.total_bytes = event.total_bytes;
        }
        if event.downloaded_bytes.is_some() {
            self.downloaded_bytes = event.downloaded_bytes;
        }
        self.speed_bytes_per_sec = event.speed_bytes_per_sec;
        self.eta_seconds = event.eta_seconds;
        self.touch();
        true
    }

    pub fn complete(
        &mut self,
        file_path: Option<String>,
        file_size_bytes: Option<u64>,
    ) -> QueueResult<bool> {
        match self.status {
            QueueStatus::Downloading => {
                self.status = QueueStatus::Completed;
                self.progress = 100;
                self.completed_at = Some(Utc::now());
                self.file_path = file_path;
                self.file_size_bytes = file_size_bytes;
                if let Some(total) = self.total_bytes {
                    self.downloaded_bytes = Some(total);
                }
                self.clear_transfer();
                self.touch();
                Ok(true)
            }
            QueueStatus::Completed => Ok(false),
            _ => Err(self.invalid("complete")),
        }
    }

    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) -> QueueResult<bool> {
        match self.status {
            QueueStatus::Queued | QueueStatus::Downloading => {
                self.status = QueueStatus::Failed;
                self.error_kind = Some(kind);
                self.error_message = Some(message.into());
                self.is_retryable = self.retry_count < self.max_retries;
                self.clear_transfer();
                self.touch();
                Ok(true)
            }
            QueueStatus::Failed => Ok(false),
            _ => Err(self.invalid("fail")),
        }
    }

    pub fn cancel(&mut self) -> QueueResult<bool> {
        match self.status {
            QueueStatus::Cancelled => Ok(false),
            QueueStatus::Completed => Err(self.invalid("cancel")),
            _ => {
                self.status = QueueStatus::Cancelled;
                self.cancelled_at = Some(Utc::now());
                self.paused_at = None;
                self.clear_transfer();
                self.touch();
                Ok(true)
            }
        }
    }

    pub fn to_info(&self) -> QueueItemInfo {
        QueueItemInfo {
            id: self.id,
            url: self.source_url.clone(),
            media_id: self.media_id.clone(),
            title: self.title.clone(),
            status: self.status,
            progress: self.progress,
            priority: self.priority,
            queue_position: self.queue_position,
            format: self.format.clone(),
            quality: self.quality.clone(),
            error_message: self.error_message.clone(),
            error_kind: self.error_kind,
            is_retryable: self.is_retryable,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            file_path: self.file_path.clone(),
            file_size_bytes: self.file_size_bytes,
            downloaded_bytes: self.downloaded_bytes,
            total_bytes: self.total_bytes,
            speed_bytes_per_sec: self.speed_bytes_per_sec,
            eta_seconds: self.eta_seconds,
            added_at: self.added_at,
            started_at: self.started_at,
            paused_at: self.paused_at,
            completed_at: self.completed_at,
            cancelled_at: self.cancelled_at,
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> QueueItem {
        QueueItem::new(
            "https://youtu.be/abc".into(),
            Some("abc".into()),
            &SubmitOptions::default(),
            PathBuf::from("/tmp"),
            1,
            3,
        )
    }

    fn progress(percent: u8) -> ProgressEvent {
        ProgressEvent {
            percent,
            ..Default::default()
        }
    }

    #[test]
    fn new_item_is_queued_with_clean_timestamps() {
        let it = item();
        assert_eq!(it.status, QueueStatus::Queued);
        assert_eq!(it.progress, 0);
        assert!(it.started_at.is_none());
        assert!(it.paused_at.is_none());
        assert!(it.completed_at.is_none());
        assert!(it.cancelled_at.is_none());
    }

    #[test]
    fn record_key_prefers_media_id() {
        let mut it = item();
        assert_eq!(it.record_key(), RecordKey::MediaId("abc".into()));
        it.media_id = None;
        assert_eq!(it.record_key(), RecordKey::JobId(it.id));
        assert_eq!(it.record_key().to_string(), format!("job:{}", it.id));
    }

    #[test]
    fn pause_sets_paused_at_and_is_idempotent() {
        let mut it = item();
        it.start().unwrap();
        assert!(it.pause().unwrap());
        let paused_at = it.paused_at;
        assert!(paused_at.is_some());
        assert!(!it.pause().unwrap());
        assert_eq!(it.paused_at, paused_at);
        assert!(it.completed_at.is_none() && it.cancelled_at.is_none());
    }

    #[test]
    fn resume_requeues_and_resets_progress() {
        let mut it = item();
        it.start().unwrap();
        it.apply_progress(&progress(40));
        it.pause().unwrap();
        assert!(it.resume().unwrap());
        assert_eq!(it.status, QueueStatus::Queued);
        assert_eq!(it.progress, 0);
        assert!(it.paused_at.is_none());
    }

    #[test]
    fn progress_is_monotonic_while_downloading() {
        let mut it = item();
        assert!(!it.apply_progress(&progress(10)));
        it.start().unwrap();
        it.apply_progress(&progress(50));
        it.apply_progress(&progress(30));
        assert_eq!(it.progress, 50);
    }

    #[test]
    fn retry_within_budget_increments() {
        let mut it = item();
        it.retry_count = 2;
        it.start().unwrap();
        it.fail(ErrorKind::ProcessError, "exit 1").unwrap();
        assert!(it.retry().unwrap());
        assert_eq!(it.retry_count, 3);
        assert_eq!(it.status, QueueStatus::Queued);
        assert!(it.error_message.is_none());
        assert!(it.error_kind.is_none());
        assert_eq!(it.progress, 0);
    }

    #[test]
    fn retry_beyond_budget_is_rejected() {
        let mut it = item();
        it.retry_count = 3;
        it.start().unwrap();
        it.fail(ErrorKind::ProcessError, "exit 1").unwrap();
        assert!(!it.is_retryable);
        let err = it.retry().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RetryExceeded);
        assert_eq!(it.status, QueueStatus::Failed);
        assert_eq!(it.retry_count, 3);
    }

    #[test]
    fn retry_requires_failed_status() {
        let mut it = item();
        assert_eq!(it.retry().unwrap_err().kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn complete_sets_full_progress() {
        let mut it = item();
        it.start().unwrap();
        it.complete(Some("/tmp/a.mp4".into()), Some(10)).unwrap();
        assert_eq!(it.status, QueueStatus::Completed);
        assert_eq!(it.progress, 100);
        assert!(it.completed_at.is_some());
        assert!(it.cancel().is_err());
    }

    #[test]
    fn cancel_twice_is_noop() {
        let mut it = item();
        it.pause().unwrap();
        assert!(it.cancel().unwrap());
        assert!(it.paused_at.is_none());
        assert!(!it.cancel().unwrap());
        assert_eq!(it.status, QueueStatus::Cancelled);
        assert!(it.resume().is_err());
    }
}
