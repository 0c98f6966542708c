use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediaq_core::core::events::{ErrorKind, QueueStatus};
use serde::Serialize;
use uuid::Uuid;

use crate::models::download::{QueueItem, RecordKey};

/// Durable projection of one job, keyed by media id when known.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadRecord {
    pub key: String,
    pub job_id: Option<Uuid>,
    pub media_id: Option<String>,
    pub source_url: String,
    pub title: Option<String>,
    pub status: QueueStatus,
    pub progress: u8,
    pub file_path: Option<String>,
    pub file_size_bytes: Option<u64>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub is_retryable: bool,
    pub retry_count: u32,
    pub added_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadRecord {
    pub fn new(key: &RecordKey) -> Self {
        let (job_id, media_id) = match key {
            RecordKey::MediaId(m) => (None, Some(m.clone())),
            RecordKey::JobId(id) => (Some(*id), None),
        };
        Self {
            key: key.to_string(),
            job_id,
            media_id,
            source_url: String::new(),
            title: None,
            status: QueueStatus::Queued,
            progress: 0,
            file_path: None,
            file_size_bytes: None,
            error_message: None,
            error_kind: None,
            is_retryable: true,
            retry_count: 0,
            added_at: None,
            started_at: None,
            paused_at: None,
            completed_at: None,
            cancelled_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.source_url)
    }
}

/// Partial update of a [`DownloadRecord`]. `None` leaves a field untouched;
/// nullable fields take `Some(None)` to clear them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPatch {
    pub job_id: Option<Uuid>,
    pub media_id: Option<String>,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub status: Option<QueueStatus>,
    pub progress: Option<u8>,
    pub file_path: Option<Option<String>>,
    pub file_size_bytes: Option<Option<u64>>,
    pub error_message: Option<Option<String>>,
    pub error_kind: Option<Option<ErrorKind>>,
    pub is_retryable: Option<bool>,
    pub retry_count: Option<u32>,
    pub added_at: Option<DateTime<Utc>>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub paused_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub cancelled_at: Option<Option<DateTime<Utc>>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StatusPatch {
    pub fn snapshot(item: &QueueItem) -> Self {
        Self {
            job_id: Some(item.id),
            media_id: item.media_id.clone(),
            source_url: Some(item.source_url.clone()),
            title: item.title.clone(),
            status: Some(item.status),
            progress: Some(item.progress),
            file_path: Some(item.file_path.clone()),
            file_size_bytes: Some(item.file_size_bytes),
            error_message: Some(item.error_message.clone()),
            error_kind: Some(item.error_kind),
            is_retryable: Some(item.is_retryable),
            retry_count: Some(item.retry_count),
            added_at: Some(item.added_at),
            started_at: Some(item.started_at),
            paused_at: Some(item.paused_at),
            completed_at: Some(item.completed_at),
            cancelled_at: Some(item.cancelled_at),
            updated_at: Some(item.updated_at),
        }
    }

    pub fn progress(item: &QueueItem) -> Self {
        Self {
            progress: Some(item.progress),
            title: item.title.clone(),
            updated_at: Some(item.updated_at),
            ..Default::default()
        }
    }

    pub fn apply_to(&self, record: &mut DownloadRecord) {
        if let Some(v) = self.job_id {
            record.job_id = Some(v);
        }
        if let Some(v) = &self.media_id {
            record.media_id = Some(v.clone());
        }
        if let Some(v) = &self.source_url {
            record.source_url = v.clone();
        }
        if let Some(v) = &self.title {
            record.title = Some(v.clone());
        }
        if let Some(v) = self.status {
            record.status = v;
        }
        if let Some(v) = self.progress {
            record.progress = v;
        }
        if let Some(v) = &self.file_path {
            record.file_path = v.clone();
        }
        if let Some(v) = self.file_size_bytes {
            record.file_size_bytes = v;
        }
        if let Some(v) = &self.error_message {
            record.error_message = v.clone();
        }
        if let Some(v) = self.error_kind {
            record.error_kind = v;
        }
        if let Some(v) = self.is_retryable {
            record.is_retryable = v;
        }
        if let Some(v) = self.retry_count {
            record.retry_count = v;
        }
        if let Some(v) = self.added_at {
            record.added_at = Some(v);
        }
        if let Some(v) = self.started_at {
            record.started_at = v;
        }
        if let Some(v) = self.paused_at {
            record.paused_at = v;
        }
        if let Some(v) = self.completed_at {
            record.completed_at = v;
        }
        if let Some(v) = self.cancelled_at {
            record.cancelled_at = v;
        }
        record.updated_at = self.updated_at.unwrap_or_else(Utc::now);
    }
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn upsert(&self, key: &RecordKey, patch: &StatusPatch) -> anyhow::Result<()>;
    async fn find_by_media_id(&self, media_id: &str) -> anyhow::Result<Option<DownloadRecord>>;
}

#[derive(Default)]
pub struct MemoryStore {
    records: tokio::sync::Mutex<HashMap<String, DownloadRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &RecordKey) -> Option<DownloadRecord> {
        self.records.lock().await.get(&key.to_string()).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn upsert(&self, key: &RecordKey, patch: &StatusPatch) -> anyhow::Result<()> {
        let mut records = self.records.lock().await;
        let record = records
            .entry(key.to_string())
            .or_insert_with(|| DownloadRecord::new(key));
        patch.apply_to(record);
        Ok(())
    }

    async fn find_by_media_id(&self, media_id: &str) -> anyhow::Result<Option<DownloadRecord>> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| r.media_id.as_deref() == Some(media_id))
            .max_by_key(|r| r.updated_at)
            .cloned())
    }
}
