use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mediaq_core::core::events::QueueStatus;
use serde::Serialize;
use uuid::Uuid;

use crate::core::queue::DownloadQueue;
use crate::error::SkippedUrl;
use crate::storage::store::{DownloadRecord, DurableStore};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SubmitOutcome {
    pub accepted: Vec<Uuid>,
    pub skipped: Vec<SkippedUrl>,
}

impl SubmitOutcome {
    pub fn is_partial(&self) -> bool {
        !self.accepted.is_empty() && !self.skipped.is_empty()
    }

    pub fn skip(&mut self, url: &str, reason: impl Into<String>) {
        self.skipped.push(SkippedUrl {
            url: url.to_string(),
            reason: reason.into(),
        });
    }
}

/// Decides whether a media id is already taken, first by the durable store and
/// then by the live queue.
pub struct DuplicateGuard {
    store: Arc<dyn DurableStore>,
    lookup_timeout: Duration,
    stale_after: Duration,
}

impl DuplicateGuard {
    pub fn new(store: Arc<dyn DurableStore>, lookup_timeout: Duration, stale_after: Duration) -> Self {
        Self {
            store,
            lookup_timeout,
            stale_after,
        }
    }

    /// A failing or slow store never blocks a submission.
    pub async fn check_durable(&self, media_id: &str) -> Option<String> {
        let lookup =
            tokio::time::timeout(self.lookup_timeout, self.store.find_by_media_id(media_id)).await;
        let record = match lookup {
            Ok(Ok(record)) => record?,
            Ok(Err(e)) => {
                tracing::warn!("duplicate lookup for {} failed: {:#}", media_id, e);
                return None;
            }
            Err(_) => {
                tracing::warn!(
                    "duplicate lookup for {} timed out after {:?}",
                    media_id,
                    self.lookup_timeout
                );
                return None;
            }
        };
        durable_conflict(&record, Utc::now(), self.stale_after)
    }

    pub fn check_live(queue: &DownloadQueue, media_id: &str) -> Option<String> {
        queue.find_by_media_id(media_id).map(|item| {
            format!(
                "already in queue ({}): \"{}\"",
                item.status,
                item.display_name()
            )
        })
    }
}

/// Active records not touched for `stale_after` belong to a process that died
/// mid-download and no longer count.
pub fn durable_conflict(
    record: &DownloadRecord,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Option<String> {
    match record.status {
        QueueStatus::Completed => Some(format!(
            "already downloaded: \"{}\"",
            record.display_title()
        )),
        QueueStatus::Queued | QueueStatus::Downloading => {
            let age = now
                .signed_duration_since(record.updated_at)
                .to_std()
                .unwrap_or_default();
            if age < stale_after {
                Some(format!(
                    "already {}: \"{}\"",
                    record.status,
                    record.display_title()
                ))
            } else {
                None
            }
        }
        _ => None,
    }
}
