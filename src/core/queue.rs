use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;

use mediaq_core::core::events::{QueueItemInfo, QueueSnapshot, QueueStats, QueueStatus};
use uuid::Uuid;

use crate::models::download::{QueueItem, SubmitOptions};

pub struct DownloadQueue {
    pub items: Vec<QueueItem>,
    pub max_concurrent: u32,
    next_position: u64,
    cancelled: HashSet<Uuid>,
    cancel_order: VecDeque<Uuid>,
}

impl DownloadQueue {
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            items: Vec::new(),
            max_concurrent,
            next_position: 0,
            cancelled: HashSet::new(),
            cancel_order: VecDeque::new(),
        }
    }

    pub fn enqueue(
        &mut self,
        url: String,
        media_id: Option<String>,
        opts: &SubmitOptions,
        output_dir: PathBuf,
        max_retries: u32,
    ) -> Uuid {
        self.next_position += 1;
        let item = QueueItem::new(
            url,
            media_id,
            opts,
            output_dir,
            self.next_position,
            max_retries,
        );
        let id = item.id;
        self.items.push(item);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<&QueueItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut QueueItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    pub fn active_count(&self) -> u32 {
        self.items
            .iter()
            .filter(|i| i.status == QueueStatus::Downloading)
            .count() as u32
    }

    /// Queued ids for the free slots, highest priority first and FIFO within a
    /// priority.
    pub fn next_queued_ids(&self) -> Vec<Uuid> {
        let slots = self.max_concurrent.saturating_sub(self.active_count()) as usize;
        if slots == 0 {
            return Vec::new();
        }
        let mut queued: Vec<&QueueItem> = self
            .items
            .iter()
            .filter(|i| i.status == QueueStatus::Queued)
            .collect();
        queued.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.queue_position.cmp(&b.queue_position))
        });
        queued.into_iter().take(slots).map(|i| i.id).collect()
    }

    pub fn find_by_media_id(&self, media_id: &str) -> Option<&QueueItem> {
        self.items
            .iter()
            .find(|i| i.media_id.as_deref() == Some(media_id))
    }

    pub fn remove(&mut self, id: Uuid) -> Option<QueueItem> {
        let pos = self.items.iter().position(|i| i.id == id)?;
        Some(self.items.remove(pos))
    }

    pub fn mark_cancelled(&mut self, id: Uuid) {
        if self.cancelled.insert(id) {
            self.cancel_order.push_back(id);
        }
    }

    pub fn is_cancelled(&self, id: Uuid) -> bool {
        self.cancelled.contains(&id)
    }

    /// Drops the oldest completed/failed items beyond `retention`, and the
    /// oldest cancel tombstones beyond the same bound.
    pub fn prune_finished(&mut self, retention: usize) -> usize {
        while self.cancel_order.len() > retention {
            if let Some(id) = self.cancel_order.pop_front() {
                self.cancelled.remove(&id);
            }
        }

        let mut finished: Vec<(Uuid, chrono::DateTime<chrono::Utc>)> = self
            .items
            .iter()
            .filter(|i| matches!(i.status, QueueStatus::Completed | QueueStatus::Failed))
            .map(|i| (i.id, i.updated_at))
            .collect();
        if finished.len() <= retention {
            return 0;
        }
        finished.sort_by(|a, b| b.1.cmp(&a.1));
        let drop: HashSet<Uuid> = finished.into_iter().skip(retention).map(|(id, _)| id).collect();
        let before = self.items.len();
        self.items.retain(|i| !drop.contains(&i.id));
        before - self.items.len()
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            cancelled: self.cancelled.len(),
            total: self.items.len(),
            ..Default::default()
        };
        let mut progress_sum = 0u64;
        for item in &self.items {
            match item.status {
                QueueStatus::Queued => stats.queued += 1,
                QueueStatus::Downloading => {
                    stats.downloading += 1;
                    progress_sum += item.progress as u64;
                }
                QueueStatus::Paused => stats.paused += 1,
                QueueStatus::Completed => stats.completed += 1,
                QueueStatus::Failed => stats.failed += 1,
                QueueStatus::Cancelled => {}
            }
        }
        if stats.downloading > 0 {
            stats.average_progress = progress_sum as f64 / stats.downloading as f64;
        }
        stats
    }

    fn with_status(&self, status: QueueStatus) -> Vec<&QueueItem> {
        self.items.iter().filter(|i| i.status == status).collect()
    }

    fn recent(&self, status: QueueStatus, limit: usize) -> Vec<QueueItemInfo> {
        let mut items = self.with_status(status);
        items.sort_by(|a, b| {
            let ka = a.completed_at.unwrap_or(a.updated_at);
            let kb = b.completed_at.unwrap_or(b.updated_at);
            kb.cmp(&ka)
        });
        items.into_iter().take(limit).map(|i| i.to_info()).collect()
    }

    pub fn snapshot(&self, recent_window: usize) -> QueueSnapshot {
        let mut queued = self.with_status(QueueStatus::Queued);
        queued.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.queue_position.cmp(&b.queue_position))
        });

        QueueSnapshot {
            queued: queued.into_iter().map(|i| i.to_info()).collect(),
            downloading: self
                .with_status(QueueStatus::Downloading)
                .into_iter()
                .map(|i| i.to_info())
                .collect(),
            paused: self
                .with_status(QueueStatus::Paused)
                .into_iter()
                .map(|i| i.to_info())
                .collect(),
            completed: self.recent(QueueStatus::Completed, recent_window),
            failed: self.recent(QueueStatus::Failed, recent_window),
            stats: self.stats(),
        }
    }
}

pub struct ProgressThrottle {
    last_emit: Option<std::time::Instant>,
    min_interval: std::time::Duration,
}

impl ProgressThrottle {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            last_emit: None,
            min_interval: std::time::Duration::from_millis(min_interval_ms),
        }
    }

    pub fn should_emit(&mut self) -> bool {
        let now = std::time::Instant::now();
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}
