use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mediaq_core::core::events::{
    ErrorKind, EventEmitter, QueueItemInfo, QueueSnapshot, QueueStatus,
};
use mediaq_core::models::settings::AppSettings;
use tokio::sync::{Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::duplicate::{DuplicateGuard, SubmitOutcome};
use crate::core::queue::DownloadQueue;
use crate::core::status_sync::StatusSync;
use crate::core::url_parser;
use crate::core::worker::{Worker, WorkerConfig};
use crate::error::{QueueError, QueueResult};
use crate::models::download::{QueueItem, SubmitOptions};
use crate::storage::store::DurableStore;

/// Owner of the live queue. Every mutation goes through the queue mutex, which
/// is always taken before the worker's active set.
pub struct Scheduler {
    queue: Arc<Mutex<DownloadQueue>>,
    worker: Worker,
    sync: StatusSync,
    guard: DuplicateGuard,
    settings: AppSettings,
    wake: Arc<Notify>,
    emitter: Arc<dyn EventEmitter>,
}

impl Scheduler {
    pub fn new(
        settings: AppSettings,
        store: Arc<dyn DurableStore>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self::with_bin_dir(settings, None, store, emitter)
    }

    pub fn with_bin_dir(
        settings: AppSettings,
        bin_dir: Option<PathBuf>,
        store: Arc<dyn DurableStore>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        let qs = &settings.queue;
        let write_timeout = Duration::from_millis(qs.store_write_timeout_ms);
        let queue = Arc::new(Mutex::new(DownloadQueue::new(qs.max_concurrent_downloads)));
        let sync = StatusSync::spawn(store.clone(), write_timeout);
        let wake = Arc::new(Notify::new());

        let config = WorkerConfig {
            ytdlp: settings
                .download
                .ytdlp_path
                .clone()
                .unwrap_or_else(|| PathBuf::from("yt-dlp")),
            bin_dir,
            filename_template: settings.download.filename_template.clone(),
            extra_flags: settings.download.extra_ytdlp_flags.clone(),
            progress_sync_interval_ms: qs.progress_sync_interval_ms,
            recent_window: qs.recent_window,
        };
        let worker = Worker::new(
            config,
            queue.clone(),
            sync.clone(),
            emitter.clone(),
            wake.clone(),
        );
        let guard = DuplicateGuard::new(
            store,
            write_timeout,
            Duration::from_secs(qs.duplicate_stale_after_secs),
        );

        Self {
            queue,
            worker,
            sync,
            guard,
            settings,
            wake,
            emitter,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let period = Duration::from_millis(self.settings.queue.tick_interval_ms.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            "scheduler started (max {} concurrent, tick {:?})",
            self.settings.queue.max_concurrent_downloads,
            period
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
                _ = self.wake.notified() => {}
            }
            self.tick().await;
        }

        self.worker.shutdown_all().await;
        self.sync.flush().await;
        tracing::info!("scheduler stopped");
    }

    /// One scheduling pass. Returns the ids handed to the worker.
    pub async fn tick(&self) -> Vec<Uuid> {
        let started: Vec<QueueItem> = {
            let mut q = self.queue.lock().await;
            let pruned = q.prune_finished(self.settings.queue.finished_retention);
            if pruned > 0 {
                tracing::debug!("pruned {} finished downloads", pruned);
            }

            let mut started = Vec::new();
            for id in q.next_queued_ids() {
                if let Some(item) = q.get_mut(id) {
                    if let Ok(true) = item.start() {
                        self.sync.push_item(item);
                        started.push(item.clone());
                    }
                }
            }
            if !started.is_empty() {
                self.emitter
                    .emit_queue_state(&q.snapshot(self.settings.queue.recent_window));
            }
            started
        };

        let stagger = Duration::from_millis(self.settings.queue.stagger_delay_ms);
        let mut dispatched = Vec::with_capacity(started.len());
        for (n, item) in started.iter().enumerate() {
            if n > 0 && !stagger.is_zero() {
                tokio::time::sleep(stagger).await;
            }
            match self.worker.dispatch(item).await {
                Ok(()) => dispatched.push(item.id),
                Err(e) => {
                    tracing::error!("could not start {}: {}", item.source_url, e);
                    let mut q = self.queue.lock().await;
                    if let Some(live) = q.get_mut(item.id) {
                        if let Ok(true) = live.fail(ErrorKind::SpawnError, e.to_string()) {
                            self.sync.push_item(live);
                        }
                    }
                    self.emitter
                        .emit_queue_state(&q.snapshot(self.settings.queue.recent_window));
                }
            }
        }
        dispatched
    }

    pub async fn submit(&self, urls: &[String], opts: SubmitOptions) -> QueueResult<SubmitOutcome> {
        let output_dir = opts
            .output_dir
            .clone()
            .unwrap_or_else(|| self.settings.download.default_output_dir.clone());
        let mut outcome = SubmitOutcome::default();
        let mut fresh: Vec<QueueItem> = Vec::new();

        for raw in urls {
            let url = raw.trim();
            if url.is_empty() {
                outcome.skip(raw, "empty url");
                continue;
            }

            let media_id = url_parser::extract_media_id(url);
            if let Some(mid) = &media_id {
                if let Some(reason) = self.guard.check_durable(mid).await {
                    tracing::info!("skipping {}: {}", url, reason);
                    outcome.skip(url, reason);
                    continue;
                }
            }

            let mut q = self.queue.lock().await;
            if let Some(mid) = &media_id {
                if let Some(reason) = DuplicateGuard::check_live(&q, mid) {
                    tracing::info!("skipping {}: {}", url, reason);
                    outcome.skip(url, reason);
                    continue;
                }
            }
            let id = q.enqueue(
                url.to_string(),
                media_id,
                &opts,
                output_dir.clone(),
                self.settings.queue.max_retries,
            );
            if let Some(item) = q.get(id) {
                fresh.push(item.clone());
            }
            outcome.accepted.push(id);
        }

        if outcome.accepted.is_empty() && !outcome.skipped.is_empty() {
            return Err(QueueError::AllDuplicates {
                skipped: outcome.skipped,
            });
        }

        for item in &fresh {
            tracing::info!("queued {} (priority {})", item.source_url, item.priority);
            self.sync.write_item(item).await;
        }
        if outcome.is_partial() {
            tracing::info!(
                "accepted {} urls, skipped {}",
                outcome.accepted.len(),
                outcome.skipped.len()
            );
        }

        if !fresh.is_empty() {
            self.emit_state().await;
            self.wake.notify_one();
        }
        Ok(outcome)
    }

    pub async fn pause(&self, id: Uuid) -> QueueResult<()> {
        let item = {
            let mut q = self.queue.lock().await;
            let item = q.get_mut(id).ok_or(QueueError::NotFound(id))?;
            if !item.pause()? {
                return Ok(());
            }
            item.clone()
        };

        self.worker.kill(id).await;
        tracing::info!("paused {}", item.display_name());
        self.sync.write_item(&item).await;
        self.emit_state().await;
        Ok(())
    }

    pub async fn resume(&self, id: Uuid) -> QueueResult<()> {
        let item = {
            let mut q = self.queue.lock().await;
            let item = q.get_mut(id).ok_or(QueueError::NotFound(id))?;
            if !item.resume()? {
                return Ok(());
            }
            item.clone()
        };

        tracing::info!("resumed {}", item.display_name());
        self.sync.write_item(&item).await;
        self.emit_state().await;
        self.wake.notify_one();
        Ok(())
    }

    pub async fn cancel(&self, id: Uuid) -> QueueResult<()> {
        let item = {
            let mut q = self.queue.lock().await;
            if q.is_cancelled(id) {
                return Ok(());
            }
            match q.get_mut(id) {
                Some(item) => {
                    item.cancel()?;
                }
                None => return Err(QueueError::NotFound(id)),
            }
            q.mark_cancelled(id);
            q.remove(id).ok_or(QueueError::NotFound(id))?
        };

        self.worker.kill(id).await;
        tracing::info!("cancelled {}", item.display_name());
        self.sync.write_item(&item).await;
        self.emit_state().await;
        Ok(())
    }

    pub async fn retry(&self, id: Uuid) -> QueueResult<()> {
        let item = {
            let mut q = self.queue.lock().await;
            let item = q.get_mut(id).ok_or(QueueError::NotFound(id))?;
            match item.retry() {
                Ok(_) => item.clone(),
                Err(e @ QueueError::RetryExceeded { .. }) => {
                    self.sync.push_item(item);
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        };

        tracing::info!(
            "retrying {} ({}/{})",
            item.display_name(),
            item.retry_count,
            item.max_retries
        );
        self.sync.write_item(&item).await;
        self.emit_state().await;
        self.wake.notify_one();
        Ok(())
    }

    pub async fn get_status(&self) -> QueueSnapshot {
        self.queue
            .lock()
            .await
            .snapshot(self.settings.queue.recent_window)
    }

    pub async fn get_item(&self, id: Uuid) -> Option<QueueItemInfo> {
        self.queue.lock().await.get(id).map(|i| i.to_info())
    }

    /// True when nothing is queued or downloading.
    pub async fn is_idle(&self) -> bool {
        let q = self.queue.lock().await;
        !q.items
            .iter()
            .any(|i| matches!(i.status, QueueStatus::Queued | QueueStatus::Downloading))
    }

    pub async fn flush(&self) {
        self.sync.flush().await;
    }

    async fn emit_state(&self) {
        let snapshot = self.get_status().await;
        self.emitter.emit_queue_state(&snapshot);
    }
}
