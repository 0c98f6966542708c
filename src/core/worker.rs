use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use mediaq_core::core::events::{ErrorKind, EventEmitter, QueueItemProgress, QueueStatus};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::process;
use crate::core::progress::{self, ParsedLine};
use crate::core::queue::{DownloadQueue, ProgressThrottle};
use crate::core::status_sync::StatusSync;
use crate::core::ytdlp;
use crate::error::{QueueError, QueueResult};
use crate::models::download::QueueItem;
use crate::storage::store::StatusPatch;

/// Bookkeeping for one running engine process. Lives in the worker's active
/// set from spawn until the process exits or is killed.
///
/// `generation` is unique per spawn. A job that is paused and resumed gets a
/// new handle, and output or exits from the killed run carry the old
/// generation so they are dropped.
pub struct WorkerHandle {
    pub job_id: Uuid,
    pub generation: u64,
    pub pid: Option<u32>,
    pub cancel_token: CancellationToken,
    pub started: Instant,
    pub throttle: ProgressThrottle,
    pub last_known_path: Option<String>,
    pub output_dir: PathBuf,
    pub media_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub ytdlp: PathBuf,
    pub bin_dir: Option<PathBuf>,
    pub filename_template: String,
    pub extra_flags: Vec<String>,
    pub progress_sync_interval_ms: u64,
    pub recent_window: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exit code; `None` when the process was ended by a signal.
    Exited(Option<i32>),
    Failed(String),
}

#[derive(Clone)]
pub struct Worker {
    config: Arc<WorkerConfig>,
    queue: Arc<Mutex<DownloadQueue>>,
    active: Arc<Mutex<HashMap<Uuid, WorkerHandle>>>,
    sync: StatusSync,
    emitter: Arc<dyn EventEmitter>,
    wake: Arc<Notify>,
    generations: Arc<AtomicU64>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<Mutex<DownloadQueue>>,
        sync: StatusSync,
        emitter: Arc<dyn EventEmitter>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            queue,
            active: Arc::new(Mutex::new(HashMap::new())),
            sync,
            emitter,
            wake,
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    fn new_handle(&self, item: &QueueItem, pid: Option<u32>) -> WorkerHandle {
        WorkerHandle {
            job_id: item.id,
            generation: self.generations.fetch_add(1, Ordering::Relaxed) + 1,
            pid,
            cancel_token: CancellationToken::new(),
            started: Instant::now(),
            throttle: ProgressThrottle::new(self.config.progress_sync_interval_ms),
            last_known_path: None,
            output_dir: item.output_dir.clone(),
            media_id: item.media_id.clone(),
        }
    }

    pub async fn dispatch(&self, item: &QueueItem) -> QueueResult<()> {
        tokio::fs::create_dir_all(&item.output_dir)
            .await
            .map_err(|e| {
                QueueError::Spawn(format!(
                    "cannot create output dir {}: {}",
                    item.output_dir.display(),
                    e
                ))
            })?;

        let template = ytdlp::output_template(&item.output_dir, &self.config.filename_template);
        let args = ytdlp::build_args(
            &item.source_url,
            &template,
            item.format.as_deref(),
            item.quality.as_deref(),
            &self.config.extra_flags,
        );

        let q = self.queue.lock().await;
        if q.get(item.id).map(|i| i.status) != Some(QueueStatus::Downloading) {
            tracing::debug!("download {} is no longer downloading, not spawning", item.id);
            return Ok(());
        }

        let mut active = self.active.lock().await;
        if active.contains_key(&item.id) {
            tracing::debug!("download {} already has a worker", item.id);
            return Ok(());
        }

        let child = process::command(&self.config.ytdlp, self.config.bin_dir.as_ref())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                QueueError::Spawn(format!(
                    "{}: {}",
                    self.config.ytdlp.display(),
                    e
                ))
            })?;

        let handle = self.new_handle(item, child.id());
        let token = handle.cancel_token.clone();
        let generation = handle.generation;
        tracing::info!(
            "started yt-dlp for {} (pid {:?}) into {}",
            item.source_url,
            handle.pid,
            item.output_dir.display()
        );
        active.insert(item.id, handle);
        drop(active);
        drop(q);

        let worker = self.clone();
        let id = item.id;
        tokio::spawn(async move {
            worker.monitor(id, generation, child, token).await;
        });
        Ok(())
    }

    async fn monitor(self, id: Uuid, generation: u64, mut child: Child, token: CancellationToken) {
        let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, line_tx.clone());
        }
        drop(line_tx);

        let status = loop {
            tokio::select! {
                Some(line) = line_rx.recv() => self.handle_line(id, generation, &line).await,
                status = child.wait() => break status,
                _ = token.cancelled() => {
                    if let Err(e) = child.start_kill() {
                        tracing::debug!("kill for {} failed: {}", id, e);
                    }
                    break child.wait().await;
                }
            }
        };

        // A killed run's output is dropped anyway, and a grandchild may hold the
        // pipes open long after the kill.
        if !token.is_cancelled() {
            while let Some(line) = line_rx.recv().await {
                self.handle_line(id, generation, &line).await;
            }
        }

        let outcome = match status {
            Ok(status) => ProcessOutcome::Exited(status.code()),
            Err(e) => ProcessOutcome::Failed(e.to_string()),
        };
        self.handle_exit(id, generation, outcome).await;
    }

    pub async fn handle_line(&self, id: Uuid, generation: u64, line: &str) {
        let parsed = match progress::parse_line(line) {
            Some(p) => p,
            None => {
                tracing::trace!("[{}] {}", id, line);
                return;
            }
        };

        match parsed {
            ParsedLine::Destination(dest) => {
                let media_id = {
                    let mut active = self.active.lock().await;
                    let handle = match tracked(&mut active, id, generation) {
                        Some(h) => h,
                        None => {
                            tracing::debug!("ignoring output for released download {}", id);
                            return;
                        }
                    };
                    handle.last_known_path = Some(dest.path.clone());
                    handle.media_id.clone()
                };
                if let Some(title) = ytdlp::title_from_destination(&dest.path, media_id.as_deref())
                {
                    let mut q = self.queue.lock().await;
                    if let Some(item) = q.get_mut(id) {
                        item.title = Some(title);
                    }
                }
            }
            ParsedLine::Progress(event) => {
                let should_sync = {
                    let mut active = self.active.lock().await;
                    match tracked(&mut active, id, generation) {
                        Some(h) => h.throttle.should_emit(),
                        None => {
                            tracing::debug!("ignoring progress for released download {}", id);
                            return;
                        }
                    }
                };

                let mut q = self.queue.lock().await;
                let item = match q.get_mut(id) {
                    Some(i) => i,
                    None => return,
                };
                if !item.apply_progress(&event) || !should_sync {
                    return;
                }
                self.sync.push(item.record_key(), StatusPatch::progress(item));
                self.emitter.emit_progress(&QueueItemProgress {
                    id,
                    title: item.title.clone(),
                    percent: item.progress,
                    downloaded: event.downloaded,
                    total: event.total,
                    speed: event.speed,
                    eta: event.eta,
                });
            }
        }
    }

    async fn resolve_output(&self, handle: &WorkerHandle) -> Option<(String, Option<u64>)> {
        if let Some(path) = &handle.last_known_path {
            let size = tokio::fs::metadata(path).await.ok().map(|m| m.len());
            return Some((path.clone(), size));
        }

        let media_id = handle.media_id.as_deref()?;
        match ytdlp::find_downloaded_file(&handle.output_dir, media_id).await {
            Ok(Some(path)) => {
                let size = tokio::fs::metadata(&path).await.ok().map(|m| m.len());
                Some((path.to_string_lossy().to_string(), size))
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(
                    "scanning {} for {} failed: {}",
                    handle.output_dir.display(),
                    media_id,
                    e
                );
                None
            }
        }
    }

    pub async fn handle_exit(&self, id: Uuid, generation: u64, outcome: ProcessOutcome) {
        let handle = {
            let mut active = self.active.lock().await;
            if tracked(&mut active, id, generation).is_some() {
                active.remove(&id)
            } else {
                None
            }
        };
        let handle = match handle {
            Some(h) => h,
            None => {
                tracing::debug!("download {} exited after its worker was released", id);
                return;
            }
        };

        let resolved = if outcome == ProcessOutcome::Exited(Some(0)) {
            self.resolve_output(&handle).await
        } else {
            None
        };

        let mut q = self.queue.lock().await;
        let item = match q.get_mut(id) {
            Some(i) => i,
            None => {
                self.wake.notify_one();
                return;
            }
        };

        let result = match outcome {
            ProcessOutcome::Exited(Some(0)) => {
                let (file_path, file_size) = match resolved {
                    Some((path, size)) => (Some(path), size),
                    None => {
                        tracing::warn!(
                            "download {} finished but no output file was found in {}",
                            id,
                            handle.output_dir.display()
                        );
                        (None, None)
                    }
                };
                if item.title.is_none() {
                    item.title = file_path
                        .as_deref()
                        .and_then(|p| ytdlp::title_from_destination(p, item.media_id.as_deref()));
                }
                item.complete(file_path, file_size)
            }
            ProcessOutcome::Exited(code) => {
                let message = match code {
                    Some(c) => format!("yt-dlp exited with code {}", c),
                    None => "yt-dlp was terminated by a signal".to_string(),
                };
                item.fail(ErrorKind::ProcessError, message)
            }
            ProcessOutcome::Failed(err) => item.fail(ErrorKind::SpawnError, err),
        };

        match result {
            Ok(true) => {
                match item.status {
                    QueueStatus::Completed => tracing::info!(
                        "download complete: {} ({:.1}s)",
                        item.display_name(),
                        handle.started.elapsed().as_secs_f64()
                    ),
                    _ => tracing::error!(
                        "download failed: {}: {}",
                        item.display_name(),
                        item.error_message.as_deref().unwrap_or_default()
                    ),
                }
                self.sync.push_item(item);
                self.emitter
                    .emit_queue_state(&q.snapshot(self.config.recent_window));
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("dropping exit of {}: {}", id, e),
        }
        drop(q);

        self.wake.notify_one();
    }

    /// Releases the worker and signals its process. Does not wait for exit.
    pub async fn kill(&self, id: Uuid) -> bool {
        let handle = self.active.lock().await.remove(&id);
        match handle {
            Some(h) => {
                tracing::info!("stopping yt-dlp for {} (pid {:?})", id, h.pid);
                h.cancel_token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn shutdown_all(&self) {
        let handles: Vec<WorkerHandle> = self.active.lock().await.drain().map(|(_, h)| h).collect();
        for h in handles {
            h.cancel_token.cancel();
        }
    }
}

fn tracked(
    active: &mut HashMap<Uuid, WorkerHandle>,
    id: Uuid,
    generation: u64,
) -> Option<&mut WorkerHandle> {
    active.get_mut(&id).filter(|h| h.generation == generation)
}

fn spawn_line_reader<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut segments = BufReader::new(reader).split(b'\n');
        while let Ok(Some(segment)) = segments.next_segment().await {
            let line = String::from_utf8_lossy(&segment)
                .trim_end_matches('\r')
                .to_string();
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
impl Worker {
    /// Registers a handle without a process so tests can feed lines and exits.
    /// Returns the handle's generation and cancel token.
    pub(crate) async fn track(&self, item: &QueueItem) -> (u64, CancellationToken) {
        let handle = self.new_handle(item, None);
        let tracked = (handle.generation, handle.cancel_token.clone());
        self.active.lock().await.insert(item.id, handle);
        tracked
    }

    pub(crate) async fn is_active(&self, id: Uuid) -> bool {
        self.active.lock().await.contains_key(&id)
    }

    pub(crate) async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::download::SubmitOptions;
    use crate::storage::store::MemoryStore;
    use mediaq_core::core::events::NoopEmitter;
    use std::time::Duration;

    struct Fixture {
        worker: Worker,
        queue: Arc<Mutex<DownloadQueue>>,
        store: Arc<MemoryStore>,
        sync: StatusSync,
        dir: tempfile::TempDir,
    }

    fn fixture(ytdlp: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(Mutex::new(DownloadQueue::new(3)));
        let store = Arc::new(MemoryStore::new());
        let sync = StatusSync::spawn(store.clone(), Duration::from_secs(1));
        let config = WorkerConfig {
            ytdlp: PathBuf::from(ytdlp),
            bin_dir: None,
            filename_template: "%(title)s [%(id)s].%(ext)s".into(),
            extra_flags: Vec::new(),
            progress_sync_interval_ms: 500,
            recent_window: 10,
        };
        let worker = Worker::new(
            config,
            queue.clone(),
            sync.clone(),
            Arc::new(NoopEmitter),
            Arc::new(Notify::new()),
        );
        Fixture {
            worker,
            queue,
            store,
            sync,
            dir,
        }
    }

    async fn started_item(f: &Fixture, media_id: Option<&str>) -> QueueItem {
        let mut q = f.queue.lock().await;
        let id = q.enqueue(
            "https://youtu.be/abc123".into(),
            media_id.map(String::from),
            &SubmitOptions::default(),
            f.dir.path().to_path_buf(),
            3,
        );
        let item = q.get_mut(id).unwrap();
        item.start().unwrap();
        item.clone()
    }

    async fn current(f: &Fixture, id: Uuid) -> QueueItem {
        f.queue.lock().await.get(id).unwrap().clone()
    }

    #[tokio::test]
    async fn progress_updates_memory_eagerly_and_store_throttled() {
        let f = fixture("yt-dlp");
        let item = started_item(&f, Some("abc123")).await;
        let (gen, _) = f.worker.track(&item).await;

        f.worker.handle_line(item.id, gen, "[download]  10.0% of 10.0MiB").await;
        f.worker.handle_line(item.id, gen, "[download]  20.0% of 10.0MiB").await;
        f.worker.handle_line(item.id, gen, "[download]  30.0% of 10.0MiB").await;
        f.sync.flush().await;

        assert_eq!(current(&f, item.id).await.progress, 30);
        let record = f.store.get(&item.record_key()).await.unwrap();
        assert_eq!(record.progress, 10);
    }

    #[tokio::test]
    async fn late_lines_after_kill_are_ignored() {
        let f = fixture("yt-dlp");
        let item = started_item(&f, Some("abc123")).await;
        let (gen, token) = f.worker.track(&item).await;

        assert!(f.worker.kill(item.id).await);
        assert!(token.is_cancelled());
        assert!(!f.worker.kill(item.id).await);

        f.worker.handle_line(item.id, gen, "[download]  55.0%").await;
        f.worker.handle_exit(item.id, gen, ProcessOutcome::Exited(Some(0))).await;
        let now = current(&f, item.id).await;
        assert_eq!(now.progress, 0);
        assert_eq!(now.status, QueueStatus::Downloading);
    }

    #[tokio::test]
    async fn killed_run_cannot_touch_its_replacement() {
        let f = fixture("yt-dlp");
        let item = started_item(&f, Some("abc123")).await;
        let (old_gen, _) = f.worker.track(&item).await;
        assert!(f.worker.kill(item.id).await);

        let (new_gen, _) = f.worker.track(&item).await;
        assert_ne!(old_gen, new_gen);

        f.worker.handle_line(item.id, old_gen, "[download]  80.0%").await;
        f.worker
            .handle_line(item.id, old_gen, "[download] Destination: /tmp/stale [abc123].mp4")
            .await;
        f.worker.handle_exit(item.id, old_gen, ProcessOutcome::Exited(None)).await;

        let now = current(&f, item.id).await;
        assert_eq!(now.status, QueueStatus::Downloading);
        assert_eq!(now.progress, 0);
        assert!(now.title.is_none());
        assert!(f.worker.is_active(item.id).await);

        f.worker.handle_line(item.id, new_gen, "[download]  25.0%").await;
        assert_eq!(current(&f, item.id).await.progress, 25);
    }

    #[tokio::test]
    async fn clean_exit_uses_captured_destination() {
        let f = fixture("yt-dlp");
        let item = started_item(&f, Some("id123")).await;
        let (gen, _) = f.worker.track(&item).await;

        let out = f.dir.path().join("out [id123].mp4");
        std::fs::write(&out, b"12345").unwrap();
        f.worker
            .handle_line(item.id, gen, &format!("[download] Destination: {}", out.display()))
            .await;
        f.worker.handle_exit(item.id, gen, ProcessOutcome::Exited(Some(0))).await;

        let done = current(&f, item.id).await;
        assert_eq!(done.status, QueueStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.file_path.as_deref(), Some(out.to_str().unwrap()));
        assert_eq!(done.file_size_bytes, Some(5));
        assert_eq!(done.title.as_deref(), Some("out"));
        assert!(!f.worker.is_active(item.id).await);
    }

    #[tokio::test]
    async fn clean_exit_falls_back_to_directory_scan() {
        let f = fixture("yt-dlp");
        let item = started_item(&f, Some("scan42")).await;
        let (gen, _) = f.worker.track(&item).await;
        std::fs::write(f.dir.path().join("Found It [scan42].webm"), b"abc").unwrap();

        f.worker.handle_exit(item.id, gen, ProcessOutcome::Exited(Some(0))).await;

        let done = current(&f, item.id).await;
        assert_eq!(done.status, QueueStatus::Completed);
        assert!(done.file_path.unwrap().ends_with("Found It [scan42].webm"));
        assert_eq!(done.file_size_bytes, Some(3));
        assert_eq!(done.title.as_deref(), Some("Found It"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_retryable_process_error() {
        let f = fixture("yt-dlp");
        let item = started_item(&f, None).await;
        let (gen, _) = f.worker.track(&item).await;

        f.worker.handle_exit(item.id, gen, ProcessOutcome::Exited(Some(2))).await;
        f.sync.flush().await;

        let failed = current(&f, item.id).await;
        assert_eq!(failed.status, QueueStatus::Failed);
        assert_eq!(failed.error_kind, Some(ErrorKind::ProcessError));
        assert!(failed.error_message.unwrap().contains('2'));
        assert!(failed.is_retryable);

        let record = f.store.get(&item.record_key()).await.unwrap();
        assert_eq!(record.status, QueueStatus::Failed);
    }

    #[tokio::test]
    async fn runtime_error_is_spawn_error() {
        let f = fixture("yt-dlp");
        let item = started_item(&f, None).await;
        let (gen, _) = f.worker.track(&item).await;

        f.worker
            .handle_exit(item.id, gen, ProcessOutcome::Failed("broken pipe".into()))
            .await;

        let failed = current(&f, item.id).await;
        assert_eq!(failed.error_kind, Some(ErrorKind::SpawnError));
        assert_eq!(failed.error_message.as_deref(), Some("broken pipe"));
    }

    #[tokio::test]
    async fn double_dispatch_is_noop() {
        let f = fixture("/definitely/not/a/real/yt-dlp");
        let item = started_item(&f, None).await;
        f.worker.track(&item).await;

        assert!(f.worker.dispatch(&item).await.is_ok());
        assert_eq!(f.worker.active_count().await, 1);
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let f = fixture("/definitely/not/a/real/yt-dlp");
        let item = started_item(&f, None).await;

        let err = f.worker.dispatch(&item).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SpawnError);
        assert!(!f.worker.is_active(item.id).await);
    }
}
