//! Write-through projection of live job state into the durable store.
//!
//! A single writer task applies patches in submission order, so a late progress
//! write can never land after the terminal status of the same job. Store errors
//! and timeouts are logged and dropped; the in-memory queue stays authoritative.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::models::download::{QueueItem, RecordKey};
use crate::storage::store::{DurableStore, StatusPatch};

enum SyncCommand {
    Write {
        key: RecordKey,
        patch: StatusPatch,
        ack: Option<oneshot::Sender<bool>>,
    },
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct StatusSync {
    tx: mpsc::UnboundedSender<SyncCommand>,
    write_timeout: Duration,
}

impl StatusSync {
    pub fn spawn(store: Arc<dyn DurableStore>, write_timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SyncCommand>();

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    SyncCommand::Write { key, patch, ack } => {
                        let ok = write_one(store.as_ref(), &key, &patch, write_timeout).await;
                        if let Some(ack) = ack {
                            let _ = ack.send(ok);
                        }
                    }
                    SyncCommand::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            tracing::debug!("status sync writer stopped");
        });

        Self { tx, write_timeout }
    }

    /// Fire-and-forget; never waits on the store.
    pub fn push(&self, key: RecordKey, patch: StatusPatch) {
        let cmd = SyncCommand::Write {
            key,
            patch,
            ack: None,
        };
        if self.tx.send(cmd).is_err() {
            tracing::warn!("status sync writer is gone, dropping update");
        }
    }

    pub fn push_item(&self, item: &QueueItem) {
        self.push(item.record_key(), StatusPatch::snapshot(item));
    }

    /// Waits for the write, bounded by the configured timeout. Returns whether
    /// the store acknowledged it in time.
    pub async fn write(&self, key: RecordKey, patch: StatusPatch) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        let cmd = SyncCommand::Write {
            key: key.clone(),
            patch,
            ack: Some(ack_tx),
        };
        if self.tx.send(cmd).is_err() {
            tracing::warn!("status sync writer is gone, dropping update for {}", key);
            return false;
        }
        match tokio::time::timeout(self.write_timeout, ack_rx).await {
            Ok(Ok(ok)) => ok,
            Ok(Err(_)) => false,
            Err(_) => {
                tracing::warn!("durable write for {} still pending after {:?}", key, self.write_timeout);
                false
            }
        }
    }

    pub async fn write_item(&self, item: &QueueItem) -> bool {
        self.write(item.record_key(), StatusPatch::snapshot(item)).await
    }

    /// Resolves once every previously pushed patch has been attempted.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(SyncCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn write_one(
    store: &dyn DurableStore,
    key: &RecordKey,
    patch: &StatusPatch,
    timeout: Duration,
) -> bool {
    match tokio::time::timeout(timeout, store.upsert(key, patch)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!("durable write for {} failed: {:#}", key, e);
            false
        }
        Err(_) => {
            tracing::warn!("durable write for {} timed out after {:?}", key, timeout);
            false
        }
    }
}
