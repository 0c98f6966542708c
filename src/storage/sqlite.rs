use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediaq_core::core::events::{ErrorKind, QueueStatus};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use uuid::Uuid;

use crate::models::download::RecordKey;
use crate::storage::store::{DownloadRecord, DurableStore, StatusPatch};

const SELECT_COLUMNS: &str = "record_key, job_id, media_id, source_url, title, status, progress, \
     file_path, file_size_bytes, error_message, error_kind, is_retryable, retry_count, \
     added_at_ms, started_at_ms, paused_at_ms, completed_at_ms, cancelled_at_ms, updated_at_ms";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .with_context(|| format!("opening {}", db_path.display()))?;

        conn.busy_timeout(Duration::from_secs(10))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| anyhow!("sqlite connection mutex poisoned"))?;
            f(&mut guard)
        })
        .await?
    }
}

fn migrate(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS download_record (
  record_key TEXT PRIMARY KEY,
  job_id TEXT,
  media_id TEXT,
  source_url TEXT NOT NULL,
  title TEXT,
  status TEXT NOT NULL,
  progress INTEGER NOT NULL,
  file_path TEXT,
  file_size_bytes INTEGER,
  error_message TEXT,
  error_kind TEXT,
  is_retryable INTEGER NOT NULL,
  retry_count INTEGER NOT NULL,
  added_at_ms INTEGER,
  started_at_ms INTEGER,
  paused_at_ms INTEGER,
  completed_at_ms INTEGER,
  cancelled_at_ms INTEGER,
  updated_at_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_download_record_media ON download_record(media_id, updated_at_ms);
"#,
    )?;
    Ok(())
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn ms_to_time(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::<Utc>::from_timestamp_millis)
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<DownloadRecord> {
    let job_id: Option<String> = row.get(1)?;
    let job_id = job_id
        .map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(1, e.to_string())))
        .transpose()?;
    let status: String = row.get(5)?;
    let status = status.parse::<QueueStatus>().map_err(|e| conversion_error(5, e))?;
    let error_kind: Option<String> = row.get(10)?;
    let error_kind: Option<ErrorKind> = error_kind
        .map(|s| s.parse::<ErrorKind>().map_err(|e| conversion_error(10, e)))
        .transpose()?;
    let progress: i64 = row.get(6)?;
    let file_size: Option<i64> = row.get(8)?;
    let retry_count: i64 = row.get(12)?;
    let updated_at: i64 = row.get(18)?;

    Ok(DownloadRecord {
        key: row.get(0)?,
        job_id,
        media_id: row.get(2)?,
        source_url: row.get(3)?,
        title: row.get(4)?,
        status,
        progress: progress.clamp(0, 100) as u8,
        file_path: row.get(7)?,
        file_size_bytes: file_size.map(|v| v.max(0) as u64),
        error_message: row.get(9)?,
        error_kind,
        is_retryable: row.get(11)?,
        retry_count: retry_count.max(0) as u32,
        added_at: ms_to_time(row.get(13)?),
        started_at: ms_to_time(row.get(14)?),
        paused_at: ms_to_time(row.get(15)?),
        completed_at: ms_to_time(row.get(16)?),
        cancelled_at: ms_to_time(row.get(17)?),
        updated_at: ms_to_time(Some(updated_at)).unwrap_or_else(Utc::now),
    })
}

fn write_record(conn: &Connection, r: &DownloadRecord) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR REPLACE INTO download_record (\
           record_key, job_id, media_id, source_url, title, status, progress, \
           file_path, file_size_bytes, error_message, error_kind, is_retryable, retry_count, \
           added_at_ms, started_at_ms, paused_at_ms, completed_at_ms, cancelled_at_ms, updated_at_ms\
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        params![
            r.key,
            r.job_id.map(|id| id.to_string()),
            r.media_id,
            r.source_url,
            r.title,
            r.status.as_str(),
            r.progress as i64,
            r.file_path,
            r.file_size_bytes.map(|v| v as i64),
            r.error_message,
            r.error_kind.map(|k| k.as_str()),
            r.is_retryable,
            r.retry_count as i64,
            r.added_at.map(|t| t.timestamp_millis()),
            r.started_at.map(|t| t.timestamp_millis()),
            r.paused_at.map(|t| t.timestamp_millis()),
            r.completed_at.map(|t| t.timestamp_millis()),
            r.cancelled_at.map(|t| t.timestamp_millis()),
            r.updated_at.timestamp_millis(),
        ],
    )
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn upsert(&self, key: &RecordKey, patch: &StatusPatch) -> anyhow::Result<()> {
        let key = key.clone();
        let patch = patch.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let existing = tx
                .query_row(
                    &format!("SELECT {} FROM download_record WHERE record_key = ?1", SELECT_COLUMNS),
                    params![key.to_string()],
                    row_to_record,
                )
                .optional()?;
            let mut record = existing.unwrap_or_else(|| DownloadRecord::new(&key));
            patch.apply_to(&mut record);
            write_record(&tx, &record)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn find_by_media_id(&self, media_id: &str) -> anyhow::Result<Option<DownloadRecord>> {
        let media_id = media_id.to_string();
        self.with_conn(move |conn| {
            let record = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM download_record WHERE media_id = ?1 \
                         ORDER BY updated_at_ms DESC LIMIT 1",
                        SELECT_COLUMNS
                    ),
                    params![media_id],
                    row_to_record,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }
}
