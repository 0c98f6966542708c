use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub download: DownloadSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: u32,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_progress_sync_interval_ms")]
    pub progress_sync_interval_ms: u64,
    #[serde(default = "default_stagger_delay_ms")]
    pub stagger_delay_ms: u64,
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,
    #[serde(default = "default_finished_retention")]
    pub finished_retention: usize,
    #[serde(default = "default_store_write_timeout_ms")]
    pub store_write_timeout_ms: u64,
    #[serde(default = "default_duplicate_stale_after_secs")]
    pub duplicate_stale_after_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    #[serde(default = "default_output_dir")]
    pub default_output_dir: PathBuf,
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,
    #[serde(default = "default_filename_template")]
    pub filename_template: String,
    #[serde(default)]
    pub extra_ytdlp_flags: Vec<String>,
}

fn default_max_concurrent_downloads() -> u32 {
    3
}

fn default_tick_interval_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

fn default_progress_sync_interval_ms() -> u64 {
    500
}

fn default_stagger_delay_ms() -> u64 {
    150
}

fn default_recent_window() -> usize {
    20
}

fn default_finished_retention() -> usize {
    200
}

fn default_store_write_timeout_ms() -> u64 {
    5000
}

fn default_duplicate_stale_after_secs() -> u64 {
    30 * 60
}

fn default_output_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_schema_version() -> u32 {
    1
}

pub fn default_filename_template() -> String {
    "%(title).200s [%(id)s].%(ext)s".into()
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent_downloads(),
            tick_interval_ms: default_tick_interval_ms(),
            max_retries: default_max_retries(),
            progress_sync_interval_ms: default_progress_sync_interval_ms(),
            stagger_delay_ms: default_stagger_delay_ms(),
            recent_window: default_recent_window(),
            finished_retention: default_finished_retention(),
            store_write_timeout_ms: default_store_write_timeout_ms(),
            duplicate_stale_after_secs: default_duplicate_stale_after_secs(),
        }
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            default_output_dir: default_output_dir(),
            ytdlp_path: None,
            filename_template: default_filename_template(),
            extra_ytdlp_flags: Vec::new(),
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            queue: QueueSettings::default(),
            download: DownloadSettings::default(),
        }
    }
}
