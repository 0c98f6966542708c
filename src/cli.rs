use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use mediaq_core::core::events::{EventEmitter, QueueItemProgress, QueueSnapshot};
use mediaq_core::fs_paths::AppPaths;
use tokio_util::sync::CancellationToken;

use crate::core::scheduler::Scheduler;
use crate::core::ytdlp;
use crate::error::QueueError;
use crate::models::download::SubmitOptions;
use crate::storage::config;
use crate::storage::sqlite::SqliteStore;
use crate::storage::store::{DurableStore, MemoryStore};

const DB_FILE: &str = "mediaq.sqlite";

#[derive(Parser)]
#[command(name = "mediaq")]
#[command(version, about = "Download queue for yt-dlp")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue one or more urls and wait until they finish
    Download {
        #[arg(required = true, value_name = "URL")]
        urls: Vec<String>,

        /// Higher runs first
        #[arg(short, long, default_value_t = 0, allow_hyphen_values = true)]
        priority: i32,

        /// yt-dlp format selector, passed through as -f
        #[arg(short, long)]
        format: Option<String>,

        /// Height cap such as 720p; ignored when --format is set
        #[arg(short, long)]
        quality: Option<String>,

        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        #[arg(long, value_name = "N")]
        max_concurrent: Option<u32>,

        /// Keep job state in memory instead of the local database
        #[arg(long)]
        ephemeral: bool,
    },

    /// Show or change settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    Show,
    /// Deep-merge a JSON object into the settings
    Set {
        #[arg(value_name = "JSON")]
        json: String,
    },
    Reset,
}

/// Logs progress for terminal runs.
struct LogEmitter;

impl EventEmitter for LogEmitter {
    fn emit_queue_state(&self, snapshot: &QueueSnapshot) {
        let s = &snapshot.stats;
        tracing::debug!(
            "queue: {} queued, {} downloading, {} completed, {} failed",
            s.queued,
            s.downloading,
            s.completed,
            s.failed
        );
    }

    fn emit_progress(&self, p: &QueueItemProgress) {
        let name = p.title.clone().unwrap_or_else(|| p.id.to_string());
        tracing::info!(
            "{:>3}% {} ({} of {}, {}, eta {})",
            p.percent,
            name,
            p.downloaded.as_deref().unwrap_or("?"),
            p.total.as_deref().unwrap_or("?"),
            p.speed.as_deref().unwrap_or("-"),
            p.eta.as_deref().unwrap_or("-")
        );
    }
}

/// Runs a parsed command line. Returns the process exit code.
pub async fn execute(cli: Cli, paths: &dyn AppPaths) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Download {
            urls,
            priority,
            format,
            quality,
            output_dir,
            max_concurrent,
            ephemeral,
        } => {
            let opts = SubmitOptions {
                priority,
                format,
                quality,
                output_dir,
            };
            download(paths, &urls, opts, max_concurrent, ephemeral).await
        }
        Commands::Config { command } => {
            let settings = match command {
                ConfigCommands::Show => config::load_settings(paths),
                ConfigCommands::Set { json } => {
                    let patch: serde_json::Value =
                        serde_json::from_str(&json).context("settings patch is not valid JSON")?;
                    config::update_settings(paths, &patch)?
                }
                ConfigCommands::Reset => config::reset_settings(paths)?,
            };
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(0)
        }
    }
}

async fn download(
    paths: &dyn AppPaths,
    urls: &[String],
    opts: SubmitOptions,
    max_concurrent: Option<u32>,
    ephemeral: bool,
) -> anyhow::Result<i32> {
    let mut settings = config::load_settings(paths);
    if let Some(n) = max_concurrent {
        settings.queue.max_concurrent_downloads = n.max(1);
    }

    let bin_dir = paths.bin_dir();
    let engine = ytdlp::find_ytdlp(settings.download.ytdlp_path.as_deref(), bin_dir.as_deref())
        .await
        .ok_or_else(|| anyhow!("yt-dlp not found; install it or set download.ytdlp_path"))?;
    tracing::debug!("using {}", engine.display());
    settings.download.ytdlp_path = Some(engine);

    let store: Arc<dyn DurableStore> = if ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(SqliteStore::open(&paths.data_dir().join(DB_FILE))?)
    };
    let scheduler = Arc::new(Scheduler::with_bin_dir(
        settings,
        bin_dir,
        store,
        Arc::new(LogEmitter),
    ));

    let outcome = match scheduler.submit(urls, opts).await {
        Ok(outcome) => outcome,
        Err(QueueError::AllDuplicates { skipped }) => {
            for s in &skipped {
                println!("skipped {}: {}", s.url, s.reason);
            }
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };
    for s in &outcome.skipped {
        println!("skipped {}: {}", s.url, s.reason);
    }

    let shutdown = CancellationToken::new();
    let runner = {
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("interrupted, cancelling downloads");
                for id in &outcome.accepted {
                    if let Err(e) = scheduler.cancel(*id).await {
                        tracing::debug!("cancel {}: {}", id, e);
                    }
                }
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                if scheduler.is_idle().await {
                    break;
                }
            }
        }
    }

    shutdown.cancel();
    runner.await?;

    let status = scheduler.get_status().await;
    for item in &status.completed {
        println!(
            "done    {}",
            item.file_path.as_deref().unwrap_or(&item.url)
        );
    }
    for item in &status.failed {
        println!(
            "failed  {}: {}",
            item.url,
            item.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(if status.stats.failed > 0 { 1 } else { 0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaq_core::fs_paths::RootedPaths;

    #[test]
    fn download_args_parse() {
        let cli = Cli::try_parse_from([
            "mediaq",
            "download",
            "https://youtu.be/a",
            "https://youtu.be/b",
            "--priority",
            "-2",
            "-q",
            "720p",
            "--ephemeral",
        ])
        .unwrap();
        match cli.command {
            Commands::Download {
                urls,
                priority,
                quality,
                ephemeral,
                format,
                ..
            } => {
                assert_eq!(urls.len(), 2);
                assert_eq!(priority, -2);
                assert_eq!(quality.as_deref(), Some("720p"));
                assert!(format.is_none());
                assert!(ephemeral);
            }
            _ => panic!("expected download"),
        }
    }

    #[test]
    fn download_requires_a_url() {
        assert!(Cli::try_parse_from(["mediaq", "download"]).is_err());
    }

    #[tokio::test]
    async fn config_set_persists() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RootedPaths {
            root: dir.path().to_path_buf(),
        };
        let cli = Cli::try_parse_from([
            "mediaq",
            "config",
            "set",
            r#"{"queue":{"max_retries":7}}"#,
        ])
        .unwrap();
        assert_eq!(execute(cli, &paths).await.unwrap(), 0);
        assert_eq!(config::load_settings(&paths).queue.max_retries, 7);

        let bad = Cli::try_parse_from(["mediaq", "config", "set", "{nope"]).unwrap();
        assert!(execute(bad, &paths).await.is_err());
    }
}
