use std::path::{Path, PathBuf};
use std::process::Stdio;

fn bin_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "yt-dlp.exe"
    } else {
        "yt-dlp"
    }
}

/// Resolves the download engine: explicit setting, then `PATH`, then the managed
/// copy under the data dir.
pub async fn find_ytdlp(explicit: Option<&Path>, bin_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(status) = tokio::process::Command::new(bin_name())
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        if status.success() {
            return Some(PathBuf::from(bin_name()));
        }
    }

    let managed = bin_dir?.join(bin_name());
    if managed.exists() {
        return Some(managed);
    }

    None
}

fn extract_quality_height(quality: &str) -> Option<u32> {
    let s = quality.trim().to_lowercase();
    if s == "best" || s == "highest" {
        return None;
    }
    s.trim_end_matches('p').parse::<u32>().ok()
}

/// `-f` selector: an explicit format wins, otherwise a `720p`-style quality caps
/// the height.
pub fn format_selector(format: Option<&str>, quality: Option<&str>) -> Option<String> {
    if let Some(f) = format.map(str::trim).filter(|f| !f.is_empty()) {
        return Some(f.to_string());
    }
    let height = quality.and_then(extract_quality_height).filter(|h| *h > 0)?;
    Some(format!(
        "bv*[height<={}]+ba/b[height<={}]/bv*+ba/b",
        height, height
    ))
}

pub fn output_template(output_dir: &Path, filename_template: &str) -> String {
    output_dir
        .join(filename_template)
        .to_string_lossy()
        .to_string()
}

pub fn build_args(
    url: &str,
    output_template: &str,
    format: Option<&str>,
    quality: Option<&str>,
    extra_flags: &[String],
) -> Vec<String> {
    let mut args = vec![
        url.to_string(),
        "--newline".to_string(),
        "--no-playlist".to_string(),
        "-o".to_string(),
        output_template.to_string(),
    ];

    if let Some(selector) = format_selector(format, quality) {
        args.push("-f".to_string());
        args.push(selector);
    }

    args.extend(extra_flags.iter().cloned());
    args
}

fn is_partial(name: &str) -> bool {
    name.ends_with(".part") || name.ends_with(".ytdl") || name.starts_with('.')
}

/// Newest finished file in `output_dir` whose name carries `[media_id]`, the
/// way the default filename template writes it.
pub async fn find_downloaded_file(
    output_dir: &Path,
    media_id: &str,
) -> anyhow::Result<Option<PathBuf>> {
    if media_id.is_empty() {
        return Ok(None);
    }

    let tag = format!("[{}]", media_id);
    let mut entries = tokio::fs::read_dir(output_dir).await?;
    let mut best: Option<(PathBuf, std::time::SystemTime)> = None;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if is_partial(name) || !name.contains(&tag) {
            continue;
        }

        if let Ok(meta) = entry.metadata().await {
            if let Ok(modified) = meta.modified() {
                match &best {
                    Some((_, best_time)) if modified <= *best_time => {}
                    _ => best = Some((path, modified)),
                }
            }
        }
    }

    Ok(best.map(|(p, _)| p))
}

/// Title portion of a destination file name built from the default template.
pub fn title_from_destination(path: &str, media_id: Option<&str>) -> Option<String> {
    let stem = Path::new(path).file_stem()?.to_str()?;
    // Intermediate stream files look like "Title [id].f137".
    let stem = match media_id {
        Some(id) => {
            let suffix = format!(" [{}]", id);
            stem.split(&suffix).next().unwrap_or(stem)
        }
        None => stem,
    };
    let title = stem.trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_follow_engine_contract() {
        let args = build_args("https://youtu.be/x", "/out/%(title)s [%(id)s].%(ext)s", None, None, &[]);
        assert_eq!(
            args,
            vec![
                "https://youtu.be/x",
                "--newline",
                "--no-playlist",
                "-o",
                "/out/%(title)s [%(id)s].%(ext)s"
            ]
        );
    }

    #[test]
    fn explicit_format_is_passed_through() {
        let args = build_args("u", "t", Some("140"), Some("720p"), &[]);
        assert_eq!(&args[5..], &["-f".to_string(), "140".to_string()]);
    }

    #[test]
    fn quality_becomes_height_cap() {
        assert_eq!(
            format_selector(None, Some("720p")).as_deref(),
            Some("bv*[height<=720]+ba/b[height<=720]/bv*+ba/b")
        );
        assert_eq!(format_selector(None, Some("best")), None);
        assert_eq!(format_selector(None, Some("garbage")), None);
        assert_eq!(format_selector(Some("  "), None), None);
    }

    #[test]
    fn extra_flags_are_appended() {
        let extra = vec!["--embed-metadata".to_string()];
        let args = build_args("u", "t", None, None, &extra);
        assert_eq!(args.last().map(String::as_str), Some("--embed-metadata"));
    }

    #[test]
    fn output_template_joins_dir() {
        let t = output_template(Path::new("/downloads"), "%(title).200s [%(id)s].%(ext)s");
        assert_eq!(t, "/downloads/%(title).200s [%(id)s].%(ext)s");
    }

    #[test]
    fn title_strips_media_id_suffix() {
        assert_eq!(
            title_from_destination("/tmp/My Song [abc123].mp4", Some("abc123")).as_deref(),
            Some("My Song")
        );
        assert_eq!(
            title_from_destination("/tmp/My Song [abc123].f137.mp4", Some("abc123")).as_deref(),
            Some("My Song")
        );
        assert_eq!(
            title_from_destination("/tmp/plain.mp4", None).as_deref(),
            Some("plain")
        );
    }

    #[tokio::test]
    async fn finds_file_by_media_id_skipping_partials() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Song [abc123].mp4.part"), b"x").unwrap();
        std::fs::write(dir.path().join("Other [zzz].mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("Song [abc123].mp4"), b"done").unwrap();

        let found = find_downloaded_file(dir.path(), "abc123").await.unwrap();
        assert_eq!(found, Some(dir.path().join("Song [abc123].mp4")));

        let missing = find_downloaded_file(dir.path(), "nope").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn short_id_does_not_match_inside_longer_one() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Other [x420].mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("Episode 42.mp4"), b"x").unwrap();
        assert!(find_downloaded_file(dir.path(), "42").await.unwrap().is_none());

        std::fs::write(dir.path().join("Clip [42].mp4"), b"clip").unwrap();
        let found = find_downloaded_file(dir.path(), "42").await.unwrap();
        assert_eq!(found, Some(dir.path().join("Clip [42].mp4")));
    }

    #[tokio::test]
    async fn explicit_binary_wins() {
        let found = find_ytdlp(Some(Path::new("/opt/yt-dlp")), None).await;
        assert_eq!(found, Some(PathBuf::from("/opt/yt-dlp")));
    }
}
