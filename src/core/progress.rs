//! Parsing of yt-dlp's line-oriented console output.
//!
//! Everything here is a pure function over `&str`; the worker feeds it one line
//! at a time per job and owns whatever state results from it.

use std::sync::LazyLock;

use regex::Regex;

static PERCENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\[download\]|download:)?\s*(-?\d+(?:\.\d+)?)\s*%").unwrap()
});
static TOTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bof\s+~?\s*(\d+(?:\.\d+)?)\s*([KkMGTP]?i?B)\b").unwrap());
static SPEED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bat\s+(\d+(?:\.\d+)?)\s*([KkMGTP]?i?B)/s").unwrap());
static ETA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bETA\s+((?:\d+:)?\d{1,2}:\d{2})").unwrap());
static DESTINATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:\[[^\]]+\]\s*)?Destination:\s*(.+)$").unwrap());
static MERGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Merging formats into\s+(.+)$").unwrap());
static ALREADY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\[download\]\s+(.+?)\s+has already been downloaded").unwrap()
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressEvent {
    pub percent: u8,
    pub total_bytes: Option<u64>,
    pub total: Option<String>,
    pub downloaded_bytes: Option<u64>,
    pub downloaded: Option<String>,
    pub speed_bytes_per_sec: Option<f64>,
    pub speed: Option<String>,
    pub eta_seconds: Option<u64>,
    pub eta: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationEvent {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Progress(ProgressEvent),
    Destination(DestinationEvent),
}

pub fn parse_line(line: &str) -> Option<ParsedLine> {
    if let Some(dest) = parse_destination(line) {
        return Some(ParsedLine::Destination(dest));
    }
    parse_progress(line).map(ParsedLine::Progress)
}

pub fn parse_destination(line: &str) -> Option<DestinationEvent> {
    let raw = DESTINATION_RE
        .captures(line)
        .or_else(|| MERGE_RE.captures(line))
        .or_else(|| ALREADY_RE.captures(line))?
        .get(1)?
        .as_str();

    let path = normalize_path(raw);
    if path.is_empty() {
        return None;
    }
    Some(DestinationEvent { path })
}

pub fn parse_progress(line: &str) -> Option<ProgressEvent> {
    let raw_percent: f64 = PERCENT_RE.captures(line)?.get(1)?.as_str().parse().ok()?;
    let fraction = if raw_percent.is_finite() {
        raw_percent.clamp(0.0, 100.0)
    } else {
        0.0
    };

    let mut event = ProgressEvent {
        percent: fraction.round() as u8,
        ..Default::default()
    };

    if let Some(caps) = TOTAL_RE.captures(line) {
        let value = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let unit = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        if let Some((total, binary)) = to_bytes(value, unit) {
            let downloaded = (total as f64 * fraction / 100.0) as u64;
            event.total_bytes = Some(total);
            event.total = Some(format!("{}{}", value, unit));
            event.downloaded_bytes = Some(downloaded);
            event.downloaded = Some(format_bytes(downloaded, binary));
        }
    }

    if let Some(caps) = SPEED_RE.captures(line) {
        let value = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let unit = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        if let Some((bytes, _)) = to_bytes(value, unit) {
            event.speed_bytes_per_sec = Some(bytes as f64);
            event.speed = Some(format!("{}{}/s", value, unit));
        }
    }

    if let Some(caps) = ETA_RE.captures(line) {
        let eta = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        event.eta_seconds = parse_clock(eta);
        event.eta = Some(eta.to_string());
    }

    Some(event)
}

/// Returns the multiplier for a size unit and whether it is a binary (`KiB`) unit.
fn unit_factor(unit: &str) -> Option<(f64, bool)> {
    let body = unit.strip_suffix('B')?;
    let (prefix, binary) = match body.strip_suffix('i') {
        Some(p) => (p, true),
        None => (body, false),
    };
    let exp = match prefix.to_ascii_uppercase().as_str() {
        "" if !binary => 0,
        "K" => 1,
        "M" => 2,
        "G" => 3,
        "T" => 4,
        "P" => 5,
        _ => return None,
    };
    let base: f64 = if binary { 1024.0 } else { 1000.0 };
    Some((base.powi(exp), binary))
}

pub fn to_bytes(value: &str, unit: &str) -> Option<(u64, bool)> {
    let value: f64 = value.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let (factor, binary) = unit_factor(unit.trim())?;
    Some(((value * factor).round() as u64, binary))
}

pub fn format_bytes(bytes: u64, binary: bool) -> String {
    let (base, units): (f64, [&str; 5]) = if binary {
        (1024.0, ["B", "KiB", "MiB", "GiB", "TiB"])
    } else {
        (1000.0, ["B", "KB", "MB", "GB", "TB"])
    };

    if (bytes as f64) < base {
        return format!("{}B", bytes);
    }

    let mut value = bytes as f64;
    let mut idx = 0;
    while value >= base && idx < units.len() - 1 {
        value /= base;
        idx += 1;
    }
    format!("{:.2}{}", value, units[idx])
}

fn parse_clock(text: &str) -> Option<u64> {
    text.split(':')
        .try_fold(0u64, |acc, part| Some(acc * 60 + part.parse::<u64>().ok()?))
}

fn normalize_path(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(line: &str) -> ProgressEvent {
        match parse_line(line) {
            Some(ParsedLine::Progress(p)) => p,
            other => panic!("expected progress, got {:?}", other),
        }
    }

    fn destination(line: &str) -> String {
        match parse_line(line) {
            Some(ParsedLine::Destination(d)) => d.path,
            other => panic!("expected destination, got {:?}", other),
        }
    }

    #[test]
    fn full_progress_line() {
        let p = progress("[download]  42.0% of 10.0MiB at 1.0MiB/s ETA 00:05");
        assert_eq!(p.percent, 42);
        assert_eq!(p.total_bytes, Some(10 * 1024 * 1024));
        assert_eq!(p.total.as_deref(), Some("10.0MiB"));
        assert_eq!(p.downloaded_bytes, Some(4_404_019));
        assert_eq!(p.downloaded.as_deref(), Some("4.20MiB"));
        assert_eq!(p.speed_bytes_per_sec, Some(1_048_576.0));
        assert_eq!(p.speed.as_deref(), Some("1.0MiB/s"));
        assert_eq!(p.eta_seconds, Some(5));
    }

    #[test]
    fn percentage_only_line() {
        let p = progress("150.0%");
        assert_eq!(p.percent, 100);
        assert!(p.speed.is_none());
        assert!(p.eta.is_none());
        assert!(p.total_bytes.is_none());
    }

    #[test]
    fn negative_percentage_clamps_to_zero() {
        assert_eq!(progress("[download] -3.5%").percent, 0);
    }

    #[test]
    fn percentage_is_rounded() {
        assert_eq!(progress("[download]  12.5% of 1.00GiB").percent, 13);
        assert_eq!(progress("[download]  12.4%").percent, 12);
    }

    #[test]
    fn progress_template_prefix() {
        assert_eq!(progress("download: 73.1%").percent, 73);
    }

    #[test]
    fn decimal_units_use_powers_of_ten() {
        let p = progress("[download]  50.0% of 2.00MB at 500.00KB/s ETA 00:02");
        assert_eq!(p.total_bytes, Some(2_000_000));
        assert_eq!(p.downloaded.as_deref(), Some("1.00MB"));
        assert_eq!(p.speed_bytes_per_sec, Some(500_000.0));
    }

    #[test]
    fn approximate_size_and_unknown_speed() {
        let p = progress("[download]   3.0% of ~ 120.50MiB at Unknown B/s ETA Unknown");
        assert_eq!(p.percent, 3);
        assert!(p.total_bytes.is_some());
        assert!(p.speed.is_none());
        assert!(p.eta.is_none());
    }

    #[test]
    fn final_line_with_elapsed_time() {
        let p = progress("[download] 100% of   10.00MiB in 00:00:03 at 2.91MiB/s");
        assert_eq!(p.percent, 100);
        assert_eq!(p.downloaded_bytes, p.total_bytes);
        assert!(p.eta.is_none());
    }

    #[test]
    fn long_eta() {
        let p = progress("[download]   1.0% of 5.00GiB at 1.00MiB/s ETA 1:23:20");
        assert_eq!(p.eta_seconds, Some(5000));
    }

    #[test]
    fn destination_line() {
        assert_eq!(
            destination("[download] Destination: /tmp/out [id123].mp4"),
            "/tmp/out [id123].mp4"
        );
        assert_eq!(destination("Destination: /tmp/out [id123].mp4"), "/tmp/out [id123].mp4");
    }

    #[test]
    fn merge_line_strips_quotes() {
        assert_eq!(
            destination(r#"[Merger] Merging formats into "/tmp/My Video [abc].mp4""#),
            "/tmp/My Video [abc].mp4"
        );
    }

    #[test]
    fn already_downloaded_line() {
        assert_eq!(
            destination("[download] /tmp/x [abc].mp4 has already been downloaded"),
            "/tmp/x [abc].mp4"
        );
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        assert!(parse_line("[youtube] abc: Downloading webpage").is_none());
        assert!(parse_line("").is_none());
        assert!(parse_line("WARNING: 50 formats available").is_none());
    }

    #[test]
    fn size_units() {
        assert_eq!(to_bytes("1", "KiB"), Some((1024, true)));
        assert_eq!(to_bytes("1", "KB"), Some((1000, false)));
        assert_eq!(to_bytes("1", "kB"), Some((1000, false)));
        assert_eq!(to_bytes("1.5", "GiB"), Some((1_610_612_736, true)));
        assert_eq!(to_bytes("12", "B"), Some((12, false)));
        assert_eq!(to_bytes("1", "iB"), None);
        assert_eq!(to_bytes("x", "MB"), None);
    }

    #[test]
    fn human_sizes() {
        assert_eq!(format_bytes(512, true), "512B");
        assert_eq!(format_bytes(1536, true), "1.50KiB");
        assert_eq!(format_bytes(2_500_000, false), "2.50MB");
    }
}
