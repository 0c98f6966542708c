/// Best-effort stable identifier for a source URL, used for de-duplication and
/// for locating the output file (`[%(id)s]` in the filename template).
pub fn extract_media_id(url_str: &str) -> Option<String> {
    let parsed = url::Url::parse(url_str.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.trim_start_matches("www.").trim_start_matches("m.");
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let id = if host == "youtu.be" {
        segments.first().map(|s| s.to_string())
    } else if host.ends_with("youtube.com") {
        parse_youtube(&parsed, &segments)
    } else if host.ends_with("vimeo.com") {
        parse_vimeo(&segments)
    } else if host.ends_with("tiktok.com") {
        parse_tiktok(&segments)
    } else if host == "twitter.com" || host == "x.com" {
        parse_twitter(&segments)
    } else if host.ends_with("instagram.com") {
        parse_instagram(&segments)
    } else if host.ends_with("twitch.tv") {
        parse_twitch(host, &segments)
    } else if host.ends_with("reddit.com") {
        parse_reddit(&segments)
    } else if host.ends_with("dailymotion.com") {
        parse_dailymotion(&segments)
    } else {
        None
    };

    id.or_else(|| query_param(&parsed, "id"))
        .or_else(|| query_param(&parsed, "v"))
        .filter(|id| !id.is_empty())
}

fn query_param(parsed: &url::Url, key: &str) -> Option<String> {
    parsed
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.to_string())
}

fn parse_youtube(parsed: &url::Url, segments: &[&str]) -> Option<String> {
    if let Some(v) = query_param(parsed, "v") {
        return Some(v);
    }
    match segments.first() {
        Some(&"shorts") | Some(&"embed") | Some(&"live") | Some(&"v") => {
            segments.get(1).map(|s| s.to_string())
        }
        _ => None,
    }
}

fn parse_vimeo(segments: &[&str]) -> Option<String> {
    segments
        .iter()
        .rev()
        .find(|s| s.chars().all(|c| c.is_ascii_digit()))
        .map(|s| s.to_string())
}

fn parse_tiktok(segments: &[&str]) -> Option<String> {
    if segments.first().is_some_and(|s| s.starts_with('@')) && segments.get(1) == Some(&"video") {
        return segments.get(2).map(|s| s.to_string());
    }
    None
}

fn parse_twitter(segments: &[&str]) -> Option<String> {
    if segments.len() >= 3 && segments.get(1) == Some(&"status") {
        return segments.get(2).map(|s| s.to_string());
    }
    None
}

fn parse_instagram(segments: &[&str]) -> Option<String> {
    match segments.first() {
        Some(&"p") | Some(&"reel") | Some(&"reels") | Some(&"tv") => {
            segments.get(1).map(|s| s.to_string())
        }
        _ => None,
    }
}

fn parse_twitch(host: &str, segments: &[&str]) -> Option<String> {
    if segments.first() == Some(&"videos") {
        return segments.get(1).map(|s| s.to_string());
    }
    if host.starts_with("clips.") {
        return segments.first().map(|s| s.to_string());
    }
    if segments.get(1) == Some(&"clip") {
        return segments.get(2).map(|s| s.to_string());
    }
    None
}

fn parse_reddit(segments: &[&str]) -> Option<String> {
    if segments.len() >= 4 && segments.first() == Some(&"r") && segments.get(2) == Some(&"comments") {
        return segments.get(3).map(|s| s.to_string());
    }
    if segments.first() == Some(&"comments") {
        return segments.get(1).map(|s| s.to_string());
    }
    None
}

fn parse_dailymotion(segments: &[&str]) -> Option<String> {
    if segments.first() == Some(&"video") {
        return segments.get(1).map(|s| s.to_string());
    }
    None
}
