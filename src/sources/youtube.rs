use std::{sync::LazyLock, time::Duration};

use async_process::Command;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use songbird::input::{HttpRequest, Input};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{MediaResolver, ResolveError};
use crate::audio::queue::Track;

static YOUTUBE_URL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^(https?://)?(www\.|m\.)?(youtube\.com/(watch\?v=|embed/|v/|shorts/)|youtu\.be/|music\.youtube\.com/watch\?v=)",
    )
    .ok()
});

/// Metadata printed by `yt-dlp --dump-json`
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: String,
    title: String,
    duration: Option<f64>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    is_live: Option<bool>,
}

impl YtDlpInfo {
    fn into_track(self, requested_by: &str) -> Track {
        let url = self
            .webpage_url
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", self.id));
        let label = duration_label(self.duration, self.is_live.unwrap_or(false));

        let track = Track::new(self.title, url, label, requested_by);
        match self.thumbnail {
            Some(thumbnail) => track.with_thumbnail(thumbnail),
            None => track,
        }
    }
}

/// Resolver backed by the `yt-dlp` executable
pub struct YouTubeResolver {
    ytdlp_path: String,
    client: reqwest::Client,
    // caps concurrent yt-dlp processes
    permits: Semaphore,
}

impl YouTubeResolver {
    pub fn new(ytdlp_path: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            ytdlp_path: ytdlp_path.into(),
            client,
            permits: Semaphore::new(3),
        }
    }

    /// Checks that yt-dlp can be executed.
    pub async fn verify(&self) -> anyhow::Result<String> {
        let output = Command::new(&self.ytdlp_path).arg("--version").output().await?;
        if !output.status.success() {
            anyhow::bail!("{} --version exited with {}", self.ytdlp_path, output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run(&self, args: &[&str]) -> Result<String, ResolveError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ResolveError::Other(e.to_string()))?;

        let output = Command::new(&self.ytdlp_path)
            .args(args)
            .output()
            .await
            .map_err(|e| ResolveError::Other(format!("failed to run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp error: {}", stderr.trim());
            return Err(classify_failure(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl MediaResolver<Input> for YouTubeResolver {
    async fn resolve(&self, query: &str, requested_by: &str) -> Result<Track, ResolveError> {
        let target = if is_youtube_url(query) {
            debug!("📊 Fetching info for: {}", query);
            query.to_string()
        } else {
            info!("🔍 Buscando en YouTube: {}", query);
            format!("ytsearch1:{}", query)
        };

        let stdout = self
            .run(&["--no-playlist", "--dump-json", "--no-warnings", &target])
            .await?;

        parse_first_entry(&stdout).map(|info| info.into_track(requested_by))
    }

    async fn open_stream(&self, url: &str) -> Result<Input, ResolveError> {
        debug!("🎵 Fetching stream URL for: {}", url);

        let stdout = self
            .run(&["--no-playlist", "-f", "bestaudio/best", "--get-url", "--no-warnings", url])
            .await?;

        let stream_url = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or(ResolveError::NotFound)?;

        Ok(Input::from(HttpRequest::new(self.client.clone(), stream_url.to_string())))
    }
}

/// Whether `query` is a YouTube URL
pub fn is_youtube_url(url: &str) -> bool {
    YOUTUBE_URL.as_ref().is_some_and(|re| re.is_match(url.trim()))
}

fn parse_first_entry(stdout: &str) -> Result<YtDlpInfo, ResolveError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or(ResolveError::NotFound)?;

    serde_json::from_str(line)
        .map_err(|e| ResolveError::Other(format!("unreadable yt-dlp output: {}", e)))
}

fn classify_failure(stderr: &str) -> ResolveError {
    if stderr.contains("HTTP Error 429") || stderr.contains("Too Many Requests") {
        return ResolveError::RateLimited;
    }

    const MISSING: [&str; 4] = [
        "Video unavailable",
        "Unsupported URL",
        "Private video",
        "This video has been removed",
    ];
    if MISSING.iter().any(|needle| stderr.contains(needle)) {
        return ResolveError::NotFound;
    }

    let reason = stderr
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.trim_start_matches("ERROR:").trim().to_string())
        .unwrap_or_else(|| "yt-dlp failed".to_string());
    ResolveError::Other(reason)
}

/// Formats seconds as `m:ss` / `h:mm:ss`
pub fn duration_label(duration: Option<f64>, is_live: bool) -> String {
    if is_live {
        return "🔴 LIVE".to_string();
    }

    let Some(seconds) = duration.filter(|d| d.is_finite() && *d >= 0.0) else {
        return "Unknown".to_string();
    };

    let total = seconds.round() as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_youtube_url_detection() {
        assert!(is_youtube_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_youtube_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(is_youtube_url("youtube.com/shorts/abc123"));
        assert!(is_youtube_url("https://music.youtube.com/watch?v=abc"));

        assert!(!is_youtube_url("never gonna give you up"));
        assert!(!is_youtube_url("https://soundcloud.com/artist/track"));
    }

    #[test]
    fn test_duration_labels() {
        assert_eq!(duration_label(Some(212.0), false), "3:32");
        assert_eq!(duration_label(Some(5.4), false), "0:05");
        assert_eq!(duration_label(Some(3723.0), false), "1:02:03");
        assert_eq!(duration_label(None, false), "Unknown");
        assert_eq!(duration_label(None, true), "🔴 LIVE");
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(
            classify_failure("ERROR: [youtube] abc: HTTP Error 429: Too Many Requests"),
            ResolveError::RateLimited
        );
        assert_eq!(
            classify_failure("ERROR: [youtube] abc: Video unavailable"),
            ResolveError::NotFound
        );
        assert_eq!(
            classify_failure("ERROR: Sign in to confirm your age\n"),
            ResolveError::Other("Sign in to confirm your age".into())
        );
        assert_eq!(classify_failure(""), ResolveError::Other("yt-dlp failed".into()));
    }

    #[test]
    fn test_first_entry_becomes_track() {
        let stdout = r#"
{"id":"dQw4w9WgXcQ","title":"Never Gonna Give You Up","duration":212.0,"thumbnail":"https://i.ytimg.com/vi/dQw4w9WgXcQ/hq.jpg","webpage_url":"https://www.youtube.com/watch?v=dQw4w9WgXcQ","is_live":false,"uploader":"Rick Astley"}
"#;

        let track = parse_first_entry(stdout).unwrap().into_track("alice");

        assert_eq!(track.title(), "Never Gonna Give You Up");
        assert_eq!(track.url(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(track.duration_label(), "3:32");
        assert_eq!(track.thumbnail_url(), Some("https://i.ytimg.com/vi/dQw4w9WgXcQ/hq.jpg"));
        assert_eq!(track.requested_by(), "alice");
    }

    #[test]
    fn test_missing_webpage_url_falls_back_to_id() {
        let track = parse_first_entry(r#"{"id":"xyz","title":"Live set","is_live":true}"#)
            .unwrap()
            .into_track("bob");

        assert_eq!(track.url(), "https://www.youtube.com/watch?v=xyz");
        assert_eq!(track.duration_label(), "🔴 LIVE");
        assert_eq!(track.thumbnail_url(), None);
    }

    #[test]
    fn test_empty_output_is_not_found() {
        assert!(matches!(parse_first_entry("\n  \n"), Err(ResolveError::NotFound)));
    }
}
