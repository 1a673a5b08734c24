//! Video probing via the ffmpeg/ffprobe CLI tools.

use std::path::Path;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use skonrad_core::VideoProber;
use tokio::process::Command;

static VIDEO_STREAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)stream.+?video").unwrap());

/// [`VideoProber`] backed by `ffprobe` and `ffmpeg` subprocesses.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegVideoProber;

#[async_trait]
impl VideoProber for FfmpegVideoProber {
    async fn duration_seconds(&self, path: &Path) -> Result<f64> {
        let output = Command::new("ffprobe")
            .args(["-v", "error", "-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("failed to spawn ffprobe")?;
        if !output.status.success() {
            bail!(
                "ffprobe failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .with_context(|| format!("unparsable duration for {}", path.display()))
    }

    async fn frame_at_offset(&self, path: &Path, seconds: f64) -> Result<DynamicImage> {
        let output = Command::new("ffmpeg")
            .args(["-ss", &format_ffmpeg_time(seconds)])
            .arg("-i")
            .arg(path)
            .args(["-vframes", "1", "-f", "singlejpeg", "-"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("failed to spawn ffmpeg")?;
        if !output.status.success() {
            bail!(
                "ffmpeg failed to extract a frame at {seconds}s from {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        image::load_from_memory(&output.stdout)
            .with_context(|| format!("undecodable frame from {}", path.display()))
    }

    /// Whether ffprobe lists a video stream. Probe failures default to true
    /// so a broken probe never hides a real video.
    async fn has_video_stream(&self, path: &Path) -> Result<bool> {
        let output = match Command::new("ffprobe")
            .arg("-i")
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!("ffprobe unavailable for {}: {err}", path.display());
                return Ok(true);
            }
        };
        if !output.status.success() {
            return Ok(true);
        }
        let listing = format!(
            "{} {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        Ok(VIDEO_STREAM_RE.is_match(&listing))
    }
}

/// `HH:MM:SS.ss` timestamp for ffmpeg's `-ss` flag.
fn format_ffmpeg_time(seconds: f64) -> String {
    let hours = (seconds / 3600.0) as u64;
    let minutes = ((seconds % 3600.0) / 60.0) as u64;
    let secs = seconds % 60.0;
    format!("{hours:02}:{minutes:02}:{secs:05.2}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ffmpeg_time() {
        assert_eq!(format_ffmpeg_time(0.0), "00:00:00.00");
        assert_eq!(format_ffmpeg_time(1.5), "00:00:01.50");
        assert_eq!(format_ffmpeg_time(65.25), "00:01:05.25");
        assert_eq!(format_ffmpeg_time(3725.0), "01:02:05.00");
    }

    #[test]
    fn test_video_stream_regex() {
        assert!(VIDEO_STREAM_RE
            .is_match("Stream #0:0(und): Video: h264 (High) (avc1 / 0x31637661)"));
        assert!(!VIDEO_STREAM_RE.is_match("Stream #0:0(und): Audio: aac (LC)"));
    }
}
