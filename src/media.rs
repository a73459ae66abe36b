use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("{0} not found. Install it: https://ffmpeg.org")]
    MissingBinary(&'static str),
    #[error("video file not found: {0}")]
    FileNotFound(String),
    #[error("no videos found in {0}")]
    NoVideos(String),
    #[error("ffprobe failed: {0}")]
    ProbeFailed(String),
    #[error("ffmpeg failed: {0}")]
    FfmpegFailed(String),
    #[error("no video stream in {0}")]
    NoVideoStream(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

const VIDEO_EXTENSIONS: [&str; 2] = ["mp4", "mov"];

/// Basic properties of a video file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

pub fn check_dependency(name: &'static str) -> Result<(), MediaError> {
    let result = Command::new("which").arg(name).output();
    match result {
        Ok(output) if output.status.success() => Ok(()),
        _ => Err(MediaError::MissingBinary(name)),
    }
}

fn ensure_exists(path: &Path) -> Result<(), MediaError> {
    if path.exists() {
        Ok(())
    } else {
        Err(MediaError::FileNotFound(path.display().to_string()))
    }
}

// ── ffprobe ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Read duration, resolution and frame rate of a video.
pub fn probe(path: &Path) -> Result<VideoInfo, MediaError> {
    ensure_exists(path)?;
    check_dependency("ffprobe")?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaError::ProbeFailed(stderr.into_owned()));
    }

    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
        .map_err(|e| match e {
            MediaError::NoVideoStream(_) => MediaError::NoVideoStream(path.display().to_string()),
            other => other,
        })
}

fn parse_probe_output(json: &str) -> Result<VideoInfo, MediaError> {
    let parsed: ProbeOutput = serde_json::from_str(json)?;

    let stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| MediaError::NoVideoStream(String::new()))?;

    // avg_frame_rate is "0/0" for some containers; r_frame_rate is the fallback
    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(0.0);

    let duration = stream
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| {
            parsed
                .format
                .as_ref()
                .and_then(|f| f.duration.as_deref())
                .and_then(|d| d.parse::<f64>().ok())
        })
        .unwrap_or(0.0);

    Ok(VideoInfo {
        duration,
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        fps,
    })
}

/// Parse an ffprobe rational like `30000/1001` or a plain number.
fn parse_frame_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

// ── ffmpeg ──────────────────────────────────────────────────────────────

fn ffmpeg() -> Result<Command, MediaError> {
    check_dependency("ffmpeg")?;
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-hide_banner", "-loglevel", "error", "-y"]);
    Ok(cmd)
}

fn run(mut cmd: Command) -> Result<(), MediaError> {
    let output = cmd.output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaError::FfmpegFailed(stderr.into_owned()));
    }
    Ok(())
}

/// Extract the audio track as 16kHz mono WAV (required by whisper.cpp).
pub fn extract_audio(video: &Path, wav: &Path) -> Result<PathBuf, MediaError> {
    ensure_exists(video)?;
    if let Some(parent) = wav.parent() {
        fs::create_dir_all(parent)?;
    }

    debug!(video = %video.display(), wav = %wav.display(), "extracting audio");
    let mut cmd = ffmpeg()?;
    cmd.arg("-i")
        .arg(video)
        .args(["-vn", "-ar", "16000", "-ac", "1", "-c:a", "pcm_s16le"])
        .arg(wav);
    run(cmd)?;

    Ok(wav.to_path_buf())
}

/// Grab a single JPEG frame at `timestamp` seconds.
pub fn extract_frame(video: &Path, timestamp: f64, jpg: &Path) -> Result<PathBuf, MediaError> {
    ensure_exists(video)?;
    if let Some(parent) = jpg.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut cmd = ffmpeg()?;
    cmd.arg("-ss")
        .arg(format!("{:.3}", timestamp.max(0.0)))
        .arg("-i")
        .arg(video)
        .args(["-frames:v", "1", "-q:v", "2"])
        .arg(jpg);
    run(cmd)?;

    if jpg.exists() {
        Ok(jpg.to_path_buf())
    } else {
        Err(MediaError::FfmpegFailed(format!(
            "no frame decoded at {timestamp:.2}s"
        )))
    }
}

/// All `.mp4` / `.mov` files in `dir` (any letter case), sorted by path.
pub fn find_videos(dir: &Path) -> Result<Vec<PathBuf>, MediaError> {
    if !dir.is_dir() {
        return Err(MediaError::NoVideos(dir.display().to_string()));
    }

    let mut videos: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_video(path))
        .collect();

    if videos.is_empty() {
        return Err(MediaError::NoVideos(dir.display().to_string()));
    }

    videos.sort();
    Ok(videos)
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rate_handles_rationals() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn probe_output_prefers_video_stream() {
        let json = r#"{
            "streams": [
                {"codec_type": "audio", "duration": "12.0"},
                {"codec_type": "video", "width": 1920, "height": 1080,
                 "avg_frame_rate": "0/0", "r_frame_rate": "24/1", "duration": "10.5"}
            ],
            "format": {"duration": "12.0"}
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert_eq!(info.fps, 24.0);
        assert_eq!(info.duration, 10.5);
    }

    #[test]
    fn probe_output_falls_back_to_container_duration() {
        let json = r#"{
            "streams": [{"codec_type": "video", "width": 640, "height": 480,
                         "avg_frame_rate": "30/1"}],
            "format": {"duration": "7.25"}
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.duration, 7.25);
        assert_eq!(info.fps, 30.0);
    }

    #[test]
    fn probe_output_without_video_is_an_error() {
        let json = r#"{"streams": [{"codec_type": "audio"}]}"#;
        assert!(matches!(
            parse_probe_output(json),
            Err(MediaError::NoVideoStream(_))
        ));
    }

    #[test]
    fn find_videos_matches_extensions_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.MOV", "a.mp4", "c.MP4", "notes.txt", "d.mov"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let names: Vec<String> = find_videos(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.mp4", "b.MOV", "c.MP4", "d.mov"]);
    }

    #[test]
    fn find_videos_reports_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readme.md"), b"").unwrap();
        assert!(matches!(find_videos(dir.path()), Err(MediaError::NoVideos(_))));
    }

    #[test]
    fn missing_video_is_reported() {
        let err = probe(Path::new("/definitely/not/here.mp4")).unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
