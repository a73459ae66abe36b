//! Scene boundaries from ffmpeg's `scdet` filter.
//!
//! ffmpeg scores every frame against the previous one and prints
//! `lavfi.scd.score` / `lavfi.scd.time` pairs on stderr when `s=1`.
//! Boundaries above the threshold split the video into contiguous scenes.
//! Detection never fails the caller: any problem degrades to a single
//! scene covering the whole video.

use std::path::Path;
use std::process::Command;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::export::format_timestamp;
use crate::media::{self, VideoInfo};
use crate::transcriber::Segment;

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("ffmpeg execution failed: {0}")]
    Ffmpeg(String),
    #[error(transparent)]
    Media(#[from] media::MediaError),
}

#[derive(Debug, Clone)]
pub struct SceneDetectorConfig {
    /// scdet threshold in percent (0-100). Lower detects more cuts.
    pub threshold: f64,
    /// Scenes shorter than this many seconds are discarded.
    pub min_scene_duration: f64,
}

impl Default for SceneDetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 10.0,
            min_scene_duration: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Boundary {
    timestamp: f64,
    score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scene {
    pub index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub start_frame: u64,
    pub end_frame: u64,
}

impl Scene {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    pub fn midpoint(&self) -> f64 {
        self.start_time + self.duration() / 2.0
    }

    pub fn summary(&self) -> String {
        format!(
            "Scene from {} to {} (duration: {})",
            format_timestamp(self.start_time),
            format_timestamp(self.end_time),
            format_timestamp(self.duration())
        )
    }
}

/// Detect scenes in `video`. Falls back to one whole-video scene.
pub fn detect_scenes(video: &Path, config: &SceneDetectorConfig, info: &VideoInfo) -> Vec<Scene> {
    let boundaries = match run_scdet(video, config.threshold) {
        Ok(boundaries) => boundaries,
        Err(e) => {
            warn!("scene detection failed, using the whole video as one scene: {e}");
            Vec::new()
        }
    };

    let scenes = build_scenes(&boundaries, info, config.min_scene_duration);
    info!(
        boundaries = boundaries.len(),
        scenes = scenes.len(),
        "scene detection finished"
    );
    scenes
}

fn run_scdet(video: &Path, threshold: f64) -> Result<Vec<Boundary>, SceneError> {
    media::check_dependency("ffmpeg")?;

    let output = Command::new("ffmpeg")
        .arg("-hide_banner")
        .arg("-i")
        .arg(video)
        .arg("-vf")
        .arg(format!("scdet=t={threshold}:s=1"))
        .args(["-an", "-f", "null", "-"])
        .output()
        .map_err(|e| SceneError::Ffmpeg(e.to_string()))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        return Err(SceneError::Ffmpeg(stderr.into_owned()));
    }

    Ok(parse_boundaries(&stderr, threshold))
}

fn parse_boundaries(stderr: &str, threshold: f64) -> Vec<Boundary> {
    stderr
        .lines()
        .filter_map(parse_scdet_line)
        .filter(|b| b.score >= threshold)
        .collect()
}

/// Parse `[scdet @ 0x...] lavfi.scd.score: 4.793, lavfi.scd.time: 7.433333`.
fn parse_scdet_line(line: &str) -> Option<Boundary> {
    const SCORE: &str = "lavfi.scd.score: ";
    const TIME: &str = "lavfi.scd.time: ";

    let score_at = line.find(SCORE)? + SCORE.len();
    let score = line[score_at..].split(',').next()?.trim().parse().ok()?;

    let time_at = line.find(TIME)? + TIME.len();
    let timestamp = line[time_at..].split_whitespace().next()?.parse().ok()?;

    Some(Boundary { timestamp, score })
}

/// Turn cut points into contiguous scenes from 0 to the video duration and
/// drop those shorter than `min_duration`.
fn build_scenes(boundaries: &[Boundary], info: &VideoInfo, min_duration: f64) -> Vec<Scene> {
    let mut cuts: Vec<f64> = boundaries
        .iter()
        .map(|b| b.timestamp)
        .filter(|&t| t > 0.0 && t < info.duration)
        .collect();
    cuts.sort_by(|a, b| a.total_cmp(b));
    cuts.dedup();

    let mut edges = Vec::with_capacity(cuts.len() + 2);
    edges.push(0.0);
    edges.extend(cuts);
    edges.push(info.duration);

    let scenes: Vec<Scene> = edges
        .windows(2)
        .filter(|w| w[1] - w[0] >= min_duration)
        .enumerate()
        .map(|(index, w)| scene(index, w[0], w[1], info.fps))
        .collect();

    if scenes.is_empty() {
        debug!("no scene long enough, falling back to the whole video");
        return vec![scene(0, 0.0, info.duration, info.fps)];
    }
    scenes
}

fn scene(index: usize, start_time: f64, end_time: f64, fps: f64) -> Scene {
    let start_frame = (start_time * fps).round() as u64;
    let end_frame = ((end_time * fps).round() as u64)
        .saturating_sub(1)
        .max(start_frame);
    Scene {
        index,
        start_time,
        end_time,
        start_frame,
        end_frame,
    }
}

/// Transcript text spoken during a scene: segments whose start or end lies
/// inside `[start, end]`, joined by a space.
pub fn scene_transcript(segments: &[Segment], start: f64, end: f64) -> String {
    let inside = |t: f64| start <= t && t <= end;
    segments
        .iter()
        .filter(|seg| inside(seg.start) || inside(seg.end))
        .map(|seg| seg.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(duration: f64) -> VideoInfo {
        VideoInfo {
            duration,
            width: 1280,
            height: 720,
            fps: 30.0,
        }
    }

    fn cut(timestamp: f64) -> Boundary {
        Boundary {
            timestamp,
            score: 50.0,
        }
    }

    #[test]
    fn parses_scdet_lines() {
        let line = "[scdet @ 0x600003a3bc00] lavfi.scd.score: 4.793, lavfi.scd.time: 7.433333";
        let b = parse_scdet_line(line).unwrap();
        assert_eq!(b.score, 4.793);
        assert_eq!(b.timestamp, 7.433333);

        let line = "[scdet @ 0x1] lavfi.scd.score: 1.094, lavfi.scd.time: 8.883333 frame= 123";
        assert_eq!(parse_scdet_line(line).unwrap().timestamp, 8.883333);

        assert!(parse_scdet_line("frame=  100 fps=0.0 q=-0.0").is_none());
    }

    #[test]
    fn boundaries_below_threshold_are_ignored() {
        let stderr = "\
[scdet @ 0x1] lavfi.scd.score: 4.000, lavfi.scd.time: 2.0
[scdet @ 0x1] lavfi.scd.score: 12.500, lavfi.scd.time: 5.0
[scdet @ 0x1] lavfi.scd.score: 30.000, lavfi.scd.time: 9.0";
        let found = parse_boundaries(stderr, 10.0);
        assert_eq!(found, vec![
            Boundary { timestamp: 5.0, score: 12.5 },
            Boundary { timestamp: 9.0, score: 30.0 },
        ]);
    }

    #[test]
    fn scenes_cover_the_video() {
        let scenes = build_scenes(&[cut(4.0), cut(10.0)], &info(15.0), 1.0);
        let spans: Vec<(f64, f64)> = scenes.iter().map(|s| (s.start_time, s.end_time)).collect();
        assert_eq!(spans, vec![(0.0, 4.0), (4.0, 10.0), (10.0, 15.0)]);
        assert_eq!(scenes[1].start_frame, 120);
        assert_eq!(scenes[1].end_frame, 299);
        assert_eq!(
            scenes.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn short_scenes_are_dropped_and_reindexed() {
        let scenes = build_scenes(&[cut(0.5), cut(6.0), cut(6.4)], &info(12.0), 1.0);
        let spans: Vec<(f64, f64)> = scenes.iter().map(|s| (s.start_time, s.end_time)).collect();
        assert_eq!(spans, vec![(0.5, 6.0), (6.4, 12.0)]);
        assert_eq!(scenes[1].index, 1);
    }

    #[test]
    fn no_boundaries_means_one_scene() {
        let scenes = build_scenes(&[], &info(8.0), 1.0);
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].start_time, 0.0);
        assert_eq!(scenes[0].end_time, 8.0);
    }

    #[test]
    fn very_short_video_still_yields_a_scene() {
        let scenes = build_scenes(&[], &info(0.4), 1.0);
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].end_time, 0.4);
    }

    #[test]
    fn transcript_uses_start_or_end_overlap() {
        let segments = vec![
            Segment { start: 0.0, end: 1.5, text: "before".into() },
            Segment { start: 1.8, end: 4.0, text: "straddles start".into() },
            Segment { start: 2.5, end: 3.0, text: " inside ".into() },
            Segment { start: 4.5, end: 7.0, text: "straddles end".into() },
            Segment { start: 8.0, end: 9.0, text: "after".into() },
        ];
        assert_eq!(
            scene_transcript(&segments, 2.0, 5.0),
            "straddles start inside straddles end"
        );
        assert_eq!(scene_transcript(&segments, 10.0, 12.0), "");
    }

    #[test]
    fn a_segment_spanning_the_whole_scene_is_not_included() {
        let segments = vec![Segment { start: 0.0, end: 10.0, text: "long".into() }];
        assert_eq!(scene_transcript(&segments, 2.0, 5.0), "");
    }

    #[test]
    fn summary_mentions_bounds() {
        let s = scene(0, 5.0, 65.5, 30.0);
        assert_eq!(s.summary(), "Scene from 00:05.00 to 01:05.50 (duration: 01:00.50)");
        assert_eq!(s.midpoint(), 35.25);
    }
}
