//! Cheap per-frame statistics used to describe and filter key frames.

use std::collections::HashMap;
use std::path::Path;

use image::{GrayImage, RgbImage};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum VisualError {
    #[error("failed to load frame {path}: {source}")]
    Load {
        path: String,
        source: image::ImageError,
    },
}

/// Hysteresis thresholds for the Canny edge map.
const CANNY_LOW: f32 = 100.0;
const CANNY_HIGH: f32 = 200.0;
/// Levels per channel when bucketing colours.
const COLOR_LEVELS: u8 = 4;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DominantColor {
    pub rgb: [u8; 3],
    /// Share of pixels in [0, 1].
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameStats {
    pub brightness: f64,
    pub contrast: f64,
    pub edge_density: f64,
    pub r_mean: f64,
    pub g_mean: f64,
    pub b_mean: f64,
    pub dominant: &'static str,
    pub temperature: &'static str,
    pub intensity: &'static str,
    pub dominant_colors: Vec<DominantColor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameAnalysis {
    pub stats: FrameStats,
    pub semantic_description: String,
}

/// Grey-level statistics used by the significance checks.
#[derive(Debug, Clone, Copy)]
pub struct GrayStats {
    pub mean: f64,
    pub std_dev: f64,
    pub edge_density: f64,
}

pub fn load_frame(path: &Path) -> Result<RgbImage, VisualError> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|source| VisualError::Load {
            path: path.display().to_string(),
            source,
        })
}

pub fn analyze_frame(frame: &RgbImage) -> FrameAnalysis {
    let pixel_count = (frame.width() as f64 * frame.height() as f64).max(1.0);

    let (mut sums, mut all_sum, mut all_sq) = ([0.0_f64; 3], 0.0_f64, 0.0_f64);
    for px in frame.pixels() {
        for (c, &v) in px.0.iter().enumerate() {
            let v = v as f64;
            sums[c] += v;
            all_sum += v;
            all_sq += v * v;
        }
    }

    let samples = pixel_count * 3.0;
    let brightness = all_sum / samples;
    let contrast = (all_sq / samples - brightness * brightness).max(0.0).sqrt();
    let [r_mean, g_mean, b_mean] = sums.map(|s| s / pixel_count);

    let gray = image::imageops::grayscale(frame);
    let edge_density = edge_density(&gray);

    let max_channel = r_mean.max(g_mean).max(b_mean);
    let dominant = if max_channel == r_mean {
        "red"
    } else if max_channel == g_mean {
        "green"
    } else {
        "blue"
    };

    let temperature = if r_mean > b_mean * 1.1 {
        "warm"
    } else if b_mean > r_mean * 1.1 {
        "cool"
    } else {
        "neutral"
    };

    let intensity = if max_channel < 85.0 {
        "dark"
    } else if max_channel < 170.0 {
        "muted"
    } else {
        "bright"
    };

    let semantic_description = format!(
        "{} {} with {intensity} {temperature} tones {}",
        scene_type(edge_density, r_mean, g_mean, b_mean),
        lighting(brightness),
        activity_level(edge_density),
    );

    FrameAnalysis {
        stats: FrameStats {
            brightness,
            contrast,
            edge_density,
            r_mean,
            g_mean,
            b_mean,
            dominant,
            temperature,
            intensity,
            dominant_colors: dominant_colors(frame, 3),
        },
        semantic_description,
    }
}

fn scene_type(edge_density: f64, r: f64, g: f64, b: f64) -> String {
    // sky or vegetation tends to dominate outdoor shots
    let outdoor = b > r.max(g) * 1.2 || g > r.max(b) * 1.2;
    let complexity = if edge_density < 0.05 {
        "simple"
    } else if edge_density < 0.15 {
        "moderate"
    } else {
        "complex"
    };
    format!(
        "A {complexity} {} scene",
        if outdoor { "outdoor" } else { "indoor" }
    )
}

fn lighting(brightness: f64) -> &'static str {
    if brightness < 85.0 {
        "in dim lighting"
    } else if brightness < 170.0 {
        "in moderate lighting"
    } else {
        "in bright lighting"
    }
}

fn activity_level(edge_density: f64) -> &'static str {
    if edge_density < 0.05 {
        "showing minimal movement"
    } else if edge_density < 0.15 {
        "with moderate activity"
    } else {
        "with high activity or movement"
    }
}

/// Share of pixels on the Canny edge map.
pub fn edge_density(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let edges = imageproc::edges::canny(gray, CANNY_LOW, CANNY_HIGH);
    let count = edges.pixels().filter(|p| p.0[0] > 0).count();
    count as f64 / (w as f64 * h as f64)
}

/// Most common colours after bucketing each channel into a few levels.
/// Each colour is the mean of the pixels in its bucket.
pub fn dominant_colors(frame: &RgbImage, top: usize) -> Vec<DominantColor> {
    let bucket_width = 256 / COLOR_LEVELS as u32;
    let mut buckets: HashMap<[u8; 3], (u64, [u64; 3])> = HashMap::new();

    for px in frame.pixels() {
        let key = px.0.map(|v| (v as u32 / bucket_width) as u8);
        let entry = buckets.entry(key).or_insert((0, [0; 3]));
        entry.0 += 1;
        for c in 0..3 {
            entry.1[c] += px.0[c] as u64;
        }
    }

    let total = (frame.width() as u64 * frame.height() as u64).max(1) as f64;
    let mut ranked: Vec<([u8; 3], (u64, [u64; 3]))> = buckets.into_iter().collect();
    ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(a.0.cmp(&b.0)));

    ranked
        .into_iter()
        .take(top)
        .map(|(_, (count, sums))| DominantColor {
            rgb: sums.map(|s| (s / count) as u8),
            percent: count as f64 / total,
        })
        .collect()
}

pub fn gray_stats(frame: &RgbImage) -> GrayStats {
    let gray = image::imageops::grayscale(frame);
    let n = (gray.width() as f64 * gray.height() as f64).max(1.0);
    let (sum, sq) = gray.pixels().fold((0.0_f64, 0.0_f64), |(s, q), p| {
        let v = p.0[0] as f64;
        (s + v, q + v * v)
    });
    let mean = sum / n;
    GrayStats {
        mean,
        std_dev: (sq / n - mean * mean).max(0.0).sqrt(),
        edge_density: edge_density(&gray),
    }
}

/// A frame carries visual content worth keeping: some contrast, neither
/// black nor blown out, and at least a few edges.
pub fn is_significant(stats: &GrayStats) -> bool {
    stats.std_dev > 30.0 && stats.mean > 30.0 && stats.mean < 225.0 && stats.edge_density > 0.01
}

pub fn is_key_frame(stats: &GrayStats) -> bool {
    stats.std_dev > 50.0
}

/// Mean absolute grey-level difference between two frames of equal size.
pub fn frame_difference(a: &RgbImage, b: &RgbImage) -> Option<f64> {
    if a.dimensions() != b.dimensions() {
        return None;
    }
    let (ga, gb) = (image::imageops::grayscale(a), image::imageops::grayscale(b));
    let n = (ga.width() as f64 * ga.height() as f64).max(1.0);
    let total: f64 = ga
        .pixels()
        .zip(gb.pixels())
        .map(|(p, q)| (p.0[0] as f64 - q.0[0] as f64).abs())
        .sum();
    Some(total / n)
}

/// Indexes of frames that differ from their predecessor by more than `threshold`.
pub fn significant_changes(frames: &[RgbImage], threshold: f64) -> Vec<usize> {
    frames
        .windows(2)
        .enumerate()
        .filter_map(|(i, pair)| {
            frame_difference(&pair[0], &pair[1])
                .filter(|&diff| diff > threshold)
                .map(|_| i + 1)
        })
        .collect()
}

/// The frame description handed to the language model.
pub fn visual_context(stats: &FrameStats) -> String {
    let colors = stats
        .dominant_colors
        .iter()
        .take(2)
        .map(|c| {
            format!(
                "RGB({},{},{}) at {:.1}%",
                c.rgb[0],
                c.rgb[1],
                c.rgb[2],
                c.percent * 100.0
            )
        })
        .collect::<Vec<_>>()
        .join(" and ");

    format!(
        "Frame analysis shows brightness: {:.1}, contrast: {:.1}, edge density: {:.2}. The dominant colors are: {colors}",
        stats.brightness, stats.contrast, stats.edge_density
    )
}
