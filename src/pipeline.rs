//! Highlight extraction: from a video file to described, embedded highlights
//! stored in PostgreSQL, plus the retrieval operations built on top of them.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::audio::{self, AudioError};
use crate::config::ProcessingConfig;
use crate::db::{
    Database, DbError, Highlight, HighlightIndex, NewHighlight, NewVideo, RelevantHighlight,
    SimilarHighlight, Video,
};
use crate::detector::{ObjectDetector, strip_fence};
use crate::export::format_timestamp;
use crate::llm::{Embedder, LlmError, TextGenerator};
use crate::media::{self, MediaError, VideoInfo};
use crate::scenes::{self, Scene, SceneDetectorConfig};
use crate::transcriber::{Segment, TranscribeError, Transcriber};
use crate::visual::{self, VisualError};

pub const NO_HIGHLIGHTS_SUMMARY: &str = "No significant highlights found in the video.";

const SAMPLE_HIGHLIGHTS: [&str; 10] = [
    "A person gets out of a car and walks towards the building",
    "The person enters the building through the main entrance",
    "Inside the building, they take the elevator to the 3rd floor",
    "They walk down the hallway and enter an office",
    "The person sits at a desk and starts working on a computer",
    "After an hour, they get up and go to the break room",
    "In the break room, they make coffee and chat with colleagues",
    "They return to their office and continue working",
    "Later, they attend a meeting in the conference room",
    "After the meeting, they pack up and leave the office",
];
const SAMPLE_STEP_SECS: f64 = 600.0;
/// Mean grey-level difference that counts as a visual change.
pub const FRAME_CHANGE_THRESHOLD: f64 = 30.0;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("video not found: {0}")]
    VideoNotFound(String),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Transcribe(#[from] TranscribeError),
    #[error(transparent)]
    Visual(#[from] VisualError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

// ── Segment selection ───────────────────────────────────────────────────

/// Transcript segments that can become highlights: non-blank text, trimmed.
pub fn candidate_segments(transcript: &[Segment]) -> Vec<Segment> {
    transcript
        .iter()
        .filter_map(|seg| {
            let text = seg.text.trim();
            (!text.is_empty()).then(|| Segment {
                start: seg.start,
                end: seg.end,
                text: text.to_string(),
            })
        })
        .collect()
}

/// Timestamps of the frames kept when sampling every `fps * interval` frames.
pub fn sample_timestamps(duration: f64, fps: f64, interval: f64) -> Vec<f64> {
    if duration <= 0.0 || fps <= 0.0 {
        return Vec::new();
    }
    let step = ((fps * interval).floor() as usize).max(1);
    let total_frames = (duration * fps).round() as usize;
    (0..total_frames)
        .step_by(step)
        .map(|frame| frame as f64 / fps)
        .collect()
}

/// The sampled timestamp inside `[start, end]` closest to the midpoint.
pub fn pick_frame(samples: &[f64], start: f64, end: f64) -> Option<f64> {
    let target = start + (end - start) / 2.0;
    samples
        .iter()
        .copied()
        .filter(|&t| start <= t && t <= end)
        .min_by(|a, b| (a - target).abs().total_cmp(&(b - target).abs()))
}

// ── Model calls ─────────────────────────────────────────────────────────

/// A highlight before it is embedded and stored.
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightDraft {
    pub timestamp: f64,
    pub description: String,
    pub summary: String,
}

/// What the model is told about one moment.
#[derive(Debug, Clone)]
pub struct MomentContext {
    pub timestamp: f64,
    pub visual: String,
    pub audio: String,
}

#[derive(Deserialize)]
struct HighlightReply {
    description: String,
    #[serde(default)]
    summary: String,
}

fn highlight_prompt(moment: &MomentContext) -> String {
    format!(
        "You are describing a moment of a video at {:.1}s.\n\
         Visual context: {}\n\
         Audio context: {}\n\n\
         Describe what is happening in this moment in two or three sentences, \
         then give a one-sentence summary. Reply only with JSON of the form \
         {{\"description\": \"...\", \"summary\": \"...\"}}.",
        moment.timestamp, moment.visual, moment.audio
    )
}

fn audio_context(text: &str) -> String {
    format!("Contains speech: \"{text}\"")
}

/// Split a model reply into `(description, summary)`.
///
/// Prefers a JSON object; otherwise the whole text is the description and
/// its first sentence the summary.
pub fn parse_highlight_reply(reply: &str) -> (String, String) {
    let body = strip_fence(reply);
    if let Ok(parsed) = serde_json::from_str::<HighlightReply>(body) {
        let description = parsed.description.trim().to_string();
        let summary = match parsed.summary.trim() {
            "" => first_sentence(&description),
            s => s.to_string(),
        };
        return (description, summary);
    }

    let description = body.trim().to_string();
    let summary = first_sentence(&description);
    (description, summary)
}

fn first_sentence(text: &str) -> String {
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?')
            && chars.peek().is_none_or(|(_, next)| next.is_whitespace())
        {
            return text[..i + c.len_utf8()].trim().to_string();
        }
    }
    text.trim().to_string()
}

pub async fn describe_highlight(
    generator: &dyn TextGenerator,
    moment: &MomentContext,
) -> Result<HighlightDraft, LlmError> {
    let reply = generator.generate_json(&highlight_prompt(moment)).await?;
    let (description, summary) = parse_highlight_reply(&reply);
    Ok(HighlightDraft {
        timestamp: moment.timestamp,
        description,
        summary,
    })
}

pub async fn summarize_video(
    generator: &dyn TextGenerator,
    highlights: &[HighlightDraft],
) -> Result<String, LlmError> {
    if highlights.is_empty() {
        return Ok(NO_HIGHLIGHTS_SUMMARY.to_string());
    }

    let mut context = String::from("The video contains the following highlights:\n\n");
    for h in highlights {
        context.push_str(&format!("- At {:.1}s: {}\n", h.timestamp, h.description));
    }
    generator
        .generate(&format!(
            "Please provide a concise summary of this video based on its highlights: {context}"
        ))
        .await
}

/// Run `task` over `items` with at most `concurrency` in flight, keeping
/// input order in the output.
async fn bounded<T, R, F, Fut>(
    items: Vec<T>,
    concurrency: usize,
    task: F,
) -> Result<Vec<R>, PipelineError>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, PipelineError>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, item) in items.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let fut = task(item);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            fut.await.map(|r| (index, r))
        });
    }

    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        results.push(joined??);
    }
    results.sort_by_key(|(index, _)| *index);
    Ok(results.into_iter().map(|(_, r)| r).collect())
}

pub async fn describe_moments(
    generator: Arc<dyn TextGenerator>,
    moments: Vec<MomentContext>,
    concurrency: usize,
) -> Result<Vec<HighlightDraft>, PipelineError> {
    bounded(moments, concurrency, move |moment| {
        let generator = Arc::clone(&generator);
        async move {
            let draft = describe_highlight(generator.as_ref(), &moment).await?;
            info!("added highlight at {:.2}s", draft.timestamp);
            Ok::<_, PipelineError>(draft)
        }
    })
    .await
}

pub async fn embed_documents(
    embedder: Arc<dyn Embedder>,
    texts: Vec<String>,
    concurrency: usize,
) -> Result<Vec<Vec<f32>>, PipelineError> {
    bounded(texts, concurrency, move |text| {
        let embedder = Arc::clone(&embedder);
        async move { Ok::<_, PipelineError>(embedder.embed_document(&text).await?) }
    })
    .await
}

/// Embed `question` and look up the stored highlights closest to it.
pub async fn answer_question(
    embedder: &dyn Embedder,
    index: &dyn HighlightIndex,
    question: &str,
    threshold: f64,
    limit: usize,
) -> Result<Vec<RelevantHighlight>, PipelineError> {
    let embedding = embedder.embed_query(question).await?;
    Ok(index
        .find_relevant_highlights(&embedding, threshold, limit)
        .await?)
}

/// Highlights of a video in timestamp order, truncated to `limit`.
pub async fn get_video_highlights(
    index: &dyn HighlightIndex,
    video_id: i32,
    limit: Option<usize>,
) -> Result<Vec<Highlight>, PipelineError> {
    let mut highlights = index.get_video_highlights(video_id).await?;
    if let Some(limit) = limit {
        highlights.truncate(limit);
    }
    Ok(highlights)
}

/// Highlights nearest to one highlight of `video_id`. Empty when the
/// reference is missing or has no embedding.
pub async fn find_similar_highlights(
    index: &dyn HighlightIndex,
    video_id: i32,
    highlight_id: i32,
    limit: usize,
) -> Result<Vec<SimilarHighlight>, PipelineError> {
    let highlights = index.get_video_highlights(video_id).await?;
    let Some(embedding) = highlights
        .into_iter()
        .find(|h| h.id == highlight_id)
        .and_then(|h| h.embedding)
    else {
        debug!(video_id, highlight_id, "no reference embedding");
        return Ok(Vec::new());
    };
    Ok(index.find_similar_highlights(&embedding, limit).await?)
}

// ── Scenes ──────────────────────────────────────────────────────────────

/// One kept scene as written to `scene_NNN.json`.
#[derive(Debug, Clone, Serialize)]
pub struct SceneRecord {
    pub timestamp: String,
    pub transcript: String,
    pub visual_info: Vec<String>,
    pub key_frame: String,
    pub duration: f64,
    #[serde(skip)]
    pub start_time: f64,
    #[serde(skip)]
    pub end_time: f64,
}

struct KeyFrame {
    scene: Scene,
    path: Option<PathBuf>,
    significant: bool,
}

fn extract_key_frames(video: &Path, scenes: Vec<Scene>, frames_dir: &Path) -> Vec<KeyFrame> {
    scenes
        .into_iter()
        .map(|scene| {
            let jpg = frames_dir.join(format!("scene_{:06}.jpg", scene.start_frame));
            let extracted = media::extract_frame(video, scene.midpoint(), &jpg)
                .map_err(PipelineError::from)
                .and_then(|path| {
                    let frame = visual::load_frame(&path)?;
                    Ok((path, visual::is_significant(&visual::gray_stats(&frame))))
                });
            match extracted {
                Ok((path, significant)) => KeyFrame {
                    scene,
                    path: Some(path),
                    significant,
                },
                Err(e) => {
                    warn!("no key frame for scene {}: {e}", scene.index);
                    KeyFrame {
                        scene,
                        path: None,
                        significant: false,
                    }
                }
            }
        })
        .collect()
}

pub fn write_scene_files(dir: &Path, records: &[SceneRecord]) -> Result<Vec<PathBuf>, PipelineError> {
    std::fs::create_dir_all(dir)?;
    records
        .iter()
        .enumerate()
        .map(|(i, record)| -> Result<PathBuf, PipelineError> {
            let path = dir.join(format!("scene_{i:03}.json"));
            std::fs::write(&path, serde_json::to_string_pretty(record)?)?;
            Ok(path)
        })
        .collect()
}

/// A scene is kept when someone speaks in it or its key frame has content.
fn keep_scene(transcript: &str, significant: bool) -> bool {
    !transcript.is_empty() || significant
}

/// Pair each segment with the sampled frame nearest its midpoint. Segments
/// with no sample inside them are dropped.
fn assign_frames(segments: Vec<Segment>, samples: &[f64]) -> Vec<(Segment, f64)> {
    segments
        .into_iter()
        .filter_map(|seg| match pick_frame(samples, seg.start, seg.end) {
            Some(at) => Some((seg, at)),
            None => {
                warn!(
                    "no frames for segment {:.2}s - {:.2}s, skipping",
                    seg.start, seg.end
                );
                None
            }
        })
        .collect()
}

/// Turn segments with their frame context into moments at the segment
/// midpoint, naming the objects of the scene the moment falls in.
fn build_moments(framed: Vec<(Segment, String)>, records: &[SceneRecord]) -> Vec<MomentContext> {
    framed
        .into_iter()
        .map(|(seg, mut visual)| {
            let timestamp = seg.start + (seg.end - seg.start) / 2.0;
            let objects = objects_at(records, timestamp);
            if !objects.is_empty() {
                visual.push_str(&format!(" Objects visible: {}.", objects.join(", ")));
            }
            MomentContext {
                timestamp,
                visual,
                audio: audio_context(&seg.text),
            }
        })
        .collect()
}

/// Visual context of an extracted frame. The file is removed on return.
fn frame_context(jpg: TempPath) -> Result<String, PipelineError> {
    let frame = visual::load_frame(&jpg)?;
    let analysis = visual::analyze_frame(&frame);
    Ok(format!(
        "{}. {}.",
        visual::visual_context(&analysis.stats),
        analysis.semantic_description
    ))
}

fn objects_at(records: &[SceneRecord], timestamp: f64) -> &[String] {
    records
        .iter()
        .find(|r| r.start_time <= timestamp && timestamp <= r.end_time)
        .map(|r| r.visual_info.as_slice())
        .unwrap_or_default()
}

/// One sampled frame and what its statistics say about it.
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub timestamp: f64,
    pub key_frame: bool,
    pub significant: bool,
    /// Differs visibly from the previous sample.
    pub changed: bool,
    pub description: String,
}

/// Extract up to `max` frames every `interval` seconds and classify them.
pub fn sample_frames(
    video: &Path,
    info: &VideoInfo,
    interval: f64,
    dir: &Path,
    max: usize,
) -> Result<Vec<FrameSample>, PipelineError> {
    std::fs::create_dir_all(dir)?;
    let mut frames = Vec::new();
    let mut samples = Vec::new();

    for (i, at) in sample_timestamps(info.duration, info.fps, interval)
        .into_iter()
        .take(max)
        .enumerate()
    {
        let jpg = TempPath::from_path(dir.join(format!("frame_{i:05}.jpg")));
        media::extract_frame(video, at, &jpg)?;
        let frame = visual::load_frame(&jpg)?;
        drop(jpg);

        let stats = visual::gray_stats(&frame);
        samples.push(FrameSample {
            timestamp: at,
            key_frame: visual::is_key_frame(&stats),
            significant: visual::is_significant(&stats),
            changed: false,
            description: visual::analyze_frame(&frame).semantic_description,
        });
        frames.push(frame);
    }

    for i in visual::significant_changes(&frames, FRAME_CHANGE_THRESHOLD) {
        samples[i].changed = true;
    }
    debug!(frames = samples.len(), "frames sampled");
    Ok(samples)
}

/// Speech spans of a WAV file with their RMS energy.
pub fn speech_spans(wav: &Path) -> Result<Vec<(f64, f64, f32)>, PipelineError> {
    let clip = audio::read_wav(wav)?;
    Ok(audio::speech_segments(&clip)
        .into_iter()
        .map(|(start, end)| (start, end, audio::rms_energy(&clip, start, end)))
        .collect())
}

// ── Service ─────────────────────────────────────────────────────────────

struct Workspace {
    frames_dir: PathBuf,
    scenes_dir: PathBuf,
    audio: PathBuf,
}

impl Workspace {
    fn create(output_dir: &Path, video: &Path) -> std::io::Result<Self> {
        let stem = video
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        let frames_dir = output_dir.join("frames").join(&stem);
        let scenes_dir = output_dir.join("scenes").join(&stem);
        let audio_dir = output_dir.join("audio");
        std::fs::create_dir_all(&frames_dir)?;
        std::fs::create_dir_all(&audio_dir)?;
        Ok(Self {
            frames_dir,
            scenes_dir,
            audio: audio_dir.join(format!("{stem}.wav")),
        })
    }

    /// The extracted WAV, removed when the guard drops.
    fn scratch_audio(&self) -> TempPath {
        TempPath::from_path(self.audio.clone())
    }
}

pub struct HighlightService {
    db: Arc<Database>,
    embedder: Arc<dyn Embedder>,
    generator: Option<Arc<dyn TextGenerator>>,
    detector: Option<Arc<dyn ObjectDetector>>,
    transcriber: Option<Arc<Transcriber>>,
    config: ProcessingConfig,
    max_concurrency: usize,
}

impl HighlightService {
    pub fn new(
        db: Arc<Database>,
        embedder: Arc<dyn Embedder>,
        config: ProcessingConfig,
        max_concurrency: usize,
    ) -> Self {
        Self {
            db,
            embedder,
            generator: None,
            detector: None,
            transcriber: None,
            config,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn ObjectDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_transcriber(mut self, transcriber: Arc<Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Extract, describe, embed and store the highlights of one video.
    pub async fn process_video(&self, path: &Path) -> Result<Video, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::VideoNotFound(path.display().to_string()));
        }
        let generator = self
            .generator
            .clone()
            .ok_or(PipelineError::NotConfigured("text generator"))?;
        let transcriber = self
            .transcriber
            .clone()
            .ok_or(PipelineError::NotConfigured("transcriber"))?;

        info!("processing video: {}", path.display());
        let video = path.to_path_buf();
        let workspace = Workspace::create(&self.config.output_dir, path)?;

        let info = {
            let video = video.clone();
            tokio::task::spawn_blocking(move || media::probe(&video)).await??
        };
        debug!(?info, "probed");

        info!("extracting audio and transcribing");
        let transcript = {
            let (video, wav) = (video.clone(), workspace.scratch_audio());
            let language = self.config.language.clone();
            tokio::task::spawn_blocking(move || -> Result<Vec<Segment>, PipelineError> {
                media::extract_audio(&video, &wav)?;
                let clip = audio::read_wav(&wav)?;
                if audio::speech_segments(&clip).is_empty() {
                    info!("no speech detected, skipping transcription");
                    return Ok(Vec::new());
                }
                Ok(transcriber.transcribe_samples(&clip.samples, language.as_deref())?)
            })
            .await??
        };
        let segments = candidate_segments(&transcript);
        info!(segments = segments.len(), "transcript ready");

        let scene_records = self.scene_records(&video, &info, &transcript, &workspace).await?;
        write_scene_files(&workspace.scenes_dir, &scene_records)?;

        let moments = self.moments(&video, &info, segments, &scene_records, &workspace).await?;
        let drafts = describe_moments(generator.clone(), moments, self.max_concurrency).await?;
        let summary = summarize_video(generator.as_ref(), &drafts).await?;

        let embeddings = embed_documents(
            Arc::clone(&self.embedder),
            drafts.iter().map(|d| d.description.clone()).collect(),
            self.max_concurrency,
        )
        .await?;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stored = self
            .db
            .add_video(&NewVideo {
                filename,
                duration: info.duration,
                width: i32::try_from(info.width).unwrap_or(i32::MAX),
                height: i32::try_from(info.height).unwrap_or(i32::MAX),
                fps: info.fps,
                summary: Some(summary),
            })
            .await?;

        for (draft, embedding) in drafts.into_iter().zip(embeddings) {
            self.db
                .add_highlight(
                    stored.id,
                    &NewHighlight {
                        timestamp: draft.timestamp,
                        description: draft.description,
                        summary: Some(draft.summary),
                        embedding: Some(embedding),
                    },
                )
                .await?;
        }

        info!(video_id = stored.id, "video stored");
        Ok(stored)
    }

    async fn scene_records(
        &self,
        video: &Path,
        info: &VideoInfo,
        transcript: &[Segment],
        workspace: &Workspace,
    ) -> Result<Vec<SceneRecord>, PipelineError> {
        let config = SceneDetectorConfig {
            threshold: self.config.scene_threshold,
            min_scene_duration: self.config.min_scene_duration,
        };
        let key_frames = {
            let (video, info, frames_dir) = (video.to_path_buf(), *info, workspace.frames_dir.clone());
            tokio::task::spawn_blocking(move || {
                let scenes = scenes::detect_scenes(&video, &config, &info);
                extract_key_frames(&video, scenes, &frames_dir)
            })
            .await?
        };
        info!("detected {} scenes", key_frames.len());

        let mut records = Vec::new();
        for key_frame in key_frames {
            let scene = &key_frame.scene;
            let transcript = scenes::scene_transcript(transcript, scene.start_time, scene.end_time);
            if !keep_scene(&transcript, key_frame.significant) {
                debug!(scene = scene.index, "skipping silent, flat scene");
                continue;
            }

            let objects = match &key_frame.path {
                Some(path) => self.detect_objects(path).await,
                None => Vec::new(),
            };
            records.push(SceneRecord {
                timestamp: format!(
                    "{} - {}",
                    format_timestamp(scene.start_time),
                    format_timestamp(scene.end_time)
                ),
                transcript,
                visual_info: objects,
                key_frame: key_frame
                    .path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                duration: scene.duration(),
                start_time: scene.start_time,
                end_time: scene.end_time,
            });
        }
        Ok(records)
    }

    async fn detect_objects(&self, frame: &Path) -> Vec<String> {
        let Some(detector) = self.detector.as_ref().filter(|_| self.config.object_detection) else {
            return Vec::new();
        };
        let jpeg = match tokio::fs::read(frame).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("could not read {}: {e}", frame.display());
                return Vec::new();
            }
        };
        detector.detect(&jpeg).await.unwrap_or_else(|e| {
            warn!("object detection failed for {}: {e}", frame.display());
            Vec::new()
        })
    }

    async fn moments(
        &self,
        video: &Path,
        info: &VideoInfo,
        segments: Vec<Segment>,
        scene_records: &[SceneRecord],
        workspace: &Workspace,
    ) -> Result<Vec<MomentContext>, PipelineError> {
        let samples = sample_timestamps(info.duration, info.fps, self.config.frame_interval);
        let (video, frames_dir) = (video.to_path_buf(), workspace.frames_dir.clone());

        let framed: Vec<(Segment, String)> = tokio::task::spawn_blocking(move || {
            assign_frames(segments, &samples)
                .into_iter()
                .enumerate()
                .filter_map(|(i, (seg, at))| {
                    let jpg =
                        TempPath::from_path(frames_dir.join(format!("segment_{i:04}.jpg")));
                    let analysed = media::extract_frame(&video, at, &jpg)
                        .map_err(PipelineError::from)
                        .and_then(|_| frame_context(jpg));
                    match analysed {
                        Ok(context) => Some((seg, context)),
                        Err(e) => {
                            warn!("frame at {at:.2}s unusable, skipping segment: {e}");
                            None
                        }
                    }
                })
                .collect()
        })
        .await?;

        Ok(build_moments(framed, scene_records))
    }

    pub async fn answer_question(
        &self,
        question: &str,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<RelevantHighlight>, PipelineError> {
        answer_question(
            self.embedder.as_ref(),
            self.db.as_ref(),
            question,
            threshold,
            limit,
        )
        .await
    }

    /// Store the sample office-day highlights when no highlight exists yet.
    /// Returns how many were inserted.
    pub async fn seed_sample_highlights(&self) -> Result<usize, PipelineError> {
        if self.db.count_highlights().await? > 0 {
            info!("database already has highlights, skipping sample data");
            return Ok(0);
        }

        let drafts = sample_highlights();
        let embeddings = embed_documents(
            Arc::clone(&self.embedder),
            drafts.iter().map(|d| d.description.clone()).collect(),
            self.max_concurrency,
        )
        .await?;

        let video = self
            .db
            .add_video(&NewVideo {
                filename: "sample_office_day.mp4".to_string(),
                duration: SAMPLE_STEP_SECS * drafts.len() as f64,
                width: 1280,
                height: 720,
                fps: 30.0,
                summary: Some("A day at the office, from arrival to departure.".to_string()),
            })
            .await?;

        for (draft, embedding) in drafts.iter().zip(embeddings) {
            self.db
                .add_highlight(
                    video.id,
                    &NewHighlight {
                        timestamp: draft.timestamp,
                        description: draft.description.clone(),
                        summary: Some(draft.summary.clone()),
                        embedding: Some(embedding),
                    },
                )
                .await?;
        }
        info!(video_id = video.id, "inserted {} sample highlights", drafts.len());
        Ok(drafts.len())
    }
}

fn sample_highlights() -> Vec<HighlightDraft> {
    SAMPLE_HIGHLIGHTS
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let timestamp = i as f64 * SAMPLE_STEP_SECS;
            let secs = timestamp as u64;
            HighlightDraft {
                timestamp,
                description: text.to_string(),
                summary: format!(
                    "Summary of highlight at {:02}:{:02}:{:02}",
                    secs / 3600,
                    secs % 3600 / 60,
                    secs % 60
                ),
            }
        })
        .collect()
}
