use std::path::Path;

use tracing::debug;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::audio::{self, AudioError};

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    #[error("model file not found: {0} (download a ggml model from https://github.com/ggml-org/whisper.cpp)")]
    ModelNotFound(String),
    #[error("whisper error: {0}")]
    Whisper(#[from] whisper_rs::WhisperError),
    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// A loaded whisper.cpp model. Loading is expensive, so one instance is
/// reused for every file of a run.
pub struct Transcriber {
    ctx: WhisperContext,
}

impl Transcriber {
    pub fn new(model_path: &Path) -> Result<Self, TranscribeError> {
        if !model_path.exists() {
            return Err(TranscribeError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let model = model_path.to_string_lossy();
        let ctx = WhisperContext::new_with_params(&model, WhisperContextParameters::default())?;
        Ok(Self { ctx })
    }

    /// Transcribe 16kHz mono samples.
    ///
    /// - `language`: optional language code (e.g. "en", "it"). `None` for auto-detection.
    pub fn transcribe_samples(
        &self,
        samples: &[f32],
        language: Option<&str>,
    ) -> Result<Vec<Segment>, TranscribeError> {
        if samples.is_empty() {
            return Ok(Vec::new());
        }

        let mut state = self.ctx.create_state()?;

        let mut params = FullParams::new(SamplingStrategy::BeamSearch {
            beam_size: 5,
            patience: -1.0,
        });
        params.set_language(language);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state.full(params, samples)?;

        let segments: Vec<Segment> = state
            .as_iter()
            .map(|seg| Segment {
                start: seg.start_timestamp() as f64 / 100.0,
                end: seg.end_timestamp() as f64 / 100.0,
                text: seg
                    .to_str_lossy()
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
            })
            .collect();

        debug!(segments = segments.len(), "transcription finished");
        Ok(segments)
    }

    /// Transcribe a WAV file (expected at 16kHz, interpreted as-is otherwise).
    pub fn transcribe_file(
        &self,
        wav: &Path,
        language: Option<&str>,
    ) -> Result<Vec<Segment>, TranscribeError> {
        let clip = audio::read_wav(wav)?;
        self.transcribe_samples(&clip.samples, language)
    }

    /// Transcribe only the audio between `start` and `end` seconds and join
    /// the result into one string.
    pub fn transcribe_range(
        &self,
        wav: &Path,
        start: f64,
        end: f64,
        language: Option<&str>,
    ) -> Result<String, TranscribeError> {
        let clip = audio::read_wav(wav)?;
        let segments = self.transcribe_samples(clip.slice(start, end), language)?;
        Ok(join_text(&segments))
    }
}

fn join_text(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| s.text.as_str())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format segments as a console table.
pub fn format_table(segments: &[Segment]) -> comfy_table::Table {
    let mut table = comfy_table::Table::new();
    table.set_header(["#", "Start", "End", "Text"]);

    for (i, seg) in segments.iter().enumerate() {
        table.add_row([
            (i + 1).to_string(),
            crate::export::format_timestamp(seg.start),
            crate::export::format_timestamp(seg.end),
            seg.text.clone(),
        ]);
    }

    table
}

/// One transcript line as written to text files: `[1.00s - 2.50s] text`.
pub fn format_transcript_line(segment: &Segment) -> String {
    format!(
        "[{:.2}s - {:.2}s] {}",
        segment.start, segment.end, segment.text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64, text: &str) -> Segment {
        Segment {
            start,
            end,
            text: text.to_string(),
        }
    }

    #[test]
    fn missing_model_is_reported() {
        let err = Transcriber::new(Path::new("models/does-not-exist.bin")).err().unwrap();
        assert!(matches!(err, TranscribeError::ModelNotFound(_)));
    }

    #[test]
    fn transcript_lines_use_two_decimals() {
        assert_eq!(
            format_transcript_line(&seg(1.0, 2.5, "hello there")),
            "[1.00s - 2.50s] hello there"
        );
    }

    #[test]
    fn joined_text_skips_empty_segments() {
        let segments = [seg(0.0, 1.0, "one"), seg(1.0, 2.0, ""), seg(2.0, 3.0, "two")];
        assert_eq!(join_text(&segments), "one two");
    }

    #[test]
    fn table_has_a_row_per_segment() {
        let table = format_table(&[seg(0.0, 1.0, "a"), seg(1.0, 2.0, "b")]);
        assert_eq!(table.row_iter().count(), 2);
    }
}
