use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("WAV file not found: {0}")]
    FileNotFound(String),
    #[error("failed to read WAV: {0}")]
    Wav(String),
}

const HOP_LENGTH: usize = 512;
const SPEECH_THRESHOLD: f32 = 0.05;
const MIN_SPEECH_DURATION: f64 = 0.3;

/// Mono PCM samples in [-1, 1].
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Samples between `start` and `end` seconds, clamped to the clip.
    pub fn slice(&self, start: f64, end: f64) -> &[f32] {
        let to_index = |t: f64| ((t.max(0.0) * self.sample_rate as f64) as usize).min(self.samples.len());
        let (from, to) = (to_index(start), to_index(end));
        if from >= to { &[] } else { &self.samples[from..to] }
    }
}

/// Read a WAV file and return mono f32 samples.
pub fn read_wav(path: &Path) -> Result<AudioClip, AudioError> {
    if !path.exists() {
        return Err(AudioError::FileNotFound(path.display().to_string()));
    }

    let reader = hound::WavReader::open(path)
        .map_err(|e| AudioError::Wav(format!("{}: {e}", path.display())))?;

    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .filter_map(Result::ok)
            .collect(),
        hound::SampleFormat::Int => {
            let max_val = (1u32 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .filter_map(Result::ok)
                .map(|s| s as f32 / max_val)
                .collect()
        }
    };

    let channels = spec.channels.max(1) as usize;
    let mono = if channels > 1 {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    } else {
        samples
    };

    Ok(AudioClip {
        samples: mono,
        sample_rate: spec.sample_rate,
    })
}

/// Find spans that contain speech using a normalised amplitude envelope.
///
/// The envelope is the summed absolute amplitude of each 512-sample hop.
/// Hops above 5% of the loudest hop count as speech; runs shorter than
/// 0.3s are dropped.
pub fn speech_segments(clip: &AudioClip) -> Vec<(f64, f64)> {
    if clip.samples.is_empty() || clip.sample_rate == 0 {
        return Vec::new();
    }

    let envelope: Vec<f32> = clip
        .samples
        .chunks(HOP_LENGTH)
        .map(|hop| hop.iter().map(|s| s.abs()).sum())
        .collect();

    let peak = envelope.iter().copied().fold(0.0_f32, f32::max);
    if peak <= 0.0 {
        return Vec::new();
    }

    let hop_secs = HOP_LENGTH as f64 / clip.sample_rate as f64;
    let mut segments = Vec::new();
    let mut run_start: Option<usize> = None;

    for (i, energy) in envelope.iter().enumerate() {
        let is_speech = energy / peak > SPEECH_THRESHOLD;
        match (is_speech, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                if (i - start) as f64 * hop_secs >= MIN_SPEECH_DURATION {
                    segments.push((start as f64 * hop_secs, i as f64 * hop_secs));
                }
                run_start = None;
            }
            _ => {}
        }
    }

    // A run that reaches the end of the clip ends at the clip duration
    if let Some(start) = run_start {
        if (envelope.len() - start) as f64 * hop_secs >= MIN_SPEECH_DURATION {
            segments.push((start as f64 * hop_secs, clip.duration()));
        }
    }

    segments
}

/// Root-mean-square energy between `start` and `end` seconds.
pub fn rms_energy(clip: &AudioClip, start: f64, end: f64) -> f32 {
    let slice = clip.slice(start, end);
    if slice.is_empty() {
        return 0.0;
    }
    let mean_square = slice.iter().map(|s| s * s).sum::<f32>() / slice.len() as f32;
    mean_square.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;

    fn clip_from(parts: &[(f64, f32)]) -> AudioClip {
        let mut samples = Vec::new();
        for &(secs, amplitude) in parts {
            let n = (secs * RATE as f64) as usize;
            samples.extend((0..n).map(|i| if i % 2 == 0 { amplitude } else { -amplitude }));
        }
        AudioClip { samples, sample_rate: RATE }
    }

    #[test]
    fn silence_has_no_speech() {
        let clip = clip_from(&[(2.0, 0.0)]);
        assert!(speech_segments(&clip).is_empty());
    }

    #[test]
    fn loud_runs_become_segments() {
        let clip = clip_from(&[(1.0, 0.0), (1.0, 0.5), (1.0, 0.0), (0.5, 0.4)]);
        let segments = speech_segments(&clip);
        assert_eq!(segments.len(), 2);

        let (start, end) = segments[0];
        assert!((start - 1.0).abs() < 0.05, "start {start}");
        assert!((end - 2.0).abs() < 0.05, "end {end}");

        // trailing run ends exactly at the clip end
        let (start, end) = segments[1];
        assert!((start - 3.0).abs() < 0.05, "start {start}");
        assert!((end - clip.duration()).abs() < 1e-9);
    }

    #[test]
    fn short_bursts_are_dropped() {
        let clip = clip_from(&[(1.0, 0.0), (0.1, 0.8), (1.0, 0.0)]);
        assert!(speech_segments(&clip).is_empty());
    }

    #[test]
    fn rms_of_constant_amplitude() {
        let clip = clip_from(&[(1.0, 0.5), (1.0, 0.0)]);
        assert!((rms_energy(&clip, 0.0, 1.0) - 0.5).abs() < 1e-4);
        assert_eq!(rms_energy(&clip, 1.0, 2.0), 0.0);
        assert_eq!(rms_energy(&clip, 5.0, 6.0), 0.0);
    }

    #[test]
    fn slice_is_clamped() {
        let clip = clip_from(&[(1.0, 0.1)]);
        assert_eq!(clip.slice(-1.0, 0.5).len(), 8_000);
        assert_eq!(clip.slice(0.5, 9.0).len(), 8_000);
        assert!(clip.slice(0.8, 0.2).is_empty());
    }

    #[test]
    fn reads_stereo_int_wav_as_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(i16::MAX / 2).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let clip = read_wav(&path).unwrap();
        assert_eq!(clip.sample_rate, RATE);
        assert_eq!(clip.samples.len(), 100);
        assert!((clip.samples[0] - 0.25).abs() < 0.01);
    }

    #[test]
    fn missing_wav_is_reported() {
        assert!(matches!(
            read_wav(Path::new("/no/such/file.wav")),
            Err(AudioError::FileNotFound(_))
        ));
    }
}
