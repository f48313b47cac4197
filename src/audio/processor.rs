//! # Audio Preparation
//!
//! Turns an uploaded recording into what the speech model expects: 16 kHz
//! mono `f32` in `[-1.0, 1.0]`.
//!
//! ## Steps:
//! 1. **Decode**: container and codec via symphonia, or ffmpeg for codecs
//!    symphonia has no decoder for (Opus from browser recorders)
//! 2. **Resample**: to 16 kHz with rubato
//! 3. **Clean up**: remove DC offset, normalize peak level

use super::decode::{self, DecodedAudio};
use super::{transcode, AudioError};
use rubato::{FftFixedIn, Resampler};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Sample rate the speech model is trained on.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

const RESAMPLE_CHUNK: usize = 1024;
const TARGET_PEAK: f32 = 0.85;
const MIN_PEAK: f32 = 0.003;

/// Audio preparation for transcription.
#[derive(Debug, Clone)]
pub struct AudioProcessor {
    target_rate: u32,
    /// ffmpeg binary used when symphonia cannot decode an upload.
    transcoder: Option<PathBuf>,
}

impl Default for AudioProcessor {
    fn default() -> Self {
        Self {
            target_rate: TARGET_SAMPLE_RATE,
            transcoder: None,
        }
    }
}

impl AudioProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transcoder(mut self, ffmpeg: Option<PathBuf>) -> Self {
        self.transcoder = ffmpeg;
        self
    }

    /// Decode, resample and clean up an uploaded file.
    ///
    /// `filename` is only used for its extension.
    pub fn prepare(&self, bytes: Vec<u8>, filename: Option<&str>) -> Result<Vec<f32>, AudioError> {
        let extension = filename
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        let decoded = self.decode(bytes.into(), extension.as_deref())?;
        let mut samples = self.resample(&decoded)?;
        preprocess(&mut samples);

        debug!(
            source_rate = decoded.sample_rate,
            seconds = decoded.duration_secs(),
            samples = samples.len(),
            "Prepared audio for transcription"
        );
        Ok(samples)
    }

    fn decode(&self, bytes: Arc<[u8]>, extension: Option<&str>) -> Result<DecodedAudio, AudioError> {
        let native = match decode::decode(bytes.clone(), extension) {
            Ok(decoded) => return Ok(decoded),
            Err(AudioError::Empty) => return Err(AudioError::Empty),
            Err(e) => e,
        };
        let Some(ffmpeg) = &self.transcoder else {
            return Err(native);
        };

        debug!(extension = extension.unwrap_or(""), "symphonia rejected the upload ({}), transcoding with ffmpeg", native);
        transcode::transcode(ffmpeg, &bytes).map_err(|e| {
            warn!("Audio is undecodable: symphonia: {}; ffmpeg: {}", native, e);
            e
        })
    }

    fn resample(&self, audio: &DecodedAudio) -> Result<Vec<f32>, AudioError> {
        resample(&audio.samples, audio.sample_rate, self.target_rate)
    }
}

/// Resample mono audio between rates.
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>, AudioError> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f32>::new(from as usize, to as usize, RESAMPLE_CHUNK, 2, 1)
        .map_err(|e| AudioError::Resample(e.to_string()))?;

    let expected = (samples.len() as u64 * to as u64 / from as u64) as usize;
    let mut out = Vec::with_capacity(expected + RESAMPLE_CHUNK);
    let mut position = 0;

    while samples.len() - position >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let input = [&samples[position..position + needed]];
        let chunk = resampler
            .process(&input[..], None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        out.extend_from_slice(&chunk[0]);
        position += needed;
    }

    if position < samples.len() {
        let input = [&samples[position..]];
        let chunk = resampler
            .process_partial(Some(&input[..]), None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        out.extend_from_slice(&chunk[0]);
    }

    out.resize(expected, 0.0);
    Ok(out)
}

/// Remove DC offset and bring the peak to a consistent level. Near-silent
/// input is left as is rather than amplifying noise.
pub fn preprocess(samples: &mut [f32]) {
    if samples.is_empty() {
        return;
    }

    let offset = samples.iter().sum::<f32>() / samples.len() as f32;
    for sample in samples.iter_mut() {
        *sample -= offset;
    }

    let peak = samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
    if peak < MIN_PEAK {
        return;
    }
    let scale = TARGET_PEAK / peak;
    for sample in samples.iter_mut() {
        *sample = (*sample * scale).clamp(-1.0, 1.0);
    }
}
