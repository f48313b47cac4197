//! # Audio Module
//!
//! Decodes uploaded recordings and prepares them for the speech model.
//!
//! ## Key Components:
//! - **Decoder**: container/codec decoding and downmix (`decode`)
//! - **Transcoder**: ffmpeg fallback for codecs symphonia lacks (`transcode`)
//! - **Audio Processor**: resampling to 16 kHz and level clean-up (`processor`)
//!
//! ## Output Format:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Channels**: Mono (1 channel)
//! - **Samples**: `f32` in `[-1.0, 1.0]`

pub mod decode;
pub mod processor;
pub mod transcode;

pub use processor::{AudioProcessor, TARGET_SAMPLE_RATE};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio is empty")]
    Empty,

    #[error("no decodable audio track")]
    NoTrack,

    #[error("audio track has no sample rate")]
    UnknownSampleRate,

    #[error("unsupported or corrupt audio: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    #[error("transcoding failed: {0}")]
    Transcode(String),

    #[error("resampling failed: {0}")]
    Resample(String),
}
