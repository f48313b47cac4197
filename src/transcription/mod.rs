//! # Transcription Module
//!
//! Speech-to-text with Whisper via the Candle framework, without FFI bindings
//! to whisper.cpp.
//!
//! ## Key Components:
//! - **Whisper Model**: checkpoint loading and greedy decoding (`model`)
//! - **Transcription Engine**: the process-wide lazily loaded model and the
//!   [`Transcriber`] seam the document service depends on (`engine`)
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest but least accurate
//! - **base**: ~74MB, the default
//! - **small**: ~244MB, better accuracy
//! - **medium**: ~769MB, good technical vocabulary
//! - **large**: ~1550MB, best accuracy but slowest

pub mod engine;
pub mod model;

pub use engine::{Transcriber, TranscriptionConfig, TranscriptionStats, WhisperTranscriber};
pub use model::ModelSize;
